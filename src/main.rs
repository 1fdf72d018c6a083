//! eva01 agent binary.
//!
//! Reads configuration from the environment (a `.env` file is honored),
//! brings the agent up, serves prefixed commands typed on stdin and shuts
//! down on Ctrl+C or the `shutdown` command.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use eva01::commands::{register_builtins, CallerContext, CommandDispatcher, CommandInvocation};
use eva01::resources::{CacheHandle, SessionHandle, StoreHandle};
use eva01::sinks::{LogNotifier, NotificationSink, RestNotifier, TracingExceptionSink};
use eva01::types::{ChannelId, GuildId, IdentityConfig, Secret};
use eva01::{AgentConfig, LifecycleController};

#[derive(Parser, Debug)]
#[command(name = "eva01", version, about = "Chat agent with scheduled jobs and prefixed commands")]
struct Cli {
    /// Platform auth token.
    #[arg(long, env = "TOKEN", hide_env_values = true)]
    token: String,

    /// Default guild for command registration.
    #[arg(long, env = "DEFAULT_GUILD_ID")]
    default_guild_id: u64,

    /// Channel receiving lifecycle notifications.
    #[arg(long, env = "STDOUT_CHANNEL_ID")]
    stdout_channel_id: u64,

    /// Display name used in notifications.
    #[arg(long, env = "BOT_NAME")]
    bot_name: String,

    /// Command prefix.
    #[arg(long, env = "EVA_PREFIX", default_value = "$")]
    prefix: String,

    /// SQLite database file.
    #[arg(long, env = "EVA_DATABASE", default_value = "./data/database.sqlite3")]
    database: PathBuf,

    /// Schema script applied when the store opens.
    #[arg(long, env = "EVA_SCHEMA", default_value = "./data/build.sql")]
    schema: PathBuf,

    /// Script run by the `deploy` command.
    #[arg(long, env = "EVA_DEPLOY_SCRIPT", default_value = "./scripts/deploy.sh")]
    deploy_script: PathBuf,

    /// Log notifications instead of posting them to the chat platform.
    #[arg(long)]
    log_notifications: bool,

    /// Do not read commands from stdin.
    #[arg(long)]
    no_console: bool,
}

impl Cli {
    fn config(&self) -> AgentConfig {
        let mut config = AgentConfig::new(IdentityConfig {
            token: Secret::new(self.token.clone()),
            default_guild_id: GuildId(self.default_guild_id),
            stdout_channel_id: ChannelId(self.stdout_channel_id),
            bot_name: self.bot_name.clone(),
            prefix: self.prefix.clone(),
        });
        config.store.path = self.database.clone();
        config.store.schema_path = self.schema.clone();
        config.deploy.script = self.deploy_script.clone();
        config
    }
}

async fn console(dispatcher: Arc<CommandDispatcher>, prefix: String, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                let Some(invocation) =
                    CommandInvocation::parse_prefixed(&line, &prefix, CallerContext::console())
                else {
                    continue;
                };
                let handled = dispatcher.handle(invocation).await;
                println!("{}", handled.reply);
                handled.finish().await;
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("console_read_failed: error={}", e);
                break;
            }
        }
    }
    tracing::debug!("console_closed");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    eva01::observability::init_tracing();

    let cli = Cli::parse();
    let config = cli.config();

    let notifier: Arc<dyn NotificationSink> = if cli.log_notifications {
        Arc::new(LogNotifier)
    } else {
        Arc::new(RestNotifier::new(
            &config.notifier,
            &config.session,
            config.identity.token.clone(),
        )?)
    };

    let store = config.store.clone();
    let session = config.session.clone();
    let prefix = config.identity.prefix.clone();

    let controller = LifecycleController::new(config, notifier, Arc::new(TracingExceptionSink));
    controller
        .register_resource(Arc::new(CacheHandle::new()), true)
        .await?;
    controller
        .register_resource(Arc::new(StoreHandle::new(store)), true)
        .await?;
    controller
        .register_resource(Arc::new(SessionHandle::new(session)), false)
        .await?;

    let dispatcher = controller.dispatcher();
    register_builtins(&dispatcher).await?;

    controller.start().await?;

    let shutdown = controller.context().shutdown.clone();
    let console_task = if cli.no_console {
        None
    } else {
        Some(tokio::spawn(console(dispatcher, prefix, shutdown.clone())))
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("signal_handler_failed: error={}", e);
            }
            tracing::info!("interrupt_received");
        }
        _ = shutdown.cancelled() => {}
    }

    let report = controller.stop().await;
    if let Some(task) = console_task {
        task.abort();
    }
    for failure in report.failures() {
        if let Err(e) = &failure.result {
            eprintln!("release of '{}' failed: {}", failure.name, e);
        }
    }

    Ok(())
}
