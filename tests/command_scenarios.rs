//! Command dispatch scenarios: the full parse → dispatch → classify → reply
//! path, escalation and cooldown behavior.

use async_trait::async_trait;
use eva01::commands::{
    classify, handler_fn, CallerContext, CapturedError, CommandDispatcher, CommandFailure,
    CommandInvocation, CommandSpec, CooldownSpec, DispatchError, ErrorKind, ParamDef, ParamType,
    Response, GENERIC_FAILURE_MESSAGE,
};
use eva01::sinks::ExceptionSink;
use eva01::types::{ChannelId, GuildId, IdentityConfig, Secret};
use eva01::{AgentConfig, AgentContext, Error, LifecyclePhase};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct RecordingExceptions {
    commands: Mutex<Vec<(ErrorKind, String)>>,
}

#[async_trait]
impl ExceptionSink for RecordingExceptions {
    async fn report_command(&self, captured: &CapturedError) {
        let cause = captured
            .source_error()
            .map(ToString::to_string)
            .unwrap_or_default();
        self.commands.lock().await.push((captured.kind(), cause));
    }

    async fn report_lifecycle(&self, _phase: LifecyclePhase, _error: &Error) {}
}

fn dispatcher() -> (CommandDispatcher, Arc<RecordingExceptions>) {
    let context = AgentContext::new(AgentConfig::new(IdentityConfig {
        token: Secret::new("token"),
        default_guild_id: GuildId(10),
        stdout_channel_id: ChannelId(20),
        bot_name: "EVA-01".to_string(),
        prefix: "$".to_string(),
    }));
    let exceptions = Arc::new(RecordingExceptions::default());
    (CommandDispatcher::new(context, exceptions.clone()), exceptions)
}

fn counter_handler(calls: &Arc<AtomicUsize>, reply: &'static str) -> CommandSpec {
    let calls = calls.clone();
    CommandSpec::new(
        "counter",
        "Counts calls",
        handler_fn(move |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Response::text(reply))
            }
        }),
    )
}

fn captured(err: DispatchError) -> CapturedError {
    match err {
        DispatchError::Captured(captured) => captured,
        other => panic!("expected captured error, got {}", other),
    }
}

#[tokio::test]
async fn test_ping_scenario() {
    let (d, exceptions) = dispatcher();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut ping = counter_handler(&calls, "Pong.");
    ping.name = "ping".to_string();
    d.register(ping).await.unwrap();

    let invocation =
        CommandInvocation::parse_prefixed("$PING", "$", CallerContext::user(1)).unwrap();
    assert_eq!(d.handle(invocation).await.reply, "Pong.");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(exceptions.commands.lock().await.is_empty());
}

#[tokio::test]
async fn test_echo_missing_text_scenario() {
    let (d, exceptions) = dispatcher();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut echo = counter_handler(&calls, "unused")
        .param(ParamDef::new("text", ParamType::String, "Text to repeat"));
    echo.name = "echo".to_string();
    d.register(echo).await.unwrap();

    let err = d
        .dispatch(CommandInvocation::new("echo", CallerContext::user(1)))
        .await
        .unwrap_err();
    let captured = captured(err);
    assert_eq!(captured.kind(), ErrorKind::MissingArguments);
    assert!(matches!(&captured.cause, CommandFailure::MissingArguments(names) if names == &["text"]));

    let classification = classify(&captured);
    assert!(classification.caller_message.contains("text"));
    assert!(!classification.escalate);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(exceptions.commands.lock().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deploy_cooldown_scenario() {
    let (d, _) = dispatcher();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut deploy = counter_handler(&calls, "Test deploy - core.")
        .cooldown(CooldownSpec::once_per(Duration::from_secs(30)));
    deploy.name = "deploy".to_string();
    d.register(deploy).await.unwrap();

    let caller = CallerContext::user(77);
    let first = d
        .dispatch(CommandInvocation::new("deploy", caller.clone()))
        .await
        .unwrap();
    assert_eq!(first.content, "Test deploy - core.");

    let second = captured(
        d.dispatch(CommandInvocation::new("deploy", caller.clone()))
            .await
            .unwrap_err(),
    );
    match second.cause {
        CommandFailure::Cooldown { retry_after } => {
            assert_eq!(retry_after, Duration::from_secs(30))
        }
        ref other => panic!("expected cooldown, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        d.handle(CommandInvocation::new("deploy", caller)).await.reply,
        "Command is in cooldown. Try again in 30 seconds"
    );
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_remaining_is_non_increasing() {
    let (d, _) = dispatcher();
    let calls = Arc::new(AtomicUsize::new(0));
    d.register(
        counter_handler(&calls, "ok").cooldown(CooldownSpec::new(2, Duration::from_secs(10))),
    )
    .await
    .unwrap();

    let caller = CallerContext::user(5);
    for _ in 0..2 {
        d.dispatch(CommandInvocation::new("counter", caller.clone()))
            .await
            .unwrap();
    }

    let mut previous = Duration::MAX;
    for step in 0..6 {
        tokio::time::advance(Duration::from_millis(300 * step)).await;
        let failure = captured(
            d.dispatch(CommandInvocation::new("counter", caller.clone()))
                .await
                .unwrap_err(),
        );
        let CommandFailure::Cooldown { retry_after } = failure.cause else {
            panic!("expected cooldown");
        };
        assert!(retry_after <= previous);
        previous = retry_after;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Other callers are unaffected.
    assert!(d
        .dispatch(CommandInvocation::new("counter", CallerContext::user(6)))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_invalid_option_from_parsed_line() {
    let (d, _) = dispatcher();
    let calls = Arc::new(AtomicUsize::new(0));
    d.register(
        counter_handler(&calls, "ok")
            .param(ParamDef::new("times", ParamType::Int, "How many").with_default(1.into())),
    )
    .await
    .unwrap();

    let reply = d
        .handle(
            CommandInvocation::parse_prefixed("$counter times=lots", "$", CallerContext::user(1))
                .unwrap(),
        )
        .await
        .reply;
    assert_eq!(reply, "The 'times' option is invalid.");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_escalation_reaches_sink_exactly_once_with_original_cause() {
    let (d, exceptions) = dispatcher();
    d.register(CommandSpec::new(
        "broken",
        "Fails in its body",
        handler_fn(|_| async { Err(Error::command("upstream returned 502")) }),
    ))
    .await
    .unwrap();

    let handled = d
        .handle(CommandInvocation::new("broken", CallerContext::user(3)))
        .await;
    assert_eq!(handled.reply, GENERIC_FAILURE_MESSAGE);
    assert!(exceptions.commands.lock().await.is_empty());
    handled.finish().await;

    let reported = exceptions.commands.lock().await;
    assert_eq!(
        *reported,
        vec![(
            ErrorKind::InvocationError,
            "command failed: upstream returned 502".to_string()
        )]
    );
}

#[tokio::test]
async fn test_concurrent_invocations_are_independent() {
    let (d, _) = dispatcher();
    let d = Arc::new(d);
    d.register(
        CommandSpec::new(
            "slow",
            "Sleeps then echoes",
            handler_fn(|ctx| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Response::text(ctx.arg_str("text").unwrap_or_default()))
            }),
        )
        .param(ParamDef::new("text", ParamType::String, "Text")),
    )
    .await
    .unwrap();

    let mut tasks = Vec::new();
    for i in 0..8u64 {
        let d = d.clone();
        tasks.push(tokio::spawn(async move {
            d.handle(
                CommandInvocation::new("slow", CallerContext::user(i)).arg("text", i.to_string()),
            )
            .await
            .reply
        }));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap(), i.to_string());
    }
}
