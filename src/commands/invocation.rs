//! Parsed command invocations.

use serde::Serialize;
use std::collections::HashMap;

use crate::types::{CallerId, ChannelId, GuildId, InvocationId};

/// Who invoked a command, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerContext {
    pub caller: CallerId,
    pub channel: Option<ChannelId>,
    pub guild: Option<GuildId>,
}

impl CallerContext {
    pub fn user(id: u64) -> Self {
        Self {
            caller: CallerId::user(id),
            channel: None,
            guild: None,
        }
    }

    pub fn console() -> Self {
        Self {
            caller: CallerId::console(),
            channel: None,
            guild: None,
        }
    }

    pub fn in_channel(mut self, guild: GuildId, channel: ChannelId) -> Self {
        self.guild = Some(guild);
        self.channel = Some(channel);
        self
    }
}

/// One command call. Immutable once handed to the dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct CommandInvocation {
    pub id: InvocationId,
    pub name: String,
    /// Named options, raw values.
    pub arguments: HashMap<String, String>,
    /// Bare values, bound to parameters in declaration order.
    pub positional: Vec<String>,
    pub caller: CallerContext,
}

impl CommandInvocation {
    pub fn new(name: impl Into<String>, caller: CallerContext) -> Self {
        Self {
            id: InvocationId::new(),
            name: name.into(),
            arguments: HashMap::new(),
            positional: Vec::new(),
            caller,
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub fn positional_arg(mut self, value: impl Into<String>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Parse a chat line like `$deploy target=web note="first try"`.
    ///
    /// The prefix match is case-insensitive. Returns `None` when the line is
    /// not a command (wrong prefix or no name).
    pub fn parse_prefixed(line: &str, prefix: &str, caller: CallerContext) -> Option<Self> {
        let line = line.trim_start();
        let head = line.get(..prefix.len())?;
        if prefix.is_empty() || !head.eq_ignore_ascii_case(prefix) {
            return None;
        }

        let mut tokens = tokenize(&line[prefix.len()..]).into_iter();
        let name = tokens.next().filter(|t| !t.contains('='))?;

        let mut invocation = Self::new(name.to_lowercase(), caller);
        for token in tokens {
            match token.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    invocation.arguments.insert(key.to_lowercase(), value.to_string());
                }
                _ => invocation.positional.push(token),
            }
        }
        Some(invocation)
    }
}

/// Split on whitespace, keeping quoted runs together and dropping the quotes.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}
