//! Scripted command replies

use std::sync::Arc;

use super::MockFs;

/// What a scripted command does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Exit zero after printing `output`
    Ok { output: String },
    /// Run, print `output`, then exit non-zero
    Fail { message: String, output: String },
    /// The agent could not run the command at all
    Transport(String),
    /// Run until cancelled
    Block,
}

impl Reply {
    pub fn ok(output: impl Into<String>) -> Self {
        Reply::Ok { output: output.into() }
    }

    pub fn fail(message: impl Into<String>, output: impl Into<String>) -> Self {
        Reply::Fail {
            message: message.into(),
            output: output.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Reply::Transport(message.into())
    }

    pub fn block() -> Self {
        Reply::Block
    }
}

/// The command a handler is answering, with the agent's file tree
pub struct MockRun<'a> {
    pub builder: &'a str,
    pub cmd: &'a str,
    pub args: &'a [String],
    pub env: &'a [(String, String)],
    pub dir: Option<&'a str>,
    pub fs: &'a mut MockFs,
}

impl MockRun<'_> {
    pub fn env_value(&self, key: &str) -> Option<&str> {
        env_value(self.env, key)
    }
}

pub type ExecHandler = Arc<dyn Fn(&mut MockRun<'_>) -> Reply + Send + Sync>;

/// A recorded `exec` call
#[derive(Debug, Clone)]
pub struct ExecCall {
    pub agent: u64,
    pub builder: String,
    pub cmd: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub dir: Option<String>,
}

impl ExecCall {
    pub fn env_value(&self, key: &str) -> Option<&str> {
        env_value(&self.env, key)
    }
}

fn env_value<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
    env.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}
