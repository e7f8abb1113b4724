//! State shared by a mock pool and every agent it created

use std::collections::HashMap;

use super::{ExecCall, ExecHandler};

#[derive(Default)]
pub struct MockState {
    /// (builder filter, command, handler); builder-specific entries win
    pub(super) handlers: Vec<(Option<String>, String, ExecHandler)>,
    /// builder -> message returned by `create`
    pub(super) create_failures: HashMap<String, String>,
    pub(super) calls: Vec<ExecCall>,
    pub(super) events: Vec<String>,
    pub(super) created: usize,
    pub(super) closed: usize,
    pub(super) next_id: u64,
}

impl MockState {
    pub(super) fn handler(&self, builder: &str, cmd: &str) -> Option<ExecHandler> {
        let specific = self
            .handlers
            .iter()
            .rev()
            .find(|(b, c, _)| b.as_deref() == Some(builder) && c == cmd);
        let any = || self.handlers.iter().rev().find(|(b, c, _)| b.is_none() && c == cmd);
        specific.or_else(any).map(|(_, _, handler)| handler.clone())
    }
}
