use std::time::Duration;

use crate::types::FieldMap;

/// Work the session defers instead of doing inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferred {
    /// Idempotent teardown of whatever connection is open when it runs.
    Disconnect,
    /// Send a batched command built by the debouncer.
    PostCommand(FieldMap),
}

/// Delayed-task sink the session depends on.
///
/// Implementations must hand `task` back to the session no earlier than
/// `delay` from now, at least once.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Deferred);
}
