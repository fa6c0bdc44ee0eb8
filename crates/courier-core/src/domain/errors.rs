//! Errors - エラー型と分類
//!
//! - [`ExecutionError`]: 1 タスクの処理失敗（結果として publish され、nak される）
//! - [`BusError`]: メッセージバスの操作エラー
//! - [`ConfigError`]: 起動時の設定検証エラー

use std::time::Duration;

use thiserror::Error;

/// ErrorKind は実行エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Deadline reached; the invocation was cancelled.
    Timeout,
    /// The capability itself returned an error.
    Capability,
    /// Per-task state could not be resolved.
    Context,
    /// The invocation panicked or was aborted unexpectedly.
    Panicked,
}

#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("task timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("task execution failed: {0}")]
    Capability(String),

    #[error("failed to resolve task context: {0}")]
    Context(String),

    #[error("task execution aborted: {0}")]
    Panicked(String),
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::Timeout(_) => ErrorKind::Timeout,
            ExecutionError::Capability(_) => ErrorKind::Capability,
            ExecutionError::Context(_) => ErrorKind::Context,
            ExecutionError::Panicked(_) => ErrorKind::Panicked,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The consumer already exists; callers treat this as success.
    #[error("consumer {0} already exists")]
    ConsumerExists(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("consumer error: {0}")]
    Consumer(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("ack failed: {0}")]
    Ack(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_concurrent_tasks must be at least 1")]
    ZeroConcurrency,

    #[error("task_timeout must be greater than zero")]
    ZeroTimeout,

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("no subjects to subscribe to")]
    NoSubjects,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_the_budget() {
        let err = ExecutionError::Timeout(Duration::from_millis(100));
        assert_eq!(err.to_string(), "task timed out after 100ms");
        assert!(err.is_timeout());
        assert_eq!(
            ExecutionError::Capability("boom".into()).kind(),
            ErrorKind::Capability
        );
    }
}
