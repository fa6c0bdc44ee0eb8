//! TaskExecutor port - タスク実行ケイパビリティ（LLM 駆動）の抽象化
//!
//! 実行内容はこのクレートからは不透明。リクエストと期限を渡し、
//! 成功/失敗・出力・コスト・トークン数を受け取るだけ。

use async_trait::async_trait;
use tokio::time::Instant;

use super::context::TaskContext;
use crate::domain::{ExecutionError, ExecutionOutcome, TaskRequest};

/// Everything the capability gets for one task. Owned, so the invocation can
/// run on its own tokio task.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub request: TaskRequest,
    pub context: TaskContext,
    /// Absolute deadline. The caller cancels the invocation when it passes.
    pub deadline: Instant,
    /// Agent identifier of this process.
    pub knight: String,
}

/// Cancellation is by drop: implementations must release what they hold
/// (child processes, connections) when the future is dropped mid-flight.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, ExecutionError>;
}
