//! ContextResolver port - タスクごとの外部状態の解決
//!
//! キャッシュしない: 各タスクは直近に永続化された状態を見る。

use async_trait::async_trait;

use crate::domain::{ExecutionError, SkillSummary, TaskRequest};

/// Per-task view of externally maintained state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskContext {
    /// Lightweight catalog, for prompt assembly.
    pub skills: Vec<SkillSummary>,
    /// Full instructions of the skill the request names, when it names one
    /// and does not already carry the content inline.
    pub skill_instructions: Option<String>,
}

#[async_trait]
pub trait ContextResolver: Send + Sync {
    async fn resolve(&self, request: &TaskRequest) -> Result<TaskContext, ExecutionError>;
}

/// Resolver for deployments without external state.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyContext;

#[async_trait]
impl ContextResolver for EmptyContext {
    async fn resolve(&self, _request: &TaskRequest) -> Result<TaskContext, ExecutionError> {
        Ok(TaskContext::default())
    }
}
