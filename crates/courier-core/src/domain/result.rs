//! Result contract published back to the requester.

use serde::{Deserialize, Serialize};

use super::errors::ExecutionError;
use super::request::TaskRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

/// What the task-execution capability reports back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub cost: Option<f64>,
    pub tokens: Option<TokenUsage>,
    /// Duration as measured by the capability itself, if it reports one.
    pub duration_ms: Option<u64>,
    pub model: Option<String>,
}

impl ExecutionOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, cost: f64, tokens: TokenUsage) -> Self {
        self.cost = Some(cost);
        self.tokens = Some(tokens);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Wire shape of a published result.
///
/// ```json
/// { "taskId": "abc", "knight": "agent-1", "success": true, "output": "pong",
///   "durationMs": 12 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub knight: String,
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl TaskResult {
    /// Build from a capability outcome. The capability's own duration wins
    /// over the wall-clock duration measured by the caller.
    pub fn from_outcome(
        request: &TaskRequest,
        knight: &str,
        outcome: ExecutionOutcome,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            task_id: request.task_id().to_string(),
            knight: knight.to_string(),
            success: outcome.success,
            output: outcome.output,
            error: if outcome.success {
                outcome.error
            } else {
                Some(
                    outcome
                        .error
                        .unwrap_or_else(|| "task execution failed".to_string()),
                )
            },
            cost: outcome.cost,
            tokens: outcome.tokens,
            duration_ms: outcome.duration_ms.unwrap_or(elapsed_ms),
            model: outcome.model,
        }
    }

    pub fn from_error(
        request: &TaskRequest,
        knight: &str,
        error: &ExecutionError,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            task_id: request.task_id().to_string(),
            knight: knight.to_string(),
            success: false,
            output: String::new(),
            error: Some(error.to_string()),
            cost: None,
            tokens: None,
            duration_ms: elapsed_ms,
            model: None,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
