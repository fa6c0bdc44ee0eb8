//! CommandExecutor - CLI エージェント（`claude -p`）を子プロセスとして呼び出す
//!
//! # 振る舞い
//! - 1 タスク = 1 子プロセス。`--output-format json` の出力をパースする
//! - `kill_on_drop(true)`: 期限切れで future が drop されると子プロセスも kill
//! - 非ゼロ終了やパース不能な出力は失敗した ExecutionOutcome として返す

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::{ExecutionError, ExecutionOutcome, TokenUsage};
use crate::ports::{ExecutionRequest, TaskExecutor};

/// Subset of `claude -p --output-format json`.
#[derive(Debug, Deserialize)]
struct CliOutput {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    usage: Option<CliUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CliUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

pub struct CommandExecutor {
    program: String,
    workdir: Option<PathBuf>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            workdir: None,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, ExecutionError> {
        let prompt = build_prompt(&request);
        info!(
            program = %self.program,
            prompt = truncate(&prompt, 80),
            "invoking executor"
        );

        let mut command = Command::new(&self.program);
        command
            .arg("-p")
            .arg(&prompt)
            .arg("--output-format")
            .arg("json")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(workdir) = &self.workdir {
            command.current_dir(workdir);
        }

        let output = command
            .output()
            .await
            .map_err(|e| {
                ExecutionError::Capability(format!("failed to spawn {}: {e}", self.program))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output.status.code().unwrap_or(-1);
            warn!(code, stderr = %truncate(&stderr, 200), "executor exited with failure");
            // the CLI still reports is_error/result on stdout for most failures
            if let Some(outcome) = parse_output(&stdout) {
                return Ok(ExecutionOutcome {
                    success: false,
                    ..outcome
                });
            }
            let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
            return Ok(ExecutionOutcome::failure(format!(
                "{} exited with code {code}: {detail}",
                self.program
            )));
        }

        Ok(parse_output(&stdout).unwrap_or_else(|| {
            debug!("executor output is not json; using raw text");
            ExecutionOutcome::success(stdout.trim())
        }))
    }
}

fn parse_output(stdout: &str) -> Option<ExecutionOutcome> {
    let parsed: CliOutput = serde_json::from_str(stdout.trim()).ok()?;
    let text = parsed.result.unwrap_or_default();
    let mut outcome = if parsed.is_error {
        ExecutionOutcome {
            output: text.clone(),
            ..ExecutionOutcome::failure(if text.is_empty() {
                "executor reported an error".to_string()
            } else {
                text
            })
        }
    } else {
        ExecutionOutcome::success(text)
    };
    outcome.cost = parsed.total_cost_usd;
    outcome.tokens = parsed.usage.map(|u| TokenUsage {
        input: u.input_tokens,
        output: u.output_tokens,
    });
    outcome.duration_ms = parsed.duration_ms;
    outcome.model = parsed.model;
    Some(outcome)
}

/// Task text, then the skill to follow, then the catalog of other skills.
fn build_prompt(request: &ExecutionRequest) -> String {
    let task = &request.request;
    let mut prompt = String::new();

    let instructions = task
        .metadata
        .skill_content
        .as_deref()
        .or(request.context.skill_instructions.as_deref());
    if let Some(instructions) = instructions {
        let name = task.skill().unwrap_or("skill");
        prompt.push_str(&format!("## Skill: {name}\n\n{instructions}\n\n"));
    }

    if !request.context.skills.is_empty() {
        prompt.push_str("## Available skills\n\n");
        for skill in &request.context.skills {
            prompt.push_str(&format!(
                "- {} ({}): {}\n",
                skill.name, skill.category, skill.description
            ));
        }
        prompt.push('\n');
    }

    if prompt.is_empty() {
        return task.message.clone();
    }
    prompt.push_str(&format!("## Task\n\n{}", task.message));
    prompt
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SkillSummary, TaskMessage, TaskRequest};
    use crate::ports::TaskContext;
    use std::time::Duration;
    use tokio::time::Instant;

    fn execution(payload: &str, context: TaskContext) -> ExecutionRequest {
        ExecutionRequest {
            request: TaskRequest::from_message(&TaskMessage::new("f.tasks.ops.t1", payload)),
            context,
            deadline: Instant::now() + Duration::from_secs(5),
            knight: "agent-1".to_string(),
        }
    }

    #[test]
    fn parses_cli_json_with_usage() {
        let outcome = parse_output(
            r#"{"type":"result","result":"pong","is_error":false,"total_cost_usd":0.01,
                "duration_ms":1200,"usage":{"input_tokens":5,"output_tokens":7}}"#,
        )
        .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, "pong");
        assert_eq!(outcome.cost, Some(0.01));
        assert_eq!(outcome.tokens, Some(TokenUsage { input: 5, output: 7 }));
        assert_eq!(outcome.duration_ms, Some(1200));
    }

    #[test]
    fn cli_reported_error_is_a_failed_outcome() {
        let outcome = parse_output(r#"{"result":"rate limited","is_error":true}"#).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn plain_task_is_sent_as_is() {
        let req = execution("ping", TaskContext::default());
        assert_eq!(build_prompt(&req), "ping");
    }

    #[test]
    fn prompt_includes_skill_and_catalog() {
        let context = TaskContext {
            skills: vec![SkillSummary {
                name: "deploy".into(),
                description: "Ship it".into(),
                path: PathBuf::from("/skills/ops/deploy"),
                category: "ops".into(),
            }],
            skill_instructions: Some("Run the pipeline.".into()),
        };
        let req = execution(r#"{"message":"ship v2","skill":"deploy"}"#, context);
        let prompt = build_prompt(&req);
        assert!(prompt.starts_with("## Skill: deploy\n\nRun the pipeline."));
        assert!(prompt.contains("- deploy (ops): Ship it"));
        assert!(prompt.ends_with("## Task\n\nship v2"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_program_is_a_capability_error() {
        let executor = CommandExecutor::new("/nonexistent/courier-test-binary");
        let err = executor
            .execute(execution("ping", TaskContext::default()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::domain::ErrorKind::Capability);
    }
}
