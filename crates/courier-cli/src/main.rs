//! courier - JetStream task dispatcher
//!
//! Pulls tasks from `{fleet}.tasks.>` (or the configured subjects), runs each
//! one through the executor command under a deadline, and publishes the result
//! to the reply subject.
//!
//! Usage:
//!   courier --fleet-id fleet-a --agent-id agent-1 --skills-dir ./skills

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use courier_core::impls::{
    CommandExecutor, ConnectionStatus, NatsBus, SkillCatalog, SkillContextResolver,
};
use courier_core::ports::{ContextResolver, EmptyContext, MessageBus};
use courier_core::{DispatcherBuilder, DispatcherConfig};

#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Pull tasks from NATS JetStream, execute them, publish results")]
struct Args {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    nats_url: String,

    /// Fleet namespace (subject prefix)
    #[arg(long, env = "FLEET_ID", default_value = "fleet")]
    fleet_id: String,

    /// This agent's id; reported as `knight` in results
    #[arg(long, env = "AGENT_ID", default_value = "agent")]
    agent_id: String,

    /// Subjects to consume (comma-separated). Defaults to `{fleet}.tasks.>`
    #[arg(long, env = "NATS_SUBJECTS", value_delimiter = ',')]
    subjects: Vec<String>,

    /// Durable consumer name override
    #[arg(long, env = "NATS_DURABLE_NAME")]
    durable_name: Option<String>,

    /// Per-task deadline in milliseconds
    #[arg(long, env = "TASK_TIMEOUT_MS", default_value_t = 600_000)]
    task_timeout_ms: u64,

    /// Max tasks executing at once
    #[arg(long, env = "MAX_CONCURRENT_TASKS", default_value_t = 2)]
    max_concurrent_tasks: usize,

    /// Skills directory; no catalog when unset
    #[arg(long, env = "SKILLS_DIR")]
    skills_dir: Option<PathBuf>,

    /// Top-level skill categories to expose (comma-separated); `shared` is always exposed
    #[arg(long, env = "SKILL_CATEGORIES", value_delimiter = ',')]
    skill_categories: Vec<String>,

    /// Executor command
    #[arg(long = "executor", env = "EXECUTOR_COMMAND", default_value = "claude")]
    executor_command: String,

    /// Working directory of the executor
    #[arg(long, env = "EXECUTOR_WORKDIR")]
    workdir: Option<PathBuf>,
}

impl Args {
    fn dispatcher_config(&self) -> DispatcherConfig {
        let mut config = DispatcherConfig::new(&self.fleet_id, &self.agent_id)
            .with_task_timeout(Duration::from_millis(self.task_timeout_ms))
            .with_max_concurrent_tasks(self.max_concurrent_tasks);
        let subjects: Vec<&String> = self
            .subjects
            .iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if !subjects.is_empty() {
            config = config.with_subjects(subjects.into_iter().map(|s| s.trim().to_string()));
        }
        if let Some(name) = &self.durable_name {
            config = config.with_durable_name(name);
        }
        config
    }

    fn context(&self) -> Arc<dyn ContextResolver> {
        match &self.skills_dir {
            Some(dir) => Arc::new(SkillContextResolver::new(
                SkillCatalog::new(dir).with_categories(self.skill_categories.iter().cloned()),
            )),
            None => Arc::new(EmptyContext),
        }
    }

    fn executor(&self) -> CommandExecutor {
        let executor = CommandExecutor::new(&self.executor_command);
        match &self.workdir {
            Some(dir) => executor.with_workdir(dir),
            None => executor,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let app = DispatcherBuilder::new(args.dispatcher_config())
        .executor(Arc::new(args.executor()))
        .context(args.context())
        .build()
        .context("invalid dispatcher configuration")?;

    info!(
        fleet_id = %app.config().fleet_id,
        agent_id = %app.config().agent_id,
        subjects = ?app.config().subjects,
        max_concurrent_tasks = app.config().max_concurrent_tasks,
        task_timeout_ms = app.config().task_timeout_ms,
        "starting courier"
    );

    let bus = match NatsBus::connect(&args.nats_url, &args.agent_id).await {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            // stay up without a bus; only Ctrl-C ends the process
            error!(error = %e, "failed to connect to nats; running without task consumption");
            wait_for_ctrl_c().await?;
            return Ok(());
        }
    };

    tokio::spawn(log_connection_changes(bus.subscribe_status()));
    let dispatcher = app.start(Arc::clone(&bus) as Arc<dyn MessageBus>).await;
    wait_for_ctrl_c().await?;

    info!("shutting down; waiting for in-flight tasks");
    dispatcher.shutdown_and_join().await;
    if let Err(e) = bus.flush().await {
        error!(error = %e, "failed to flush nats connection");
    }
    info!(connection = ?bus.status(), "shutdown complete");
    Ok(())
}

/// Logs connection transitions until the connection is closed for good.
async fn log_connection_changes(mut status: watch::Receiver<ConnectionStatus>) {
    while status.changed().await.is_ok() {
        let current = *status.borrow_and_update();
        match current {
            ConnectionStatus::Connected => info!("nats connected"),
            ConnectionStatus::Disconnected => warn!("nats disconnected; reconnecting"),
            ConnectionStatus::Closed => {
                warn!("nats connection closed; dispatch loops will stop");
                return;
            }
            ConnectionStatus::Pending => {}
        }
    }
}

async fn wait_for_ctrl_c() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("courier").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_follow_the_fleet_id() {
        let config = parse(&["--fleet-id", "fleet-a", "--agent-id", "a1"]).dispatcher_config();
        assert_eq!(config.subjects, vec!["fleet-a.tasks.>".to_string()]);
        assert_eq!(config.task_timeout_ms, 600_000);
        assert_eq!(config.max_concurrent_tasks, 2);
        assert!(config.durable_name.is_none());
    }

    #[test]
    fn subjects_are_comma_separated() {
        let config = parse(&[
            "--subjects",
            "fleet.tasks.ops.>,fleet.tasks.dev.>",
            "--durable-name",
            "ops",
        ])
        .dispatcher_config();
        assert_eq!(config.subjects, vec!["fleet.tasks.ops.>", "fleet.tasks.dev.>"]);
        assert_eq!(config.durable_name.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn connection_logger_stops_on_close() {
        let (tx, rx) = watch::channel(ConnectionStatus::Pending);
        let logger = tokio::spawn(log_connection_changes(rx));

        tx.send(ConnectionStatus::Connected).unwrap();
        tx.send(ConnectionStatus::Disconnected).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!logger.is_finished());

        tx.send(ConnectionStatus::Closed).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), logger)
            .await
            .expect("logger did not stop after close")
            .unwrap();
    }
}
