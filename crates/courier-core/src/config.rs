//! Dispatcher configuration and fixed timing policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ConfigError, ConsumerDescriptor, StreamDescriptor, subject};

/// Identity and limits of one dispatcher process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Topic-prefix namespace shared by the fleet.
    pub fleet_id: String,
    /// This agent; reported as `knight` in every result.
    pub agent_id: String,
    /// Subject filters, one durable consumer each.
    pub subjects: Vec<String>,
    /// Overrides the agent-derived durable consumer name.
    #[serde(default)]
    pub durable_name: Option<String>,
    pub task_timeout_ms: u64,
    pub max_concurrent_tasks: usize,
}

impl DispatcherConfig {
    pub fn new(fleet_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let fleet_id = fleet_id.into();
        Self {
            subjects: vec![subject::default_task_subject(&fleet_id)],
            fleet_id,
            agent_id: agent_id.into(),
            durable_name: None,
            task_timeout_ms: 600_000,
            max_concurrent_tasks: 2,
        }
    }

    pub fn with_subjects<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subjects = subjects.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_durable_name(mut self, name: impl Into<String>) -> Self {
        self.durable_name = Some(name.into());
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n;
        self
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fleet_id.trim().is_empty() {
            return Err(ConfigError::Empty("fleet_id"));
        }
        if self.agent_id.trim().is_empty() {
            return Err(ConfigError::Empty("agent_id"));
        }
        if self.subjects.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::NoSubjects);
        }
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.task_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn stream(&self) -> StreamDescriptor {
        StreamDescriptor {
            name: subject::stream_name(&self.fleet_id),
            subjects: subject::stream_subjects(&self.fleet_id),
        }
    }

    /// One descriptor per non-empty subject, in configuration order.
    pub fn consumers(&self) -> Vec<ConsumerDescriptor> {
        let subjects: Vec<&str> = self
            .subjects
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        let stream_name = subject::stream_name(&self.fleet_id);

        subjects
            .iter()
            .map(|filter| {
                ConsumerDescriptor::new(
                    stream_name.clone(),
                    subject::durable_name(
                        &self.agent_id,
                        self.durable_name.as_deref(),
                        filter,
                        subjects.len(),
                    ),
                    *filter,
                    self.task_timeout(),
                )
            })
            .collect()
    }
}

/// Timing constants of the pull loop and the retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Messages requested per pull.
    pub batch_size: usize,
    /// Bounded wait of one pull.
    pub fetch_expires: Duration,
    /// Sleep when the gate is saturated.
    pub saturated_backoff: Duration,
    /// Sleep after a transient pull error.
    pub error_backoff: Duration,
    /// Redelivery delay requested on nak.
    pub nak_delay: Duration,
}

impl DispatchPolicy {
    pub fn standard() -> Self {
        Self {
            batch_size: 1,
            fetch_expires: Duration::from_secs(30),
            saturated_backoff: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
            nak_delay: Duration::from_secs(10),
        }
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::standard()
    }
}
