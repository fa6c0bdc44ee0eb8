//! ConsumerManager - durable pull consumer の冪等な準備
//!
//! # 設計原則
//! - 「既に存在する」は成功として扱う
//! - それ以外の作成エラーもログに残して握りつぶす（既存の consumer が
//!   使える前提。使えなければ fetch 側のエラーとして表に出る）

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::DispatcherConfig;
use crate::domain::{BusError, ConsumerDescriptor, StreamDescriptor};
use crate::ports::MessageBus;

/// Result of one `ensure` call, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyExists,
    /// Creation failed for another reason; the error was logged and swallowed.
    Skipped(String),
}

pub struct ConsumerManager {
    bus: Arc<dyn MessageBus>,
}

impl ConsumerManager {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    /// Ensure the fleet stream and one consumer per configured subject.
    /// Never fails; returns the descriptors to dispatch from.
    pub async fn ensure_all(&self, config: &DispatcherConfig) -> Vec<ConsumerDescriptor> {
        self.ensure_stream(&config.stream()).await;

        let consumers = config.consumers();
        for consumer in &consumers {
            self.ensure(consumer).await;
        }
        consumers
    }

    pub async fn ensure_stream(&self, stream: &StreamDescriptor) {
        match self.bus.ensure_stream(stream).await {
            Ok(()) => info!(stream = %stream.name, subjects = ?stream.subjects, "stream ready"),
            Err(e) => warn!(
                stream = %stream.name,
                error = %e,
                "failed to ensure stream; assuming it is usable"
            ),
        }
    }

    /// Create-if-absent. Safe to call repeatedly with the same descriptor.
    pub async fn ensure(&self, consumer: &ConsumerDescriptor) -> EnsureOutcome {
        match self.bus.create_consumer(consumer).await {
            Ok(()) => {
                info!(
                    stream = %consumer.stream_name,
                    durable = %consumer.durable_name,
                    filter = %consumer.filter_subject,
                    ack_wait_ms = consumer.ack_wait.as_millis() as u64,
                    "durable consumer created"
                );
                EnsureOutcome::Created
            }
            Err(BusError::ConsumerExists(_)) => {
                info!(durable = %consumer.durable_name, "durable consumer already exists");
                EnsureOutcome::AlreadyExists
            }
            Err(e) => {
                warn!(
                    durable = %consumer.durable_name,
                    error = %e,
                    "failed to create durable consumer; assuming the existing one is usable"
                );
                EnsureOutcome::Skipped(e.to_string())
            }
        }
    }
}
