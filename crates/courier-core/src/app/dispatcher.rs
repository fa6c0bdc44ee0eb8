use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::dispatch_loop::DispatchLoop;
use super::gate::ConcurrencyGate;
use super::processor::TaskProcessor;
use super::status::{DispatchStats, DispatcherStatus};
use crate::config::{DispatchPolicy, DispatcherConfig};
use crate::domain::ConsumerDescriptor;
use crate::ports::{ContextResolver, MessageBus, TaskExecutor};

/// Dispatch loop group handle.
/// - one loop per consumer, all sharing one [`ConcurrencyGate`]
/// - `shutdown_and_join()` stops pulling and waits for in-flight tasks
pub struct Dispatcher {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    gate: Arc<ConcurrencyGate>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    /// Spawn one loop per consumer.
    pub fn spawn(
        consumers: Vec<ConsumerDescriptor>,
        config: &DispatcherConfig,
        policy: DispatchPolicy,
        bus: Arc<dyn MessageBus>,
        executor: Arc<dyn TaskExecutor>,
        context: Arc<dyn ContextResolver>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let gate = Arc::new(ConcurrencyGate::new(config.max_concurrent_tasks));
        let stats = Arc::new(DispatchStats::default());

        let processor = Arc::new(TaskProcessor::new(
            Arc::clone(&bus),
            executor,
            context,
            Arc::clone(&stats),
            config.fleet_id.clone(),
            config.agent_id.clone(),
            config.task_timeout(),
            policy.nak_delay,
        ));

        let mut joins = Vec::with_capacity(consumers.len());
        for consumer in consumers {
            let dispatch_loop = DispatchLoop::new(
                consumer,
                Arc::clone(&bus),
                Arc::clone(&gate),
                Arc::clone(&processor),
                Arc::clone(&stats),
                policy.clone(),
            );
            joins.push(tokio::spawn(dispatch_loop.run(shutdown_rx.clone())));
        }

        info!(
            loops = joins.len(),
            max_concurrent_tasks = gate.limit(),
            "dispatcher started"
        );

        Self {
            shutdown_tx,
            joins,
            gate,
            stats,
        }
    }

    pub fn status(&self) -> DispatcherStatus {
        self.stats.snapshot(self.gate.in_flight(), self.gate.limit())
    }

    /// Stop pulling new messages. In-flight tasks keep running.
    pub fn request_shutdown(&self) {
        // receivers may already be gone if every loop ended on its own
        let _ = self.shutdown_tx.send(true);
    }

    /// Shut down and wait until every loop has drained its in-flight tasks.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.join().await;
    }

    /// Wait for the loops to end without requesting it (they end when the
    /// connection closes).
    pub async fn join(self) {
        for join in self.joins {
            let _ = join.await;
        }
        self.gate.close();
        let status = self.stats.snapshot(self.gate.in_flight(), self.gate.limit());
        info!(status = ?status, "dispatcher stopped");
    }
}
