//! DispatchLoop - subject ごとの pull/受付ループ
//!
//! # フロー
//! 1. ゲートが満杯なら一定時間 sleep（バスをビジーループで叩かない）
//! 2. 最大 1 件を期限付きで pull（待っている間は枠を消費しない）
//! 3. 取得したメッセージごとに枠を確保し、TaskProcessor を JoinSet に spawn（完了は待たない）
//! 4. 接続が閉じるか shutdown が来るまで繰り返す
//!
//! shutdown 時は pull を止め、JoinSet に残った処理中タスクの完了を待ってから抜ける。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::gate::{ConcurrencyGate, GatePermit};
use super::processor::TaskProcessor;
use super::status::DispatchStats;
use crate::config::DispatchPolicy;
use crate::domain::ConsumerDescriptor;
use crate::ports::{Delivery, MessageBus};

pub struct DispatchLoop {
    consumer: ConsumerDescriptor,
    bus: Arc<dyn MessageBus>,
    gate: Arc<ConcurrencyGate>,
    processor: Arc<TaskProcessor>,
    stats: Arc<DispatchStats>,
    policy: DispatchPolicy,
    /// In-flight tasks spawned by this loop.
    tasks: JoinSet<()>,
}

impl DispatchLoop {
    pub fn new(
        consumer: ConsumerDescriptor,
        bus: Arc<dyn MessageBus>,
        gate: Arc<ConcurrencyGate>,
        processor: Arc<TaskProcessor>,
        stats: Arc<DispatchStats>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            consumer,
            bus,
            gate,
            processor,
            stats,
            policy,
            tasks: JoinSet::new(),
        }
    }

    /// Run until the connection closes or `shutdown` flips to `true`, then
    /// wait for this loop's in-flight tasks.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let subject = self.consumer.filter_subject.clone();
        info!(subject = %subject, durable = %self.consumer.durable_name, "dispatch loop started");

        loop {
            // shutdown が来ていたら抜ける
            if *shutdown.borrow() {
                break;
            }
            self.reap_finished();

            if self.bus.is_closed() {
                debug!(subject = %subject, "connection closed; stopping dispatch loop");
                break;
            }

            if self.gate.is_saturated() {
                if sleep_or_shutdown(self.policy.saturated_backoff, &mut shutdown).await {
                    break;
                }
                continue;
            }

            // pull は最大 fetch_expires 待つので shutdown と競合させる
            let fetched = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                fetched = self.bus.fetch(
                    &self.consumer,
                    self.policy.batch_size,
                    self.policy.fetch_expires,
                ) => fetched,
            };

            match fetched {
                Ok(deliveries) => self.admit_all(deliveries, &mut shutdown).await,
                Err(_) if self.bus.is_closed() => {
                    debug!(subject = %subject, "fetch failed after close; stopping dispatch loop");
                    break;
                }
                Err(e) => {
                    warn!(subject = %subject, error = %e, "fetch failed; retrying");
                    if sleep_or_shutdown(self.policy.error_backoff, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        self.drain().await;
        info!(subject = %subject, "dispatch loop stopped");
    }

    /// Each delivery waits for a free slot. Deliveries that cannot be admitted
    /// because shutdown began are handed back to the bus.
    async fn admit_all(
        &mut self,
        deliveries: Vec<Box<dyn Delivery>>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        for delivery in deliveries {
            let permit = if *shutdown.borrow() {
                None
            } else if let Some(permit) = self.gate.try_admit() {
                Some(permit)
            } else {
                debug!(
                    subject = %self.consumer.filter_subject,
                    "gate full; message waits for a slot"
                );
                tokio::select! {
                    permit = self.gate.admit() => permit,
                    _ = shutdown.changed() => None,
                }
            };
            match permit {
                Some(permit) => self.spawn(delivery, permit),
                None => {
                    if let Err(e) = delivery.nak(self.policy.nak_delay).await {
                        warn!(error = %e, "nak failed while shutting down");
                    }
                }
            }
        }
    }

    fn spawn(&mut self, delivery: Box<dyn Delivery>, permit: GatePermit) {
        self.stats.record_admitted();
        debug!(
            subject = %delivery.message().subject,
            in_flight = self.gate.in_flight(),
            "admitted task"
        );
        let processor = Arc::clone(&self.processor);
        self.tasks.spawn(async move {
            // permit は処理完了（どの経路でも）で drop される
            let _permit = permit;
            processor.process(delivery).await;
        });
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            log_join_error(joined);
        }
    }

    async fn drain(&mut self) {
        if !self.tasks.is_empty() {
            info!(
                subject = %self.consumer.filter_subject,
                remaining = self.tasks.len(),
                "waiting for in-flight tasks"
            );
        }
        while let Some(joined) = self.tasks.join_next().await {
            log_join_error(joined);
        }
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined
        && e.is_panic()
    {
        error!(error = %e, "task processor panicked");
    }
}

/// Sleep for `duration`; returns `true` when shutdown was requested meanwhile.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryBus, MockExecutor};
    use crate::ports::{EmptyContext, TaskExecutor};

    struct Fixture {
        bus: Arc<InMemoryBus>,
        gate: Arc<ConcurrencyGate>,
        consumer: ConsumerDescriptor,
        dispatch_loop: DispatchLoop,
    }

    async fn fixture(limit: usize) -> Fixture {
        let bus = Arc::new(InMemoryBus::new());
        let consumer = ConsumerDescriptor::new("S", "d", "f.tasks.>", Duration::from_secs(5));
        bus.create_consumer(&consumer).await.unwrap();
        let gate = Arc::new(ConcurrencyGate::new(limit));
        let stats = Arc::new(DispatchStats::default());
        let processor = Arc::new(TaskProcessor::new(
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            Arc::new(MockExecutor::replying("ok")) as Arc<dyn TaskExecutor>,
            Arc::new(EmptyContext),
            Arc::clone(&stats),
            "f",
            "agent",
            Duration::from_secs(5),
            Duration::from_secs(10),
        ));
        let dispatch_loop = DispatchLoop::new(
            consumer.clone(),
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            Arc::clone(&gate),
            processor,
            stats,
            DispatchPolicy::standard(),
        );
        Fixture {
            bus,
            gate,
            consumer,
            dispatch_loop,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_pulls_hold_no_capacity() {
        let f = fixture(1).await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(f.dispatch_loop.run(rx));

        // first pull is still waiting for a message
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(f.gate.in_flight(), 0);

        // several 30s pulls come back empty
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(f.gate.in_flight(), 0);
        f.bus.inject("f.tasks.ops.t1", "late").await;
        while f.bus.acked().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(f.gate.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pulled_message_waits_for_a_free_slot() {
        let f = fixture(1).await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(f.dispatch_loop.run(rx));
        tokio::time::sleep(Duration::from_millis(500)).await;

        // capacity taken elsewhere while this loop is parked in a pull
        let held = f.gate.try_admit().unwrap();
        f.bus.inject("f.tasks.ops.t1", "work").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.bus.acked().await.is_empty());

        drop(held);
        while f.bus.acked().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(f.bus.nacked().await.is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_message_is_handed_back_on_shutdown() {
        let f = fixture(1).await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(f.dispatch_loop.run(rx));
        tokio::time::sleep(Duration::from_millis(500)).await;

        let _held = f.gate.try_admit().unwrap();
        f.bus.inject("f.tasks.ops.t1", "work").await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        tx.send(true).unwrap();
        handle.await.unwrap();

        let nacked = f.bus.nacked().await;
        assert_eq!(nacked.len(), 1);
        assert_eq!(nacked[0].1, DispatchPolicy::standard().nak_delay);
        assert!(f.bus.acked().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_fetch_errors_are_retried() {
        let f = fixture(2).await;
        f.bus.fail_next_fetches(3);
        f.bus.inject("f.tasks.ops.t1", "work").await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(f.dispatch_loop.run(rx));

        while f.bus.acked().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(f.bus.published().await.len(), 1);
        assert!(f.bus.consumer(&f.consumer.durable_name).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_shutdown_sender_stops_the_loop() {
        let f = fixture(1).await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(f.dispatch_loop.run(rx));
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(tx);
        handle.await.unwrap();
    }
}
