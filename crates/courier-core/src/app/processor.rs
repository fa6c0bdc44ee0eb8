//! TaskProcessor - 1 メッセージの処理パイプライン
//!
//! # フロー
//! 1. decode → TaskRequest へ正規化（失敗しない。非 JSON は plain text 扱い）
//! 2. ContextResolver で外部状態をタスクごとに解決（キャッシュなし）
//! 3. TaskExecutor を期限付きで実行。期限切れで中断 → timeout 扱いの失敗
//! 4. 返信 subject を決定（明示指定 > `{fleetId}.results.{taskId}`）
//! 5. 成否に関わらず TaskResult を必ず publish し、成功なら ack、失敗なら nak(遅延)
//!
//! 2〜3 は別タスクで動かすので、panic しても 5 には必ず到達する。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{Instrument, info, info_span, warn};
use ulid::Ulid;

use super::publisher::ResultPublisher;
use super::status::DispatchStats;
use crate::domain::{
    ExecutionError, ExecutionOutcome, TaskMessage, TaskRequest, TaskResult, subject,
};
use crate::ports::{ContextResolver, Delivery, ExecutionRequest, MessageBus, TaskExecutor};

/// How a delivery was settled with the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Nacked,
}

/// Record of one processed delivery.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    /// Unique per processing attempt; redeliveries of one message get new ids.
    pub attempt_id: Ulid,
    pub reply_subject: String,
    pub result: TaskResult,
    pub published: bool,
    pub settlement: Settlement,
}

pub struct TaskProcessor {
    executor: Arc<dyn TaskExecutor>,
    context: Arc<dyn ContextResolver>,
    publisher: ResultPublisher,
    stats: Arc<DispatchStats>,
    fleet_id: String,
    agent_id: String,
    task_timeout: Duration,
    nak_delay: Duration,
}

impl TaskProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        executor: Arc<dyn TaskExecutor>,
        context: Arc<dyn ContextResolver>,
        stats: Arc<DispatchStats>,
        fleet_id: impl Into<String>,
        agent_id: impl Into<String>,
        task_timeout: Duration,
        nak_delay: Duration,
    ) -> Self {
        Self {
            executor,
            context,
            publisher: ResultPublisher::new(bus),
            stats,
            fleet_id: fleet_id.into(),
            agent_id: agent_id.into(),
            task_timeout,
            nak_delay,
        }
    }

    pub async fn process(&self, delivery: Box<dyn Delivery>) -> ProcessReport {
        let message = delivery.message().clone();
        let request = TaskRequest::from_message(&message);
        let attempt_id = Ulid::new();

        let span = info_span!(
            "task",
            attempt_id = %attempt_id,
            task_id = %request.task_id(),
            domain = %request.domain(),
            subject = %message.subject,
            delivered = message.delivered,
        );

        self.process_request(attempt_id, delivery, &message, request)
            .instrument(span)
            .await
    }

    async fn process_request(
        &self,
        attempt_id: Ulid,
        delivery: Box<dyn Delivery>,
        message: &TaskMessage,
        request: TaskRequest,
    ) -> ProcessReport {
        let started = Instant::now();
        info!(
            shape = ?request.shape,
            redelivery = message.is_redelivery(),
            "processing task"
        );

        let outcome = self.execute(&request, started + self.task_timeout).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (result, timed_out) = match outcome {
            Ok(outcome) => (
                TaskResult::from_outcome(&request, &self.agent_id, outcome, elapsed_ms),
                false,
            ),
            Err(e) => {
                warn!(kind = ?e.kind(), error = %e, "task failed");
                (
                    TaskResult::from_error(&request, &self.agent_id, &e, elapsed_ms),
                    e.is_timeout(),
                )
            }
        };

        let reply_subject = subject::reply_subject(
            &self.fleet_id,
            request.reply_subject(),
            Some(request.task_id()),
        );
        let published = self.publisher.publish(&reply_subject, &result).await;

        let settlement = if result.success {
            self.stats.record_succeeded();
            if let Err(e) = delivery.ack().await {
                warn!(error = %e, "ack failed");
            }
            Settlement::Acked
        } else {
            self.stats.record_failed(timed_out);
            if let Err(e) = delivery.nak(self.nak_delay).await {
                warn!(error = %e, "nak failed");
            }
            Settlement::Nacked
        };

        info!(
            success = result.success,
            duration_ms = result.duration_ms,
            reply_subject = %reply_subject,
            published,
            "task finished"
        );

        ProcessReport {
            attempt_id,
            reply_subject,
            result,
            published,
            settlement,
        }
    }

    /// Resolve context and run the capability on a separate task, bounded by
    /// `deadline`. The separate task turns panics into errors and can be
    /// aborted when the deadline passes.
    async fn execute(
        &self,
        request: &TaskRequest,
        deadline: Instant,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let job = {
            let executor = Arc::clone(&self.executor);
            let resolver = Arc::clone(&self.context);
            let request = request.clone();
            let knight = self.agent_id.clone();
            async move {
                let context = resolver.resolve(&request).await?;
                executor
                    .execute(ExecutionRequest {
                        request,
                        context,
                        deadline,
                        knight,
                    })
                    .await
            }
        };

        let mut handle = tokio::spawn(job.in_current_span());
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => Err(ExecutionError::Panicked(join_error.to_string())),
            Err(_) => {
                handle.abort();
                Err(ExecutionError::Timeout(self.task_timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConsumerDescriptor;
    use crate::impls::{InMemoryBus, MockExecutor, MockStep};
    use crate::ports::{EmptyContext, TaskContext};
    use async_trait::async_trait;

    const NAK_DELAY: Duration = Duration::from_secs(10);

    struct Harness {
        bus: Arc<InMemoryBus>,
        executor: Arc<MockExecutor>,
        stats: Arc<DispatchStats>,
        consumer: ConsumerDescriptor,
        processor: TaskProcessor,
    }

    async fn harness_with(
        executor: MockExecutor,
        context: Arc<dyn ContextResolver>,
        timeout: Duration,
    ) -> Harness {
        let bus = Arc::new(InMemoryBus::new());
        let consumer =
            ConsumerDescriptor::new("FLEET_A_TASKS", "agent-1", "fleet-a.tasks.>", timeout);
        bus.create_consumer(&consumer).await.unwrap();
        let executor = Arc::new(executor);
        let stats = Arc::new(DispatchStats::default());
        let processor = TaskProcessor::new(
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            Arc::clone(&executor) as Arc<dyn TaskExecutor>,
            context,
            Arc::clone(&stats),
            "fleet-a",
            "agent-1",
            timeout,
            NAK_DELAY,
        );
        Harness {
            bus,
            executor,
            stats,
            consumer,
            processor,
        }
    }

    async fn harness(executor: MockExecutor) -> Harness {
        harness_with(executor, Arc::new(EmptyContext), Duration::from_secs(5)).await
    }

    impl Harness {
        async fn deliver(&self, subject: &str, payload: &str) -> (u64, Box<dyn Delivery>) {
            let seq = self.bus.inject(subject, payload).await;
            let mut got = self
                .bus
                .fetch(&self.consumer, 1, Duration::from_millis(10))
                .await
                .unwrap();
            (seq, got.remove(0))
        }

        async fn published_json(&self) -> Vec<(String, serde_json::Value)> {
            self.bus
                .published()
                .await
                .into_iter()
                .map(|(s, p)| (s, serde_json::from_slice(&p).unwrap()))
                .collect()
        }
    }

    #[tokio::test]
    async fn successful_task_is_published_and_acked() {
        let h = harness(MockExecutor::replying("pong")).await;
        let (seq, delivery) = h
            .deliver(
                "fleet-a.tasks.ops.abc",
                r#"{"message":"ping","metadata":{"taskId":"abc","replySubject":"r.abc"}}"#,
            )
            .await;

        let report = h.processor.process(delivery).await;

        assert_eq!(report.reply_subject, "r.abc");
        assert_eq!(report.settlement, Settlement::Acked);
        assert!(report.published);
        let published = h.published_json().await;
        assert_eq!(published.len(), 1);
        let (subject, body) = &published[0];
        assert_eq!(subject, "r.abc");
        assert_eq!(body["taskId"], "abc");
        assert_eq!(body["knight"], "agent-1");
        assert_eq!(body["success"], true);
        assert_eq!(body["output"], "pong");
        assert_eq!(h.bus.acked().await, vec![seq]);
        assert!(h.bus.nacked().await.is_empty());

        let calls = h.executor.calls().await;
        assert_eq!(calls[0].request.message, "ping");
        assert_eq!(calls[0].knight, "agent-1");
        assert_eq!(h.stats.snapshot(0, 1).succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_executor_times_out_and_naks() {
        let h = harness_with(
            MockExecutor::new(MockStep::Hang),
            Arc::new(EmptyContext),
            Duration::from_millis(100),
        )
        .await;
        let (seq, delivery) = h.deliver("fleet-a.tasks.ops.t1", "do the thing").await;

        let started = Instant::now();
        let report = h.processor.process(delivery).await;

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report.reply_subject, "fleet-a.results.t1");
        assert_eq!(report.settlement, Settlement::Nacked);
        assert!(!report.result.success);
        assert_eq!(
            report.result.error.as_deref(),
            Some("task timed out after 100ms")
        );
        assert_eq!(h.bus.nacked().await, vec![(seq, NAK_DELAY)]);
        let status = h.stats.snapshot(0, 1);
        assert_eq!((status.failed, status.timed_out), (1, 1));
    }

    #[tokio::test]
    async fn executor_panic_becomes_a_failed_result() {
        let h = harness(MockExecutor::new(MockStep::Panic("boom".into()))).await;
        let (seq, delivery) = h
            .deliver("fleet-a.tasks.ops.t2", r#"{"message":"x","taskId":"t2"}"#)
            .await;

        let report = h.processor.process(delivery).await;

        assert_eq!(report.settlement, Settlement::Nacked);
        assert!(report.published);
        let error = report.result.error.unwrap();
        assert!(error.starts_with("task execution aborted"), "{error}");
        assert_eq!(h.bus.nacked().await, vec![(seq, NAK_DELAY)]);
    }

    #[tokio::test]
    async fn capability_errors_and_reported_failures_are_nacked() {
        let h = harness(MockExecutor::new(MockStep::Reply(ExecutionOutcome::failure(
            "model refused",
        ))))
        .await;
        h.executor.push(MockStep::Fail("spawn failed".into())).await;

        let (_, first) = h.deliver("fleet-a.tasks.ops.a", "one").await;
        let (_, second) = h.deliver("fleet-a.tasks.ops.b", "two").await;
        let first = h.processor.process(first).await;
        let second = h.processor.process(second).await;

        assert_eq!(first.settlement, Settlement::Nacked);
        assert_eq!(
            first.result.error.as_deref(),
            Some("task execution failed: spawn failed")
        );
        assert_eq!(second.settlement, Settlement::Nacked);
        assert_eq!(second.result.error.as_deref(), Some("model refused"));
        assert!(h.bus.acked().await.is_empty());
        assert_eq!(h.stats.snapshot(0, 1).failed, 2);
        assert_ne!(first.attempt_id, second.attempt_id);
    }

    #[tokio::test]
    async fn publish_failure_does_not_block_the_ack() {
        let h = harness(MockExecutor::replying("done")).await;
        h.bus.set_fail_publish(true);
        let (seq, delivery) = h.deliver("fleet-a.tasks.ops.t3", "work").await;

        let report = h.processor.process(delivery).await;

        assert!(!report.published);
        assert_eq!(report.settlement, Settlement::Acked);
        assert_eq!(h.bus.acked().await, vec![seq]);
    }

    struct BrokenContext;

    #[async_trait]
    impl ContextResolver for BrokenContext {
        async fn resolve(&self, _request: &TaskRequest) -> Result<TaskContext, ExecutionError> {
            Err(ExecutionError::Context("skills dir unreadable".into()))
        }
    }

    #[tokio::test]
    async fn context_failure_is_answered_without_invoking_the_executor() {
        let h = harness_with(
            MockExecutor::replying("unused"),
            Arc::new(BrokenContext),
            Duration::from_secs(5),
        )
        .await;
        let (_, delivery) = h
            .deliver("fleet-a.tasks.ops.t4", r#"{"task":"x","task_id":"t4"}"#)
            .await;

        let report = h.processor.process(delivery).await;

        assert_eq!(report.settlement, Settlement::Nacked);
        assert_eq!(report.reply_subject, "fleet-a.results.t4");
        assert_eq!(h.executor.call_count().await, 0);
    }

    #[tokio::test]
    async fn invalid_utf8_payload_is_still_answered() {
        let h = harness(MockExecutor::replying("ok")).await;
        h.bus
            .inject("fleet-a.tasks.ops.t5", vec![0xff, 0xfe, b'h', b'i'])
            .await;
        let mut got = h
            .bus
            .fetch(&h.consumer, 1, Duration::from_millis(10))
            .await
            .unwrap();

        let report = h.processor.process(got.remove(0)).await;

        assert_eq!(report.result.task_id, "t5");
        assert_eq!(report.reply_subject, "fleet-a.results.t5");
        assert!(h.executor.calls().await[0].request.message.ends_with("hi"));
    }
}
