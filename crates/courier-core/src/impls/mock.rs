//! MockExecutor - スクリプト化されたテスト用 TaskExecutor
//!
//! 事前に積んだ応答を FIFO で返す。キューが空になったら fallback を返す。
//! 同時実行数の最大値を記録するので、ゲートの上限検証にも使える。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{ExecutionError, ExecutionOutcome};
use crate::ports::{ExecutionRequest, TaskExecutor};

/// One scripted behavior.
#[derive(Debug, Clone)]
pub enum MockStep {
    Reply(ExecutionOutcome),
    Fail(String),
    /// Sleep, then reply.
    Delay(Duration, ExecutionOutcome),
    /// Never completes; only cancellation ends it.
    Hang,
    Panic(String),
}

pub struct MockExecutor {
    script: Mutex<VecDeque<MockStep>>,
    fallback: MockStep,
    calls: Mutex<Vec<ExecutionRequest>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    finished: AtomicUsize,
}

impl MockExecutor {
    pub fn new(fallback: MockStep) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    /// Replies to every call with `output`.
    pub fn replying(output: impl Into<String>) -> Self {
        Self::new(MockStep::Reply(ExecutionOutcome::success(output)))
    }

    pub async fn push(&self, step: MockStep) {
        self.script.lock().await.push_back(step);
    }

    pub async fn calls(&self) -> Vec<ExecutionRequest> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    /// Highest number of invocations observed running at once.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Invocations that ran to completion (cancelled ones are not counted).
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    async fn next_step(&self) -> MockStep {
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Keeps `running` accurate even when the invocation is dropped mid-flight.
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskExecutor for MockExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, ExecutionError> {
        self.calls.lock().await.push(request);

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        let result = match self.next_step().await {
            MockStep::Reply(outcome) => Ok(outcome),
            MockStep::Fail(message) => Err(ExecutionError::Capability(message)),
            MockStep::Delay(delay, outcome) => {
                tokio::time::sleep(delay).await;
                Ok(outcome)
            }
            MockStep::Hang => std::future::pending().await,
            MockStep::Panic(message) => panic!("{message}"),
        };
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }
}
