//! InMemoryBus - 開発・テスト用のメッセージバス
//!
//! JetStream の振る舞いのうちディスパッチャが依存する部分だけを再現する:
//! - durable consumer ごとの保留キュー（deliver-new: 作成後に届いた分だけ）
//! - 期限付き pull（届かなければ空を返す）
//! - ack / nak(遅延) と max_deliver による打ち切り
//! - publish されたペイロードの記録

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::domain::{BusError, ConsumerDescriptor, StreamDescriptor, TaskMessage};
use crate::ports::{Delivery, MessageBus};

struct ConsumerState {
    descriptor: ConsumerDescriptor,
    pending: VecDeque<TaskMessage>,
}

#[derive(Default)]
struct BusState {
    streams: HashMap<String, StreamDescriptor>,
    consumers: HashMap<String, ConsumerState>,
    next_sequence: u64,
    published: Vec<(String, Vec<u8>)>,
    acked: Vec<u64>,
    nacked: Vec<(u64, Duration)>,
    /// Messages that hit max_deliver and were dropped.
    dropped: Vec<u64>,
}

pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
    notify: Arc<Notify>,
    closed: AtomicBool,
    fail_publish: AtomicBool,
    /// Number of upcoming fetch calls that fail.
    failing_fetches: AtomicUsize,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                next_sequence: 1,
                ..Default::default()
            })),
            notify: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            failing_fetches: AtomicUsize::new(0),
        }
    }

    /// Publish a task message into the stream. Every existing consumer whose
    /// filter matches receives it. Returns the stream sequence.
    pub async fn inject(&self, subject: &str, payload: impl Into<Vec<u8>>) -> u64 {
        let payload = payload.into();
        let sequence = {
            let mut state = self.state.lock().await;
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            for consumer in state.consumers.values_mut() {
                if subject_matches(&consumer.descriptor.filter_subject, subject) {
                    consumer.pending.push_back(
                        TaskMessage::new(subject, payload.clone()).with_delivery(sequence, 1),
                    );
                }
            }
            sequence
        };
        self.notify.notify_waiters();
        sequence
    }

    /// Close the connection for good.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next_fetches(&self, n: usize) {
        self.failing_fetches.store(n, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().await.published.clone()
    }

    pub async fn acked(&self) -> Vec<u64> {
        self.state.lock().await.acked.clone()
    }

    pub async fn nacked(&self) -> Vec<(u64, Duration)> {
        self.state.lock().await.nacked.clone()
    }

    pub async fn dropped(&self) -> Vec<u64> {
        self.state.lock().await.dropped.clone()
    }

    pub async fn consumer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().await.consumers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn consumer(&self, durable_name: &str) -> Option<ConsumerDescriptor> {
        self.state
            .lock()
            .await
            .consumers
            .get(durable_name)
            .map(|c| c.descriptor.clone())
    }

    pub async fn has_stream(&self, name: &str) -> bool {
        self.state.lock().await.streams.contains_key(name)
    }

    async fn take_pending(
        &self,
        durable_name: &str,
        max_messages: usize,
    ) -> Result<Vec<TaskMessage>, BusError> {
        let mut state = self.state.lock().await;
        let consumer = state
            .consumers
            .get_mut(durable_name)
            .ok_or_else(|| BusError::Consumer(format!("consumer {durable_name} not found")))?;
        let n = max_messages.min(consumer.pending.len());
        Ok(consumer.pending.drain(..n).collect())
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn ensure_stream(&self, stream: &StreamDescriptor) -> Result<(), BusError> {
        let mut state = self.state.lock().await;
        state
            .streams
            .entry(stream.name.clone())
            .or_insert_with(|| stream.clone());
        Ok(())
    }

    async fn create_consumer(&self, consumer: &ConsumerDescriptor) -> Result<(), BusError> {
        let mut state = self.state.lock().await;
        if state.consumers.contains_key(&consumer.durable_name) {
            return Err(BusError::ConsumerExists(consumer.durable_name.clone()));
        }
        state.consumers.insert(
            consumer.durable_name.clone(),
            ConsumerState {
                descriptor: consumer.clone(),
                pending: VecDeque::new(),
            },
        );
        Ok(())
    }

    async fn fetch(
        &self,
        consumer: &ConsumerDescriptor,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<Box<dyn Delivery>>, BusError> {
        let deadline = tokio::time::Instant::now() + expires;
        loop {
            if self.is_closed() {
                return Err(BusError::Closed);
            }
            if self
                .failing_fetches
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(BusError::Fetch("injected fetch failure".to_string()));
            }

            // register before checking so an inject between check and wait is not lost
            let notified = self.notify.notified();
            let messages = self.take_pending(&consumer.durable_name, max_messages).await?;
            if !messages.is_empty() {
                return Ok(messages
                    .into_iter()
                    .map(|message| {
                        Box::new(MemoryDelivery {
                            message,
                            consumer: consumer.clone(),
                            state: Arc::clone(&self.state),
                            notify: Arc::clone(&self.notify),
                        }) as Box<dyn Delivery>
                    })
                    .collect());
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BusError::Publish(format!("no route to {subject}")));
        }
        self.state
            .lock()
            .await
            .published
            .push((subject.to_string(), payload));
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MemoryDelivery {
    message: TaskMessage,
    consumer: ConsumerDescriptor,
    state: Arc<Mutex<BusState>>,
    notify: Arc<Notify>,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn message(&self) -> &TaskMessage {
        &self.message
    }

    async fn ack(self: Box<Self>) -> Result<(), BusError> {
        self.state.lock().await.acked.push(self.message.sequence);
        Ok(())
    }

    async fn nak(self: Box<Self>, delay: Duration) -> Result<(), BusError> {
        let sequence = self.message.sequence;
        let exhausted = self.message.delivered as i64 >= self.consumer.max_deliver;
        {
            let mut state = self.state.lock().await;
            state.nacked.push((sequence, delay));
            if exhausted {
                state.dropped.push(sequence);
            }
        }
        if exhausted {
            debug!(sequence, "max deliveries reached; dropping message");
            return Ok(());
        }

        let redelivery = TaskMessage {
            delivered: self.message.delivered + 1,
            ..self.message.clone()
        };
        let durable_name = self.consumer.durable_name.clone();
        let state = Arc::clone(&self.state);
        let notify = Arc::clone(&self.notify);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(consumer) = state.lock().await.consumers.get_mut(&durable_name) {
                consumer.pending.push_back(redelivery);
            }
            notify.notify_waiters();
        });
        Ok(())
    }
}

/// NATS subject matching: `*` matches one token, `>` matches the rest.
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(f), Some(s)) if f == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
