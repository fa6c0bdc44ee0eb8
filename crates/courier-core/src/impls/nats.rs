//! NatsBus - NATS JetStream による MessageBus 実装
//!
//! # 接続
//! - `connect()` は 1 回だけ接続を試みる。失敗は [`BusError::Connect`]
//! - 切断時の再接続は async-nats に任せ、状態変化は event callback から watch に流す
//! - `Closed` を受けたら以降 `is_closed()` が true を返し、ループが止まる
//! - 状態遷移のログは `subscribe_status()` の購読側（CLI）が出す
//!
//! # Consumer
//! - `create_consumer` は既存なら [`BusError::ConsumerExists`]
//!   （filter / ack_wait / max_deliver が食い違っていれば先に update する）
//! - 取得した PullConsumer は durable 名でキャッシュする

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::consumer::{self, PullConsumer, pull};
use async_nats::jetstream::{self, AckKind, stream};
use async_nats::{Client, ConnectOptions, Event};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::domain::{
    AckPolicy, BusError, ConsumerDescriptor, DeliverPolicy, StreamDescriptor, TaskMessage,
};
use crate::ports::{Delivery, MessageBus};

/// Connection state as reported by the client's event callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Pending,
    Connected,
    Disconnected,
    Closed,
}

pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
    consumers: Mutex<HashMap<String, PullConsumer>>,
    status: watch::Receiver<ConnectionStatus>,
}

impl NatsBus {
    pub async fn connect(url: &str, client_name: &str) -> Result<Self, BusError> {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Pending);
        let status_tx = Arc::new(status_tx);

        let options = ConnectOptions::new()
            .name(client_name)
            .event_callback(move |event| {
                let status_tx = Arc::clone(&status_tx);
                async move {
                    let status = match event {
                        Event::Connected => ConnectionStatus::Connected,
                        Event::Disconnected => ConnectionStatus::Disconnected,
                        Event::Closed => ConnectionStatus::Closed,
                        other => {
                            debug!(event = %other, "nats event");
                            return;
                        }
                    };
                    status_tx.send_replace(status);
                }
            });

        let client = async_nats::connect_with_options(url, options)
            .await
            .map_err(|e| BusError::Connect(format!("{url}: {e}")))?;
        info!(url, "connected to nats");

        Ok(Self {
            jetstream: jetstream::new(client.clone()),
            client,
            consumers: Mutex::new(HashMap::new()),
            status: status_rx,
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change; the CLI logs transitions from it.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Push buffered publishes to the server.
    pub async fn flush(&self) -> Result<(), BusError> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::Publish(e.to_string()))
    }

    async fn pull_consumer(&self, descriptor: &ConsumerDescriptor) -> Result<PullConsumer, BusError> {
        let mut cache = self.consumers.lock().await;
        if let Some(consumer) = cache.get(&descriptor.durable_name) {
            return Ok(consumer.clone());
        }

        let consumer = self
            .jetstream
            .get_stream(&descriptor.stream_name)
            .await
            .map_err(|e| BusError::Stream(e.to_string()))?
            .get_consumer::<pull::Config>(&descriptor.durable_name)
            .await
            .map_err(|e| BusError::Consumer(e.to_string()))?;
        cache.insert(descriptor.durable_name.clone(), consumer.clone());
        Ok(consumer)
    }
}

fn pull_config(descriptor: &ConsumerDescriptor) -> pull::Config {
    pull::Config {
        durable_name: Some(descriptor.durable_name.clone()),
        filter_subject: descriptor.filter_subject.clone(),
        ack_policy: match descriptor.ack_policy {
            AckPolicy::Explicit => consumer::AckPolicy::Explicit,
        },
        deliver_policy: match descriptor.deliver_policy {
            DeliverPolicy::New => consumer::DeliverPolicy::New,
        },
        ack_wait: descriptor.ack_wait,
        max_deliver: descriptor.max_deliver,
        ..Default::default()
    }
}

/// Settings of an existing durable that differ from what this agent wants.
fn drifted_fields(existing: &consumer::Config, wanted: &pull::Config) -> Vec<&'static str> {
    let mut drifted = Vec::new();
    if existing.filter_subject != wanted.filter_subject {
        drifted.push("filter_subject");
    }
    if existing.ack_wait != wanted.ack_wait {
        drifted.push("ack_wait");
    }
    if existing.max_deliver != wanted.max_deliver {
        drifted.push("max_deliver");
    }
    drifted
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn ensure_stream(&self, descriptor: &StreamDescriptor) -> Result<(), BusError> {
        if self.jetstream.get_stream(&descriptor.name).await.is_ok() {
            debug!(stream = %descriptor.name, "stream already exists");
            return Ok(());
        }
        self.jetstream
            .create_stream(stream::Config {
                name: descriptor.name.clone(),
                subjects: descriptor.subjects.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Stream(e.to_string()))?;
        Ok(())
    }

    async fn create_consumer(&self, descriptor: &ConsumerDescriptor) -> Result<(), BusError> {
        let stream = self
            .jetstream
            .get_stream(&descriptor.stream_name)
            .await
            .map_err(|e| BusError::Stream(e.to_string()))?;

        if let Ok(mut existing) = stream
            .get_consumer::<pull::Config>(&descriptor.durable_name)
            .await
        {
            let wanted = pull_config(descriptor);
            let drifted = drifted_fields(&existing.cached_info().config, &wanted);
            if !drifted.is_empty() {
                warn!(
                    durable = %descriptor.durable_name,
                    fields = ?drifted,
                    "consumer config drifted; updating"
                );
                match stream.update_consumer(wanted).await {
                    Ok(updated) => existing = updated,
                    Err(e) => warn!(
                        durable = %descriptor.durable_name,
                        error = %e,
                        "consumer update failed; keeping server config"
                    ),
                }
            }
            self.consumers
                .lock()
                .await
                .insert(descriptor.durable_name.clone(), existing);
            return Err(BusError::ConsumerExists(descriptor.durable_name.clone()));
        }

        match stream.create_consumer(pull_config(descriptor)).await {
            Ok(created) => {
                self.consumers
                    .lock()
                    .await
                    .insert(descriptor.durable_name.clone(), created);
                Ok(())
            }
            // lost a race with another instance of the same agent
            Err(e) if e.to_string().contains("already") => {
                Err(BusError::ConsumerExists(descriptor.durable_name.clone()))
            }
            Err(e) => Err(BusError::Consumer(e.to_string())),
        }
    }

    async fn fetch(
        &self,
        descriptor: &ConsumerDescriptor,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<Box<dyn Delivery>>, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let consumer = self.pull_consumer(descriptor).await?;
        let mut batch = consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .map_err(|e| BusError::Fetch(e.to_string()))?;

        let mut deliveries: Vec<Box<dyn Delivery>> = Vec::new();
        while let Some(next) = batch.next().await {
            let message = next.map_err(|e| BusError::Fetch(e.to_string()))?;
            deliveries.push(Box::new(NatsDelivery::new(message)));
        }
        Ok(deliveries)
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BusError::Publish(e.to_string()))
    }

    fn is_closed(&self) -> bool {
        *self.status.borrow() == ConnectionStatus::Closed
    }
}

struct NatsDelivery {
    task: TaskMessage,
    message: jetstream::Message,
}

impl NatsDelivery {
    fn new(message: jetstream::Message) -> Self {
        let (sequence, delivered) = match message.info() {
            Ok(info) => (info.stream_sequence, info.delivered.max(1) as u64),
            Err(_) => (0, 1),
        };
        let task = TaskMessage::new(message.subject.to_string(), message.payload.to_vec())
            .with_delivery(sequence, delivered);
        Self { task, message }
    }
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn message(&self) -> &TaskMessage {
        &self.task
    }

    async fn ack(self: Box<Self>) -> Result<(), BusError> {
        self.message
            .ack()
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    async fn nak(self: Box<Self>, delay: Duration) -> Result<(), BusError> {
        self.message
            .ack_with(AckKind::Nak(Some(delay)))
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_config_carries_descriptor_settings() {
        let d = ConsumerDescriptor::new(
            "FLEET_A_TASKS",
            "agent-1",
            "fleet-a.tasks.>",
            Duration::from_secs(60),
        );
        let config = pull_config(&d);
        assert_eq!(config.durable_name.as_deref(), Some("agent-1"));
        assert_eq!(config.filter_subject, "fleet-a.tasks.>");
        assert_eq!(config.ack_wait, Duration::from_secs(90));
        assert_eq!(config.max_deliver, 3);
        assert!(matches!(config.ack_policy, consumer::AckPolicy::Explicit));
        assert!(matches!(config.deliver_policy, consumer::DeliverPolicy::New));
    }

    #[test]
    fn matching_consumer_has_no_drift() {
        let wanted = pull_config(&ConsumerDescriptor::new(
            "FLEET_A_TASKS",
            "agent-1",
            "fleet-a.tasks.>",
            Duration::from_secs(60),
        ));
        let existing = consumer::Config {
            durable_name: Some("agent-1".into()),
            filter_subject: "fleet-a.tasks.>".into(),
            ack_wait: Duration::from_secs(90),
            max_deliver: 3,
            ..Default::default()
        };
        assert!(drifted_fields(&existing, &wanted).is_empty());
    }

    #[test]
    fn timeout_change_is_reported_as_drift() {
        // durable created under a 60s task timeout, agent restarted with 10 minutes
        let wanted = pull_config(&ConsumerDescriptor::new(
            "FLEET_A_TASKS",
            "agent-1",
            "fleet-a.tasks.ops.>",
            Duration::from_secs(600),
        ));
        let existing = consumer::Config {
            durable_name: Some("agent-1".into()),
            filter_subject: "fleet-a.tasks.>".into(),
            ack_wait: Duration::from_secs(90),
            max_deliver: 5,
            ..Default::default()
        };
        assert_eq!(
            drifted_fields(&existing, &wanted),
            vec!["filter_subject", "ack_wait", "max_deliver"]
        );
    }
}
