//! Durable consumer descriptor.

use std::time::Duration;

/// Max delivery attempts before the bus drops a message.
pub const MAX_DELIVER: i64 = 3;

/// Added to the task timeout so the bus never redelivers a message whose
/// execution is still legitimately running.
pub const ACK_WAIT_BUFFER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverPolicy {
    /// Only messages published after the consumer was created.
    New,
}

/// Settings for one durable pull consumer. One per subscribed subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerDescriptor {
    pub stream_name: String,
    pub durable_name: String,
    pub filter_subject: String,
    pub ack_policy: AckPolicy,
    pub deliver_policy: DeliverPolicy,
    pub max_deliver: i64,
    pub ack_wait: Duration,
}

impl ConsumerDescriptor {
    pub fn new(
        stream_name: impl Into<String>,
        durable_name: impl Into<String>,
        filter_subject: impl Into<String>,
        task_timeout: Duration,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            durable_name: durable_name.into(),
            filter_subject: filter_subject.into(),
            ack_policy: AckPolicy::Explicit,
            deliver_policy: DeliverPolicy::New,
            max_deliver: MAX_DELIVER,
            ack_wait: task_timeout + ACK_WAIT_BUFFER,
        }
    }
}

/// Stream that must exist before consumers can be bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub name: String,
    pub subjects: Vec<String>,
}
