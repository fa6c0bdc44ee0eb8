//! Raw task message as handed over by the bus.

/// Raw bytes + subject + delivery bookkeeping.
///
/// Owned by the bus until the matching delivery is acked or nak'd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    /// Stream sequence of this message (0 when the bus does not report one).
    pub sequence: u64,
    /// How many times the bus has delivered this message, starting at 1.
    pub delivered: u64,
}

impl TaskMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            sequence: 0,
            delivered: 1,
        }
    }

    pub fn with_delivery(mut self, sequence: u64, delivered: u64) -> Self {
        self.sequence = sequence;
        self.delivered = delivered;
        self
    }

    /// Payload as text. Invalid UTF-8 is replaced rather than rejected.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivered > 1
    }
}
