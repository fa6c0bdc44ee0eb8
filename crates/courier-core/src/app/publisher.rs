//! ResultPublisher - TaskResult の直列化と publish
//!
//! 結果はすでに確定しているので、publish の失敗はログに残すだけで
//! 呼び出し側（ディスパッチ経路）には伝播させない。

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::TaskResult;
use crate::ports::MessageBus;

pub struct ResultPublisher {
    bus: Arc<dyn MessageBus>,
}

impl ResultPublisher {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    /// Publish `result` to `subject`. Returns whether the bus accepted it;
    /// callers use that for logging only.
    pub async fn publish(&self, subject: &str, result: &TaskResult) -> bool {
        let payload = match result.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    task_id = %result.task_id,
                    subject,
                    error = %e,
                    "failed to serialize task result"
                );
                return false;
            }
        };

        match self.bus.publish(subject, payload).await {
            Ok(()) => {
                debug!(
                    task_id = %result.task_id,
                    subject,
                    success = result.success,
                    "published task result"
                );
                true
            }
            Err(e) => {
                warn!(
                    task_id = %result.task_id,
                    subject,
                    error = %e,
                    "failed to publish task result"
                );
                false
            }
        }
    }
}
