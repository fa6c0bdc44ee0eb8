//! Domain model (messages, requests, results, consumer settings, errors).

pub mod consumer;
pub mod errors;
pub mod message;
pub mod request;
pub mod result;
pub mod skill;
pub mod subject;

pub use consumer::{AckPolicy, ConsumerDescriptor, DeliverPolicy, StreamDescriptor};
pub use errors::{BusError, ConfigError, ErrorKind, ExecutionError};
pub use message::TaskMessage;
pub use request::{RequestShape, TaskMetadata, TaskRequest};
pub use result::{ExecutionOutcome, TaskResult, TokenUsage};
pub use skill::{SkillContent, SkillSummary};
pub use subject::SubjectParts;
