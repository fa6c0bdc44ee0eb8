//! Ports - 抽象化レイヤー
//!
//! 外部システム（メッセージバス、タスク実行ケイパビリティ、外部状態）への
//! インターフェースを trait として定義し、実装の詳細を隠蔽します。

pub mod bus;
pub mod context;
pub mod executor;

pub use self::bus::{Delivery, MessageBus};
pub use self::context::{ContextResolver, EmptyContext, TaskContext};
pub use self::executor::{ExecutionRequest, TaskExecutor};
