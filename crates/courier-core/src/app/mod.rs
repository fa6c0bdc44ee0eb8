//! App - アプリケーション層
//!
//! ports を組み合わせてディスパッチのロジックを実装します。
//!
//! # 主要コンポーネント
//! - **DispatcherBuilder**: 設定検証とワイヤリング
//! - **ConsumerManager**: durable consumer の冪等な準備
//! - **Dispatcher**: subject ごとの DispatchLoop 群と graceful shutdown
//! - **DispatchLoop**: ゲート付きの pull/受付ループ
//! - **TaskProcessor**: decode→execute→publish→ack/nak
//! - **ResultPublisher**: 結果の publish（失敗は握りつぶす）
//! - **ConcurrencyGate**: 同時実行数の上限

pub mod builder;
pub mod consumer;
pub mod dispatch_loop;
pub mod dispatcher;
pub mod gate;
pub mod processor;
pub mod publisher;
pub mod status;

pub use self::builder::{App, BuildError, DispatcherBuilder};
pub use self::consumer::{ConsumerManager, EnsureOutcome};
pub use self::dispatch_loop::DispatchLoop;
pub use self::dispatcher::Dispatcher;
pub use self::gate::{ConcurrencyGate, GatePermit};
pub use self::processor::{ProcessReport, Settlement, TaskProcessor};
pub use self::publisher::ResultPublisher;
pub use self::status::{DispatchStats, DispatcherStatus};
