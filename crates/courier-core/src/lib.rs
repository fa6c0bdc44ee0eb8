//! courier-core
//!
//! JetStream のタスク subject を pull し、同時実行数の上限の下でタスクを実行、
//! 結果を返信 subject へ publish するディスパッチャのコア。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（message, request, result, consumer, subject, skill, errors）
//! - **ports**: 抽象化レイヤー（MessageBus, TaskExecutor, ContextResolver）
//! - **app**: アプリケーションロジック（builder, dispatcher, dispatch_loop, processor, gate）
//! - **impls**: 実装（NatsBus, CommandExecutor, SkillContextResolver, InMemoryBus）
//! - **config**: DispatcherConfig と DispatchPolicy

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{App, BuildError, Dispatcher, DispatcherBuilder, DispatcherStatus};
pub use config::{DispatchPolicy, DispatcherConfig};
