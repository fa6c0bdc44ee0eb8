//! Impls - ports の実装
//!
//! # 本番用
//! - **NatsBus**: NATS JetStream の MessageBus
//! - **CommandExecutor**: CLI エージェントを子プロセスで起動する TaskExecutor
//! - **SkillContextResolver**: スキルディレクトリを毎タスク読み直す ContextResolver
//!
//! # 開発用・テスト用
//! - **InMemoryBus**: JetStream の pull/ack/nak を再現するインメモリのバス
//! - **MockExecutor**: スクリプト化された TaskExecutor

pub mod command_executor;
pub mod memory;
pub mod mock;
pub mod nats;
pub mod skills;

// 主要な型を再エクスポート
pub use self::command_executor::CommandExecutor;
pub use self::memory::InMemoryBus;
pub use self::mock::{MockExecutor, MockStep};
pub use self::nats::{ConnectionStatus, NatsBus};
pub use self::skills::{SkillCatalog, SkillContextResolver, SkillError, load_full};
