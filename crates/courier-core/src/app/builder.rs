//! DispatcherBuilder - ディスパッチャの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - build() 時に設定を検証し、executor 未登録なら BuildError を返す
//! - バスへの接続はここでは行わない（start() に渡す）

use std::sync::Arc;

use super::consumer::ConsumerManager;
use super::dispatcher::Dispatcher;
use crate::config::{DispatchPolicy, DispatcherConfig};
use crate::domain::ConfigError;
use crate::ports::{ContextResolver, EmptyContext, MessageBus, TaskExecutor};

/// # 使用例
/// ```ignore
/// let app = DispatcherBuilder::new(config)
///     .executor(Arc::new(CommandExecutor::new("claude")))
///     .context(Arc::new(SkillContextResolver::new(skills_dir)))
///     .build()?;
/// let dispatcher = app.start(bus).await;
/// ```
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    policy: DispatchPolicy,
    executor: Option<Arc<dyn TaskExecutor>>,
    context: Arc<dyn ContextResolver>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no task executor registered")]
    MissingExecutor,
}

impl DispatcherBuilder {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            policy: DispatchPolicy::standard(),
            executor: None,
            context: Arc::new(EmptyContext),
        }
    }

    pub fn policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn context(mut self, context: Arc<dyn ContextResolver>) -> Self {
        self.context = context;
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;
        let executor = self.executor.ok_or(BuildError::MissingExecutor)?;
        Ok(App {
            config: self.config,
            policy: self.policy,
            executor,
            context: self.context,
        })
    }
}

/// Validated wiring, ready to be attached to a bus.
pub struct App {
    config: DispatcherConfig,
    policy: DispatchPolicy,
    executor: Arc<dyn TaskExecutor>,
    context: Arc<dyn ContextResolver>,
}

impl App {
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Ensure stream and consumers, then start one dispatch loop per subject.
    pub async fn start(self, bus: Arc<dyn MessageBus>) -> Dispatcher {
        let consumers = ConsumerManager::new(Arc::clone(&bus))
            .ensure_all(&self.config)
            .await;

        Dispatcher::spawn(
            consumers,
            &self.config,
            self.policy,
            bus,
            self.executor,
            self.context,
        )
    }
}
