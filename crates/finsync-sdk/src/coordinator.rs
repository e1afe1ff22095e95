//! 乐观更新协调器
//!
//! 进程内唯一的服务实例（显式创建，通过 `Arc` 共享给各业务 store），
//! 对外只暴露：执行更新、两个派生信号、只读查询、事件订阅、关闭。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::events::EventManager;
use crate::mutation::{
    Mutation, MutationExecutor, MutationId, MutationOutcome, MutationRecord, MutationRegistry,
    SyncSnapshot, SyncStatus,
};

pub struct MutationCoordinator {
    config: CoordinatorConfig,
    registry: MutationRegistry,
    executor: MutationExecutor,
    events: Arc<EventManager>,
}

impl MutationCoordinator {
    /// 创建协调器（配置会先校验）
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let registry = MutationRegistry::with_grace_period(config.error_grace_period());
        let events = Arc::new(EventManager::new(config.event_buffer_size));
        let executor = MutationExecutor::new(registry.clone(), events.clone(), &config);

        info!(
            "✅ MutationCoordinator 已创建: grace_period={}ms, {}",
            config.error_grace_period_ms,
            crate::version::version_summary()
        );

        Ok(Self {
            config,
            registry,
            executor,
            events,
        })
    }

    /// 创建并包装成 Arc，供多个 store 共享
    pub fn shared(config: CoordinatorConfig) -> Result<Arc<Self>> {
        Ok(Arc::new(Self::new(config)?))
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// 执行乐观更新；失败时返回 None
    pub async fn execute<O, P, R>(&self, mutation: Mutation<O, P, R>) -> Option<R>
    where
        O: Serialize + Send,
        P: Serialize + Send + 'static,
        R: Send + 'static,
    {
        self.executor.execute(mutation).await
    }

    pub async fn execute_detailed<O, P, R>(&self, mutation: Mutation<O, P, R>) -> MutationOutcome<R>
    where
        O: Serialize + Send,
        P: Serialize + Send + 'static,
        R: Send + 'static,
    {
        self.executor.execute_detailed(mutation).await
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.registry.sync_status()
    }

    pub fn active_mutation_count(&self) -> usize {
        self.registry.active_mutation_count()
    }

    pub fn sync_snapshot(&self) -> SyncSnapshot {
        self.registry.snapshot()
    }

    /// UI 订阅派生信号（spinner / 错误图标）
    pub fn subscribe_sync_status(&self) -> watch::Receiver<SyncSnapshot> {
        self.registry.subscribe()
    }

    pub fn lookup(&self, id: &MutationId) -> Option<MutationRecord> {
        self.registry.lookup(id)
    }

    pub fn list_by_type(&self, mutation_type: &str) -> Vec<MutationRecord> {
        self.registry.list_by_type(mutation_type)
    }

    pub fn pending_count_by_type(&self, mutation_type: &str) -> usize {
        self.registry.pending_count_by_type(mutation_type)
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    /// 关闭：取消所有错误清除定时任务、移除监听器，之后的 execute 会立即回滚
    pub fn shutdown(&self) {
        info!("🔄 MutationCoordinator 正在关闭");
        self.registry.shutdown();
        self.events.clear_listeners();
        info!("✅ MutationCoordinator 已关闭");
    }
}
