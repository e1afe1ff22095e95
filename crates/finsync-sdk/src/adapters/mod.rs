//! 业务 store 适配层
//!
//! 每个业务实体（分类、收据、预算、账户、角色）拥有自己的本地集合，
//! 先在本地应用乐观修改，再交给协调器执行远端调用，并提供成功 / 回滚时的对账逻辑。
//! 回滚总是基于修改前拍下的不可变快照，不依赖对当前集合做 diff。

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::coordinator::MutationCoordinator;
use crate::error::{FinsyncSDKError, Result};
use crate::mutation::Mutation;

pub mod account;
pub mod budget;
pub mod category;
pub mod persona;
pub mod receipt;

pub use account::{AccountStore, AccountType, FinancialAccount};
pub use budget::{Budget, BudgetPeriod, BudgetStore};
pub use category::{Category, CategoryStatus, CategoryStore};
pub use persona::{Persona, PersonaStore};
pub use receipt::{Receipt, ReceiptStatus, ReceiptStore};

/// 乐观占位 ID 前缀
pub const PLACEHOLDER_PREFIX: &str = "temp-";

pub fn placeholder_id() -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, Uuid::new_v4())
}

pub fn is_placeholder_id(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

/// 可被乐观更新的业务实体
pub trait Entity: Clone + Send + Sync + Serialize + 'static {
    /// 命名空间，例如 "category"
    const KIND: &'static str;
    /// 面向用户的名称，用于 Toast
    const LABEL: &'static str;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);

    /// 调用点标识，例如 "category:create"
    fn mutation_type(action: &str) -> String {
        format!("{}:{}", Self::KIND, action)
    }
}

/// 远端（HTTP 层）边界
#[async_trait]
pub trait RemoteStore<E: Entity>: Send + Sync {
    /// 创建实体，返回带服务端 ID 的权威实体
    async fn create(&self, draft: E) -> anyhow::Result<E>;
    async fn update(&self, entity: E) -> anyhow::Result<E>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
}

/// 删除前的快照：实体及其在集合中的位置
#[derive(Debug, Clone, Serialize)]
pub struct RemovedEntry<E> {
    pub index: usize,
    pub entity: E,
}

/// 带乐观更新的本地集合（克隆共享同一份数据）
pub struct OptimisticCollection<E: Entity> {
    items: Arc<RwLock<Vec<E>>>,
    coordinator: Arc<MutationCoordinator>,
    remote: Arc<dyn RemoteStore<E>>,
}

impl<E: Entity> Clone for OptimisticCollection<E> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            coordinator: self.coordinator.clone(),
            remote: self.remote.clone(),
        }
    }
}

impl<E: Entity> OptimisticCollection<E> {
    pub fn new(coordinator: Arc<MutationCoordinator>, remote: Arc<dyn RemoteStore<E>>) -> Self {
        Self {
            items: Arc::new(RwLock::new(Vec::new())),
            coordinator,
            remote,
        }
    }

    pub fn coordinator(&self) -> &Arc<MutationCoordinator> {
        &self.coordinator
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore<E>> {
        &self.remote
    }

    /// 就地修改本地数据（不经过协调器），供跨实体的操作使用
    pub(crate) fn apply_local<F>(&self, edit: F)
    where
        F: FnOnce(&mut Vec<E>),
    {
        edit(&mut self.items.write());
    }

    /// 用服务端的权威数据整体替换（例如首次加载）
    pub fn replace_all(&self, items: Vec<E>) {
        *self.items.write() = items;
    }

    pub fn list(&self) -> Vec<E> {
        self.items.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<E> {
        self.items.read().iter().find(|e| e.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 正在同步的该类实体数量（"3 个分类保存中…"）
    pub fn pending_count(&self, action: &str) -> usize {
        self.coordinator.pending_count_by_type(&E::mutation_type(action))
    }

    /// 乐观创建：先插入占位实体，成功后替换为服务端实体，失败则移除占位
    pub async fn create(&self, draft: E) -> Option<E> {
        let mut placeholder = draft.clone();
        let temp_id = placeholder_id();
        placeholder.set_id(temp_id.clone());
        self.items.write().push(placeholder.clone());
        debug!("{} 乐观插入占位: {}", E::KIND, temp_id);

        let remote = self.remote.clone();
        let on_success_items = self.items.clone();
        let on_success_temp = temp_id.clone();
        let on_rollback_items = self.items.clone();
        let on_rollback_temp = temp_id;
        let retry = self.clone();
        let retry_draft = draft.clone();

        let mutation = Mutation::new(
            E::mutation_type("create"),
            placeholder,
            None::<E>,
            async move { remote.create(draft).await },
        )
        .on_success(move |created: &E| {
            let mut items = on_success_items.write();
            match items.iter_mut().find(|e| e.id() == on_success_temp) {
                Some(slot) => *slot = created.clone(),
                None => debug!("占位已不在集合中，忽略服务端结果: {}", on_success_temp),
            }
        })
        .on_rollback(move |_previous: Option<E>| {
            on_rollback_items.write().retain(|e| e.id() != on_rollback_temp);
        })
        .success_message(format!("{} created", E::LABEL))
        .error_message(format!("Failed to create {}", E::LABEL.to_lowercase()))
        .error_action("Retry", move || {
            spawn_retry(retry.clone().retry_create(retry_draft.clone()));
        });

        self.coordinator.execute(mutation).await
    }

    /// 乐观更新：先替换本地实体，失败时恢复修改前的快照
    pub async fn update(&self, entity: E) -> Result<Option<E>> {
        let id = entity.id().to_string();
        let previous = {
            let mut items = self.items.write();
            let slot = items
                .iter_mut()
                .find(|e| e.id() == id)
                .ok_or_else(|| FinsyncSDKError::NotFound(format!("{} {}", E::KIND, id)))?;
            std::mem::replace(slot, entity.clone())
        };

        let remote = self.remote.clone();
        let on_success_items = self.items.clone();
        let on_rollback_items = self.items.clone();
        let retry = self.clone();
        let retry_entity = entity.clone();
        let optimistic = entity.clone();

        let mutation = Mutation::new(
            E::mutation_type("update"),
            optimistic,
            previous,
            async move { remote.update(entity).await },
        )
        .on_success(move |updated: &E| {
            let mut items = on_success_items.write();
            if let Some(slot) = items.iter_mut().find(|e| e.id() == updated.id()) {
                *slot = updated.clone();
            }
        })
        .on_rollback(move |previous: E| {
            let mut items = on_rollback_items.write();
            match items.iter_mut().find(|e| e.id() == previous.id()) {
                Some(slot) => *slot = previous,
                None => warn!("⚠️ 回滚时实体已不在集合中: {}", previous.id()),
            }
        })
        .error_message(format!("Failed to update {}", E::LABEL.to_lowercase()))
        .error_action("Retry", move || {
            spawn_retry(retry.clone().retry_update(retry_entity.clone()));
        });

        Ok(self.coordinator.execute(mutation).await)
    }

    /// 基于当前值修改单个字段后走 update
    pub async fn modify<F>(&self, id: &str, edit: F) -> Result<Option<E>>
    where
        F: FnOnce(&mut E),
    {
        let mut entity = self
            .get(id)
            .ok_or_else(|| FinsyncSDKError::NotFound(format!("{} {}", E::KIND, id)))?;
        edit(&mut entity);
        self.update(entity).await
    }

    /// 乐观删除：先移除，失败时按原位置放回
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut items = self.items.write();
            let index = items
                .iter()
                .position(|e| e.id() == id)
                .ok_or_else(|| FinsyncSDKError::NotFound(format!("{} {}", E::KIND, id)))?;
            RemovedEntry {
                index,
                entity: items.remove(index),
            }
        };

        let remote = self.remote.clone();
        let remote_id = id.to_string();
        let on_rollback_items = self.items.clone();
        let retry = self.clone();
        let retry_id = id.to_string();

        let mutation = Mutation::new(
            E::mutation_type("delete"),
            serde_json::json!({ "id": id }),
            removed,
            async move { remote.delete(&remote_id).await },
        )
        .on_rollback(move |removed: RemovedEntry<E>| {
            let mut items = on_rollback_items.write();
            if items.iter().any(|e| e.id() == removed.entity.id()) {
                return;
            }
            let index = removed.index.min(items.len());
            items.insert(index, removed.entity);
        })
        .success_message(format!("{} deleted", E::LABEL))
        .error_message(format!("Failed to delete {}", E::LABEL.to_lowercase()))
        .error_action("Retry", move || {
            spawn_retry(retry.clone().retry_delete(retry_id.clone()));
        });

        Ok(self.coordinator.execute(mutation).await.is_some())
    }

    fn retry_create(self, draft: E) -> BoxFuture<'static, ()> {
        async move {
            self.create(draft).await;
        }
        .boxed()
    }

    fn retry_update(self, entity: E) -> BoxFuture<'static, ()> {
        async move {
            if let Err(e) = self.update(entity).await {
                warn!("⚠️ 重试更新失败: {}", e);
            }
        }
        .boxed()
    }

    fn retry_delete(self, id: String) -> BoxFuture<'static, ()> {
        async move {
            if let Err(e) = self.delete(&id).await {
                warn!("⚠️ 重试删除失败: {}", e);
            }
        }
        .boxed()
    }
}

/// 重试是一次全新的 execute，放到 runtime 中异步执行
pub(crate) fn spawn_retry(retry: BoxFuture<'static, ()>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(retry);
        }
        Err(_) => warn!("⚠️ 没有 tokio runtime，无法执行重试"),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{coordinator, MockRemote};
    use super::*;
    use crate::events::MutationEvent;
    use crate::mutation::SyncStatus;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Note {
        id: String,
        text: String,
    }

    impl Entity for Note {
        const KIND: &'static str = "note";
        const LABEL: &'static str = "Note";

        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }
    }

    fn note(id: &str, text: &str) -> Note {
        Note {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_replaces_placeholder_with_server_entity() {
        let remote = MockRemote::new();
        let notes = OptimisticCollection::<Note>::new(coordinator(), remote.clone());

        let created = notes.create(note("", "hello")).await.unwrap();
        assert_eq!(created.id, "real-1");
        assert_eq!(notes.list(), vec![note("real-1", "hello")]);
    }

    #[tokio::test]
    async fn test_create_failure_removes_placeholder() {
        let remote = MockRemote::new();
        remote.fail_next(1);
        let notes = OptimisticCollection::<Note>::new(coordinator(), remote.clone());
        notes.replace_all(vec![note("a", "keep")]);

        assert!(notes.create(note("", "lost")).await.is_none());
        assert_eq!(notes.list(), vec![note("a", "keep")]);
        assert_eq!(notes.coordinator().sync_status(), SyncStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_placeholder_visible_while_in_flight() {
        let remote = MockRemote::with_delay(Duration::from_millis(100));
        let notes = OptimisticCollection::<Note>::new(coordinator(), remote.clone());

        let task = {
            let notes = notes.clone();
            tokio::spawn(async move { notes.create(note("", "draft")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let listed = notes.list();
        assert_eq!(listed.len(), 1);
        assert!(is_placeholder_id(&listed[0].id));
        assert_eq!(notes.pending_count("create"), 1);

        let created = task.await.unwrap().unwrap();
        assert_eq!(notes.list(), vec![created]);
        assert_eq!(notes.pending_count("create"), 0);
    }

    #[tokio::test]
    async fn test_update_rollback_restores_snapshot() {
        let remote = MockRemote::new();
        remote.fail_next(1);
        let notes = OptimisticCollection::<Note>::new(coordinator(), remote.clone());
        notes.replace_all(vec![note("a", "old"), note("b", "other")]);

        let result = notes.update(note("a", "new")).await.unwrap();
        assert!(result.is_none());
        assert_eq!(notes.get("a"), Some(note("a", "old")));
        assert_eq!(notes.get("b"), Some(note("b", "other")));
    }

    #[tokio::test]
    async fn test_update_unknown_entity_is_not_found() {
        let notes = OptimisticCollection::<Note>::new(coordinator(), MockRemote::new());
        let err = notes.update(note("ghost", "x")).await.unwrap_err();
        assert!(matches!(err, FinsyncSDKError::NotFound(_)));
        assert_eq!(notes.coordinator().active_mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_rollback_reinserts_at_original_position() {
        let remote = MockRemote::new();
        remote.fail_next(1);
        let notes = OptimisticCollection::<Note>::new(coordinator(), remote.clone());
        notes.replace_all(vec![note("a", "1"), note("b", "2"), note("c", "3")]);

        assert!(!notes.delete("b").await.unwrap());
        let ids: Vec<String> = notes.list().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        assert!(notes.delete("b").await.unwrap());
        let ids: Vec<String> = notes.list().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_ignores_unrelated_concurrent_edits() {
        let remote = MockRemote::with_delay(Duration::from_millis(50));
        let notes = OptimisticCollection::<Note>::new(coordinator(), remote.clone());
        notes.replace_all(vec![note("a", "old-a"), note("b", "old-b")]);
        remote.fail_next(1);

        let failing = {
            let notes = notes.clone();
            tokio::spawn(async move { notes.update(note("a", "new-a")).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        let succeeding = {
            let notes = notes.clone();
            tokio::spawn(async move { notes.update(note("b", "new-b")).await })
        };

        assert!(failing.await.unwrap().unwrap().is_none());
        assert!(succeeding.await.unwrap().unwrap().is_some());
        assert_eq!(notes.get("a"), Some(note("a", "old-a")));
        assert_eq!(notes.get("b"), Some(note("b", "new-b")));
    }

    #[tokio::test]
    async fn test_retry_action_runs_a_fresh_mutation() {
        let remote = MockRemote::new();
        remote.fail_next(1);
        let coordinator = coordinator();
        let notes = OptimisticCollection::<Note>::new(coordinator.clone(), remote.clone());
        let mut events = coordinator.events().subscribe();

        assert!(notes.create(note("", "retry me")).await.is_none());

        let mut action = None;
        let mut failed_id = None;
        while let Ok(event) = events.try_recv() {
            if let MutationEvent::Toast(toast) = event {
                failed_id = Some(toast.mutation_id.clone());
                action = toast.action;
            }
        }
        action.expect("error toast carries retry").invoke();

        let committed = loop {
            if let MutationEvent::MutationCommitted { mutation_id, .. } = events.recv().await.unwrap() {
                break mutation_id;
            }
        };
        assert_ne!(Some(committed), failed_id);
        assert_eq!(remote.calls(), 2);
        assert_eq!(notes.len(), 1);
        assert!(!is_placeholder_id(&notes.list()[0].id));
    }

    /// 取出最近一个错误 Toast 的 mutation id 和重试入口
    fn last_error_toast(
        events: &mut tokio::sync::broadcast::Receiver<MutationEvent>,
    ) -> (crate::mutation::MutationId, crate::mutation::ErrorAction) {
        let mut last = None;
        while let Ok(event) = events.try_recv() {
            if let MutationEvent::Toast(toast) = event {
                if let Some(action) = toast.action {
                    last = Some((toast.mutation_id, action));
                }
            }
        }
        last.expect("error toast with retry")
    }

    async fn next_commit(
        events: &mut tokio::sync::broadcast::Receiver<MutationEvent>,
    ) -> (crate::mutation::MutationId, String) {
        loop {
            if let MutationEvent::MutationCommitted {
                mutation_id,
                mutation_type,
                ..
            } = events.recv().await.unwrap()
            {
                return (mutation_id, mutation_type);
            }
        }
    }

    #[tokio::test]
    async fn test_update_retry_commits_with_fresh_id() {
        let remote = MockRemote::new();
        remote.fail_next(1);
        let coordinator = coordinator();
        let notes = OptimisticCollection::<Note>::new(coordinator.clone(), remote.clone());
        notes.replace_all(vec![note("a", "old")]);
        let mut events = coordinator.events().subscribe();

        assert!(notes.update(note("a", "new")).await.unwrap().is_none());
        assert_eq!(notes.get("a"), Some(note("a", "old")));

        let (failed_id, retry) = last_error_toast(&mut events);
        retry.invoke();

        let (committed_id, mutation_type) = next_commit(&mut events).await;
        assert_ne!(committed_id, failed_id);
        assert_eq!(mutation_type, "note:update");
        assert_eq!(notes.get("a"), Some(note("a", "new")));
        assert_eq!(remote.calls(), 2);
    }

    #[tokio::test]
    async fn test_delete_retry_removes_restored_entity() {
        let remote = MockRemote::new();
        remote.fail_next(1);
        let coordinator = coordinator();
        let notes = OptimisticCollection::<Note>::new(coordinator.clone(), remote.clone());
        notes.replace_all(vec![note("a", "1"), note("b", "2")]);
        let mut events = coordinator.events().subscribe();

        assert!(!notes.delete("a").await.unwrap());
        assert_eq!(notes.len(), 2);

        let (_, retry) = last_error_toast(&mut events);
        retry.invoke();

        let (_, mutation_type) = next_commit(&mut events).await;
        assert_eq!(mutation_type, "note:delete");
        assert_eq!(notes.list(), vec![note("b", "2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_create_removes_placeholder() {
        let remote = MockRemote::with_delay(Duration::from_secs(60));
        let notes = OptimisticCollection::<Note>::new(coordinator(), remote.clone());
        notes.replace_all(vec![note("a", "keep")]);

        let result = tokio::time::timeout(Duration::from_secs(1), notes.create(note("", "slow"))).await;

        assert!(result.is_err());
        assert_eq!(notes.list(), vec![note("a", "keep")]);
        assert_eq!(notes.pending_count("create"), 0);
        assert_eq!(notes.coordinator().sync_status(), SyncStatus::Error);
    }
}
