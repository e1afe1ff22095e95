//! 单次乐观更新的生命周期编排
//!
//! register → 执行 operation → 成功: complete + on_success / 失败: fail + on_rollback
//!
//! operation 以 Future 形式传入，Future 是惰性的，在注册完成之后才会被第一次 poll，
//! 因此同步指示器总能看到这次更新，即使 operation 立即完成。

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{MutationId, MutationRegistry};
use crate::config::CoordinatorConfig;
use crate::error::{FinsyncSDKError, Result};
use crate::events::{event_builders, EventManager};

/// Toast 上的重试入口
///
/// 调用方自行决定重试内容，通常是重新调用同一个 store 方法（会产生新的 mutation id）
#[derive(Clone)]
pub struct ErrorAction {
    label: String,
    action: Arc<dyn Fn() + Send + Sync>,
}

impl ErrorAction {
    pub fn new<S, F>(label: S, action: F) -> Self
    where
        S: Into<String>,
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            action: Arc::new(action),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn invoke(&self) {
        (self.action)()
    }
}

impl fmt::Debug for ErrorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorAction").field("label", &self.label).finish()
    }
}

type SuccessCallback<R> = Box<dyn FnOnce(&R) + Send>;
type RollbackCallback<P> = Box<dyn FnOnce(P) + Send>;

/// 一次乐观更新的描述
///
/// - `O`：乐观数据快照（调用前已应用到本地集合）
/// - `P`：回滚用的旧数据快照，失败时按值交给 on_rollback
/// - `R`：远端返回的权威结果
pub struct Mutation<O, P, R> {
    id: Option<MutationId>,
    mutation_type: String,
    optimistic: O,
    previous: P,
    operation: BoxFuture<'static, anyhow::Result<R>>,
    on_success: Option<SuccessCallback<R>>,
    on_rollback: Option<RollbackCallback<P>>,
    success_message: Option<String>,
    error_message: Option<String>,
    error_action: Option<ErrorAction>,
}

impl<O, P, R> Mutation<O, P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    pub fn new<S, F>(mutation_type: S, optimistic: O, previous: P, operation: F) -> Self
    where
        S: Into<String>,
        F: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        Self {
            id: None,
            mutation_type: mutation_type.into(),
            optimistic,
            previous,
            operation: operation.boxed(),
            on_success: None,
            on_rollback: None,
            success_message: None,
            error_message: None,
            error_action: None,
        }
    }

    /// 使用调用方指定的 ID（调用方负责唯一性）
    pub fn with_id(mut self, id: MutationId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&R) + Send + 'static,
    {
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_rollback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(P) + Send + 'static,
    {
        self.on_rollback = Some(Box::new(callback));
        self
    }

    pub fn success_message<S: Into<String>>(mut self, message: S) -> Self {
        self.success_message = Some(message.into());
        self
    }

    pub fn error_message<S: Into<String>>(mut self, message: S) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn error_action<S, F>(mut self, label: S, action: F) -> Self
    where
        S: Into<String>,
        F: Fn() + Send + Sync + 'static,
    {
        self.error_action = Some(ErrorAction::new(label, action));
        self
    }

    pub fn mutation_type(&self) -> &str {
        &self.mutation_type
    }
}

/// execute 的结果
#[derive(Debug)]
pub enum MutationOutcome<R> {
    /// 远端确认成功，on_success 已执行
    Committed { id: MutationId, result: R },
    /// 失败并已回滚，on_rollback 已执行
    RolledBack {
        id: MutationId,
        error: FinsyncSDKError,
    },
}

impl<R> MutationOutcome<R> {
    pub fn id(&self) -> &MutationId {
        match self {
            MutationOutcome::Committed { id, .. } => id,
            MutationOutcome::RolledBack { id, .. } => id,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, MutationOutcome::Committed { .. })
    }

    pub fn error(&self) -> Option<&FinsyncSDKError> {
        match self {
            MutationOutcome::Committed { .. } => None,
            MutationOutcome::RolledBack { error, .. } => Some(error),
        }
    }

    /// 失败时返回 None（不抛出）
    pub fn into_result(self) -> Option<R> {
        match self {
            MutationOutcome::Committed { result, .. } => Some(result),
            MutationOutcome::RolledBack { .. } => None,
        }
    }

    pub fn into_std_result(self) -> Result<R> {
        match self {
            MutationOutcome::Committed { result, .. } => Ok(result),
            MutationOutcome::RolledBack { error, .. } => Err(error),
        }
    }
}

/// 乐观更新执行器
#[derive(Clone)]
pub struct MutationExecutor {
    registry: MutationRegistry,
    events: Arc<EventManager>,
    generic_error_message: String,
    emit_success_toasts: bool,
}

impl MutationExecutor {
    pub fn new(registry: MutationRegistry, events: Arc<EventManager>, config: &CoordinatorConfig) -> Self {
        Self {
            registry,
            events,
            generic_error_message: config.generic_error_message.clone(),
            emit_success_toasts: config.emit_success_toasts,
        }
    }

    pub fn registry(&self) -> &MutationRegistry {
        &self.registry
    }

    /// 执行乐观更新；失败时返回 None
    pub async fn execute<O, P, R>(&self, mutation: Mutation<O, P, R>) -> Option<R>
    where
        O: Serialize + Send,
        P: Serialize + Send + 'static,
        R: Send + 'static,
    {
        self.execute_detailed(mutation).await.into_result()
    }

    /// 执行乐观更新并返回完整结果
    ///
    /// 对同一个 mutation，on_success 与 on_rollback 恰好执行其一，且只执行一次。
    /// 返回的 Future 在 operation 结束前被丢弃（timeout、select!、abort）时，
    /// 按 operation 失败处理：记录标记为 Error，并执行 on_rollback。
    pub async fn execute_detailed<O, P, R>(&self, mutation: Mutation<O, P, R>) -> MutationOutcome<R>
    where
        O: Serialize + Send,
        P: Serialize + Send + 'static,
        R: Send + 'static,
    {
        let Mutation {
            id,
            mutation_type,
            optimistic,
            previous,
            operation,
            on_success,
            on_rollback,
            success_message,
            error_message,
            error_action,
        } = mutation;

        let id = id.unwrap_or_else(MutationId::generate);
        let optimistic_snapshot = snapshot_json(&optimistic, &mutation_type);
        let previous_snapshot = snapshot_json(&previous, &mutation_type);
        drop(optimistic);

        let rollback = RollbackState {
            previous,
            on_rollback,
            error_message,
            error_action,
        };

        if let Err(error) =
            self.registry
                .register(id.clone(), &mutation_type, optimistic_snapshot, previous_snapshot)
        {
            // 不能碰已存在的同名记录，operation 也不会被 poll
            warn!(
                "⚠️ mutation 注册失败，直接回滚: id={}, type={}, error={}",
                id, mutation_type, error
            );
            drop(operation);
            self.roll_back(&id, &mutation_type, &error.user_message(), rollback);
            return MutationOutcome::RolledBack { id, error };
        }

        let mut in_flight = InFlight {
            executor: self.clone(),
            id: id.clone(),
            mutation_type: mutation_type.clone(),
            rollback: Some(rollback),
        };

        self.events.emit(event_builders::mutation_registered(&id, &mutation_type));
        debug!("mutation in flight: id={}, type={}", id, mutation_type);

        let settled = match AssertUnwindSafe(operation).catch_unwind().await {
            Ok(settled) => settled,
            Err(payload) => Err(anyhow::anyhow!(
                "operation panicked: {}",
                panic_message(payload.as_ref())
            )),
        };
        let rollback = in_flight.disarm();

        match settled {
            Ok(result) => {
                self.registry.complete(&id);
                if let Some(callback) = on_success {
                    callback(&result);
                }
                info!("✅ mutation committed: id={}, type={}", id, mutation_type);

                self.events.emit(event_builders::mutation_committed(&id, &mutation_type));
                if self.emit_success_toasts {
                    if let Some(message) = success_message {
                        self.events.emit(event_builders::success_toast(&id, &mutation_type, message));
                    }
                }
                MutationOutcome::Committed { id, result }
            }
            Err(err) => {
                let error = FinsyncSDKError::operation_failed(
                    mutation_type.clone(),
                    &err,
                    &self.generic_error_message,
                );
                let message = error.user_message();
                self.registry.fail(&id, message.clone());
                if let Some(rollback) = rollback {
                    self.roll_back(&id, &mutation_type, &message, rollback);
                }
                MutationOutcome::RolledBack { id, error }
            }
        }
    }

    /// 执行 on_rollback 并发出回滚事件与错误 Toast（registry 由调用方处理）
    fn roll_back<P>(&self, id: &MutationId, mutation_type: &str, message: &str, rollback: RollbackState<P>) {
        let RollbackState {
            previous,
            on_rollback,
            error_message,
            error_action,
        } = rollback;
        if let Some(callback) = on_rollback {
            callback(previous);
        }
        warn!(
            "⚠️ mutation rolled back: id={}, type={}, error={}",
            id, mutation_type, message
        );

        self.events.emit(event_builders::mutation_rolled_back(id, mutation_type, message));
        let toast_message = error_message.unwrap_or_else(|| message.to_string());
        self.events.emit(event_builders::error_toast(id, mutation_type, toast_message, error_action));
    }
}

/// operation 被取消时记录的错误文本
pub const CANCELLED_MESSAGE: &str = "Operation cancelled";

/// 回滚所需的全部数据，只会被取走一次
struct RollbackState<P> {
    previous: P,
    on_rollback: Option<RollbackCallback<P>>,
    error_message: Option<String>,
    error_action: Option<ErrorAction>,
}

/// 已注册、operation 尚未结束的 mutation
///
/// 正常结束时调用 disarm 取走回滚数据；未取走就被 drop 说明 Future 被丢弃，
/// 此时按失败处理。
struct InFlight<P> {
    executor: MutationExecutor,
    id: MutationId,
    mutation_type: String,
    rollback: Option<RollbackState<P>>,
}

impl<P> InFlight<P> {
    fn disarm(&mut self) -> Option<RollbackState<P>> {
        self.rollback.take()
    }
}

impl<P> Drop for InFlight<P> {
    fn drop(&mut self) {
        let Some(rollback) = self.rollback.take() else {
            return;
        };
        warn!(
            "⚠️ mutation 在远端结束前被丢弃，按失败回滚: id={}, type={}",
            self.id, self.mutation_type
        );
        self.executor.registry.fail(&self.id, CANCELLED_MESSAGE);
        self.executor
            .roll_back(&self.id, &self.mutation_type, CANCELLED_MESSAGE, rollback);
    }
}

fn snapshot_json<T: Serialize>(value: &T, mutation_type: &str) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!("⚠️ 快照序列化失败，registry 中记为 null: type={}, error={}", mutation_type, e);
        serde_json::Value::Null
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MutationEvent, ToastKind};
    use crate::mutation::SyncStatus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn executor() -> MutationExecutor {
        let config = CoordinatorConfig::default();
        MutationExecutor::new(
            MutationRegistry::with_grace_period(config.error_grace_period()),
            Arc::new(EventManager::new(64)),
            &config,
        )
    }

    #[derive(Default)]
    struct Calls {
        success: AtomicUsize,
        rollback: AtomicUsize,
    }

    #[tokio::test]
    async fn test_success_runs_only_on_success() {
        let executor = executor();
        let calls = Arc::new(Calls::default());
        let (c1, c2) = (calls.clone(), calls.clone());

        let result = executor
            .execute(
                Mutation::new("category:create", json!({"id": "temp-1"}), None::<String>, async {
                    Ok(json!({"id": "real-1"}))
                })
                .on_success(move |r: &serde_json::Value| {
                    assert_eq!(r["id"], "real-1");
                    c1.success.fetch_add(1, Ordering::SeqCst);
                })
                .on_rollback(move |_| {
                    c2.rollback.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;

        assert_eq!(result, Some(json!({"id": "real-1"})));
        assert_eq!(calls.success.load(Ordering::SeqCst), 1);
        assert_eq!(calls.rollback.load(Ordering::SeqCst), 0);
        assert_eq!(executor.registry().active_mutation_count(), 0);
        assert_eq!(executor.registry().sync_status(), SyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_with_previous_snapshot() {
        let executor = executor();
        let restored = Arc::new(parking_lot::Mutex::new(None));
        let restored_clone = restored.clone();

        let outcome = executor
            .execute_detailed(
                Mutation::new(
                    "budget:update",
                    json!({"amount": 200}),
                    json!({"amount": 100}),
                    async { Err::<(), _>(anyhow::anyhow!("network down")) },
                )
                .on_success(|_| panic!("success must not run"))
                .on_rollback(move |previous| {
                    *restored_clone.lock() = Some(previous);
                }),
            )
            .await;

        assert!(!outcome.is_committed());
        assert_eq!(outcome.error().unwrap().user_message(), "network down");
        assert_eq!(*restored.lock(), Some(json!({"amount": 100})));

        let record = executor.registry().lookup(outcome.id()).unwrap();
        assert_eq!(record.error_message.as_deref(), Some("network down"));
        assert_eq!(executor.registry().sync_status(), SyncStatus::Error);
    }

    #[tokio::test]
    async fn test_registration_precedes_operation() {
        let executor = executor();
        let registry = executor.registry().clone();

        let seen = executor
            .execute(Mutation::new("receipt:delete", json!(null), json!(null), async move {
                Ok(registry.active_mutation_count())
            }))
            .await;

        assert_eq!(seen, Some(1));
        assert_eq!(executor.registry().active_mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_error_uses_generic_message() {
        let executor = executor();
        let outcome = executor
            .execute_detailed(Mutation::new("account:update", json!(1), json!(0), async {
                Err::<(), _>(anyhow::anyhow!(""))
            }))
            .await;
        assert_eq!(
            outcome.error().unwrap().user_message(),
            CoordinatorConfig::default().generic_error_message
        );
    }

    #[tokio::test]
    async fn test_panicking_operation_is_rolled_back() {
        let executor = executor();
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let rollbacks_clone = rollbacks.clone();

        let result = executor
            .execute(
                Mutation::new("persona:create", json!(null), json!(null), async {
                    if true {
                        panic!("bad payload");
                    }
                    Ok(())
                })
                .on_rollback(move |_| {
                    rollbacks_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;

        assert!(result.is_none());
        assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(executor.registry().active_mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_rolls_back_without_touching_existing_record() {
        let executor = executor();
        let existing = MutationId::from("fixed-1");
        executor
            .registry()
            .register(existing.clone(), "category:update", json!(null), json!(null))
            .unwrap();

        let polled = Arc::new(AtomicUsize::new(0));
        let polled_clone = polled.clone();
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let rollbacks_clone = rollbacks.clone();

        let outcome = executor
            .execute_detailed(
                Mutation::new("category:update", json!(null), json!(null), async move {
                    polled_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .with_id(existing.clone())
                .on_rollback(move |_| {
                    rollbacks_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;

        assert!(matches!(
            outcome.error(),
            Some(FinsyncSDKError::DuplicateMutation(_))
        ));
        assert_eq!(polled.load(Ordering::SeqCst), 0);
        assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
        assert!(executor.registry().lookup(&existing).unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_toasts_on_success_and_failure() {
        let executor = executor();
        let mut events = executor.events.subscribe();

        executor
            .execute(
                Mutation::new("category:create", json!(null), json!(null), async { Ok(()) })
                    .success_message("Category created"),
            )
            .await;
        executor
            .execute(
                Mutation::new("category:create", json!(null), json!(null), async {
                    Err::<(), _>(anyhow::anyhow!("network down"))
                })
                .error_message("Failed to create category")
                .error_action("Retry", || {}),
            )
            .await;

        let mut toasts = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let MutationEvent::Toast(toast) = event {
                toasts.push(toast);
            }
        }
        assert_eq!(toasts.len(), 2);
        assert_eq!(toasts[0].kind, ToastKind::Success);
        assert_eq!(toasts[0].message, "Category created");
        assert_eq!(toasts[1].kind, ToastKind::Error);
        assert_eq!(toasts[1].message, "Failed to create category");
        assert_eq!(toasts[1].action.as_ref().map(|a| a.label()), Some("Retry"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_future_rolls_back_as_cancelled() {
        let executor = executor();
        let calls = Arc::new(Calls::default());
        let (c1, c2) = (calls.clone(), calls.clone());
        let mut events = executor.events.subscribe();

        let timed_out = tokio::time::timeout(
            Duration::from_secs(1),
            executor.execute(
                Mutation::new("category:create", json!({"id": "temp-1"}), json!(null), async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                })
                .on_success(move |_| {
                    c1.success.fetch_add(1, Ordering::SeqCst);
                })
                .on_rollback(move |_| {
                    c2.rollback.fetch_add(1, Ordering::SeqCst);
                })
                .error_message("Failed to create category"),
            ),
        )
        .await;

        assert!(timed_out.is_err());
        assert_eq!(calls.success.load(Ordering::SeqCst), 0);
        assert_eq!(calls.rollback.load(Ordering::SeqCst), 1);
        assert_eq!(executor.registry().active_mutation_count(), 0);
        assert_eq!(executor.registry().sync_status(), SyncStatus::Error);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let MutationEvent::MutationRolledBack { error, .. } = &event {
                assert_eq!(error, CANCELLED_MESSAGE);
            }
            kinds.push(event.event_type());
        }
        assert_eq!(kinds, vec!["mutation_registered", "mutation_rolled_back", "toast"]);

        tokio::time::sleep(Duration::from_secs(3_600)).await;
        assert_eq!(calls.rollback.load(Ordering::SeqCst), 1);
        assert_eq!(executor.registry().sync_status(), SyncStatus::Idle);
        assert!(executor.registry().is_empty());
    }

    #[tokio::test]
    async fn test_aborted_task_rolls_back() {
        let executor = executor();
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let rollbacks_clone = rollbacks.clone();
        let (_tx, rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn({
            let executor = executor.clone();
            async move {
                executor
                    .execute(
                        Mutation::new("budget:update", json!(null), json!(null), async move {
                            rx.await?;
                            Ok(())
                        })
                        .on_rollback(move |_| {
                            rollbacks_clone.fetch_add(1, Ordering::SeqCst);
                        }),
                    )
                    .await
            }
        });
        tokio::task::yield_now().await;
        assert_eq!(executor.registry().active_mutation_count(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(executor.registry().active_mutation_count(), 0);
    }
}
