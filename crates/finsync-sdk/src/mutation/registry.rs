//! 进程级 Mutation Registry
//!
//! 职责：
//! - 记录所有 in-flight / 最近失败的乐观更新
//! - 每次写入在同一临界区内重算 SyncSnapshot 并通过 watch 发布
//! - 失败记录在宽限期后自动清除（可取消的定时任务）
//!
//! 只有 MutationExecutor 写入；业务 store 只读。

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::status::{derive_sync_snapshot, SyncSnapshot, SyncStatus};
use super::{MutationId, MutationRecord};
use crate::error::{FinsyncSDKError, Result};

/// 默认错误宽限期
pub const DEFAULT_ERROR_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RegistryState {
    records: HashMap<MutationId, MutationRecord>,
    /// 失败记录的清除定时任务（JoinHandle 即取消句柄），带代次
    expiry_timers: HashMap<MutationId, ExpiryTimer>,
    /// 每安排一次清除任务递增
    next_generation: u64,
    shut_down: bool,
}

struct ExpiryTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    snapshot_tx: watch::Sender<SyncSnapshot>,
    grace_period: Duration,
}

/// Mutation Registry（线程安全，克隆共享同一张表）
#[derive(Clone)]
pub struct MutationRegistry {
    inner: Arc<RegistryInner>,
}

impl MutationRegistry {
    pub fn new() -> Self {
        Self::with_grace_period(DEFAULT_ERROR_GRACE_PERIOD)
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        let (snapshot_tx, _) = watch::channel(SyncSnapshot::default());
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                snapshot_tx,
                grace_period,
            }),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.inner.grace_period
    }

    /// 注册一条 Pending 记录
    ///
    /// ID 已存在时返回 DuplicateMutation，表内容不变
    pub fn register(
        &self,
        id: MutationId,
        mutation_type: &str,
        optimistic_data: serde_json::Value,
        previous_data: serde_json::Value,
    ) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.shut_down {
            return Err(FinsyncSDKError::ShuttingDown(format!(
                "registry closed, rejecting {}",
                mutation_type
            )));
        }
        if state.records.contains_key(&id) {
            warn!("⚠️ mutation id 重复注册: id={}, type={}", id, mutation_type);
            return Err(FinsyncSDKError::DuplicateMutation(id));
        }

        debug!("mutation registered: id={}, type={}", id, mutation_type);
        let record = MutationRecord::pending(id.clone(), mutation_type, optimistic_data, previous_data);
        state.records.insert(id, record);
        self.publish(&state);
        Ok(())
    }

    /// 删除记录（成功路径）；不存在时为 no-op
    pub fn complete(&self, id: &MutationId) -> bool {
        let mut state = self.inner.state.lock();
        let removed = state.records.remove(id).is_some();
        if let Some(timer) = state.expiry_timers.remove(id) {
            timer.handle.abort();
        }
        if removed {
            debug!("mutation completed: id={}", id);
            self.publish(&state);
        }
        removed
    }

    /// 标记失败并安排宽限期后清除；仅对 Pending 记录生效
    pub fn fail(&self, id: &MutationId, message: impl Into<String>) -> bool {
        let message = message.into();
        let mut state = self.inner.state.lock();
        let now = Instant::now();
        let marked = match state.records.get_mut(id) {
            Some(record) => record.mark_failed(message.clone(), now),
            None => false,
        };
        if !marked {
            debug!("fail ignored (absent or not pending): id={}", id);
            return false;
        }

        debug!("mutation failed: id={}, message={}", id, message);
        if !state.shut_down {
            state.next_generation += 1;
            let generation = state.next_generation;
            if let Some(handle) = self.schedule_expiry(id.clone(), generation) {
                let timer = ExpiryTimer { generation, handle };
                if let Some(old) = state.expiry_timers.insert(id.clone(), timer) {
                    old.handle.abort();
                }
            }
        }
        self.publish(&state);
        true
    }

    /// 宽限期到期后删除 Error 记录
    fn schedule_expiry(&self, id: MutationId, generation: u64) -> Option<JoinHandle<()>> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("⚠️ 没有 tokio runtime，错误记录需通过 purge_expired 清除: id={}", id);
                return None;
            }
        };
        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let grace_period = self.inner.grace_period;
        Some(runtime.spawn(async move {
            tokio::time::sleep(grace_period).await;
            if let Some(inner) = weak.upgrade() {
                MutationRegistry { inner }.expire(&id, generation);
            }
        }))
    }

    /// 由定时任务调用：只删除仍处于 Error 的记录
    ///
    /// 同一 id 可能已被 complete 后重新注册并再次失败，代次不一致时说明
    /// 当前任务已过期，不能动新的记录和定时任务。
    fn expire(&self, id: &MutationId, generation: u64) {
        let mut state = self.inner.state.lock();
        let current = state.expiry_timers.get(id).map(|t| t.generation);
        if current != Some(generation) {
            debug!("stale expiry ignored: id={}, generation={}", id, generation);
            return;
        }
        // 句柄属于当前任务本身，丢弃即可，不需要 abort
        state.expiry_timers.remove(id);
        let is_error = state.records.get(id).map(|r| r.is_error()).unwrap_or(false);
        if is_error {
            state.records.remove(id);
            debug!("error record expired: id={}", id);
            self.publish(&state);
        }
    }

    /// 删除所有已超过宽限期的 Error 记录，返回删除数量
    pub fn purge_expired(&self) -> usize {
        let mut state = self.inner.state.lock();
        let grace_period = self.inner.grace_period;
        let now = Instant::now();
        let expired: Vec<MutationId> = state
            .records
            .values()
            .filter(|r| {
                r.failed_at
                    .map(|at| now.duration_since(at) >= grace_period)
                    .unwrap_or(false)
            })
            .map(|r| r.id.clone())
            .collect();

        for id in &expired {
            state.records.remove(id);
            if let Some(timer) = state.expiry_timers.remove(id) {
                timer.handle.abort();
            }
        }
        if !expired.is_empty() {
            debug!("purged {} expired error records", expired.len());
            self.publish(&state);
        }
        expired.len()
    }

    pub fn lookup(&self, id: &MutationId) -> Option<MutationRecord> {
        self.inner.state.lock().records.get(id).cloned()
    }

    /// 指定类型的 Pending 记录（按创建顺序）
    pub fn list_by_type(&self, mutation_type: &str) -> Vec<MutationRecord> {
        let state = self.inner.state.lock();
        let mut records: Vec<MutationRecord> = state
            .records
            .values()
            .filter(|r| r.is_pending() && r.mutation_type == mutation_type)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub fn pending_count_by_type(&self, mutation_type: &str) -> usize {
        self.inner
            .state
            .lock()
            .records
            .values()
            .filter(|r| r.is_pending() && r.mutation_type == mutation_type)
            .count()
    }

    /// 当前快照（与 watch 中发布的一致）
    pub fn snapshot(&self) -> SyncSnapshot {
        *self.inner.snapshot_tx.borrow()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.snapshot().status
    }

    pub fn active_mutation_count(&self) -> usize {
        self.snapshot().active_count
    }

    /// 记录总数（Pending + Error）
    pub fn len(&self) -> usize {
        self.inner.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 订阅派生信号
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// 取消所有清除定时任务，并拒绝新的注册
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.shut_down = true;
        let timers = state.expiry_timers.len();
        for (_, timer) in state.expiry_timers.drain() {
            timer.handle.abort();
        }
        debug!("registry shut down, cancelled {} expiry timers", timers);
    }

    pub fn pending_timer_count(&self) -> usize {
        self.inner.state.lock().expiry_timers.len()
    }

    /// 必须在持有 state 锁时调用，保证快照与表一致
    fn publish(&self, state: &RegistryState) {
        let next = derive_sync_snapshot(state.records.values());
        self.inner.snapshot_tx.send_if_modified(|current| {
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });
    }
}

impl Default for MutationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        for (_, timer) in self.state.get_mut().expiry_timers.drain() {
            timer.handle.abort();
        }
    }
}
