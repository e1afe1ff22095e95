//! 事件系统模块 - 乐观更新的通知旁路
//!
//! 功能包括：
//! - Mutation 注册 / 提交 / 回滚事件
//! - Toast 通知（成功提示、失败提示 + 可选重试入口）
//! - 事件广播和订阅机制
//!
//! 事件是 fire-and-forget 的，不参与协调器的正确性约束。

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::mutation::{ErrorAction, MutationId};

/// Toast 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToastKind {
    Success,
    Error,
}

/// Toast 通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toast {
    pub kind: ToastKind,
    pub mutation_id: MutationId,
    pub mutation_type: String,
    pub message: String,
    /// 失败时的重试入口（不参与序列化）
    #[serde(skip)]
    pub action: Option<ErrorAction>,
    pub timestamp: u64,
}

impl Toast {
    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }
}

/// SDK 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MutationEvent {
    /// 乐观更新已登记，等待远端确认
    MutationRegistered {
        mutation_id: MutationId,
        mutation_type: String,
        timestamp: u64,
    },
    /// 远端确认成功
    MutationCommitted {
        mutation_id: MutationId,
        mutation_type: String,
        timestamp: u64,
    },
    /// 远端失败，本地已回滚
    MutationRolledBack {
        mutation_id: MutationId,
        mutation_type: String,
        error: String,
        timestamp: u64,
    },
    /// Toast 通知
    Toast(Toast),
}

impl MutationEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            MutationEvent::MutationRegistered { .. } => "mutation_registered",
            MutationEvent::MutationCommitted { .. } => "mutation_committed",
            MutationEvent::MutationRolledBack { .. } => "mutation_rolled_back",
            MutationEvent::Toast(_) => "toast",
        }
    }

    pub fn mutation_id(&self) -> &MutationId {
        match self {
            MutationEvent::MutationRegistered { mutation_id, .. } => mutation_id,
            MutationEvent::MutationCommitted { mutation_id, .. } => mutation_id,
            MutationEvent::MutationRolledBack { mutation_id, .. } => mutation_id,
            MutationEvent::Toast(toast) => &toast.mutation_id,
        }
    }

    /// 获取事件关联的调用点，例如 "category:create"
    pub fn mutation_type(&self) -> &str {
        match self {
            MutationEvent::MutationRegistered { mutation_type, .. } => mutation_type,
            MutationEvent::MutationCommitted { mutation_type, .. } => mutation_type,
            MutationEvent::MutationRolledBack { mutation_type, .. } => mutation_type,
            MutationEvent::Toast(toast) => &toast.mutation_type,
        }
    }

    /// 调用点命名空间（":" 之前的部分）
    pub fn namespace(&self) -> &str {
        let mutation_type = self.mutation_type();
        mutation_type.split(':').next().unwrap_or(mutation_type)
    }

    /// 获取事件时间戳（UTC毫秒）
    pub fn timestamp(&self) -> u64 {
        match self {
            MutationEvent::MutationRegistered { timestamp, .. } => *timestamp,
            MutationEvent::MutationCommitted { timestamp, .. } => *timestamp,
            MutationEvent::MutationRolledBack { timestamp, .. } => *timestamp,
            MutationEvent::Toast(toast) => toast.timestamp,
        }
    }
}

/// 事件过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// 事件类型过滤器
    pub event_types: Option<Vec<String>>,
    /// 命名空间过滤器（"category"、"receipt" ...）
    pub namespaces: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn with_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &MutationEvent) -> bool {
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        if let Some(ref namespaces) = self.namespaces {
            if !namespaces.iter().any(|n| n == event.namespace()) {
                return false;
            }
        }

        true
    }
}

/// 事件监听器
pub type EventListener = Box<dyn Fn(&MutationEvent) + Send + Sync>;

/// 所有命名空间
pub const ALL_NAMESPACES: &str = "*";

/// 事件管理器
///
/// emit 是同步的：可以在回滚路径（包括 Drop）里直接调用。
pub struct EventManager {
    sender: broadcast::Sender<MutationEvent>,
    /// 按命名空间（"category"、"receipt" ... 或 "*"）注册的监听器
    listeners: RwLock<HashMap<String, Vec<EventListener>>>,
    stats: Mutex<EventStats>,
}

/// 事件统计（按结果与命名空间）
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub committed: u64,
    pub rolled_back: u64,
    pub toasts: u64,
    /// 各命名空间的回滚次数
    pub rollbacks_by_namespace: HashMap<String, u64>,
}

impl EventStats {
    /// 已结束的 mutation 中回滚的比例
    pub fn rollback_ratio(&self) -> f64 {
        let settled = self.committed + self.rolled_back;
        if settled == 0 {
            0.0
        } else {
            self.rolled_back as f64 / settled as f64
        }
    }

    fn record(&mut self, event: &MutationEvent) {
        match event {
            MutationEvent::MutationRegistered { .. } => {}
            MutationEvent::MutationCommitted { .. } => self.committed += 1,
            MutationEvent::MutationRolledBack { .. } => {
                self.rolled_back += 1;
                *self
                    .rollbacks_by_namespace
                    .entry(event.namespace().to_string())
                    .or_insert(0) += 1;
            }
            MutationEvent::Toast(_) => self.toasts += 1,
        }
    }
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: RwLock::new(HashMap::new()),
            stats: Mutex::new(EventStats::default()),
        }
    }

    /// 发布事件：先广播，再调用该命名空间和 "*" 的监听器
    pub fn emit(&self, event: MutationEvent) {
        self.stats.lock().record(&event);

        // 没有 UI 订阅时 send 失败是正常的
        if self.sender.send(event.clone()).is_err() {
            debug!("no subscribers for {} ({})", event.event_type(), event.mutation_type());
        }

        let listeners = self.listeners.read();
        for key in [event.namespace(), ALL_NAMESPACES] {
            if let Some(listeners) = listeners.get(key) {
                listeners.iter().for_each(|listener| listener(&event));
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.sender.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        FilteredEventReceiver {
            receiver: self.sender.subscribe(),
            filter,
        }
    }

    /// 监听某个命名空间的事件（ALL_NAMESPACES 表示全部）
    pub fn add_listener<F>(&self, namespace: &str, listener: F)
    where
        F: Fn(&MutationEvent) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .entry(namespace.to_string())
            .or_default()
            .push(Box::new(listener));
        info!("Added mutation listener: namespace={}", namespace);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().values().map(Vec::len).sum()
    }

    pub fn clear_listeners(&self) {
        let cleared = std::mem::take(&mut *self.listeners.write());
        info!("Cleared mutation listeners for {} namespaces", cleared.len());
    }

    pub fn stats(&self) -> EventStats {
        self.stats.lock().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// 带过滤的订阅
///
/// UI 处理慢导致积压时跳过丢失的事件继续接收，事件本身不参与正确性。
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<MutationEvent>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    /// 下一个匹配的事件；发送端关闭时返回 None
    pub async fn recv(&mut self) -> Option<MutationEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("⚠️ 事件接收落后，跳过 {} 条", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// 非阻塞：取出当前已到达的下一个匹配事件
    pub fn try_recv(&mut self) -> Option<MutationEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("⚠️ 事件接收落后，跳过 {} 条", skipped);
                }
                Err(_) => return None,
            }
        }
    }
}

/// 事件生成器 - 辅助函数
pub mod event_builders {
    use super::*;

    fn now_millis() -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }

    pub fn mutation_registered(mutation_id: &MutationId, mutation_type: &str) -> MutationEvent {
        MutationEvent::MutationRegistered {
            mutation_id: mutation_id.clone(),
            mutation_type: mutation_type.to_string(),
            timestamp: now_millis(),
        }
    }

    pub fn mutation_committed(mutation_id: &MutationId, mutation_type: &str) -> MutationEvent {
        MutationEvent::MutationCommitted {
            mutation_id: mutation_id.clone(),
            mutation_type: mutation_type.to_string(),
            timestamp: now_millis(),
        }
    }

    pub fn mutation_rolled_back(
        mutation_id: &MutationId,
        mutation_type: &str,
        error: impl Into<String>,
    ) -> MutationEvent {
        MutationEvent::MutationRolledBack {
            mutation_id: mutation_id.clone(),
            mutation_type: mutation_type.to_string(),
            error: error.into(),
            timestamp: now_millis(),
        }
    }

    pub fn success_toast(
        mutation_id: &MutationId,
        mutation_type: &str,
        message: impl Into<String>,
    ) -> MutationEvent {
        MutationEvent::Toast(Toast {
            kind: ToastKind::Success,
            mutation_id: mutation_id.clone(),
            mutation_type: mutation_type.to_string(),
            message: message.into(),
            action: None,
            timestamp: now_millis(),
        })
    }

    pub fn error_toast(
        mutation_id: &MutationId,
        mutation_type: &str,
        message: impl Into<String>,
        action: Option<ErrorAction>,
    ) -> MutationEvent {
        MutationEvent::Toast(Toast {
            kind: ToastKind::Error,
            mutation_id: mutation_id.clone(),
            mutation_type: mutation_type.to_string(),
            message: message.into(),
            action,
            timestamp: now_millis(),
        })
    }
}
