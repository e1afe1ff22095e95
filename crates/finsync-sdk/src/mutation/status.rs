//! 全局同步状态聚合
//!
//! 纯函数，在 registry 每次写入的同一临界区内同步重算，不做轮询。

use serde::{Deserialize, Serialize};

use super::{MutationRecord, MutationStatus};

/// 全局同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncStatus {
    /// 空闲
    #[default]
    Idle,
    /// 有未确认的乐观更新
    Syncing,
    /// 最近有失败（宽限期内）
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "idle"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

/// UI 消费的派生信号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub status: SyncStatus,
    /// Pending 记录数
    pub active_count: usize,
    /// 未过期的 Error 记录数
    pub error_count: usize,
}

impl SyncSnapshot {
    pub fn is_idle(&self) -> bool {
        self.status == SyncStatus::Idle
    }
}

/// 从 registry 记录派生同步状态
pub fn derive_sync_snapshot<'a, I>(records: I) -> SyncSnapshot
where
    I: IntoIterator<Item = &'a MutationRecord>,
{
    let mut active_count = 0usize;
    let mut error_count = 0usize;
    for record in records {
        match record.status {
            MutationStatus::Pending => active_count += 1,
            MutationStatus::Error => error_count += 1,
        }
    }

    let status = if active_count > 0 {
        SyncStatus::Syncing
    } else if error_count > 0 {
        SyncStatus::Error
    } else {
        SyncStatus::Idle
    };

    SyncSnapshot {
        status,
        active_count,
        error_count,
    }
}
