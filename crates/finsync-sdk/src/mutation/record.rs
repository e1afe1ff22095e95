//! Registry 中的单条乐观更新记录
//!
//! 只有两种状态：Pending（等待远端）与 Error（已回滚，宽限期内保留）。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::MutationId;

/// Mutation 状态
///
/// 没有 "成功" 状态：成功的记录立即删除
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationStatus {
    /// 等待远端确认
    Pending,
    /// 远端失败，已回滚，等待宽限期后清除
    Error,
}

impl MutationStatus {
    /// 检查是否可以从当前状态转换到目标状态
    pub fn can_transition_to(&self, target: MutationStatus) -> bool {
        matches!((self, target), (MutationStatus::Pending, MutationStatus::Error))
    }
}

impl std::fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationStatus::Pending => write!(f, "pending"),
            MutationStatus::Error => write!(f, "error"),
        }
    }
}

/// Registry 中的一条记录
#[derive(Debug, Clone, Serialize)]
pub struct MutationRecord {
    pub id: MutationId,
    /// 调用点命名空间，例如 "category:create"
    pub mutation_type: String,
    /// 乐观数据快照（对 registry 不透明）
    pub optimistic_data: serde_json::Value,
    /// 回滚用的旧数据快照
    pub previous_data: serde_json::Value,
    /// 创建时间（UTC毫秒时间戳）
    pub created_at: i64,
    pub status: MutationStatus,
    pub error_message: Option<String>,
    /// 进入 Error 的时间，用于宽限期过期判断
    #[serde(skip)]
    pub failed_at: Option<Instant>,
}

impl MutationRecord {
    pub fn pending(
        id: MutationId,
        mutation_type: impl Into<String>,
        optimistic_data: serde_json::Value,
        previous_data: serde_json::Value,
    ) -> Self {
        Self {
            id,
            mutation_type: mutation_type.into(),
            optimistic_data,
            previous_data,
            created_at: Utc::now().timestamp_millis(),
            status: MutationStatus::Pending,
            error_message: None,
            failed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == MutationStatus::Pending
    }

    pub fn is_error(&self) -> bool {
        self.status == MutationStatus::Error
    }

    /// Pending → Error；其他状态下返回 false 且不做修改
    pub fn mark_failed(&mut self, message: String, now: Instant) -> bool {
        if !self.status.can_transition_to(MutationStatus::Error) {
            return false;
        }
        self.status = MutationStatus::Error;
        self.error_message = Some(message);
        self.failed_at = Some(now);
        true
    }
}
