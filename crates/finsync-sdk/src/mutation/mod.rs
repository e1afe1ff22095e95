//! 乐观更新协调模块
//!
//! 职责：
//! - 为每次乐观更新分配唯一 ID（id）
//! - 记录所有 in-flight / 最近失败的更新（registry）
//! - 派生全局同步状态（status）
//! - 驱动单次更新的生命周期：注册 → 远端操作 → 提交或回滚（executor）
//!
//! ## NOTE: Executor 不做重试
//!
//! 重试只能由 UI 通过 Toast 上的 ErrorAction 发起，每次都是全新的 execute()。

pub mod id;
pub mod record;
pub mod status;
pub mod registry;
pub mod executor;

pub use id::{MutationId, MutationIdGenerator};
pub use record::{MutationRecord, MutationStatus};
pub use status::{derive_sync_snapshot, SyncSnapshot, SyncStatus};
pub use registry::{MutationRegistry, DEFAULT_ERROR_GRACE_PERIOD};
pub use executor::{ErrorAction, Mutation, MutationExecutor, MutationOutcome, CANCELLED_MESSAGE};
