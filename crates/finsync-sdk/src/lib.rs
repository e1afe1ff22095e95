//! FinSync SDK - 记账客户端的乐观更新协调层
//!
//! 本 SDK 负责让所有本地修改"先生效、后确认"：
//! - ⚡ 乐观更新：修改立即应用到本地集合，远端失败时按快照回滚
//! - 📡 同步指示：全局 Idle / Syncing / Error 状态与进行中的数量
//! - 🔔 事件系统：提交、回滚与 Toast 通知（带重试入口）
//! - 🧩 业务适配：分类、收据、预算、账户、角色的本地 store
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use finsync_sdk::{Category, CategoryStore, CoordinatorConfig, MutationCoordinator, RemoteStore};
//!
//! # async fn run(remote: Arc<dyn RemoteStore<Category>>) -> finsync_sdk::Result<()> {
//! let coordinator = MutationCoordinator::shared(CoordinatorConfig::default())?;
//! let categories = CategoryStore::new(coordinator.clone(), remote);
//!
//! // 本地立即可见，失败时自动移除并弹出错误 Toast
//! let created = categories.create(Category::new("Groceries")).await?;
//! println!("created: {:?}, status: {}", created, coordinator.sync_status());
//!
//! coordinator.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod logging;
pub mod mutation;
pub mod version;

// 重新导出核心类型，方便使用
pub use adapters::{
    is_placeholder_id, AccountStore, AccountType, Budget, BudgetPeriod, BudgetStore, Category,
    CategoryStatus, CategoryStore, Entity, FinancialAccount, OptimisticCollection, Persona,
    PersonaStore, Receipt, ReceiptStatus, ReceiptStore, RemoteStore,
};
pub use config::{CoordinatorConfig, CoordinatorConfigBuilder};
pub use coordinator::MutationCoordinator;
pub use error::{FinsyncSDKError, Result};
pub use events::{EventFilter, EventManager, MutationEvent, Toast, ToastKind};
pub use mutation::{
    ErrorAction, Mutation, MutationId, MutationOutcome, MutationRecord, MutationStatus,
    SyncSnapshot, SyncStatus,
};
pub use version::{BUILD_TIME, SDK_VERSION};
