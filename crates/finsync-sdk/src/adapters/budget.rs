//! 预算

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Entity, OptimisticCollection, RemoteStore};
use crate::coordinator::MutationCoordinator;
use crate::error::{FinsyncSDKError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Weekly,
    #[default]
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub id: String,
    pub name: String,
    pub category_id: Option<String>,
    /// 预算额度（分）
    pub amount: i64,
    /// 已花费（分），由服务端汇总
    pub spent: i64,
    pub period: BudgetPeriod,
}

impl Budget {
    pub fn new<S: Into<String>>(name: S, amount: i64, period: BudgetPeriod) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            category_id: None,
            amount,
            spent: 0,
            period,
        }
    }

    pub fn remaining(&self) -> i64 {
        self.amount - self.spent
    }

    pub fn is_over_budget(&self) -> bool {
        self.spent > self.amount
    }
}

impl Entity for Budget {
    const KIND: &'static str = "budget";
    const LABEL: &'static str = "Budget";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

#[derive(Clone)]
pub struct BudgetStore {
    collection: OptimisticCollection<Budget>,
}

impl BudgetStore {
    pub fn new(coordinator: Arc<MutationCoordinator>, remote: Arc<dyn RemoteStore<Budget>>) -> Self {
        Self {
            collection: OptimisticCollection::new(coordinator, remote),
        }
    }

    pub fn collection(&self) -> &OptimisticCollection<Budget> {
        &self.collection
    }

    pub fn over_budget(&self) -> Vec<Budget> {
        self.collection
            .list()
            .into_iter()
            .filter(Budget::is_over_budget)
            .collect()
    }

    pub async fn create(&self, draft: Budget) -> Result<Option<Budget>> {
        if draft.amount < 0 {
            return Err(FinsyncSDKError::InvalidArgument(format!(
                "budget amount must not be negative: {}",
                draft.amount
            )));
        }
        Ok(self.collection.create(draft).await)
    }

    /// 调整额度（delta 为分，可为负），结果不能小于 0
    pub async fn adjust_amount(&self, id: &str, delta: i64) -> Result<Option<Budget>> {
        let current = self
            .collection
            .get(id)
            .ok_or_else(|| FinsyncSDKError::NotFound(format!("budget {}", id)))?;
        let amount = current
            .amount
            .checked_add(delta)
            .filter(|amount| *amount >= 0)
            .ok_or_else(|| {
                FinsyncSDKError::InvalidArgument(format!(
                    "budget amount {} cannot be adjusted by {}",
                    current.amount, delta
                ))
            })?;
        self.collection.modify(id, |budget| budget.amount = amount).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.collection.delete(id).await
    }
}
