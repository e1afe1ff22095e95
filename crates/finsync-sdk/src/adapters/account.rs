//! 金融账户

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Entity, OptimisticCollection, RemoteStore};
use crate::coordinator::MutationCoordinator;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Checking,
    Savings,
    CreditCard,
    Cash,
    Investment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialAccount {
    pub id: String,
    pub name: String,
    pub account_type: AccountType,
    pub institution: Option<String>,
    /// 余额（分）
    pub balance: i64,
    pub currency: String,
    pub is_hidden: bool,
}

impl FinancialAccount {
    pub fn new<S: Into<String>>(name: S, account_type: AccountType) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            account_type,
            institution: None,
            balance: 0,
            currency: "USD".to_string(),
            is_hidden: false,
        }
    }
}

impl Entity for FinancialAccount {
    const KIND: &'static str = "account";
    const LABEL: &'static str = "Account";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

#[derive(Clone)]
pub struct AccountStore {
    collection: OptimisticCollection<FinancialAccount>,
}

impl AccountStore {
    pub fn new(
        coordinator: Arc<MutationCoordinator>,
        remote: Arc<dyn RemoteStore<FinancialAccount>>,
    ) -> Self {
        Self {
            collection: OptimisticCollection::new(coordinator, remote),
        }
    }

    pub fn collection(&self) -> &OptimisticCollection<FinancialAccount> {
        &self.collection
    }

    pub fn visible(&self) -> Vec<FinancialAccount> {
        self.collection
            .list()
            .into_iter()
            .filter(|a| !a.is_hidden)
            .collect()
    }

    /// 可见账户的净值（分）
    pub fn net_worth(&self) -> i64 {
        self.visible()
            .iter()
            .map(|a| match a.account_type {
                AccountType::CreditCard => -a.balance.abs(),
                _ => a.balance,
            })
            .sum()
    }

    pub async fn create(&self, draft: FinancialAccount) -> Option<FinancialAccount> {
        self.collection.create(draft).await
    }

    pub async fn set_hidden(&self, id: &str, hidden: bool) -> Result<Option<FinancialAccount>> {
        self.collection
            .modify(id, |account| account.is_hidden = hidden)
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.collection.delete(id).await
    }
}
