//! 收据

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Entity, OptimisticCollection, RemoteStore};
use crate::coordinator::MutationCoordinator;
use crate::error::{FinsyncSDKError, Result};

/// 收据处理状态（由服务端 OCR 流水线推进）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    #[default]
    Pending,
    Processing,
    Processed,
    Failed,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    pub merchant_name: Option<String>,
    pub file_name: String,
    /// 金额（分）
    pub total_amount: Option<i64>,
    pub currency: String,
    pub category_id: Option<String>,
    pub status: ReceiptStatus,
    /// 上传时间（UTC 毫秒）
    pub uploaded_at: i64,
}

impl Receipt {
    pub fn new<S: Into<String>>(file_name: S) -> Self {
        Self {
            id: String::new(),
            merchant_name: None,
            file_name: file_name.into(),
            total_amount: None,
            currency: "USD".to_string(),
            category_id: None,
            status: ReceiptStatus::Pending,
            uploaded_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl Entity for Receipt {
    const KIND: &'static str = "receipt";
    const LABEL: &'static str = "Receipt";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

#[derive(Clone)]
pub struct ReceiptStore {
    collection: OptimisticCollection<Receipt>,
}

impl ReceiptStore {
    pub fn new(coordinator: Arc<MutationCoordinator>, remote: Arc<dyn RemoteStore<Receipt>>) -> Self {
        Self {
            collection: OptimisticCollection::new(coordinator, remote),
        }
    }

    pub fn collection(&self) -> &OptimisticCollection<Receipt> {
        &self.collection
    }

    /// 收件箱：未归档的收据，最新的在前
    pub fn inbox(&self) -> Vec<Receipt> {
        let mut receipts: Vec<Receipt> = self
            .collection
            .list()
            .into_iter()
            .filter(|r| r.status != ReceiptStatus::Archived)
            .collect();
        receipts.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        receipts
    }

    pub async fn upload(&self, draft: Receipt) -> Result<Option<Receipt>> {
        if draft.file_name.trim().is_empty() {
            return Err(FinsyncSDKError::InvalidArgument(
                "receipt file name must not be empty".to_string(),
            ));
        }
        Ok(self.collection.create(draft).await)
    }

    pub async fn archive(&self, id: &str) -> Result<Option<Receipt>> {
        self.collection
            .modify(id, |receipt| receipt.status = ReceiptStatus::Archived)
            .await
    }

    pub async fn assign_category(&self, id: &str, category_id: Option<String>) -> Result<Option<Receipt>> {
        self.collection
            .modify(id, |receipt| receipt.category_id = category_id)
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.collection.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{coordinator, MockRemote};
    use crate::mutation::SyncStatus;

    fn receipt(id: &str, uploaded_at: i64) -> Receipt {
        let mut r = Receipt::new(format!("{}.jpg", id));
        r.id = id.to_string();
        r.uploaded_at = uploaded_at;
        r.status = ReceiptStatus::Processed;
        r
    }

    #[tokio::test]
    async fn test_archive_removes_from_inbox() {
        let store = ReceiptStore::new(coordinator(), MockRemote::new());
        store
            .collection()
            .replace_all(vec![receipt("r-1", 1_000), receipt("r-2", 2_000)]);

        store.archive("r-1").await.unwrap().unwrap();
        let inbox: Vec<String> = store.inbox().into_iter().map(|r| r.id).collect();
        assert_eq!(inbox, vec!["r-2"]);
    }

    #[tokio::test]
    async fn test_failed_archive_restores_status() {
        let remote = MockRemote::new();
        remote.fail_next(1);
        let store = ReceiptStore::new(coordinator(), remote);
        store.collection().replace_all(vec![receipt("r-1", 1_000)]);

        assert!(store.archive("r-1").await.unwrap().is_none());
        assert_eq!(
            store.collection().get("r-1").unwrap().status,
            ReceiptStatus::Processed
        );
        assert_eq!(store.collection().coordinator().sync_status(), SyncStatus::Error);
    }

    #[tokio::test]
    async fn test_inbox_is_newest_first() {
        let store = ReceiptStore::new(coordinator(), MockRemote::new());
        store
            .collection()
            .replace_all(vec![receipt("old", 1), receipt("new", 3), receipt("mid", 2)]);
        let inbox: Vec<String> = store.inbox().into_iter().map(|r| r.id).collect();
        assert_eq!(inbox, vec!["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn test_upload_rejects_missing_file_name() {
        let store = ReceiptStore::new(coordinator(), MockRemote::new());
        assert!(store.upload(Receipt::new(" ")).await.is_err());
        assert!(store.collection().is_empty());
    }
}
