//! 分类

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Entity, OptimisticCollection, RemoteStore};
use crate::coordinator::MutationCoordinator;
use crate::error::{FinsyncSDKError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    #[default]
    Active,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub parent_id: Option<String>,
    pub sort_order: i32,
    pub status: CategoryStatus,
}

impl Category {
    pub fn new<S: Into<String>>(name: S) -> Self {
        let name = name.into();
        Self {
            id: String::new(),
            slug: slugify(&name),
            name,
            color: None,
            icon: None,
            parent_id: None,
            sort_order: 0,
            status: CategoryStatus::Active,
        }
    }

    pub fn with_color<S: Into<String>>(mut self, color: S) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_parent<S: Into<String>>(mut self, parent_id: S) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

impl Entity for Category {
    const KIND: &'static str = "category";
    const LABEL: &'static str = "Category";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// "Food & Dining" -> "food-dining"
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[derive(Clone)]
pub struct CategoryStore {
    collection: OptimisticCollection<Category>,
}

impl CategoryStore {
    pub fn new(coordinator: Arc<MutationCoordinator>, remote: Arc<dyn RemoteStore<Category>>) -> Self {
        Self {
            collection: OptimisticCollection::new(coordinator, remote),
        }
    }

    pub fn collection(&self) -> &OptimisticCollection<Category> {
        &self.collection
    }

    /// 按 sort_order 排列的未归档分类
    pub fn active(&self) -> Vec<Category> {
        let mut categories: Vec<Category> = self
            .collection
            .list()
            .into_iter()
            .filter(|c| c.status == CategoryStatus::Active)
            .collect();
        categories.sort_by_key(|c| c.sort_order);
        categories
    }

    pub fn children_of(&self, parent_id: &str) -> Vec<Category> {
        self.collection
            .list()
            .into_iter()
            .filter(|c| c.parent_id.as_deref() == Some(parent_id))
            .collect()
    }

    pub async fn create(&self, draft: Category) -> Result<Option<Category>> {
        if draft.name.trim().is_empty() {
            return Err(FinsyncSDKError::InvalidArgument(
                "category name must not be empty".to_string(),
            ));
        }
        Ok(self.collection.create(draft).await)
    }

    /// 重命名，slug 跟随名称
    pub async fn rename(&self, id: &str, name: &str) -> Result<Option<Category>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FinsyncSDKError::InvalidArgument(
                "category name must not be empty".to_string(),
            ));
        }
        self.collection
            .modify(id, |category| {
                category.name = name.to_string();
                category.slug = slugify(name);
            })
            .await
    }

    pub async fn archive(&self, id: &str) -> Result<Option<Category>> {
        self.collection
            .modify(id, |category| category.status = CategoryStatus::Archived)
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.collection.delete(id).await
    }
}
