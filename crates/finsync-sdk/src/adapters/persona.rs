//! 记账角色（个人 / 家庭 / 生意等视角）
//!
//! 同一时间只有一个默认角色，`set_default` 会同时修改多个实体，
//! 因此不走通用 update，而是自己拍快照并登记为 "persona:set_default"。

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{spawn_retry, Entity, OptimisticCollection, RemoteStore};
use crate::coordinator::MutationCoordinator;
use crate::error::{FinsyncSDKError, Result};
use crate::mutation::Mutation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub is_default: bool,
}

impl Persona {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            icon: None,
            is_default: false,
        }
    }
}

impl Entity for Persona {
    const KIND: &'static str = "persona";
    const LABEL: &'static str = "Persona";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

#[derive(Clone)]
pub struct PersonaStore {
    collection: OptimisticCollection<Persona>,
}

impl PersonaStore {
    pub fn new(coordinator: Arc<MutationCoordinator>, remote: Arc<dyn RemoteStore<Persona>>) -> Self {
        Self {
            collection: OptimisticCollection::new(coordinator, remote),
        }
    }

    pub fn collection(&self) -> &OptimisticCollection<Persona> {
        &self.collection
    }

    pub fn default_persona(&self) -> Option<Persona> {
        self.collection.list().into_iter().find(|p| p.is_default)
    }

    pub async fn create(&self, mut draft: Persona) -> Option<Persona> {
        // 默认角色只能通过 set_default 切换
        draft.is_default = false;
        self.collection.create(draft).await
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<Option<Persona>> {
        self.collection
            .modify(id, |persona| persona.name = name.to_string())
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        if self.collection.get(id).is_some_and(|p| p.is_default) {
            return Err(FinsyncSDKError::InvalidArgument(
                "the default persona cannot be deleted".to_string(),
            ));
        }
        self.collection.delete(id).await
    }

    /// 切换默认角色；失败时恢复每个角色原来的 is_default
    pub async fn set_default(&self, id: &str) -> Result<Option<Persona>> {
        let target = self
            .collection
            .get(id)
            .ok_or_else(|| FinsyncSDKError::NotFound(format!("persona {}", id)))?;
        if target.is_default {
            return Ok(Some(target));
        }

        let previous: Vec<(String, bool)> = self
            .collection
            .list()
            .into_iter()
            .map(|p| (p.id, p.is_default))
            .collect();
        self.collection.apply_local(|items| {
            for persona in items.iter_mut() {
                persona.is_default = persona.id == id;
            }
        });

        let mut promoted = target;
        promoted.is_default = true;
        let remote = self.collection.remote().clone();
        let on_success = self.collection.clone();
        let on_rollback = self.collection.clone();
        let retry = self.clone();
        let retry_id = id.to_string();

        let mutation = Mutation::new(
            Persona::mutation_type("set_default"),
            serde_json::json!({ "id": id }),
            previous,
            async move { remote.update(promoted).await },
        )
        .on_success(move |server: &Persona| {
            on_success.apply_local(|items| {
                if let Some(slot) = items.iter_mut().find(|p| p.id == server.id) {
                    *slot = server.clone();
                }
            });
        })
        .on_rollback(move |previous: Vec<(String, bool)>| {
            on_rollback.apply_local(|items| {
                for persona in items.iter_mut() {
                    if let Some((_, was_default)) = previous.iter().find(|(pid, _)| *pid == persona.id) {
                        persona.is_default = *was_default;
                    }
                }
            });
        })
        .success_message("Default persona updated")
        .error_message("Failed to change default persona")
        .error_action("Retry", move || {
            spawn_retry(retry.clone().retry_set_default(retry_id.clone()));
        });

        Ok(self.collection.coordinator().execute(mutation).await)
    }

    fn retry_set_default(self, id: String) -> BoxFuture<'static, ()> {
        async move {
            if let Err(e) = self.set_default(&id).await {
                warn!("⚠️ 重试切换默认角色失败: {}", e);
            }
        }
        .boxed()
    }
}
