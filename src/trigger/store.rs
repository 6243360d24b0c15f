//! In-memory trigger set, reconciled from the Synchronizer (C6).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::ControlError;
use crate::trigger::model::{Trigger, TriggerId, TriggerPatch, TriggerSpec};

/// Authoritative in-memory trigger set. Reconciliation replaces the whole
/// map with a fresh `Arc` (an atomic pointer swap) only when the set of IDs
/// differs from what's stored; control-plane mutations apply in place and
/// are overwritten on the next synchronizer pass if the DB disagrees
/// (source of truth = external DB, per spec.md §4.6).
pub struct TriggerStore {
    inner: RwLock<Arc<HashMap<TriggerId, Trigger>>>,
    next_local_id: std::sync::atomic::AtomicU64,
    default_cooldown_seconds: u64,
}

impl TriggerStore {
    /// `default_cooldown_seconds` backs any `create()` call whose spec
    /// doesn't set its own cooldown — normally `ServerConfig::
    /// notification_cooldown_seconds`.
    pub fn new(default_cooldown_seconds: u64) -> Self {
        Self {
            inner: RwLock::new(Arc::new(HashMap::new())),
            next_local_id: std::sync::atomic::AtomicU64::new(1),
            default_cooldown_seconds,
        }
    }

    pub async fn snapshot(&self) -> Arc<HashMap<TriggerId, Trigger>> {
        self.inner.read().await.clone()
    }

    pub async fn list(&self) -> Vec<Trigger> {
        self.inner.read().await.values().cloned().collect()
    }

    /// Reject triggers with empty `conditions` (spec.md §4.6, §8).
    pub async fn create(&self, spec: TriggerSpec) -> Result<TriggerId, ControlError> {
        if spec.conditions.is_empty() {
            return Err(ControlError::BadRequest(
                "trigger must specify at least one condition".to_string(),
            ));
        }
        let id = self
            .next_local_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            .to_string();
        let trigger = Trigger {
            id: id.clone(),
            name: spec.name,
            enabled: spec.enabled,
            cooldown_seconds: spec.cooldown_seconds.unwrap_or(self.default_cooldown_seconds),
            conditions: spec.conditions,
            action: spec.action,
        };
        let mut guard = self.inner.write().await;
        let mut map = (**guard).clone();
        map.insert(id.clone(), trigger);
        *guard = Arc::new(map);
        Ok(id)
    }

    pub async fn patch(&self, id: &str, patch: TriggerPatch) -> Result<(), ControlError> {
        let mut guard = self.inner.write().await;
        let mut map = (**guard).clone();
        let trigger = map
            .get_mut(id)
            .ok_or_else(|| ControlError::NotFound(format!("no trigger with id {}", id)))?;
        trigger.apply_patch(patch);
        *guard = Arc::new(map);
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), ControlError> {
        let mut guard = self.inner.write().await;
        let mut map = (**guard).clone();
        if map.remove(id).is_none() {
            return Err(ControlError::NotFound(format!("no trigger with id {}", id)));
        }
        *guard = Arc::new(map);
        Ok(())
    }

    /// Replace the set atomically; no-op (and reports no change) if the ID
    /// set is identical to what's already stored (spec.md §8, idempotence).
    pub async fn reconcile(&self, triggers: Vec<Trigger>) -> bool {
        let incoming: HashMap<TriggerId, Trigger> =
            triggers.into_iter().map(|t| (t.id.clone(), t)).collect();
        let mut guard = self.inner.write().await;
        let changed = {
            let current_ids: std::collections::HashSet<&TriggerId> = guard.keys().collect();
            let incoming_ids: std::collections::HashSet<&TriggerId> = incoming.keys().collect();
            current_ids != incoming_ids
        };
        if changed {
            *guard = Arc::new(incoming);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::model::{Action, Conditions};

    fn spec_with_condition() -> TriggerSpec {
        TriggerSpec {
            name: "t1".to_string(),
            enabled: true,
            cooldown_seconds: Some(60),
            conditions: Conditions {
                protocol: Some(6),
                ..Default::default()
            },
            action: Action::Log,
        }
    }

    #[tokio::test]
    async fn test_create_rejects_empty_conditions() {
        let store = TriggerStore::new(60);
        let spec = TriggerSpec {
            name: "empty".to_string(),
            enabled: true,
            cooldown_seconds: Some(60),
            conditions: Conditions::default(),
            action: Action::Log,
        };
        assert!(store.create(spec).await.is_err());
    }

    #[tokio::test]
    async fn test_create_then_delete() {
        let store = TriggerStore::new(60);
        let id = store.create(spec_with_condition()).await.unwrap();
        assert_eq!(store.list().await.len(), 1);
        store.delete(&id).await.unwrap();
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_falls_back_to_store_default_cooldown() {
        let store = TriggerStore::new(42);
        let spec = TriggerSpec {
            name: "t1".to_string(),
            enabled: true,
            cooldown_seconds: None,
            conditions: Conditions {
                protocol: Some(6),
                ..Default::default()
            },
            action: Action::Log,
        };
        let id = store.create(spec).await.unwrap();
        let triggers = store.list().await;
        let trigger = triggers.iter().find(|t| t.id == id).unwrap();
        assert_eq!(trigger.cooldown_seconds, 42);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = TriggerStore::new(60);
        assert!(matches!(
            store.delete("missing").await,
            Err(ControlError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_idempotent() {
        let store = TriggerStore::new(60);
        let trigger = Trigger {
            id: "t1".to_string(),
            name: "t1".to_string(),
            enabled: true,
            cooldown_seconds: 60,
            conditions: Conditions {
                protocol: Some(6),
                ..Default::default()
            },
            action: Action::Log,
        };
        let first = store.reconcile(vec![trigger.clone()]).await;
        let second = store.reconcile(vec![trigger]).await;
        assert!(first);
        assert!(!second);
        assert_eq!(store.list().await.len(), 1);
    }
}
