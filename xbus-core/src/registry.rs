//! The process-wide recipient registry (§3 "Recipient registry", §5).
//!
//! Grounded on the original source's `node_registry` / `active_roles` dicts
//! in `xbus/broker/core/back.py`: a role enters the ready set only after
//! `register_node` then `ready` both succeed for its token. Wrapped in one
//! `RwLock` per §5's "one logical shared structure" requirement.

use crate::ids::{RoleId, ServiceId};
use crate::recipient::RecipientClient;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    clients: HashMap<RoleId, Arc<dyn RecipientClient>>,
    ready: HashMap<ServiceId, HashSet<RoleId>>,
}

/// Process-wide, per-orchestrator. Read on `start_event`'s materialization
/// pass; written by `register_node`, `ready`, and `logout`.
pub struct RecipientRegistry {
    inner: RwLock<Inner>,
}

impl RecipientRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Store a freshly-opened client under its role id (`register_node`).
    pub async fn register(&self, role_id: RoleId, client: Arc<dyn RecipientClient>) {
        let mut w = self.inner.write().await;
        w.clients.insert(role_id, client);
    }

    /// Returns true if `role_id` has a registered client (precondition for `ready`).
    pub async fn is_registered(&self, role_id: RoleId) -> bool {
        self.inner.read().await.clients.contains_key(&role_id)
    }

    /// Mark a registered role ready for its service (`ready`).
    pub async fn mark_ready(&self, service_id: ServiceId, role_id: RoleId) {
        let mut w = self.inner.write().await;
        w.ready.entry(service_id).or_default().insert(role_id);
    }

    /// Remove a role from the registry and every ready set (`logout`).
    pub async fn remove(&self, service_id: ServiceId, role_id: RoleId) {
        let mut w = self.inner.write().await;
        w.clients.remove(&role_id);
        if let Some(set) = w.ready.get_mut(&service_id) {
            set.remove(&role_id);
        }
    }

    /// Pick one ready role for a worker service, deterministically
    /// (§4.3 point 2: "any; ordering ... must be deterministic per row").
    /// Returns `None` if the service has no ready roles.
    pub async fn pick_worker(&self, service_id: ServiceId) -> Option<(RoleId, Arc<dyn RecipientClient>)> {
        let r = self.inner.read().await;
        let ready = r.ready.get(&service_id)?;
        let role_id = *ready.iter().min()?;
        let client = r.clients.get(&role_id)?.clone();
        Some((role_id, client))
    }

    /// All ready roles (+ clients) for a consumer service (§4.3 point 3).
    pub async fn all_ready(&self, service_id: ServiceId) -> Vec<(RoleId, Arc<dyn RecipientClient>)> {
        let r = self.inner.read().await;
        let Some(ready) = r.ready.get(&service_id) else {
            return Vec::new();
        };
        let mut roles: Vec<RoleId> = ready.iter().copied().collect();
        roles.sort();
        roles
            .into_iter()
            .filter_map(|role_id| r.clients.get(&role_id).map(|c| (role_id, c.clone())))
            .collect()
    }
}

impl Default for RecipientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipient::ItemPair;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl RecipientClient for Noop {
        async fn start_event(
            &self,
            _: crate::ids::EnvelopeId,
            _: crate::ids::EventId,
            _: &str,
        ) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn send_item(
            &self,
            _: crate::ids::EnvelopeId,
            _: crate::ids::EventId,
            _: &[u32],
            _: &[u8],
        ) -> anyhow::Result<Vec<ItemPair>> {
            Ok(vec![])
        }
        async fn end_event(&self, _: crate::ids::EnvelopeId, _: crate::ids::EventId) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn end_envelope(&self, _: crate::ids::EnvelopeId) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn stop_envelope(&self, _: crate::ids::EnvelopeId) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn ready_requires_prior_registration() {
        let reg = RecipientRegistry::new();
        let svc = ServiceId::new();
        let role = RoleId::new();

        assert!(!reg.is_registered(role).await);
        reg.register(role, Arc::new(Noop)).await;
        assert!(reg.is_registered(role).await);

        reg.mark_ready(svc, role).await;
        let picked = reg.pick_worker(svc).await;
        assert_eq!(picked.map(|(r, _)| r), Some(role));
    }

    #[tokio::test]
    async fn logout_removes_from_registry_and_ready_set() {
        let reg = RecipientRegistry::new();
        let svc = ServiceId::new();
        let role = RoleId::new();
        reg.register(role, Arc::new(Noop)).await;
        reg.mark_ready(svc, role).await;

        reg.remove(svc, role).await;
        assert!(!reg.is_registered(role).await);
        assert!(reg.pick_worker(svc).await.is_none());
    }

    #[tokio::test]
    async fn all_ready_lists_every_consumer_replica() {
        let reg = RecipientRegistry::new();
        let svc = ServiceId::new();
        let r1 = RoleId::new();
        let r2 = RoleId::new();
        reg.register(r1, Arc::new(Noop)).await;
        reg.register(r2, Arc::new(Noop)).await;
        reg.mark_ready(svc, r1).await;
        reg.mark_ready(svc, r2).await;

        let all = reg.all_ready(svc).await;
        assert_eq!(all.len(), 2);
    }
}
