//! In-memory implementations of the three store traits, for tests and
//! zero-dependency local runs (mirrors the teacher's `store_memory.rs`).

use super::{EnvelopeState, EventNodeRow, MetadataStore, RoleRow, StateLog, TokenStore};
use crate::ids::{EventId, EventTypeId, EnvelopeId, NodeId, RoleId, ServiceId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryTokenStore {
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.inner.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }
}

/// One configured role, as it would be read from the `role` table.
#[derive(Clone, Debug)]
pub struct RoleSeed {
    pub id: RoleId,
    pub login: String,
    pub password_hash: String,
    pub service_id: ServiceId,
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    roles_by_login: RwLock<HashMap<String, RoleSeed>>,
    /// event_type -> node rows, start nodes first.
    graphs: RwLock<HashMap<EventTypeId, Vec<EventNodeRow>>>,
    /// service_id -> every configured role id (consumer services only).
    consumer_roles: RwLock<HashMap<ServiceId, HashSet<RoleId>>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_role(&self, role: RoleSeed) {
        self.roles_by_login.write().await.insert(role.login.clone(), role);
    }

    pub async fn seed_graph(&self, type_id: EventTypeId, rows: Vec<EventNodeRow>) {
        self.graphs.write().await.insert(type_id, rows);
    }

    pub async fn seed_consumer_roles(&self, service_id: ServiceId, role_ids: HashSet<RoleId>) {
        self.consumer_roles.write().await.insert(service_id, role_ids);
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn find_role_by_login(&self, login: &str) -> anyhow::Result<Option<RoleRow>> {
        Ok(self
            .roles_by_login
            .read()
            .await
            .get(login)
            .map(|r| RoleRow {
                id: r.id,
                password_hash: r.password_hash.clone(),
                service_id: r.service_id,
            }))
    }

    async fn event_tree(&self, type_id: EventTypeId) -> anyhow::Result<Vec<EventNodeRow>> {
        Ok(self.graphs.read().await.get(&type_id).cloned().unwrap_or_default())
    }

    async fn consumer_roles(&self) -> anyhow::Result<HashMap<ServiceId, HashSet<RoleId>>> {
        Ok(self.consumer_roles.read().await.clone())
    }
}

#[derive(Default)]
struct StateLogInner {
    envelopes: HashMap<EnvelopeId, EnvelopeState>,
    events: HashMap<EventId, (EnvelopeId, EventTypeId)>,
    items: Vec<(EventId, u32, Vec<u8>)>,
}

#[derive(Default)]
pub struct MemoryStateLog {
    inner: RwLock<StateLogInner>,
}

impl MemoryStateLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn item_count(&self, event_id: EventId) -> usize {
        self.inner.read().await.items.iter().filter(|(e, _, _)| *e == event_id).count()
    }
}

#[async_trait]
impl StateLog for MemoryStateLog {
    async fn insert_envelope(&self, envelope_id: EnvelopeId) -> anyhow::Result<()> {
        self.inner.write().await.envelopes.insert(envelope_id, EnvelopeState::Emit);
        Ok(())
    }

    async fn update_envelope_state(
        &self,
        envelope_id: EnvelopeId,
        state: EnvelopeState,
    ) -> anyhow::Result<()> {
        self.inner.write().await.envelopes.insert(envelope_id, state);
        Ok(())
    }

    async fn envelope_state(&self, envelope_id: EnvelopeId) -> anyhow::Result<Option<EnvelopeState>> {
        Ok(self.inner.read().await.envelopes.get(&envelope_id).copied())
    }

    async fn insert_event(
        &self,
        event_id: EventId,
        envelope_id: EnvelopeId,
        type_id: EventTypeId,
    ) -> anyhow::Result<()> {
        self.inner.write().await.events.insert(event_id, (envelope_id, type_id));
        Ok(())
    }

    async fn record_item(&self, event_id: EventId, index: u32, data: &[u8]) -> anyhow::Result<()> {
        self.inner.write().await.items.push((event_id, index, data.to_vec()));
        Ok(())
    }
}
