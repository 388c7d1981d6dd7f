//! Persistence traits for the three external collaborators named in §2/§6:
//! the token store, the metadata store, and the state log. Each gets its own
//! trait (unlike the teacher's single `ProcessStore`) because the spec
//! treats them as three separately-owned external systems with different
//! failure semantics (§7).

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "redis-store")]
pub mod redis_store;

use crate::ids::{EventTypeId, RoleId, ServiceId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Opaque-token → JSON-encoded principal info (§3 "Session token", §6).
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn del(&self, key: &str) -> anyhow::Result<()>;
}

/// The structured record a token maps to (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenInfo {
    pub id: RoleId,
    pub login: String,
    pub service_id: ServiceId,
}

/// `(id, password_hash, service_id)` for a role, looked up by login (§4.1 `login`).
#[derive(Clone, Debug)]
pub struct RoleRow {
    pub id: RoleId,
    pub password_hash: String,
    pub service_id: ServiceId,
}

/// One row of an event type's node graph (§4.3, §6).
#[derive(Clone, Debug)]
pub struct EventNodeRow {
    pub node_id: crate::ids::NodeId,
    pub service_id: ServiceId,
    pub is_start: bool,
    pub child_ids: Vec<crate::ids::NodeId>,
}

/// Static configuration: emitters, roles, event types, and the node graph
/// per event type (§2, §6).
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// `(id, password_hash, service_id)`, keyed by login (§4.1 `login`).
    async fn find_role_by_login(&self, login: &str) -> anyhow::Result<Option<RoleRow>>;

    /// "for event type T, return all nodes with their service id, start
    /// flag, and list of child node ids" — start nodes first (§4.3, §6).
    async fn event_tree(&self, type_id: EventTypeId) -> anyhow::Result<Vec<EventNodeRow>>;

    /// "for every consumer service, return its role ids" (§4.3 point 3, §6).
    async fn consumer_roles(&self) -> anyhow::Result<HashMap<ServiceId, HashSet<RoleId>>>;
}

/// Durable record of envelope/event state transitions and item payloads (§2, §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeState {
    Emit,
    Canc,
    Wait,
    Exec,
    Done,
    Stop,
    /// Reserved — never written by this core (source ambiguity (a), SPEC_FULL.md OQ3).
    Fail,
}

#[async_trait]
pub trait StateLog: Send + Sync {
    async fn insert_envelope(&self, envelope_id: crate::ids::EnvelopeId) -> anyhow::Result<()>;

    async fn update_envelope_state(
        &self,
        envelope_id: crate::ids::EnvelopeId,
        state: EnvelopeState,
    ) -> anyhow::Result<()>;

    async fn envelope_state(
        &self,
        envelope_id: crate::ids::EnvelopeId,
    ) -> anyhow::Result<Option<EnvelopeState>>;

    async fn insert_event(
        &self,
        event_id: crate::ids::EventId,
        envelope_id: crate::ids::EnvelopeId,
        type_id: EventTypeId,
    ) -> anyhow::Result<()>;

    async fn record_item(
        &self,
        event_id: crate::ids::EventId,
        index: u32,
        data: &[u8],
    ) -> anyhow::Result<()>;
}
