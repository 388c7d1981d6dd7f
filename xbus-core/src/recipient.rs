//! The transport-level handle bound to one remote worker or consumer process
//! (§2, §6). `xbus-server` provides the gRPC-backed implementation; tests use
//! a recording fake.

use crate::ids::{EnvelopeId, EventId};
use async_trait::async_trait;

/// One `(indices, data)` pair in a worker's `send_item` reply — a worker may
/// return zero, one, or several of these per input item (§4.2.1, §6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemPair {
    pub indices: Vec<u32>,
    pub data: Vec<u8>,
}

/// The five verbs every recipient (worker or consumer) exposes (§6).
///
/// `stop_envelope` is fire-and-forget: the trait still returns a `Result`
/// so a transport failure can be logged, but callers never await it past a
/// best-effort deadline and never treat its failure as a reason to do
/// anything further (§4.2.4, §5).
#[async_trait]
pub trait RecipientClient: Send + Sync {
    async fn start_event(
        &self,
        envelope_id: EnvelopeId,
        event_id: EventId,
        type_name: &str,
    ) -> anyhow::Result<bool>;

    async fn send_item(
        &self,
        envelope_id: EnvelopeId,
        event_id: EventId,
        indices: &[u32],
        data: &[u8],
    ) -> anyhow::Result<Vec<ItemPair>>;

    async fn end_event(&self, envelope_id: EnvelopeId, event_id: EventId) -> anyhow::Result<bool>;

    async fn end_envelope(&self, envelope_id: EnvelopeId) -> anyhow::Result<bool>;

    async fn stop_envelope(&self, envelope_id: EnvelopeId) -> anyhow::Result<()>;
}
