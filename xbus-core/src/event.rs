//! The runtime DAG of nodes for one event instance (§3 "Event").

use crate::ids::{EnvelopeId, EventId, EventTypeId, NodeId};
use crate::node::Node;
use std::collections::HashMap;
use std::sync::Arc;

/// One typed dataflow instance inside an envelope (§3, GLOSSARY).
///
/// Immutable after [`crate::graph::materialize`] builds it — only the
/// node-internal counters inside each [`Node`] change afterwards.
pub struct Event {
    pub envelope_id: EnvelopeId,
    pub event_id: EventId,
    pub type_id: EventTypeId,
    pub type_name: String,
    pub nodes: HashMap<NodeId, Arc<Node>>,
    pub start: Vec<NodeId>,
}

impl Event {
    pub fn new(
        envelope_id: EnvelopeId,
        event_id: EventId,
        type_id: EventTypeId,
        type_name: String,
        nodes: HashMap<NodeId, Arc<Node>>,
        start: Vec<NodeId>,
    ) -> Self {
        Self {
            envelope_id,
            event_id,
            type_id,
            type_name,
            nodes,
            start,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Arc<Node>> {
        self.nodes.get(&id)
    }

    pub fn start_nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.start.iter().filter_map(move |id| self.nodes.get(id))
    }
}
