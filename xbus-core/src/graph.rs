//! Graph materialization (§4.3): turn one event type's configured node rows
//! into a live [`Event`] bound to currently-ready recipients.
//!
//! Four steps, straight from §4.3:
//! 1. load the node rows for the event type, start nodes first;
//! 2. a row with non-empty `child_ids` is a worker: pick one ready role for
//!    its service, deterministically — fail the whole event if none is ready;
//! 3. a row with empty `child_ids` is a consumer: collect every ready role
//!    as a replica; roles configured for the service but not ready are
//!    logged as inactive for this event, nothing more;
//! 4. wire each worker's `child_ids` into [`WorkerNode::children`].

use crate::error::{OrchestratorError, Result};
use crate::event::Event;
use crate::ids::{EnvelopeId, EventId, EventTypeId};
use crate::node::{ConsumerNode, Node, WorkerNode};
use crate::registry::RecipientRegistry;
use crate::store::MetadataStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub async fn materialize(
    metadata: &dyn MetadataStore,
    registry: &RecipientRegistry,
    envelope_id: EnvelopeId,
    event_id: EventId,
    type_id: EventTypeId,
    type_name: String,
) -> Result<Event> {
    let rows = metadata.event_tree(type_id).await?;
    if rows.is_empty() {
        return Err(OrchestratorError::UnknownEventType(type_id));
    }
    let configured = metadata.consumer_roles().await?;

    let mut nodes = HashMap::with_capacity(rows.len());
    let mut start = Vec::new();

    for row in &rows {
        let node = if row.child_ids.is_empty() {
            let replicas = registry.all_ready(row.service_id).await;
            if let Some(known) = configured.get(&row.service_id) {
                let ready: std::collections::HashSet<_> =
                    replicas.iter().map(|(role_id, _)| *role_id).collect();
                for role_id in known.difference(&ready) {
                    warn!(%role_id, service_id = %row.service_id, "consumer role configured but not ready for this event");
                }
            }
            let (role_ids, clients) = replicas.into_iter().unzip();
            Node::Consumer(ConsumerNode::new(row.node_id, role_ids, clients))
        } else {
            let (role_id, client) = registry
                .pick_worker(row.service_id)
                .await
                .ok_or(OrchestratorError::NoReadyWorker(row.service_id))?;
            Node::Worker(WorkerNode::new(row.node_id, role_id, client, row.child_ids.clone()))
        };

        if row.is_start {
            start.push(row.node_id);
        }
        nodes.insert(row.node_id, Arc::new(node));
    }

    Ok(Event::new(envelope_id, event_id, type_id, type_name, nodes, start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{NodeId, RoleId, ServiceId};
    use crate::recipient::{ItemPair, RecipientClient};
    use crate::store::memory::MemoryMetadataStore;
    use crate::store::EventNodeRow;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct Noop;

    #[async_trait]
    impl RecipientClient for Noop {
        async fn start_event(&self, _: EnvelopeId, _: EventId, _: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn send_item(
            &self,
            _: EnvelopeId,
            _: EventId,
            _: &[u32],
            _: &[u8],
        ) -> anyhow::Result<Vec<ItemPair>> {
            Ok(vec![])
        }
        async fn end_event(&self, _: EnvelopeId, _: EventId) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn end_envelope(&self, _: EnvelopeId) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn stop_envelope(&self, _: EnvelopeId) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn materializes_worker_then_consumer_chain() {
        let metadata = MemoryMetadataStore::new();
        let registry = RecipientRegistry::new();

        let type_id = EventTypeId::new();
        let worker_svc = ServiceId::new();
        let consumer_svc = ServiceId::new();
        let worker_node = NodeId::new();
        let consumer_node = NodeId::new();
        let worker_role = RoleId::new();
        let consumer_role = RoleId::new();

        metadata
            .seed_graph(
                type_id,
                vec![
                    EventNodeRow {
                        node_id: worker_node,
                        service_id: worker_svc,
                        is_start: true,
                        child_ids: vec![consumer_node],
                    },
                    EventNodeRow {
                        node_id: consumer_node,
                        service_id: consumer_svc,
                        is_start: false,
                        child_ids: vec![],
                    },
                ],
            )
            .await;
        metadata
            .seed_consumer_roles(consumer_svc, HashSet::from([consumer_role]))
            .await;

        registry.register(worker_role, Arc::new(Noop)).await;
        registry.mark_ready(worker_svc, worker_role).await;
        registry.register(consumer_role, Arc::new(Noop)).await;
        registry.mark_ready(consumer_svc, consumer_role).await;

        let event = materialize(
            &metadata,
            &registry,
            EnvelopeId::new(),
            EventId::new(),
            type_id,
            "demo".to_string(),
        )
        .await
        .unwrap();

        assert_eq!(event.start, vec![worker_node]);
        let worker = event.node(worker_node).unwrap().as_worker().unwrap();
        assert_eq!(worker.children, vec![consumer_node]);
        let consumer = event.node(consumer_node).unwrap().as_consumer().unwrap();
        assert_eq!(consumer.role_ids, vec![consumer_role]);
    }

    #[tokio::test]
    async fn fails_when_no_worker_is_ready() {
        let metadata = MemoryMetadataStore::new();
        let registry = RecipientRegistry::new();
        let type_id = EventTypeId::new();
        let svc = ServiceId::new();
        metadata
            .seed_graph(
                type_id,
                vec![EventNodeRow {
                    node_id: NodeId::new(),
                    service_id: svc,
                    is_start: true,
                    child_ids: vec![NodeId::new()],
                }],
            )
            .await;

        let err = materialize(
            &metadata,
            &registry,
            EnvelopeId::new(),
            EventId::new(),
            type_id,
            "demo".to_string(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoReadyWorker(_)));
    }

    #[tokio::test]
    async fn unknown_event_type_is_rejected() {
        let metadata = MemoryMetadataStore::new();
        let registry = RecipientRegistry::new();
        let err = materialize(
            &metadata,
            &registry,
            EnvelopeId::new(),
            EventId::new(),
            EventTypeId::new(),
            "demo".to_string(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownEventType(_)));
    }
}
