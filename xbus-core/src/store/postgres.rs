//! PostgreSQL-backed `MetadataStore` and `StateLog` (§6).
//!
//! `TokenStore` is intentionally not implemented here: sessions are
//! transient and belong in [`super::redis_store`], matching the source's
//! split between a SQLAlchemy metadata model and a separate Redis-backed
//! `base.py`.

use super::{EnvelopeState, EventNodeRow, MetadataStore, RoleRow, StateLog};
use crate::ids::{EnvelopeId, EventId, EventTypeId, NodeId, RoleId, ServiceId};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// PostgreSQL-backed implementation of [`MetadataStore`] and [`StateLog`].
pub struct PostgresStore {
    pool: sqlx::PgPool,
}

impl PostgresStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Run embedded migrations (schema documented in SPEC_FULL.md §3).
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run xbus migrations")?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn find_role_by_login(&self, login: &str) -> anyhow::Result<Option<RoleRow>> {
        let row: Option<(uuid::Uuid, String, uuid::Uuid)> = sqlx::query_as(
            r#"SELECT id, password_hash, service_id FROM role WHERE login = $1"#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, password_hash, service_id)| RoleRow {
            id: RoleId(id),
            password_hash,
            service_id: ServiceId(service_id),
        }))
    }

    async fn event_tree(&self, type_id: EventTypeId) -> anyhow::Result<Vec<EventNodeRow>> {
        // Mirrors the original `get_event_tree` query: group children per
        // node, order start nodes first (model/helpers.py).
        let rows: Vec<(uuid::Uuid, uuid::Uuid, bool, Vec<uuid::Uuid>)> = sqlx::query_as(
            r#"
            SELECT event_node.id, event_node.service_id, event_node.is_start,
                   COALESCE(array_agg(event_node_rel.child_id)
                            FILTER (WHERE event_node_rel.child_id IS NOT NULL), '{}')
            FROM event_node
            LEFT JOIN event_node_rel ON event_node_rel.parent_id = event_node.id
            WHERE event_node.event_type_id = $1
            GROUP BY event_node.id, event_node.service_id, event_node.is_start
            ORDER BY event_node.is_start DESC
            "#,
        )
        .bind(uuid::Uuid::from(type_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(node_id, service_id, is_start, child_ids)| EventNodeRow {
                node_id: NodeId(node_id),
                service_id: ServiceId(service_id),
                is_start,
                child_ids: child_ids.into_iter().map(NodeId).collect(),
            })
            .collect())
    }

    async fn consumer_roles(&self) -> anyhow::Result<HashMap<ServiceId, HashSet<RoleId>>> {
        let rows: Vec<(uuid::Uuid, uuid::Uuid)> = sqlx::query_as(
            r#"SELECT service.id, role.id
               FROM service
               JOIN role ON role.service_id = service.id
               WHERE service.kind = 'consumer'"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out: HashMap<ServiceId, HashSet<RoleId>> = HashMap::new();
        for (service_id, role_id) in rows {
            out.entry(ServiceId(service_id)).or_default().insert(RoleId(role_id));
        }
        Ok(out)
    }
}

fn state_as_str(state: EnvelopeState) -> &'static str {
    match state {
        EnvelopeState::Emit => "emit",
        EnvelopeState::Canc => "canc",
        EnvelopeState::Wait => "wait",
        EnvelopeState::Exec => "exec",
        EnvelopeState::Done => "done",
        EnvelopeState::Stop => "stop",
        EnvelopeState::Fail => "fail",
    }
}

fn state_from_str(s: &str) -> anyhow::Result<EnvelopeState> {
    Ok(match s {
        "emit" => EnvelopeState::Emit,
        "canc" => EnvelopeState::Canc,
        "wait" => EnvelopeState::Wait,
        "exec" => EnvelopeState::Exec,
        "done" => EnvelopeState::Done,
        "stop" => EnvelopeState::Stop,
        "fail" => EnvelopeState::Fail,
        other => anyhow::bail!("unknown envelope state {other:?}"),
    })
}

#[async_trait]
impl StateLog for PostgresStore {
    async fn insert_envelope(&self, envelope_id: EnvelopeId) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO envelope (id, state) VALUES ($1, 'emit')
               ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(uuid::Uuid::from(envelope_id))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_envelope_state(
        &self,
        envelope_id: EnvelopeId,
        state: EnvelopeState,
    ) -> anyhow::Result<()> {
        sqlx::query(r#"UPDATE envelope SET state = $2 WHERE id = $1"#)
            .bind(uuid::Uuid::from(envelope_id))
            .bind(state_as_str(state))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn envelope_state(&self, envelope_id: EnvelopeId) -> anyhow::Result<Option<EnvelopeState>> {
        let row: Option<(String,)> = sqlx::query_as(r#"SELECT state FROM envelope WHERE id = $1"#)
            .bind(uuid::Uuid::from(envelope_id))
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(s,)| state_from_str(&s)).transpose()
    }

    async fn insert_event(
        &self,
        event_id: EventId,
        envelope_id: EnvelopeId,
        type_id: EventTypeId,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO event (id, envelope_id, event_type_id) VALUES ($1, $2, $3)
               ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(uuid::Uuid::from(event_id))
        .bind(uuid::Uuid::from(envelope_id))
        .bind(uuid::Uuid::from(type_id))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_item(&self, event_id: EventId, index: u32, data: &[u8]) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO item (event_id, index, data) VALUES ($1, $2, $3)
               ON CONFLICT (event_id, index) DO UPDATE SET data = EXCLUDED.data"#,
        )
        .bind(uuid::Uuid::from(event_id))
        .bind(index as i32)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
