//! The envelope engine (§4.2): per-node dispatch pipeline, the end-of-envelope
//! barrier, and cancellation/stop. Grounded on the original source's
//! `core/back/envelope.py` — each `dispatch_*` method below is the direct
//! translation of its `worker_*`/`consumer_*` coroutine pair, fanned out with
//! `tokio::spawn` instead of `asyncio.async`, and ordered with the
//! `tokio::sync::watch`-backed [`crate::trigger::Trigger`] instead of a
//! recreated `asyncio.Future`.

use crate::event::Event;
use crate::ids::{EnvelopeId, EventId};
use crate::node::Node;
use crate::store::{EnvelopeState, StateLog};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The four per-phase timeouts named in §3/§5. No default is prescribed by
/// the source (which has none); these are generous enough not to spuriously
/// trip in tests and are expected to be overridden from configuration.
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub start_event: Duration,
    pub send_item: Duration,
    pub end_event: Duration,
    pub end_envelope: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        let d = Duration::from_secs(30);
        Self {
            start_event: d,
            send_item: d,
            end_event: d,
            end_envelope: d,
        }
    }
}

/// Outcome of one watchdog-wrapped recipient call (§4.4).
enum Call<T> {
    Value(T),
    /// Envelope was already stopped, timed out, or was just stopped by this call.
    Stopped,
}

pub struct Envelope {
    pub envelope_id: EnvelopeId,
    events: RwLock<HashMap<EventId, Arc<Event>>>,
    /// Envelope-level completion signal, re-armed on every consumer
    /// completion (§3) — the "self.trigger" barrier re-check in the source.
    completion: Notify,
    cancel: CancellationToken,
    stopped: AtomicBool,
    timeouts: Timeouts,
    state_log: Arc<dyn StateLog>,
}

impl Envelope {
    pub fn new(
        envelope_id: EnvelopeId,
        state_log: Arc<dyn StateLog>,
        timeouts: Timeouts,
        parent_cancel: &CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            envelope_id,
            events: RwLock::new(HashMap::new()),
            completion: Notify::new(),
            cancel: parent_cancel.child_token(),
            stopped: AtomicBool::new(false),
            timeouts,
            state_log,
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub async fn add_event(&self, event: Arc<Event>) {
        self.events.write().await.insert(event.event_id, event);
    }

    pub async fn event(&self, event_id: EventId) -> Option<Arc<Event>> {
        self.events.read().await.get(&event_id).cloned()
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    async fn all_nodes(&self) -> Vec<Arc<Node>> {
        self.events
            .read()
            .await
            .values()
            .flat_map(|event| event.nodes.values().cloned())
            .collect()
    }

    // ---- watchdog (§4.4) ----

    async fn call<F, T>(&self, timeout: Duration, fut: F) -> Call<T>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        if self.is_stopped() {
            return Call::Stopped;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Call::Stopped,
            res = tokio::time::timeout(timeout, fut) => match res {
                Ok(Ok(v)) => Call::Value(v),
                Ok(Err(e)) => {
                    warn!(envelope_id = %self.envelope_id, error = %e, "recipient call failed");
                    self.stop(false).await;
                    Call::Stopped
                }
                Err(_) => {
                    warn!(envelope_id = %self.envelope_id, "recipient call timed out");
                    self.stop(false).await;
                    Call::Stopped
                }
            },
        }
    }

    // ---- start_event fan-out (§4.2.1, §4.2.2) ----

    pub fn dispatch_start_event(self: &Arc<Self>, event: Arc<Event>) {
        for node in event.start_nodes() {
            self.spawn_start(event.clone(), node.clone());
        }
    }

    fn spawn_start(self: &Arc<Self>, event: Arc<Event>, node: Arc<Node>) {
        let envelope = self.clone();
        tokio::spawn(async move { envelope.worker_or_consumer_start(event, node).await });
    }

    async fn worker_or_consumer_start(self: Arc<Self>, event: Arc<Event>, node: Arc<Node>) -> bool {
        if self.is_stopped() {
            return false;
        }
        let ok = match &*node {
            Node::Worker(w) => {
                match self
                    .call(self.timeouts.start_event, w.client.start_event(
                        self.envelope_id,
                        event.event_id,
                        &event.type_name,
                    ))
                    .await
                {
                    Call::Value(true) => true,
                    Call::Value(false) => {
                        self.stop(false).await;
                        false
                    }
                    Call::Stopped => false,
                }
            }
            Node::Consumer(c) => {
                let calls = c
                    .clients
                    .iter()
                    .map(|client| client.start_event(self.envelope_id, event.event_id, &event.type_name));
                match self.call(self.timeouts.start_event, join_all_ok(calls)).await {
                    Call::Value(results) if results.iter().all(|ok| *ok) => true,
                    Call::Value(_) => {
                        self.stop(false).await;
                        false
                    }
                    Call::Stopped => false,
                }
            }
        };

        if !ok {
            return false;
        }
        node.common().trigger.advance();
        if let Node::Worker(w) = &*node {
            for child_id in &w.children {
                if let Some(child) = event.node(*child_id) {
                    self.spawn_start(event.clone(), child.clone());
                }
            }
        }
        true
    }

    // ---- send_item fan-out (§4.2.1, §4.2.2) ----

    pub fn dispatch_send_item(self: &Arc<Self>, event: Arc<Event>, index: u32, data: Vec<u8>) {
        for node in event.start_nodes() {
            self.spawn_send_item(event.clone(), node.clone(), vec![index], data.clone(), index as i64);
        }
    }

    fn spawn_send_item(
        self: &Arc<Self>,
        event: Arc<Event>,
        node: Arc<Node>,
        indices: Vec<u32>,
        data: Vec<u8>,
        forward_index: i64,
    ) {
        let envelope = self.clone();
        tokio::spawn(async move {
            envelope
                .worker_or_consumer_send_item(event, node, indices, data, forward_index)
                .await
        });
    }

    async fn worker_or_consumer_send_item(
        self: Arc<Self>,
        event: Arc<Event>,
        node: Arc<Node>,
        indices: Vec<u32>,
        data: Vec<u8>,
        forward_index: i64,
    ) -> bool {
        if !node.common().trigger.wait(forward_index).await {
            return false;
        }
        if self.is_stopped() {
            return false;
        }

        match &*node {
            Node::Worker(w) => {
                let reply = match self
                    .call(
                        self.timeouts.send_item,
                        w.client.send_item(self.envelope_id, event.event_id, &indices, &data),
                    )
                    .await
                {
                    Call::Value(pairs) => pairs,
                    Call::Stopped => return false,
                };
                // An empty reply is a legitimate filtering decision, not a
                // failure — unlike the sketch in the original coroutine, an
                // empty list here still advances the trigger below.
                for pair in &reply {
                    let sent = node.common().take_sent();
                    for child_id in &w.children {
                        if let Some(child) = event.node(*child_id) {
                            self.spawn_send_item(
                                event.clone(),
                                child.clone(),
                                pair.indices.clone(),
                                pair.data.clone(),
                                sent,
                            );
                        }
                    }
                }
                node.common().trigger.advance();
                true
            }
            Node::Consumer(c) => {
                let calls = c
                    .clients
                    .iter()
                    .map(|client| client.send_item(self.envelope_id, event.event_id, &indices, &data));
                match self.call(self.timeouts.send_item, join_all_results(calls)).await {
                    Call::Value(results) if results.iter().all(Option::is_some) => {
                        node.common().trigger.advance();
                        true
                    }
                    Call::Value(_) => {
                        self.stop(false).await;
                        false
                    }
                    Call::Stopped => false,
                }
            }
        }
    }

    // ---- end_event fan-out (§4.2.1, §4.2.2) ----

    pub fn dispatch_end_event(self: &Arc<Self>, event: Arc<Event>, nb_items: i64) {
        for node in event.start_nodes() {
            self.spawn_end_event(event.clone(), node.clone(), nb_items);
        }
    }

    fn spawn_end_event(self: &Arc<Self>, event: Arc<Event>, node: Arc<Node>, nb_items: i64) {
        let envelope = self.clone();
        tokio::spawn(async move { envelope.worker_or_consumer_end_event(event, node, nb_items).await });
    }

    async fn worker_or_consumer_end_event(
        self: Arc<Self>,
        event: Arc<Event>,
        node: Arc<Node>,
        nb_items: i64,
    ) -> bool {
        if !node.common().trigger.wait(nb_items).await {
            return false;
        }
        if self.is_stopped() {
            return false;
        }

        match &*node {
            Node::Worker(w) => {
                match self
                    .call(self.timeouts.end_event, w.client.end_event(self.envelope_id, event.event_id))
                    .await
                {
                    Call::Value(true) => {
                        let sent = node.common().sent();
                        for child_id in &w.children {
                            if let Some(child) = event.node(*child_id) {
                                self.spawn_end_event(event.clone(), child.clone(), sent);
                            }
                        }
                        true
                    }
                    Call::Value(false) => {
                        self.stop(false).await;
                        false
                    }
                    Call::Stopped => false,
                }
            }
            Node::Consumer(c) => {
                let calls = c
                    .clients
                    .iter()
                    .map(|client| client.end_event(self.envelope_id, event.event_id));
                match self.call(self.timeouts.end_event, join_all_ok(calls)).await {
                    Call::Value(results) if results.iter().all(|ok| *ok) => {
                        node.common().mark_done();
                        self.completion.notify_waiters();
                        true
                    }
                    Call::Value(_) => {
                        self.stop(false).await;
                        false
                    }
                    Call::Stopped => false,
                }
            }
        }
    }

    // ---- end-of-envelope barrier (§4.2.3) ----

    /// Spawn the barrier task and return immediately — `end_envelope` (the
    /// verb) only acknowledges scheduling (§4.1).
    pub fn spawn_end_envelope(self: &Arc<Self>) {
        let envelope = self.clone();
        tokio::spawn(async move { envelope.run_end_envelope().await });
    }

    async fn run_end_envelope(self: Arc<Self>) {
        loop {
            if self.is_stopped() {
                return;
            }
            let nodes = self.all_nodes().await;
            let consumers: Vec<_> = nodes.iter().filter(|n| n.is_consumer()).collect();
            if consumers.iter().all(|n| n.common().done()) {
                break;
            }
            self.completion.notified().await;
        }
        if self.is_stopped() {
            return;
        }

        let nodes = self.all_nodes().await;
        let (consumers, workers): (Vec<_>, Vec<_>) =
            nodes.into_iter().partition(|n| n.is_consumer());

        for node in &workers {
            let Node::Worker(w) = &**node else { unreachable!() };
            let envelope = self.clone();
            let client = w.client.clone();
            let envelope_id = self.envelope_id;
            tokio::spawn(async move {
                let _ = envelope.call(envelope.timeouts.end_envelope, client.end_envelope(envelope_id)).await;
            });
        }

        let calls = consumers.iter().filter_map(|node| node.as_consumer()).flat_map(|c| {
            c.clients
                .iter()
                .map(|client| client.end_envelope(self.envelope_id))
        });
        let all_ok = match self.call(self.timeouts.end_envelope, join_all_ok(calls)).await {
            Call::Value(results) => results.iter().all(|ok| *ok),
            Call::Stopped => false,
        };

        if all_ok {
            if let Err(e) = self.state_log.update_envelope_state(self.envelope_id, EnvelopeState::Done).await {
                warn!(envelope_id = %self.envelope_id, error = %e, "failed to persist done state");
            } else {
                info!(envelope_id = %self.envelope_id, "envelope done");
            }
        } else {
            self.stop(false).await;
        }
    }

    // ---- cancellation / stop (§4.2.4, §5) ----

    /// First-call-wins stop. `cancelled = true` means the caller (the
    /// `cancel_envelope` verb) already persisted `canc`; otherwise this
    /// persists `stop`.
    pub async fn stop(&self, cancelled: bool) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        for node in self.all_nodes().await {
            node.common().trigger.stop();
        }
        self.completion.notify_waiters();

        if !cancelled {
            if let Err(e) = self.state_log.update_envelope_state(self.envelope_id, EnvelopeState::Stop).await {
                warn!(envelope_id = %self.envelope_id, error = %e, "failed to persist stop state");
            }
        }

        for node in self.all_nodes().await {
            dispatch_stop_envelope(self.envelope_id, &node);
        }
    }
}

/// Fire-and-forget `stop_envelope` to every client behind a node (§4.2.4, §6).
fn dispatch_stop_envelope(envelope_id: EnvelopeId, node: &Node) {
    match node {
        Node::Worker(w) => {
            let client = w.client.clone();
            tokio::spawn(async move {
                let _ = client.stop_envelope(envelope_id).await;
            });
        }
        Node::Consumer(c) => {
            for client in &c.clients {
                let client = client.clone();
                tokio::spawn(async move {
                    let _ = client.stop_envelope(envelope_id).await;
                });
            }
        }
    }
}

async fn join_all_ok(
    calls: impl Iterator<Item = impl std::future::Future<Output = anyhow::Result<bool>>>,
) -> anyhow::Result<Vec<bool>> {
    let results = futures_util::future::join_all(calls).await;
    results.into_iter().collect()
}

async fn join_all_results<T>(
    calls: impl Iterator<Item = impl std::future::Future<Output = anyhow::Result<T>>>,
) -> anyhow::Result<Vec<Option<T>>> {
    let results = futures_util::future::join_all(calls).await;
    Ok(results.into_iter().map(|r| r.ok()).collect())
}
