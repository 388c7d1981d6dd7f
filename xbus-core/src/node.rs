//! Runtime graph nodes (§3).
//!
//! A node's `recv` counter lives inside its [`Trigger`] (advancing the
//! trigger *is* incrementing `recv`, per the source's `next_trigger`). `sent`
//! is a separate monotone counter: only the single coroutine currently
//! holding the "winning" iteration of `wait_trigger` ever increments it, so a
//! plain atomic is enough — there is no concurrent writer to race against.

use crate::ids::{NodeId, RoleId};
use crate::recipient::RecipientClient;
use crate::trigger::Trigger;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Fields shared by worker and consumer nodes (§3 "Node (common)").
pub struct NodeCommon {
    pub node_id: NodeId,
    sent: AtomicI64,
    done: AtomicBool,
    pub trigger: Trigger,
}

impl NodeCommon {
    fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            sent: AtomicI64::new(0),
            done: AtomicBool::new(false),
            trigger: Trigger::new(),
        }
    }

    /// Current forward index to hand to the next child dispatch, then advance it.
    /// Mirrors `node['sent']` being read and incremented in the same breath
    /// in the source's `worker_send_item`.
    pub fn take_sent(&self) -> i64 {
        self.sent.fetch_add(1, Ordering::SeqCst)
    }

    pub fn sent(&self) -> i64 {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn recv(&self) -> i64 {
        self.trigger.recv().unwrap_or(-1)
    }

    pub fn done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn mark_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }
}

/// A worker node: one client, transforms items, forwards to an ordered list
/// of children (§3 "WorkerNode").
pub struct WorkerNode {
    pub common: NodeCommon,
    pub role_id: RoleId,
    pub client: Arc<dyn RecipientClient>,
    pub children: Vec<NodeId>,
}

impl WorkerNode {
    pub fn new(
        node_id: NodeId,
        role_id: RoleId,
        client: Arc<dyn RecipientClient>,
        children: Vec<NodeId>,
    ) -> Self {
        Self {
            common: NodeCommon::new(node_id),
            role_id,
            client,
            children,
        }
    }
}

/// A consumer node: N replicas of the same service, terminal (§3 "ConsumerNode").
pub struct ConsumerNode {
    pub common: NodeCommon,
    pub role_ids: Vec<RoleId>,
    pub clients: Vec<Arc<dyn RecipientClient>>,
}

impl ConsumerNode {
    pub fn new(node_id: NodeId, role_ids: Vec<RoleId>, clients: Vec<Arc<dyn RecipientClient>>) -> Self {
        Self {
            common: NodeCommon::new(node_id),
            role_ids,
            clients,
        }
    }

    /// "has acknowledged end_event" (§3).
    pub fn is_done(&self) -> bool {
        self.common.done()
    }
}

/// A node is either a worker (transforms, forwards to children) or a
/// terminal consumer (§3, §4.2).
pub enum Node {
    Worker(WorkerNode),
    Consumer(ConsumerNode),
}

impl Node {
    pub fn common(&self) -> &NodeCommon {
        match self {
            Node::Worker(w) => &w.common,
            Node::Consumer(c) => &c.common,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.common().node_id
    }

    pub fn is_consumer(&self) -> bool {
        matches!(self, Node::Consumer(_))
    }

    pub fn as_worker(&self) -> Option<&WorkerNode> {
        match self {
            Node::Worker(w) => Some(w),
            Node::Consumer(_) => None,
        }
    }

    pub fn as_consumer(&self) -> Option<&ConsumerNode> {
        match self {
            Node::Consumer(c) => Some(c),
            Node::Worker(_) => None,
        }
    }
}
