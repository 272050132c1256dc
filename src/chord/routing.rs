use crate::chord::tasks::{Task, TaskManager};
use crate::chord::types::{Channel, ChordNode, Endpoint, NodeId};
use crate::chord::FINGER_TABLE_SIZE;
use crate::network::messages::Body;
use crate::network::Session;
use arc_swap::ArcSwapOption;
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Outcome of a single routing decision for a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// This node knows the answer.
    Resolved(ChordNode),
    /// Ask this closer node instead.
    Forward(ChordNode),
}

/// Routing state of one ring member.
///
/// Every slot (predecessor and each finger, finger 0 being the successor) is
/// swapped atomically on its own. Slots may disagree with each other for a
/// while; stabilize and fix_fingers bring them back in line.
pub struct ChordRing {
    session: Session,
    predecessor: ArcSwapOption<ChordNode>,
    fingers: Vec<ArcSwapOption<ChordNode>>,
    next_finger: AtomicUsize,
    tasks: TaskManager,
}

impl ChordRing {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            predecessor: ArcSwapOption::empty(),
            fingers: (0..FINGER_TABLE_SIZE).map(|_| ArcSwapOption::empty()).collect(),
            next_finger: AtomicUsize::new(0),
            tasks: TaskManager::new(),
        }
    }

    pub fn local(&self) -> &ChordNode {
        self.session.local()
    }

    pub fn id(&self) -> NodeId {
        self.session.local_id()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn successor(&self) -> Option<ChordNode> {
        self.finger(0)
    }

    pub fn predecessor(&self) -> Option<ChordNode> {
        self.predecessor.load_full().map(|node| (*node).clone())
    }

    pub fn finger(&self, index: usize) -> Option<ChordNode> {
        self.fingers[index].load_full().map(|node| (*node).clone())
    }

    pub fn fingers(&self) -> Vec<Option<ChordNode>> {
        (0..FINGER_TABLE_SIZE).map(|i| self.finger(i)).collect()
    }

    pub fn set_successor(&self, node: ChordNode) {
        self.set_finger(0, node);
    }

    pub fn set_finger(&self, index: usize, node: ChordNode) {
        let previous = self.fingers[index].swap(Some(Arc::new(node.clone())));
        if previous.map(|p| p.id) != Some(node.id) {
            if index == 0 {
                info!("Node {}: successor is now {}", self.id(), node);
            } else {
                debug!("Node {}: finger {} is now {}", self.id(), index, node.id);
            }
        }
    }

    pub fn set_predecessor(&self, node: ChordNode) {
        let previous = self.predecessor.swap(Some(Arc::new(node.clone())));
        if previous.map(|p| p.id) != Some(node.id) {
            info!("Node {}: predecessor is now {}", self.id(), node);
        }
    }

    pub fn clear_predecessor(&self) {
        self.predecessor.store(None);
    }

    /// Seeds a new ring: this node is its own successor and predecessor.
    pub fn create(&self) {
        info!("Node {} creating a new ring", self.local());
        self.set_successor(self.local().clone());
        self.set_predecessor(self.local().clone());
    }

    /// Asks a known member for our successor. The receiver resolves once the
    /// answer arrives and the successor has been told about us; it never
    /// resolves if the answer is lost.
    pub fn join(self: &Arc<Self>, via: Endpoint) -> oneshot::Receiver<ChordNode> {
        info!("Node {} joining through {}", self.local(), via);
        self.clear_predecessor();

        let (done, joined) = oneshot::channel();
        let ring = self.clone();
        self.tasks.add_task(
            self.id(),
            Box::new(move |successor| {
                ring.set_successor(successor.clone());
                ring.session.send_to(
                    &successor,
                    Body::Notify {
                        node: ring.local().clone(),
                    },
                    None,
                );
                let _ = done.send(successor);
            }),
        );

        let id = self.id();
        self.session.send(
            via,
            Body::FindSuccessor {
                key: id,
                reply_to: self.session.reply_endpoint(Channel::Control),
            },
            Some(Box::new(move |err| {
                warn!("Node {}: could not reach {} to join: {}", id, via, err);
            })),
        );
        joined
    }

    /// Single routing step for `key`.
    pub fn route(&self, key: NodeId) -> Route {
        let local = self.local();
        match self.successor() {
            // closed on the right: a key equal to the successor's id is its own,
            // and a lone node (successor == local) owns the whole ring
            Some(successor) if key.in_half_open(local.id, successor.id) => Route::Resolved(successor),
            Some(_) => {
                let next = self.closest_preceding_node(key);
                // no finger precedes the key, so stale fingers left us as the best guess
                if next.id == local.id {
                    Route::Resolved(local.clone())
                } else {
                    Route::Forward(next)
                }
            }
            None => Route::Resolved(local.clone()),
        }
    }

    /// Farthest finger strictly between this node and `key`, or this node.
    pub fn closest_preceding_node(&self, key: NodeId) -> ChordNode {
        let local = self.local();
        for slot in self.fingers.iter().rev() {
            if let Some(finger) = slot.load_full() {
                // open at both ends: a finger equal to the key would answer for
                // it, and a hop to ourselves would never make progress
                if finger.id.in_open(local.id, key) {
                    return (*finger).clone();
                }
            }
        }
        local.clone()
    }

    /// Resolves the owner of `key` and runs `task` with it, immediately when
    /// this node knows the answer, otherwise once RETURN_SUCCESSOR arrives.
    pub fn find_successor(self: &Arc<Self>, key: NodeId, task: Task) {
        match self.route(key) {
            Route::Resolved(node) => task(node),
            Route::Forward(next) => {
                self.tasks.add_task(key, task);
                self.forward_lookup(&next, key, self.session.reply_endpoint(Channel::Control));
            }
        }
    }

    /// FIND_SUCCESSOR from a remote caller. Nothing is parked here: whoever
    /// resolves the key answers the caller directly.
    pub fn handle_find_successor(self: &Arc<Self>, key: NodeId, reply_to: Endpoint) {
        match self.route(key) {
            Route::Resolved(node) => {
                self.session.send(reply_to, Body::ReturnSuccessor { key, node }, None)
            }
            Route::Forward(next) => self.forward_lookup(&next, key, reply_to),
        }
    }

    pub fn handle_return_successor(&self, key: NodeId, node: ChordNode) {
        let resumed = self.tasks.complete_tasks(key, &node);
        debug!(
            "Node {}: successor({}) = {}, resumed {} task(s)",
            self.id(),
            key,
            node.id,
            resumed
        );
    }

    fn forward_lookup(self: &Arc<Self>, next: &ChordNode, key: NodeId, reply_to: Endpoint) {
        let ring = self.clone();
        let hop = next.id;
        self.session.send_to(
            next,
            Body::FindSuccessor { key, reply_to },
            Some(Box::new(move |err| {
                warn!("Node {}: lookup of {} via {} failed: {}", ring.id(), key, hop, err);
                ring.evict(hop);
            })),
        );
    }

    /// Asks the successor for its predecessor; the answer is handled by
    /// `handle_return_predecessor`.
    pub fn stabilize(self: &Arc<Self>) {
        let Some(successor) = self.successor() else {
            debug!("Node {}: no successor yet, skipping stabilize", self.id());
            return;
        };

        // alone so far: a node that joined through us shows up as predecessor
        // first, and in_open(self, self) accepts any id but our own
        if successor.id == self.id() {
            if let Some(candidate) = self.predecessor() {
                if candidate.id.in_open(self.id(), successor.id) {
                    self.set_successor(candidate.clone());
                    self.session.send_to(
                        &candidate,
                        Body::Notify {
                            node: self.local().clone(),
                        },
                        None,
                    );
                }
            }
            return;
        }

        let ring = self.clone();
        let dead = successor.id;
        self.session.send_to(
            &successor,
            Body::GetPredecessor {
                node: self.local().clone(),
            },
            Some(Box::new(move |err| {
                warn!("Node {}: successor {} unreachable: {}", ring.id(), dead, err);
                ring.evict(dead);
            })),
        );
    }

    pub fn handle_get_predecessor(&self, requester: ChordNode) {
        let answer = match self.predecessor() {
            Some(predecessor) => predecessor,
            None => {
                self.notify(requester.clone());
                requester.clone()
            }
        };
        self.session
            .send_to(&requester, Body::ReturnPredecessor { node: answer }, None);
    }

    pub fn handle_return_predecessor(&self, candidate: ChordNode) {
        let Some(successor) = self.successor() else {
            return;
        };
        // the successor's predecessor sits between us only if it joined there
        if candidate.id.in_open(self.id(), successor.id) {
            self.set_successor(candidate);
        }
        if let Some(successor) = self.successor() {
            if successor.id != self.id() {
                self.session.send_to(
                    &successor,
                    Body::Notify {
                        node: self.local().clone(),
                    },
                    None,
                );
            }
        }
    }

    /// `candidate` believes it might be our predecessor.
    pub fn notify(&self, candidate: ChordNode) {
        if candidate.id == self.id() {
            return;
        }
        let adopt = match self.predecessor() {
            None => true,
            // strictly between: re-notifying by the current predecessor is a no-op
            Some(current) => candidate.id.in_open(current.id, self.id()),
        };
        if adopt {
            self.set_predecessor(candidate.clone());
        }
        if self.successor().is_none() {
            self.set_successor(candidate);
        }
    }

    /// Refreshes the next finger in round-robin order.
    pub fn fix_fingers(self: &Arc<Self>) {
        let index = self.next_finger.fetch_add(1, Ordering::Relaxed) % FINGER_TABLE_SIZE;
        let key = self.id().finger_start(index);
        let ring = self.clone();
        self.find_successor(key, Box::new(move |node| ring.set_finger(index, node)));
    }

    /// One-shot liveness check; a reported failure forgets the predecessor.
    pub fn check_predecessor(self: &Arc<Self>) {
        let Some(predecessor) = self.predecessor() else {
            return;
        };
        if predecessor.id == self.id() {
            return;
        }
        let ring = self.clone();
        let checked = predecessor.id;
        self.session.send_to(
            &predecessor,
            Body::CheckActive,
            Some(Box::new(move |err| {
                warn!("Node {}: predecessor {} failed: {}", ring.id(), checked, err);
                ring.predecessor.rcu(|current| match current {
                    Some(node) if node.id == checked => None,
                    other => other.clone(),
                });
            })),
        );
    }

    pub fn handle_set_successor(&self, node: ChordNode) {
        self.set_successor(node);
    }

    pub fn handle_set_predecessor(&self, node: ChordNode) {
        self.set_predecessor(node);
    }

    /// Graceful exit: splice our predecessor and successor together.
    pub fn leave(&self) {
        let local = self.id();
        match (self.predecessor(), self.successor()) {
            (Some(predecessor), Some(successor))
                if predecessor.id != local && successor.id != local =>
            {
                info!(
                    "Node {} leaving: linking {} -> {}",
                    local, predecessor.id, successor.id
                );
                self.session.send_to(
                    &predecessor,
                    Body::SetSuccessor {
                        node: successor.clone(),
                    },
                    None,
                );
                self.session
                    .send_to(&successor, Body::SetPredecessor { node: predecessor }, None);
            }
            _ => info!("Node {} leaving a ring it is alone in", local),
        }
    }

    /// Drops every finger pointing at an unreachable node. A lost successor is
    /// replaced by the nearest remaining finger, or by ourselves.
    pub fn evict(&self, dead: NodeId) {
        for slot in &self.fingers {
            slot.rcu(|current| match current {
                Some(node) if node.id == dead => None,
                other => other.clone(),
            });
        }
        if self.fingers[0].load().is_none() {
            let replacement = self
                .fingers
                .iter()
                .find_map(|slot| slot.load_full())
                .map(|node| (*node).clone())
                .unwrap_or_else(|| self.local().clone());
            warn!(
                "Node {}: successor {} evicted, falling back to {}",
                self.id(),
                dead,
                replacement.id
            );
            self.set_successor(replacement);
        }
    }

    pub fn snapshot(&self) -> RoutingSnapshot {
        RoutingSnapshot {
            local: self.local().clone(),
            predecessor: self.predecessor(),
            fingers: self.fingers(),
        }
    }
}

/// Point-in-time copy of the routing slots, for display.
#[derive(Clone, Debug)]
pub struct RoutingSnapshot {
    pub local: ChordNode,
    pub predecessor: Option<ChordNode>,
    pub fingers: Vec<Option<ChordNode>>,
}

impl fmt::Display for RoutingSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |node: &Option<ChordNode>| {
            node.as_ref()
                .map_or_else(|| "-".to_string(), |n| n.id.to_string())
        };
        writeln!(f, "node        {}", self.local)?;
        writeln!(f, "predecessor {}", show(&self.predecessor))?;
        for (i, finger) in self.fingers.iter().enumerate() {
            writeln!(
                f,
                "finger[{}]   start {:>2} -> {}",
                i,
                self.local.id.finger_start(i),
                show(finger)
            )?;
        }
        Ok(())
    }
}
