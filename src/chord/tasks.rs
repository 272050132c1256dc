use crate::chord::types::{ChordNode, NodeId};
use dashmap::DashMap;
use log::debug;
use std::collections::VecDeque;

/// Continuation resumed with the node a lookup resolved to.
pub type Task = Box<dyn FnOnce(ChordNode) + Send + Sync + 'static>;

/// Parks continuations until the RETURN_SUCCESSOR for their key arrives.
///
/// Answers are correlated by key only: every continuation queued for a key when
/// the answer arrives receives that same answer. Nothing here times out; a
/// continuation whose answer is lost stays parked.
#[derive(Default)]
pub struct TaskManager {
    pending: DashMap<NodeId, VecDeque<Task>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&self, key: NodeId, task: Task) {
        self.pending.entry(key).or_default().push_back(task);
    }

    /// Removes the whole queue for `key` and runs it in FIFO order.
    ///
    /// The queue is swapped out of the map before any continuation runs, so a
    /// task added concurrently (or by one of these continuations) lands in a
    /// fresh queue and waits for the next answer.
    pub fn complete_tasks(&self, key: NodeId, node: &ChordNode) -> usize {
        let Some((_, queue)) = self.pending.remove(&key) else {
            debug!("No pending tasks for key {}", key);
            return 0;
        };
        let count = queue.len();
        for task in queue {
            task(node.clone());
        }
        count
    }

    pub fn pending(&self, key: NodeId) -> usize {
        self.pending.get(&key).map_or(0, |queue| queue.len())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::types::NodePorts;
    use std::sync::{Arc, Mutex};

    fn node(id: u64) -> ChordNode {
        ChordNode::new(
            NodeId::new(id).unwrap(),
            "127.0.0.1".parse().unwrap(),
            NodePorts::consecutive(4000),
        )
    }

    #[test]
    fn completes_in_fifo_order_exactly_once() {
        let manager = TaskManager::new();
        let key = NodeId::new(12).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            manager.add_task(key, Box::new(move |n| seen.lock().unwrap().push((i, n.id))));
        }
        assert_eq!(manager.pending(key), 3);

        assert_eq!(manager.complete_tasks(key, &node(20)), 3);
        let expected: Vec<_> = (0..3).map(|i| (i, NodeId::new(20).unwrap())).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
        assert_eq!(manager.pending(key), 0);
        assert!(manager.is_empty());

        // a second answer for the same key finds nothing to resume
        assert_eq!(manager.complete_tasks(key, &node(21)), 0);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn keys_are_independent() {
        let manager = TaskManager::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        for k in [1, 2] {
            let hits = hits.clone();
            manager.add_task(NodeId::new(k).unwrap(), Box::new(move |_| hits.lock().unwrap().push(k)));
        }
        manager.complete_tasks(NodeId::new(2).unwrap(), &node(5));
        assert_eq!(*hits.lock().unwrap(), vec![2]);
        assert_eq!(manager.pending(NodeId::new(1).unwrap()), 1);
    }

    #[test]
    fn task_added_during_drain_waits_for_next_answer() {
        let manager = Arc::new(TaskManager::new());
        let key = NodeId::new(9).unwrap();
        let inner_ran = Arc::new(Mutex::new(None));
        {
            let manager2 = manager.clone();
            let inner_ran = inner_ran.clone();
            manager.add_task(
                key,
                Box::new(move |_| {
                    manager2.add_task(key, Box::new(move |n| *inner_ran.lock().unwrap() = Some(n.id)));
                }),
            );
        }
        manager.complete_tasks(key, &node(30));
        assert_eq!(*inner_ran.lock().unwrap(), None);
        assert_eq!(manager.pending(key), 1);

        manager.complete_tasks(key, &node(31));
        assert_eq!(*inner_ran.lock().unwrap(), Some(NodeId::new(31).unwrap()));
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let manager = Arc::new(TaskManager::new());
        let key = NodeId::new(1).unwrap();
        let counter = Arc::new(Mutex::new(0usize));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let counter = counter.clone();
                        manager.add_task(key, Box::new(move |_| *counter.lock().unwrap() += 1));
                    }
                })
            })
            .collect();
        let mut completed = 0;
        for handle in handles {
            handle.join().unwrap();
            completed += manager.complete_tasks(key, &node(2));
        }
        completed += manager.complete_tasks(key, &node(2));
        assert_eq!(completed, 800);
        assert_eq!(*counter.lock().unwrap(), 800);
    }
}
