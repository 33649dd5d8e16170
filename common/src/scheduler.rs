// SPDX-License-Identifier: Apache-2.0

//! Pluggable node-selection policy: filter candidates by resource fit,
//! score them, and pick the best. `RoundRobin` ignores resources and cycles
//! through nodes; `Epvm` scores by projected post-placement utilization
//! using the Lieb square-ice constant as its curvature base.

use std::collections::HashMap;

use crate::node::Node;
use crate::task::Task;

/// Lieb's square-ice constant, used as the curvature base of the Epvm score.
/// <https://en.wikipedia.org/wiki/Lieb%27s_square_ice_constant>
pub const LIEB: f64 = 1.53960071783900203869;

pub trait Scheduler: Send {
    /// Subset of `nodes` able to host `task`.
    fn select_candidate_nodes(&self, task: &Task, nodes: &[Node]) -> Vec<Node>;

    /// Score every candidate; lower is better. May mutate scheduler-private
    /// state (e.g. `RoundRobin`'s cursor).
    fn score(&mut self, task: &Task, nodes: &[Node]) -> HashMap<String, f64>;

    /// The candidate with the minimum score, ties broken by input order.
    /// `scores`/`candidates` empty is a programmer error: the caller must
    /// treat an empty `select_candidate_nodes` result as a scheduling
    /// failure before ever calling `pick`.
    fn pick<'a>(&self, scores: &HashMap<String, f64>, candidates: &'a [Node]) -> &'a Node {
        candidates
            .iter()
            .min_by(|a, b| {
                let sa = scores.get(&a.name).copied().unwrap_or(f64::MAX);
                let sb = scores.get(&b.name).copied().unwrap_or(f64::MAX);
                sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("pick called with empty candidate set")
    }
}

/// Cycles through nodes in order, ignoring resource fit entirely.
pub struct RoundRobin {
    pub name: String,
    last_worker: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        RoundRobin {
            name: "roundrobin".to_string(),
            last_worker: 0,
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for RoundRobin {
    fn select_candidate_nodes(&self, _task: &Task, nodes: &[Node]) -> Vec<Node> {
        nodes.to_vec()
    }

    fn score(&mut self, _task: &Task, nodes: &[Node]) -> HashMap<String, f64> {
        let mut scores = HashMap::with_capacity(nodes.len());
        if nodes.is_empty() {
            return scores;
        }
        let picked = (self.last_worker + 1) % nodes.len();
        for (i, node) in nodes.iter().enumerate() {
            scores.insert(node.name.clone(), if i == picked { 0.1 } else { 1.0 });
        }
        self.last_worker = picked;
        scores
    }
}

/// Resource-fit scorer: picks the node with the smallest projected
/// CPU/memory pressure after the task lands, using `LIEB` as the curvature
/// base so near-empty and near-full nodes are both penalized relative to a
/// comfortably-loaded one.
pub struct Epvm {
    pub name: String,
}

impl Epvm {
    pub fn new() -> Self {
        Epvm {
            name: "epvm".to_string(),
        }
    }

    fn utilization(task: &Task, node: &Node) -> Option<f64> {
        let memory_util = (node.memory_allocated + task.memory) as f64 / node.memory as f64;
        let disk_util = (node.disk_allocated + task.disk) as f64 / node.disk as f64;
        if memory_util > 1.0 || disk_util > 1.0 {
            return None;
        }
        Some(memory_util.max(disk_util))
    }
}

impl Default for Epvm {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for Epvm {
    fn select_candidate_nodes(&self, task: &Task, nodes: &[Node]) -> Vec<Node> {
        nodes
            .iter()
            .filter(|n| Self::utilization(task, n).is_some())
            .cloned()
            .collect()
    }

    fn score(&mut self, task: &Task, nodes: &[Node]) -> HashMap<String, f64> {
        nodes
            .iter()
            .filter_map(|n| {
                Self::utilization(task, n).map(|util| {
                    let score = LIEB.powf(util) + LIEB.powf(1.0 - util);
                    (n.name.clone(), score)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Role;

    fn nodes() -> Vec<Node> {
        vec![
            node("test-node-1", 33554432, 8388608, 524288000, 104857600),
            node("test-node-2", 33554432, 16777216, 524288000, 262144000),
            node("test-node-3", 33554432, 30408704, 524288000, 262144000),
        ]
    }

    fn node(name: &str, memory: i64, memory_allocated: i64, disk: i64, disk_allocated: i64) -> Node {
        let mut n = Node::new(name, format!("http://{name}"), Role::Worker);
        n.memory = memory;
        n.memory_allocated = memory_allocated;
        n.disk = disk;
        n.disk_allocated = disk_allocated;
        n
    }

    #[test]
    fn round_robin_select_candidates_ignores_resources() {
        let rr = RoundRobin::new();
        let task = Task::new("t", "img", 0.1, 0, 0);
        let candidates = rr.select_candidate_nodes(&task, &nodes());
        assert_eq!(candidates.len(), 3);
    }

    #[test]
    fn round_robin_scores_next_node_lowest() {
        let task = Task::new("t", "img", 0.1, 0, 0);
        for (last_worker, expect_lowest) in [(0usize, "test-node-2"), (1, "test-node-3"), (2, "test-node-1")] {
            let mut rr = RoundRobin {
                name: "rr".into(),
                last_worker,
            };
            let scores = rr.score(&task, &nodes());
            for (name, score) in &scores {
                if name == expect_lowest {
                    assert_eq!(*score, 0.1);
                } else {
                    assert_eq!(*score, 1.0);
                }
            }
        }
    }

    #[test]
    fn round_robin_pick_prefers_lowest_score_and_breaks_ties_by_order() {
        let rr = RoundRobin::new();
        let candidates = nodes();

        let mut scores = HashMap::new();
        scores.insert("test-node-1".to_string(), 0.1);
        scores.insert("test-node-2".to_string(), 1.0);
        scores.insert("test-node-3".to_string(), 1.0);
        assert_eq!(rr.pick(&scores, &candidates).name, "test-node-1");

        let mut tied = HashMap::new();
        tied.insert("test-node-1".to_string(), 1.0);
        tied.insert("test-node-2".to_string(), 1.0);
        tied.insert("test-node-3".to_string(), 1.0);
        assert_eq!(rr.pick(&tied, &candidates).name, "test-node-1");
    }

    #[test]
    fn epvm_drops_nodes_over_capacity() {
        let mut epvm = Epvm::new();
        let mut tight = node("tight", 1_000, 900, 1_000, 0);
        tight.memory_allocated = 900;
        let task = Task::new("t", "img", 0.1, 200, 0);
        let candidates = epvm.select_candidate_nodes(&task, &[tight.clone()]);
        assert!(candidates.is_empty());

        let scores = epvm.score(&task, &[tight]);
        assert!(scores.is_empty());
    }

    #[test]
    fn epvm_prefers_lower_utilization_node() {
        let mut epvm = Epvm::new();
        let low = node("low", 10_000, 1_000, 10_000, 1_000);
        let high = node("high", 10_000, 8_000, 10_000, 1_000);
        let task = Task::new("t", "img", 0.1, 500, 0);

        let scores = epvm.score(&task, &[low.clone(), high.clone()]);
        assert!(scores["low"] < scores["high"]);
    }
}
