use std::collections::HashMap;

use tracing::warn;

use crate::node::Node;
use crate::task::types::Task;

/// Exponent scale for the E-PVM memory-pressure term.
const MAX_JOBS_PER_HOST: f64 = 5.0;

/// Worker-selection policy. A closed set of variants, applied by the manager
/// as select_candidate_nodes, then score, then pick on every dispatch.
#[derive(Debug, Clone)]
pub enum Scheduler {
    RoundRobin { last_worker: usize },
    Epvm,
}

impl Scheduler {
    pub fn from_name(name: &str) -> Self {
        match name {
            "roundrobin" => Scheduler::RoundRobin { last_worker: 0 },
            "epvm" => Scheduler::Epvm,
            other => {
                warn!(scheduler = %other, "unknown scheduler, defaulting to epvm");
                Scheduler::Epvm
            }
        }
    }

    /// Filter to nodes that could host the task. An empty result is legal
    /// and signals that nothing currently fits.
    pub fn select_candidate_nodes(&self, task: &Task, nodes: &[Node]) -> Vec<Node> {
        nodes
            .iter()
            .filter(|node| {
                node.available_memory() >= task.memory && node.available_disk() >= task.disk
            })
            .cloned()
            .collect()
    }

    /// Assign each candidate a non-negative cost, lower is better. The
    /// round-robin variant advances its cursor here, so one score call
    /// corresponds to one rotation step.
    pub fn score(&mut self, task: &Task, candidates: &[Node]) -> HashMap<String, f64> {
        let mut scores = HashMap::new();
        if candidates.is_empty() {
            return scores;
        }

        match self {
            Scheduler::RoundRobin { last_worker } => {
                let next = (*last_worker + 1) % candidates.len();
                for offset in 0..candidates.len() {
                    let node = &candidates[(next + offset) % candidates.len()];
                    scores.insert(node.name.clone(), offset as f64);
                }
                *last_worker = next;
            }
            Scheduler::Epvm => {
                for node in candidates {
                    scores.insert(node.name.clone(), epvm_cost(task, node));
                }
            }
        }

        scores
    }

    /// Choose the candidate with the minimum score; ties break by name in
    /// lexicographic order.
    pub fn pick(&self, scores: &HashMap<String, f64>, candidates: &[Node]) -> Option<Node> {
        let mut best: Option<(&Node, f64)> = None;
        for node in candidates {
            let Some(&score) = scores.get(&node.name) else {
                continue;
            };
            best = match best {
                None => Some((node, score)),
                Some((chosen, chosen_score)) => {
                    if score < chosen_score || (score == chosen_score && node.name < chosen.name) {
                        Some((node, score))
                    } else {
                        Some((chosen, chosen_score))
                    }
                }
            };
        }
        best.map(|(node, _)| node.clone())
    }
}

/// Marginal cost of placing the task on the node: an exponential
/// memory-pressure term plus a CPU-usage term that separates nodes with
/// equal memory pressure.
fn epvm_cost(task: &Task, node: &Node) -> f64 {
    let cpu_cost = (10f64.powf(node.stats.cpu_usage) - 1.0).max(0.0);

    if node.memory == 0 {
        return cpu_cost;
    }

    let mem_load = node.memory_load();
    let mem_after = (node.memory_allocated + task.memory) as f64 / node.memory as f64;
    let mem_cost = (MAX_JOBS_PER_HOST * (mem_after - 1.0)).exp()
        - (MAX_JOBS_PER_HOST * (mem_load - 1.0)).exp();

    cpu_cost + mem_cost.max(0.0)
}
