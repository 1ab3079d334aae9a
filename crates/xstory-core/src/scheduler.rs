//! Capacity and expansion-target selection.
//!
//! Capacity grows with demonstrated completion: a node may hold
//! `base + completed children` children. Among eligible nodes the shallowest
//! wins, then the least filled, so growth stays breadth-first.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::id::StoryId;
use crate::types::{Disposition, HoldReason, Stage};

/// Default number of children a node may take before any of them completes.
pub const BASE_CAPACITY: i64 = 3;

/// Options for selecting the next expansion target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerOptions {
    pub base_capacity: i64,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            base_capacity: BASE_CAPACITY,
        }
    }
}

/// capacity = base + children at implemented, ready or released.
pub fn capacity(base_capacity: i64, completed_children: i64) -> i64 {
    base_capacity + completed_children
}

/// Ratio of current children to capacity.
pub fn fill_rate(child_count: i64, capacity: i64) -> f64 {
    if capacity <= 0 {
        return 1.0;
    }
    child_count as f64 / capacity as f64
}

/// NodeLoad is the per-node shape the store reports to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLoad {
    pub id: StoryId,
    pub stage: Stage,
    pub hold_reason: Option<HoldReason>,
    pub disposition: Option<Disposition>,
    pub depth: i64,
    pub child_count: i64,
    pub completed_children: i64,
}

/// An eligible expansion target with its computed load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: StoryId,
    pub depth: i64,
    pub child_count: i64,
    pub capacity: i64,
    pub fill_rate: f64,
}

impl NodeLoad {
    pub fn capacity(&self, opts: &SchedulerOptions) -> i64 {
        capacity(opts.base_capacity, self.completed_children)
    }

    /// Eligible: past concept, not held, not disposed, below capacity.
    pub fn is_eligible(&self, opts: &SchedulerOptions) -> bool {
        self.stage != Stage::Concept
            && self.hold_reason.is_none()
            && self.disposition.is_none()
            && self.child_count < self.capacity(opts)
    }

    fn to_candidate(&self, opts: &SchedulerOptions) -> Candidate {
        let capacity = self.capacity(opts);
        Candidate {
            id: self.id.clone(),
            depth: self.depth,
            child_count: self.child_count,
            capacity,
            fill_rate: fill_rate(self.child_count, capacity),
        }
    }
}

/// Eligible candidates in selection order: depth, then fill rate, then id.
pub fn rank(loads: &[NodeLoad], opts: &SchedulerOptions) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = loads
        .iter()
        .filter(|load| load.is_eligible(opts))
        .map(|load| load.to_candidate(opts))
        .collect();

    candidates.sort_by(|a, b| {
        a.depth
            .cmp(&b.depth)
            .then_with(|| {
                a.fill_rate
                    .partial_cmp(&b.fill_rate)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates
}

/// The next expansion target; `None` when nothing qualifies.
pub fn select_next(loads: &[NodeLoad], opts: &SchedulerOptions) -> Option<Candidate> {
    rank(loads, opts).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(id: &str, stage: Stage, child_count: i64, completed: i64) -> NodeLoad {
        let id = StoryId::parse(id).unwrap();
        NodeLoad {
            depth: id.depth(),
            id,
            stage,
            hold_reason: None,
            disposition: None,
            child_count,
            completed_children: completed,
        }
    }

    #[test]
    fn test_capacity_and_fill_rate() {
        // 3 children, all ready
        let node = load("1", Stage::Executing, 3, 3);
        let opts = SchedulerOptions::default();
        assert_eq!(node.capacity(&opts), 6);
        assert_eq!(fill_rate(3, node.capacity(&opts)), 0.5);
    }

    #[test]
    fn test_shallower_node_wins_regardless_of_fill() {
        let loads = vec![
            load("1", Stage::Planning, 2, 0),
            load("2.1", Stage::Planning, 0, 0),
        ];
        let picked = select_next(&loads, &SchedulerOptions::default()).unwrap();
        assert_eq!(picked.id.as_str(), "1");
    }

    #[test]
    fn test_fill_rate_breaks_depth_ties() {
        let loads = vec![
            load("1", Stage::Planning, 2, 0),
            load("2", Stage::Executing, 1, 1),
        ];
        let ranked = rank(&loads, &SchedulerOptions::default());
        assert_eq!(ranked[0].id.as_str(), "2");
        assert_eq!(ranked[1].id.as_str(), "1");
    }

    #[test]
    fn test_ineligible_nodes_are_skipped() {
        let mut held = load("1", Stage::Planning, 0, 0);
        held.hold_reason = Some(HoldReason::Blocked);
        let mut disposed = load("2", Stage::Planning, 0, 0);
        disposed.disposition = Some(Disposition::Rejected);
        let concept = load("3", Stage::Concept, 0, 0);
        let full = load("4", Stage::Planning, 3, 0);

        let loads = vec![held, disposed, concept, full];
        assert!(select_next(&loads, &SchedulerOptions::default()).is_none());
    }

    #[test]
    fn test_custom_base_capacity() {
        let loads = vec![load("1", Stage::Planning, 3, 0)];
        let opts = SchedulerOptions { base_capacity: 4 };
        let picked = select_next(&loads, &opts).unwrap();
        assert_eq!(picked.capacity, 4);
        assert_eq!(picked.fill_rate, 0.75);
    }
}
