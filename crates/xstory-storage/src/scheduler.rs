//! Store-backed expansion target selection.
//!
//! Loads are gathered with three flat queries and ranked by
//! `xstory_core::scheduler`.

use std::collections::HashMap;
use tracing::debug;
use turso::params;
use xstory_core::scheduler::{self, Candidate, NodeLoad, SchedulerOptions};
use xstory_core::{Error, Stage};

use crate::db::{node_exists, Database, Result};
use crate::hierarchy::child_count;
use crate::workflow::completed_children;

impl Database {
    /// Per-node depth, child count and completed child count, ordered by id.
    pub async fn node_loads(&self) -> Result<Vec<NodeLoad>> {
        let nodes = self.list_nodes(Default::default()).await?;

        let mut depths: HashMap<String, i64> = HashMap::new();
        let mut rows = self
            .conn
            .query(
                "SELECT descendant_id, COUNT(*) FROM story_paths
                 WHERE depth > 0 GROUP BY descendant_id",
                params![],
            )
            .await?;
        while let Some(row) = rows.next().await? {
            depths.insert(row.get(0)?, row.get(1)?);
        }
        drop(rows);

        // parent id -> (children, completed children)
        let mut children: HashMap<String, (i64, i64)> = HashMap::new();
        let mut rows = self
            .conn
            .query(
                "SELECT story_paths.ancestor_id, story_nodes.stage FROM story_paths
                 JOIN story_nodes ON story_nodes.id = story_paths.descendant_id
                 WHERE story_paths.depth = 1",
                params![],
            )
            .await?;
        while let Some(row) = rows.next().await? {
            let parent: String = row.get(0)?;
            let stage: Stage = row.get::<String>(1)?.parse()?;
            let entry = children.entry(parent).or_insert((0, 0));
            entry.0 += 1;
            if stage.is_completed() {
                entry.1 += 1;
            }
        }
        drop(rows);

        Ok(nodes
            .into_iter()
            .map(|node| {
                let (child_count, completed_children) =
                    children.get(node.id.as_str()).copied().unwrap_or((0, 0));
                NodeLoad {
                    depth: depths.get(node.id.as_str()).copied().unwrap_or(0),
                    id: node.id,
                    stage: node.stage,
                    hold_reason: node.hold_reason,
                    disposition: node.disposition,
                    child_count,
                    completed_children,
                }
            })
            .collect())
    }

    /// The next node to receive children, or `None` when no node qualifies.
    pub async fn select_next(&self) -> Result<Option<Candidate>> {
        self.select_next_with(&self.options).await
    }

    pub async fn select_next_with(&self, opts: &SchedulerOptions) -> Result<Option<Candidate>> {
        let loads = self.node_loads().await?;
        let picked = scheduler::select_next(&loads, opts);
        match &picked {
            Some(candidate) => debug!(
                "Selected {} (depth {}, fill {:.2})",
                candidate.id, candidate.depth, candidate.fill_rate
            ),
            None => debug!("No expansion candidate among {} nodes", loads.len()),
        }
        Ok(picked)
    }

    /// Eligible nodes in selection order.
    pub async fn ranked_candidates(&self) -> Result<Vec<Candidate>> {
        let loads = self.node_loads().await?;
        Ok(scheduler::rank(&loads, &self.options))
    }

    /// Current capacity of `id`: base plus completed children.
    pub async fn capacity_of(&self, id: &str) -> Result<i64> {
        if !node_exists(&self.conn, id).await? {
            return Err(Error::NodeNotFound(id.to_string()).into());
        }
        let completed = completed_children(&self.conn, id).await?;
        Ok(scheduler::capacity(self.options.base_capacity, completed))
    }

    /// Children of `id` divided by its capacity.
    pub async fn fill_rate_of(&self, id: &str) -> Result<f64> {
        let capacity = self.capacity_of(id).await?;
        let children = child_count(&self.conn, id).await?;
        Ok(scheduler::fill_rate(children, capacity))
    }
}
