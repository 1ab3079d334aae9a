//! Persistence of workflow transitions.
//!
//! The transition rules live in `xstory_core::workflow`; this module loads
//! the node, applies the pure transition and writes the result back together
//! with its effects (parent capacity, implementation timestamp) in one
//! transaction.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use turso::{params, Connection};
use xstory_core::{
    transition, Disposition, Effect, Error, HoldReason, Stage, StoryNode, WorkflowEvent,
};

use crate::db::{
    count_with, ensure_writable, fetch_node, finish_tx, store_workflow, Database, DbError, Result,
};

impl Database {
    /// Put a node on hold.
    pub async fn set_hold(&mut self, id: &str, reason: HoldReason) -> Result<StoryNode> {
        self.apply_event(id, WorkflowEvent::SetHold(reason), None).await
    }

    /// Lift a node's hold. Outside concept this advances the stage by one.
    pub async fn clear_hold(&mut self, id: &str) -> Result<StoryNode> {
        self.apply_event(id, WorkflowEvent::ClearHold, None).await
    }

    /// Set the terminal disposition.
    pub async fn set_disposition(&mut self, id: &str, disposition: Disposition) -> Result<StoryNode> {
        self.apply_event(id, WorkflowEvent::SetDisposition(disposition), None)
            .await
    }

    /// Explicit single-step advance.
    pub async fn advance_stage(&mut self, id: &str) -> Result<StoryNode> {
        self.apply_event(id, WorkflowEvent::Advance, None).await
    }

    /// Move to `target`, which must be the next stage.
    pub async fn set_stage(&mut self, id: &str, target: Stage) -> Result<StoryNode> {
        self.apply_event(id, WorkflowEvent::SetStage(target), None)
            .await
    }

    /// Approval signal: moves a concept node to planning.
    pub async fn approve(&mut self, id: &str) -> Result<StoryNode> {
        self.apply_event(id, WorkflowEvent::Advance, Some(Stage::Concept))
            .await
    }

    /// True when every listed node exists and is implemented or later.
    /// Used to decide whether a planning `queued` hold may clear.
    pub async fn prerequisites_met(&self, ids: &[&str]) -> Result<bool> {
        for id in ids {
            match fetch_node(&self.conn, id).await? {
                Some(node) if node.stage.is_completed() => continue,
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    async fn apply_event(
        &mut self,
        id: &str,
        event: WorkflowEvent,
        expect_stage: Option<Stage>,
    ) -> Result<StoryNode> {
        let story_id = xstory_core::StoryId::parse(id)?;
        let base_capacity = self.options.base_capacity;

        let tx = self.conn.transaction().await?;
        let result = async {
            ensure_writable(&tx, &story_id).await?;
            let node = fetch_node(&tx, id)
                .await?
                .ok_or_else(|| Error::NodeNotFound(id.to_string()))?;
            if let Some(expected) = expect_stage {
                if node.stage != expected {
                    return Err(Error::invalid_transition(
                        id,
                        format!("expected stage {}, node is at {}", expected, node.stage),
                    )
                    .into());
                }
            }
            let (node, _) = apply_event_tx(&tx, node, event, base_capacity, Utc::now()).await?;
            Ok::<_, DbError>(node)
        }
        .await;
        let node = finish_tx!(tx, result)?;

        debug!("Applied {:?} to {}", event, id);
        Ok(node)
    }
}

/// Apply `event` to `node` and persist the outcome on `conn`.
pub(crate) async fn apply_event_tx(
    conn: &Connection,
    mut node: StoryNode,
    event: WorkflowEvent,
    base_capacity: i64,
    now: DateTime<Utc>,
) -> Result<(StoryNode, Vec<Effect>)> {
    let (state, effects) = transition(node.id.as_str(), node.workflow(), event)?;
    node.stage = state.stage;
    node.hold_reason = state.hold_reason;
    node.disposition = state.disposition;
    node.updated_at = now;

    for effect in &effects {
        if let Effect::StageAdvanced { to, .. } = effect {
            if *to == Stage::Implemented {
                node.last_implemented = Some(now);
            }
        }
    }

    store_workflow(conn, &node).await?;

    for effect in &effects {
        match effect {
            Effect::StageAdvanced { from, to } => {
                info!("Story {} advanced {} -> {}", node.id, from, to);
                if let Some(parent) = node.id.parent() {
                    refresh_capacity(conn, parent.as_str(), base_capacity).await?;
                }
            }
            Effect::Disposed(disposition) => {
                info!("Story {} disposed as {}", node.id, disposition);
            }
            Effect::HoldSet(reason) => debug!("Story {} held: {}", node.id, reason),
            Effect::HoldCleared(reason) => debug!("Story {} hold cleared: {}", node.id, reason),
        }
    }

    Ok((node, effects))
}

/// Children of `id` at implemented, ready or released.
pub(crate) async fn completed_children(conn: &Connection, id: &str) -> Result<i64> {
    count_with(
        conn,
        "SELECT COUNT(*) FROM story_paths
         JOIN story_nodes ON story_nodes.id = story_paths.descendant_id
         WHERE story_paths.ancestor_id = ? AND story_paths.depth = 1
           AND story_nodes.stage IN ('implemented', 'ready', 'released')",
        id,
    )
    .await
}

/// Recompute the persisted capacity of `id`. The stored value never shrinks.
pub(crate) async fn refresh_capacity(conn: &Connection, id: &str, base_capacity: i64) -> Result<i64> {
    let Some(node) = fetch_node(conn, id).await? else {
        return Ok(0);
    };
    let computed = xstory_core::scheduler::capacity(base_capacity, completed_children(conn, id).await?);
    let capacity = node.capacity.max(computed);
    if capacity != node.capacity {
        conn.execute(
            "UPDATE story_nodes SET capacity = ? WHERE id = ?",
            params![capacity, id],
        )
        .await?;
        debug!("Capacity of {} now {}", id, capacity);
    }
    Ok(capacity)
}
