//! Closure-table hierarchy operations.
//!
//! Every node owns one `story_paths` row per ancestor (itself included at
//! depth 0), so ancestor and descendant queries are single index scans.
//! Rows for a new node are derived from its parent's rows inside the same
//! transaction as the node insert.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, error, info, warn};
use turso::{params, Connection};
use xstory_core::{Error, NewStory, PathEdge, StoryId, StoryNode};

use crate::db::{
    count_with, ensure_writable, fetch_node, finish_tx, freeze, node_exists, Database, DbError,
    Result, FROZEN_SUBTREES, NODE_COLUMNS,
};
use crate::workflow::refresh_capacity;

/// Cap on problems listed in a single violation message.
const MAX_REPORTED_PROBLEMS: usize = 10;

impl Database {
    /// Create the tree root. Fails with DuplicateId if it already exists.
    pub async fn create_root(&mut self, story: NewStory) -> Result<StoryId> {
        story.validate()?;
        let root = StoryId::root();

        let base_capacity = self.options.base_capacity;
        let tx = self.conn.transaction().await?;
        let result = insert_root_tx(&tx, &root, &story, base_capacity).await;
        finish_tx!(tx, result)?;

        info!("Created story tree root");
        Ok(root)
    }

    /// Insert a child under `parent_id`, allocating the next free ordinal.
    ///
    /// Returns ParentNotFound if the parent does not exist.
    pub async fn insert(&mut self, parent_id: &str, story: NewStory) -> Result<StoryId> {
        story.validate()?;
        let parent = StoryId::parse(parent_id)?;
        let base_capacity = self.options.base_capacity;

        let tx = self.conn.transaction().await?;
        let result = async {
            ensure_writable(&tx, &parent).await?;
            ensure_parent(&tx, &parent).await?;
            let id = parent.child(next_ordinal(&tx, &parent).await?);
            insert_child_tx(&tx, &parent, &id, &story, base_capacity).await?;
            Ok::<_, DbError>(id)
        }
        .await;
        let result = finish_tx!(tx, result);

        self.after_insert(&parent, result).await
    }

    /// Insert a child under `parent_id` with a caller-proposed id.
    ///
    /// The id must follow the grammar and name `parent_id` as its parent.
    pub async fn insert_with_id(
        &mut self,
        parent_id: &str,
        id: &str,
        story: NewStory,
    ) -> Result<StoryId> {
        story.validate()?;
        let parent = StoryId::parse(parent_id)?;
        let id = StoryId::parse(id)?;
        if id.is_root() {
            return Err(Error::DuplicateId(id.to_string()).into());
        }
        id.ensure_child_of(&parent)?;
        let base_capacity = self.options.base_capacity;

        let tx = self.conn.transaction().await?;
        let result = async {
            ensure_writable(&tx, &parent).await?;
            ensure_parent(&tx, &parent).await?;
            insert_child_tx(&tx, &parent, &id, &story, base_capacity).await?;
            Ok::<_, DbError>(id)
        }
        .await;
        let result = finish_tx!(tx, result);

        self.after_insert(&parent, result).await
    }

    async fn after_insert(&mut self, parent: &StoryId, result: Result<StoryId>) -> Result<StoryId> {
        match result {
            Ok(id) => {
                info!("Inserted story {} under {}", id, parent);
                Ok(id)
            }
            Err(err) => {
                if err.is_fatal() {
                    error!("Insert under {} broke the closure: {}", parent, err);
                    if let Err(freeze_err) = freeze(&self.conn, [parent.clone()]).await {
                        warn!("Failed to freeze {}: {}", parent, freeze_err);
                    }
                }
                Err(err)
            }
        }
    }

    /// Every ancestor of `id` including itself, ordered by depth ascending.
    pub async fn ancestors_of(&self, id: &str) -> Result<Vec<PathEdge>> {
        let edges = query_edges(
            &self.conn,
            "SELECT ancestor_id, descendant_id, depth FROM story_paths
             WHERE descendant_id = ? ORDER BY depth ASC",
            id,
        )
        .await?;
        self.non_empty(id, edges).await
    }

    /// Every descendant of `id` including itself, ordered by depth then id.
    pub async fn descendants_of(&self, id: &str) -> Result<Vec<PathEdge>> {
        let edges = query_edges(
            &self.conn,
            "SELECT ancestor_id, descendant_id, depth FROM story_paths
             WHERE ancestor_id = ? ORDER BY depth ASC, descendant_id ASC",
            id,
        )
        .await?;
        self.non_empty(id, edges).await
    }

    async fn non_empty(&self, id: &str, edges: Vec<PathEdge>) -> Result<Vec<PathEdge>> {
        if edges.is_empty() {
            if node_exists(&self.conn, id).await? {
                return Err(Error::IntegrityViolation(format!("{} has no self-edge", id)).into());
            }
            return Err(Error::NodeNotFound(id.to_string()).into());
        }
        Ok(edges)
    }

    /// Number of non-self ancestor edges.
    pub async fn depth_of(&self, id: &str) -> Result<i64> {
        if !node_exists(&self.conn, id).await? {
            return Err(Error::NodeNotFound(id.to_string()).into());
        }
        count_with(
            &self.conn,
            "SELECT COUNT(*) FROM story_paths WHERE descendant_id = ? AND depth > 0",
            id,
        )
        .await
    }

    /// Direct children of `id`, ordered by id.
    pub async fn children_of(&self, id: &str) -> Result<Vec<StoryNode>> {
        let query = format!(
            "SELECT {} FROM story_nodes
             JOIN story_paths ON story_paths.descendant_id = story_nodes.id
             WHERE story_paths.ancestor_id = ? AND story_paths.depth = 1
             ORDER BY story_nodes.id ASC",
            NODE_COLUMNS
        );
        let mut rows = self.conn.query(&query, params![id]).await?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await? {
            nodes.push(crate::db::parse_node_row(&row)?);
        }
        Ok(nodes)
    }

    /// All closure rows, ordered by ancestor then depth.
    pub async fn all_paths(&self) -> Result<Vec<PathEdge>> {
        let mut rows = self
            .conn
            .query(
                "SELECT ancestor_id, descendant_id, depth FROM story_paths
                 ORDER BY ancestor_id ASC, depth ASC, descendant_id ASC",
                params![],
            )
            .await?;
        let mut edges = Vec::new();
        while let Some(row) = rows.next().await? {
            edges.push(PathEdge::new(
                row.get::<String>(0)?,
                row.get::<String>(1)?,
                row.get::<i64>(2)?,
            ));
        }
        Ok(edges)
    }

    /// Delete a leaf concept node flagged conflicted or duplicative.
    ///
    /// Fails with HasChildren when the node has descendants and with
    /// NotDeletable when it is not in a deletable state.
    pub async fn delete(&mut self, id: &str) -> Result<()> {
        let story_id = StoryId::parse(id)?;

        let tx = self.conn.transaction().await?;
        let result = async {
            ensure_writable(&tx, &story_id).await?;
            let node = fetch_node(&tx, id)
                .await?
                .ok_or_else(|| Error::NodeNotFound(id.to_string()))?;

            let descendants = count_with(
                &tx,
                "SELECT COUNT(*) FROM story_paths WHERE ancestor_id = ? AND depth > 0",
                id,
            )
            .await?;
            if descendants > 0 {
                return Err(Error::HasChildren(id.to_string()).into());
            }
            if !node.is_deletable_state() {
                return Err(Error::NotDeletable {
                    id: id.to_string(),
                    reason: format!(
                        "stage {} with hold {:?} and disposition {:?}",
                        node.stage, node.hold_reason, node.disposition
                    ),
                }
                .into());
            }

            tx.execute(
                "DELETE FROM story_paths WHERE ancestor_id = ? OR descendant_id = ?",
                params![id, id],
            )
            .await?;
            tx.execute("DELETE FROM story_commits WHERE story_id = ?", params![id])
                .await?;
            tx.execute("DELETE FROM story_nodes WHERE id = ?", params![id])
                .await?;
            Ok::<_, DbError>(())
        }
        .await;
        finish_tx!(tx, result)?;

        info!("Deleted story {}", id);
        Ok(())
    }

    /// Scan the closure relation and fail with IntegrityViolation on the
    /// first batch of problems found.
    pub async fn check_integrity(&mut self) -> Result<()> {
        let problems = self.integrity_problems().await?;
        if problems.is_empty() {
            debug!("Closure integrity check passed");
            return Ok(());
        }

        for (id, problem) in &problems {
            error!("Closure integrity problem at {}: {}", id, problem);
        }
        let frozen: BTreeSet<StoryId> = problems
            .iter()
            .filter_map(|(id, _)| StoryId::parse(id).ok())
            .collect();
        freeze(&self.conn, frozen).await?;

        let summary: Vec<String> = problems
            .iter()
            .take(MAX_REPORTED_PROBLEMS)
            .map(|(id, problem)| format!("{}: {}", id, problem))
            .collect();
        Err(Error::IntegrityViolation(format!(
            "{} problem(s): {}",
            problems.len(),
            summary.join("; ")
        ))
        .into())
    }

    /// Every closure problem as (node id, description).
    pub async fn integrity_problems(&self) -> Result<Vec<(String, String)>> {
        let mut node_ids: HashSet<String> = HashSet::new();
        let mut rows = self
            .conn
            .query("SELECT id FROM story_nodes", params![])
            .await?;
        while let Some(row) = rows.next().await? {
            node_ids.insert(row.get(0)?);
        }
        drop(rows);

        let edges = self.all_paths().await?;
        Ok(find_problems(&node_ids, &edges))
    }

    /// Consistency repair: recompute every closure row from the id grammar.
    ///
    /// Fails with IntegrityViolation when a node's parent is missing, since
    /// no correct closure exists for an orphan.
    pub async fn rebuild_paths(&mut self) -> Result<usize> {
        let tx = self.conn.transaction().await?;
        let result = async {
            let mut ids = Vec::new();
            let mut rows = tx.query("SELECT id FROM story_nodes", params![]).await?;
            while let Some(row) = rows.next().await? {
                ids.push(StoryId::parse(&row.get::<String>(0)?)?);
            }
            drop(rows);

            let known: HashSet<&StoryId> = ids.iter().collect();
            let orphans: Vec<String> = ids
                .iter()
                .filter(|id| id.parent().map(|p| !known.contains(&p)).unwrap_or(false))
                .map(|id| id.to_string())
                .collect();
            if !orphans.is_empty() {
                return Err(Error::IntegrityViolation(format!(
                    "cannot rebuild, orphaned nodes: {}",
                    orphans.join(", ")
                ))
                .into());
            }

            tx.execute("DELETE FROM story_paths", params![]).await?;
            tx.execute("DELETE FROM metadata WHERE key = ?", params![FROZEN_SUBTREES])
                .await?;
            let mut written = 0usize;
            for id in &ids {
                for (depth, ancestor) in id.lineage().iter().enumerate() {
                    insert_edge(&tx, ancestor.as_str(), id.as_str(), depth as i64).await?;
                    written += 1;
                }
            }
            Ok::<_, DbError>(written)
        }
        .await;
        let written = finish_tx!(tx, result)?;

        warn!("Rebuilt closure table: {} path rows", written);
        Ok(written)
    }
}

async fn insert_root_tx(
    conn: &Connection,
    root: &StoryId,
    story: &NewStory,
    base_capacity: i64,
) -> Result<()> {
    if node_exists(conn, root.as_str()).await? {
        return Err(Error::DuplicateId(root.to_string()).into());
    }
    insert_node_row(conn, root, story, base_capacity).await?;
    insert_edge(conn, root.as_str(), root.as_str(), 0).await?;
    Ok(())
}

async fn ensure_parent(conn: &Connection, parent: &StoryId) -> Result<()> {
    if !node_exists(conn, parent.as_str()).await? {
        return Err(Error::ParentNotFound(parent.to_string()).into());
    }
    Ok(())
}

/// Largest existing child ordinal plus one.
async fn next_ordinal(conn: &Connection, parent: &StoryId) -> Result<u64> {
    let mut rows = conn
        .query(
            "SELECT descendant_id FROM story_paths WHERE ancestor_id = ? AND depth = 1",
            params![parent.as_str()],
        )
        .await?;
    let mut max = 0u64;
    while let Some(row) = rows.next().await? {
        let child: String = row.get(0)?;
        if let Some(ordinal) = StoryId::parse(&child).ok().and_then(|id| id.ordinal()) {
            max = max.max(ordinal);
        }
    }
    Ok(max + 1)
}

/// Node row, copied ancestor rows with depth + 1, then the self-edge.
async fn insert_child_tx(
    conn: &Connection,
    parent: &StoryId,
    id: &StoryId,
    story: &NewStory,
    base_capacity: i64,
) -> Result<()> {
    if node_exists(conn, id.as_str()).await? {
        return Err(Error::DuplicateId(id.to_string()).into());
    }

    insert_node_row(conn, id, story, base_capacity).await?;

    let parent_edges = query_edges(
        conn,
        "SELECT ancestor_id, descendant_id, depth FROM story_paths
         WHERE descendant_id = ? ORDER BY depth ASC",
        parent.as_str(),
    )
    .await?;
    for edge in &parent_edges {
        insert_edge(conn, &edge.ancestor_id, id.as_str(), edge.depth + 1).await?;
    }
    insert_edge(conn, id.as_str(), id.as_str(), 0).await?;

    verify_chain(conn, id).await?;
    if story.stage.is_completed() {
        refresh_capacity(conn, parent.as_str(), base_capacity).await?;
    }
    Ok(())
}

/// The new node's ancestor rows must be exactly its lineage at depths 0..n.
async fn verify_chain(conn: &Connection, id: &StoryId) -> Result<()> {
    let edges = query_edges(
        conn,
        "SELECT ancestor_id, descendant_id, depth FROM story_paths
         WHERE descendant_id = ? ORDER BY depth ASC",
        id.as_str(),
    )
    .await?;
    let lineage = id.lineage();

    let contiguous = edges.len() == lineage.len()
        && edges
            .iter()
            .zip(lineage.iter())
            .enumerate()
            .all(|(depth, (edge, expected))| {
                edge.depth == depth as i64 && edge.ancestor_id == expected.as_str()
            });
    if !contiguous {
        return Err(Error::IntegrityViolation(format!(
            "ancestor chain of {} is not contiguous ({} rows, expected {})",
            id,
            edges.len(),
            lineage.len()
        ))
        .into());
    }
    Ok(())
}

async fn insert_node_row(
    conn: &Connection,
    id: &StoryId,
    story: &NewStory,
    base_capacity: i64,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    // Created past implementation: stamp as if it had just got there
    let last_implemented = story.stage.is_completed().then(|| now.clone());
    conn.execute(
        r#"
        INSERT INTO story_nodes (
            id, title, description, capacity, stage, hold_reason, disposition,
            human_review, project_path, last_implemented, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, NULL, NULL, ?, ?, ?, ?, ?)
        "#,
        params![
            id.as_str(),
            story.title.clone(),
            story.description.clone(),
            base_capacity,
            story.stage.as_str(),
            story.human_review as i64,
            story.project_path.clone(),
            last_implemented,
            now.clone(),
            now,
        ],
    )
    .await?;
    Ok(())
}

pub(crate) async fn insert_edge(
    conn: &Connection,
    ancestor: &str,
    descendant: &str,
    depth: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO story_paths (ancestor_id, descendant_id, depth) VALUES (?, ?, ?)",
        params![ancestor, descendant, depth],
    )
    .await?;
    Ok(())
}

async fn query_edges(conn: &Connection, query: &str, id: &str) -> Result<Vec<PathEdge>> {
    let mut rows = conn.query(query, params![id]).await?;
    let mut edges = Vec::new();
    while let Some(row) = rows.next().await? {
        edges.push(PathEdge::new(
            row.get::<String>(0)?,
            row.get::<String>(1)?,
            row.get::<i64>(2)?,
        ));
    }
    Ok(edges)
}

/// Number of direct children of `id`.
pub(crate) async fn child_count(conn: &Connection, id: &str) -> Result<i64> {
    count_with(
        conn,
        "SELECT COUNT(*) FROM story_paths WHERE ancestor_id = ? AND depth = 1",
        id,
    )
    .await
}

/// Pure closure checks over a node set and its edges.
fn find_problems(node_ids: &HashSet<String>, edges: &[PathEdge]) -> Vec<(String, String)> {
    let mut problems = Vec::new();
    let by_pair: HashMap<(&str, &str), i64> = edges
        .iter()
        .map(|e| ((e.ancestor_id.as_str(), e.descendant_id.as_str()), e.depth))
        .collect();
    let mut by_ancestor: HashMap<&str, Vec<&PathEdge>> = HashMap::new();
    for edge in edges {
        by_ancestor
            .entry(edge.ancestor_id.as_str())
            .or_default()
            .push(edge);
    }

    for edge in edges {
        for end in [&edge.ancestor_id, &edge.descendant_id] {
            if !node_ids.contains(end) {
                problems.push((
                    edge.descendant_id.clone(),
                    format!(
                        "edge ({}, {}) references unknown node {}",
                        edge.ancestor_id, edge.descendant_id, end
                    ),
                ));
            }
        }
        if edge.depth < 0 {
            problems.push((
                edge.descendant_id.clone(),
                format!("edge ({}, {}) has negative depth", edge.ancestor_id, edge.descendant_id),
            ));
        }

        // Transitivity: (a,b,d1) + (b,c,d2) => (a,c,d1+d2)
        if edge.depth > 0 {
            if let Some(onward) = by_ancestor.get(edge.descendant_id.as_str()) {
                for next in onward.iter().filter(|n| n.depth > 0) {
                    let expected = edge.depth + next.depth;
                    match by_pair.get(&(edge.ancestor_id.as_str(), next.descendant_id.as_str())) {
                        Some(depth) if *depth == expected => {}
                        Some(depth) => problems.push((
                            next.descendant_id.clone(),
                            format!(
                                "edge ({}, {}) has depth {}, expected {}",
                                edge.ancestor_id, next.descendant_id, depth, expected
                            ),
                        )),
                        None => problems.push((
                            next.descendant_id.clone(),
                            format!(
                                "missing transitive edge ({}, {}, {})",
                                edge.ancestor_id, next.descendant_id, expected
                            ),
                        )),
                    }
                }
            }
        }
    }

    let mut sorted_ids: Vec<&String> = node_ids.iter().collect();
    sorted_ids.sort();
    for id in sorted_ids {
        let Ok(parsed) = StoryId::parse(id) else {
            problems.push((id.clone(), "id does not follow the grammar".to_string()));
            continue;
        };
        for (depth, ancestor) in parsed.lineage().iter().enumerate() {
            match by_pair.get(&(ancestor.as_str(), id.as_str())) {
                Some(d) if *d == depth as i64 => {}
                Some(d) => problems.push((
                    id.clone(),
                    format!("edge ({}, {}) has depth {}, expected {}", ancestor, id, d, depth),
                )),
                None if depth == 0 => problems.push((id.clone(), "missing self-edge".to_string())),
                None => problems.push((
                    id.clone(),
                    format!("missing ancestor edge ({}, {}, {})", ancestor, id, depth),
                )),
            }
        }
    }

    problems.sort();
    problems.dedup();
    problems
}
