//! Database layer for xstory using Turso.
//!
//! Architecture:
//!   - Database file: .claude/data/story-tree.db (see `XstoryConfig`)
//!   - WAL mode: Write-Ahead Logging for concurrent reads during writes
//!   - Schema: story_nodes, story_paths, story_commits, metadata, vetting_decisions
//!   - Indexes: both ends of the closure relation, stage, commit owner
//!
//! Writers take `&mut self` and run inside a transaction, so a `Database`
//! handle admits one writer at a time while shared borrows may read.
//!
//! Single-row reads go through [`first_row`], which drains the rest of the
//! result set; an undrained `Rows` handle ends the enclosing transaction.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};
use turso::{params, Builder, Connection, Row, Rows};
use xstory_core::{
    Disposition, HoldReason, SchedulerOptions, Stage, StoryId, StoryNode, VettingOutcome,
};

/// Metadata key holding the newest reconciled commit hash.
pub const LAST_ANALYZED_COMMIT: &str = "lastAnalyzedCommit";

/// Metadata key holding the time of the last checkpoint write.
pub const LAST_UPDATED: &str = "lastUpdated";

/// Metadata key holding the comma-separated roots of frozen subtrees.
pub const FROZEN_SUBTREES: &str = "frozenSubtrees";

pub(crate) const NODE_COLUMNS: &str = "id, title, description, capacity, stage, hold_reason, \
     disposition, human_review, project_path, last_implemented, created_at, updated_at";

/// Database connection wrapper for Turso
pub struct Database {
    pub(crate) conn: Connection,
    path: String,
    pub(crate) options: SchedulerOptions,
}

/// Database errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("turso error: {0}")]
    Turso(#[from] turso::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] xstory_core::Error),

    #[error("{0}")]
    Other(String),
}

impl DbError {
    /// The domain error, when this is one.
    pub fn core(&self) -> Option<&xstory_core::Error> {
        match self {
            DbError::Core(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.core().map(|e| e.is_fatal()).unwrap_or(false)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Filter options for listing nodes
#[derive(Debug, Clone, Default)]
pub struct ListNodesFilter {
    /// Filter by stage (None = all stages)
    pub stage: Option<Stage>,

    /// Only nodes without a disposition
    pub active_only: bool,

    /// Limit the number of results (0 = no limit)
    pub limit: usize,
}

/// Commit or roll back `$tx` depending on `$result`.
macro_rules! finish_tx {
    ($tx:expr, $result:expr) => {
        match $result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = $tx.rollback().await {
                    tracing::warn!("Rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    };
}
pub(crate) use finish_tx;

impl Database {
    /// Open creates a new database connection at the specified path using Turso.
    ///
    /// The database is opened in embedded mode with WAL for concurrent reads.
    /// Call [`Database::init_schema`] before first use.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use xstory_storage::db::Database;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let db = Database::open(".claude/data/story-tree.db").await?;
    /// db.init_schema().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        // Use query() for PRAGMA statements as they may return results
        first_row(conn.query("PRAGMA journal_mode=WAL", params![]).await?).await?;
        first_row(conn.query("PRAGMA busy_timeout=5000", params![]).await?).await?;

        debug!("Opened story database at {}", path_str);
        Ok(Self::from_connection(conn, path_str))
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;
        Ok(Self::from_connection(conn, ":memory:".to_string()))
    }

    fn from_connection(conn: Connection, path: String) -> Self {
        Database {
            conn,
            path,
            options: SchedulerOptions::default(),
        }
    }

    /// Returns the database file path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Options used for persisted capacity and `select_next`.
    pub fn with_scheduler_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        self.options
    }

    /// InitSchema creates the database schema if it doesn't exist.
    /// This is idempotent - safe to call multiple times.
    pub async fn init_schema(&self) -> Result<()> {
        let statements = vec![
            r#"CREATE TABLE IF NOT EXISTS story_nodes (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                capacity INTEGER NOT NULL DEFAULT 3,
                stage TEXT NOT NULL DEFAULT 'concept',
                hold_reason TEXT,
                disposition TEXT,
                human_review INTEGER NOT NULL DEFAULT 0,
                project_path TEXT,
                last_implemented TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS story_paths (
                ancestor_id TEXT NOT NULL,
                descendant_id TEXT NOT NULL,
                depth INTEGER NOT NULL,
                PRIMARY KEY (ancestor_id, descendant_id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS story_commits (
                story_id TEXT NOT NULL,
                commit_hash TEXT PRIMARY KEY,
                commit_date TEXT NOT NULL,
                commit_message TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS vetting_decisions (
                signature TEXT PRIMARY KEY,
                decision TEXT NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_paths_ancestor ON story_paths(ancestor_id, depth)",
            "CREATE INDEX IF NOT EXISTS idx_paths_descendant ON story_paths(descendant_id, depth)",
            "CREATE INDEX IF NOT EXISTS idx_nodes_stage ON story_nodes(stage)",
            "CREATE INDEX IF NOT EXISTS idx_commits_story ON story_commits(story_id)",
        ];

        for stmt in statements {
            self.conn.execute(stmt, params![]).await?;
        }

        Ok(())
    }

    /// GetNode retrieves a single node by id.
    /// Returns NodeNotFound if the node does not exist.
    pub async fn get_node(&self, id: &str) -> Result<StoryNode> {
        self.try_get_node(id)
            .await?
            .ok_or_else(|| xstory_core::Error::NodeNotFound(id.to_string()).into())
    }

    pub async fn try_get_node(&self, id: &str) -> Result<Option<StoryNode>> {
        fetch_node(&self.conn, id).await
    }

    /// ListNodes retrieves nodes matching the filter, ordered by id.
    pub async fn list_nodes(&self, filter: ListNodesFilter) -> Result<Vec<StoryNode>> {
        let mut conditions = Vec::new();
        let mut params_vec: Vec<turso::Value> = Vec::new();

        if let Some(stage) = filter.stage {
            conditions.push("stage = ?");
            params_vec.push(stage.as_str().to_string().into());
        }

        if filter.active_only {
            conditions.push("disposition IS NULL");
        }

        let mut query = format!("SELECT {} FROM story_nodes", NODE_COLUMNS);

        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }

        query.push_str(" ORDER BY id ASC");

        if filter.limit > 0 {
            query.push_str(" LIMIT ?");
            params_vec.push((filter.limit as i64).into());
        }

        let mut rows = self.conn.query(&query, params_vec).await?;
        let mut nodes = Vec::new();

        while let Some(row) = rows.next().await? {
            nodes.push(parse_node_row(&row)?);
        }

        Ok(nodes)
    }

    /// Active nodes: every node without a disposition.
    pub async fn active_nodes(&self) -> Result<Vec<StoryNode>> {
        self.list_nodes(ListNodesFilter {
            active_only: true,
            ..Default::default()
        })
        .await
    }

    /// GetNodeCount returns the total number of nodes.
    pub async fn node_count(&self) -> Result<i64> {
        count(&self.conn, "SELECT COUNT(*) FROM story_nodes").await
    }

    /// GetPathCount returns the total number of closure rows.
    pub async fn path_count(&self) -> Result<i64> {
        count(&self.conn, "SELECT COUNT(*) FROM story_paths").await
    }

    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        read_metadata(&self.conn, key).await
    }

    pub async fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        write_metadata(&self.conn, key, value).await
    }

    /// Last reconciled commit hash, if any.
    pub async fn checkpoint(&self) -> Result<Option<String>> {
        self.get_metadata(LAST_ANALYZED_COMMIT).await
    }

    /// Forget the checkpoint; the next reconciliation falls back to a window scan.
    pub async fn clear_checkpoint(&mut self) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM metadata WHERE key = ?",
                params![LAST_ANALYZED_COMMIT],
            )
            .await?;
        info!("Cleared commit checkpoint");
        Ok(())
    }

    /// Remember how a concept signature was resolved (last write wins).
    pub async fn record_vetting_decision(
        &mut self,
        signature: &str,
        decision: &VettingOutcome,
    ) -> Result<()> {
        if signature.is_empty() {
            return Err(DbError::Other("vetting signature is empty".to_string()));
        }
        self.conn
            .execute(
                r#"
                INSERT INTO vetting_decisions (signature, decision) VALUES (?, ?)
                ON CONFLICT(signature) DO UPDATE SET decision = excluded.decision
                "#,
                params![signature, decision.to_string()],
            )
            .await?;
        debug!("Recorded vetting decision {} for {}", decision, signature);
        Ok(())
    }

    pub async fn vetting_decision(&self, signature: &str) -> Result<Option<VettingOutcome>> {
        let rows = self
            .conn
            .query(
                "SELECT decision FROM vetting_decisions WHERE signature = ?",
                params![signature],
            )
            .await?;

        if let Some(row) = first_row(rows).await? {
            let raw: String = row.get(0)?;
            Ok(Some(raw.parse()?))
        } else {
            Ok(None)
        }
    }

    /// Roots of the subtrees frozen by an integrity violation.
    pub async fn frozen_subtrees(&self) -> Result<BTreeSet<StoryId>> {
        frozen_subtrees(&self.conn).await
    }
}

/// First row of `rows`, draining the remainder.
pub(crate) async fn first_row(mut rows: Rows) -> Result<Option<Row>> {
    let first = rows.next().await?;
    while rows.next().await?.is_some() {}
    Ok(first)
}

/// Single integer from a `COUNT(*)`-style query.
pub(crate) async fn count_with(conn: &Connection, query: &str, id: &str) -> Result<i64> {
    let rows = conn.query(query, params![id]).await?;
    match first_row(rows).await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

pub(crate) async fn count(conn: &Connection, query: &str) -> Result<i64> {
    let rows = conn.query(query, params![]).await?;
    match first_row(rows).await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

pub(crate) async fn fetch_node(conn: &Connection, id: &str) -> Result<Option<StoryNode>> {
    let query = format!("SELECT {} FROM story_nodes WHERE id = ?", NODE_COLUMNS);
    let rows = conn.query(&query, params![id]).await?;

    match first_row(rows).await? {
        Some(row) => Ok(Some(parse_node_row(&row)?)),
        None => Ok(None),
    }
}

pub(crate) async fn node_exists(conn: &Connection, id: &str) -> Result<bool> {
    let rows = conn
        .query("SELECT 1 FROM story_nodes WHERE id = ?", params![id])
        .await?;
    Ok(first_row(rows).await?.is_some())
}

pub(crate) async fn read_metadata(conn: &Connection, key: &str) -> Result<Option<String>> {
    let rows = conn
        .query("SELECT value FROM metadata WHERE key = ?", params![key])
        .await?;
    match first_row(rows).await? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

pub(crate) async fn frozen_subtrees(conn: &Connection) -> Result<BTreeSet<StoryId>> {
    let Some(raw) = read_metadata(conn, FROZEN_SUBTREES).await? else {
        return Ok(BTreeSet::new());
    };
    raw.split(',')
        .filter(|id| !id.is_empty())
        .map(|id| StoryId::parse(id).map_err(DbError::from))
        .collect()
}

/// Refuse writes inside a subtree frozen by an integrity violation.
pub(crate) async fn ensure_writable(conn: &Connection, id: &StoryId) -> Result<()> {
    let frozen = frozen_subtrees(conn).await?;
    if let Some(root) = id.lineage().iter().find(|a| frozen.contains(*a)) {
        return Err(xstory_core::Error::IntegrityViolation(format!(
            "subtree {} is frozen until paths are rebuilt",
            root
        ))
        .into());
    }
    Ok(())
}

/// Add `ids` to the persisted set of frozen subtree roots.
pub(crate) async fn freeze<I>(conn: &Connection, ids: I) -> Result<()>
where
    I: IntoIterator<Item = StoryId>,
{
    let mut frozen = frozen_subtrees(conn).await?;
    for id in ids {
        warn!("Freezing subtree {} after integrity violation", id);
        frozen.insert(id);
    }
    let value = frozen
        .iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(",");
    write_metadata(conn, FROZEN_SUBTREES, &value).await
}

pub(crate) async fn write_metadata(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO metadata (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        params![key, value],
    )
    .await?;
    Ok(())
}

/// Write the node's workflow fields and timestamps back.
pub(crate) async fn store_workflow(conn: &Connection, node: &StoryNode) -> Result<()> {
    conn.execute(
        r#"
        UPDATE story_nodes SET
            stage = ?,
            hold_reason = ?,
            disposition = ?,
            last_implemented = ?,
            updated_at = ?
        WHERE id = ?
        "#,
        params![
            node.stage.as_str(),
            node.hold_reason.map(|h| h.as_str().to_string()),
            node.disposition.map(|d| d.as_str().to_string()),
            node.last_implemented.map(|dt| dt.to_rfc3339()),
            node.updated_at.to_rfc3339(),
            node.id.as_str(),
        ],
    )
    .await?;
    Ok(())
}

/// Helper function to parse a node row selected with `NODE_COLUMNS`
pub(crate) fn parse_node_row(row: &turso::Row) -> Result<StoryNode> {
    let id: String = row.get(0)?;
    let stage: String = row.get(4)?;
    let hold_reason: Option<String> = row.get(5)?;
    let disposition: Option<String> = row.get(6)?;
    let human_review: i64 = row.get(7)?;
    let last_implemented: Option<String> = row.get(9)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(StoryNode {
        id: StoryId::parse(&id)?,
        title: row.get(1)?,
        description: row.get(2)?,
        capacity: row.get(3)?,
        stage: stage.parse::<Stage>()?,
        hold_reason: hold_reason
            .map(|h| h.parse::<HoldReason>())
            .transpose()?,
        disposition: disposition
            .map(|d| d.parse::<Disposition>())
            .transpose()?,
        human_review: human_review != 0,
        project_path: row.get(8)?,
        last_implemented: last_implemented
            .map(|s| parse_timestamp("last_implemented", &s))
            .transpose()?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

pub(crate) fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Other(format!("failed to parse {}: {}", field, e)))
}
