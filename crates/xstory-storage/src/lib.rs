//! xstory storage - persistent story tree on Turso
//!
//! This crate stores the backlog tree as a closure table and carries out the
//! workflow, scheduling and commit-link operations against it.
//!
//! # Overview
//!
//! The database uses Turso (embedded, SQLite-compatible) with:
//! - WAL mode for concurrent reads during writes
//! - One transaction per mutating operation, rolled back on any error
//! - A closure table holding every (ancestor, descendant, depth) triple
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │         Orchestration layer                 │
//! │  (skills, linker runs, explorer)            │
//! └─────────────────┬───────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────┐
//! │         xstory-storage (this crate)         │
//! │  • hierarchy: insert, ancestry, delete      │
//! │  • workflow: holds, dispositions, stages    │
//! │  • scheduler: select_next                   │
//! │  • commits: link batches, checkpoint        │
//! └─────────────────┬───────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────┐
//! │         Turso database                      │
//! │  • .claude/data/story-tree.db               │
//! │  • story_nodes, story_paths, story_commits  │
//! │  • metadata, vetting_decisions              │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```no_run
//! use xstory_storage::Database;
//! use xstory_core::NewStory;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut db = Database::open(".claude/data/story-tree.db").await?;
//! db.init_schema().await?;
//!
//! db.create_root(NewStory::new("Product")).await?;
//! let epic = db.insert("root", NewStory::new("User login")).await?;
//! db.approve(epic.as_str()).await?;
//!
//! if let Some(target) = db.select_next().await? {
//!     println!("Expand {} (fill {:.2})", target.id, target.fill_rate);
//! }
//! # Ok(())
//! # }
//! ```

pub mod commits;
pub mod db;
pub mod hierarchy;
pub mod scheduler;
pub mod workflow;

// Re-export commonly used types
pub use commits::{BatchOutcome, CommitLink, LinkBatch, LinkStrength};
pub use db::{
    Database, DbError, ListNodesFilter, Result, FROZEN_SUBTREES, LAST_ANALYZED_COMMIT, LAST_UPDATED,
};
