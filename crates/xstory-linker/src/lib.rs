//! xstory linker - reconcile commit history against the story tree
//!
//! The caller supplies `(hash, date, message)` tuples, oldest first, from
//! its own log reader; this crate never opens a repository. Each run:
//!
//! 1. resumes after the stored checkpoint, or scans a trailing window when
//!    the checkpoint is missing or no longer in the supplied history
//! 2. scores each new commit against every active story by keyword Jaccard
//!    similarity
//! 3. records strong and potential matches, moves strongly matched
//!    executing stories to reviewing, and stores the last supplied hash as
//!    the checkpoint, all in one transaction
//!
//! # Example
//!
//! ```no_run
//! use xstory_core::XstoryConfig;
//! use xstory_linker::{CommitLinker, CommitTuple, LinkerContext};
//! use xstory_storage::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = XstoryConfig::default();
//! let mut db = Database::open(".claude/data/story-tree.db").await?;
//!
//! let ctx = LinkerContext::load(&db, &config).await?;
//! let commits = vec![CommitTuple::new(
//!     "9f2c1e0",
//!     "2026-03-01T12:00:00+00:00",
//!     "login story auth flow",
//! )];
//! let stats = CommitLinker::new(ctx).reconcile(&mut db, &commits).await?;
//! println!("linked {} commits", stats.total_linked());
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod linker;
pub mod matcher;

pub use context::{parse_commit_date, CommitTuple, FallbackReason, LinkerContext};
pub use linker::{preview, CommitLinker, LinkStats};
pub use matcher::{classify, Match, StoryMatcher};

/// Linker errors
#[derive(Debug, thiserror::Error)]
pub enum LinkerError {
    #[error("storage error: {0}")]
    Storage(#[from] xstory_storage::DbError),

    #[error(transparent)]
    Core(#[from] xstory_core::Error),
}

pub type Result<T> = std::result::Result<T, LinkerError>;
