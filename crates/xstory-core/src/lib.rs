//! Core types and pure algorithms for the xstory backlog tree.
//!
//! This crate has no I/O. It defines the story model, the id grammar, the
//! workflow transition function, capacity-based target selection and the
//! keyword matching used to link commits to stories.

pub mod config;
pub mod error;
pub mod id;
pub mod keywords;
pub mod scheduler;
pub mod types;
pub mod workflow;

pub use config::XstoryConfig;
pub use error::{Error, Result};
pub use id::{StoryId, ROOT_ID};

// Re-export main types for convenience
pub use types::{
    CommitRecord, Disposition, HoldReason, HoldResolution, NewStory, PathEdge, Stage, StoryNode,
    VettingDecision, VettingOutcome, WorkflowState,
};

pub use keywords::{concept_signature, extract_keywords, jaccard, KeywordExtractor};
pub use scheduler::{Candidate, NodeLoad, SchedulerOptions};
pub use workflow::{transition, Effect, WorkflowEvent};
