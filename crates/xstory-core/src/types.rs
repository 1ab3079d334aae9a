//! Core data structures for the story tree.
//!
//! A story node carries three independent workflow fields: an ordered
//! `Stage`, an optional `HoldReason` and an optional terminal `Disposition`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::id::StoryId;
use crate::{Error, Result};

/// StoryNode is a unit of hierarchical backlog work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryNode {
    // ===== Identification =====
    pub id: StoryId,

    // ===== Content =====
    pub title: String,
    pub description: String,

    // ===== Scheduling =====
    /// Persisted capacity; refreshed whenever a child changes stage.
    pub capacity: i64,

    // ===== Workflow =====
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_reason: Option<HoldReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<Disposition>,
    pub human_review: bool,

    // ===== Ownership =====
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,

    // ===== Timestamps =====
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_implemented: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoryNode {
    /// Active nodes have no disposition.
    pub fn is_active(&self) -> bool {
        self.disposition.is_none()
    }

    pub fn is_held(&self) -> bool {
        self.hold_reason.is_some()
    }

    pub fn workflow(&self) -> WorkflowState {
        WorkflowState {
            stage: self.stage,
            hold_reason: self.hold_reason,
            disposition: self.disposition,
        }
    }

    /// Concept nodes flagged conflicted or duplicative may be removed outright.
    pub fn is_deletable_state(&self) -> bool {
        self.stage == Stage::Concept
            && (self.hold_reason == Some(HoldReason::Conflicted)
                || self.disposition == Some(Disposition::Duplicative))
    }
}

/// Snapshot of the three workflow axes of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub stage: Stage,
    pub hold_reason: Option<HoldReason>,
    pub disposition: Option<Disposition>,
}

impl WorkflowState {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            hold_reason: None,
            disposition: None,
        }
    }
}

/// NewStory holds caller-supplied fields for a node insertion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewStory {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stage: Stage,
    #[serde(default)]
    pub human_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
}

impl NewStory {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_human_review(mut self, human_review: bool) -> Self {
        self.human_review = human_review;
        self
    }

    pub fn with_project_path(mut self, path: impl Into<String>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    /// Validate checks the caller-supplied fields.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidValue {
                field: "title",
                value: "title is required".to_string(),
            });
        }
        if self.title.len() > 500 {
            return Err(Error::InvalidValue {
                field: "title",
                value: format!("title must be 500 characters or less (got {})", self.title.len()),
            });
        }
        Ok(())
    }
}

/// Stage is the ordered, forward-only workflow phase of a node.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Concept,
    Planning,
    Executing,
    Reviewing,
    Verifying,
    Implemented,
    Ready,
    Released,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Concept,
        Stage::Planning,
        Stage::Executing,
        Stage::Reviewing,
        Stage::Verifying,
        Stage::Implemented,
        Stage::Ready,
        Stage::Released,
    ];

    /// The following stage, `None` at released.
    pub fn next(self) -> Option<Stage> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    /// Implemented, ready and released children count toward parent capacity.
    pub fn is_completed(self) -> bool {
        self >= Stage::Implemented
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Concept => "concept",
            Stage::Planning => "planning",
            Stage::Executing => "executing",
            Stage::Reviewing => "reviewing",
            Stage::Verifying => "verifying",
            Stage::Implemented => "implemented",
            Stage::Ready => "ready",
            Stage::Released => "released",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| Error::InvalidValue {
                field: "stage",
                value: s.to_string(),
            })
    }
}

/// HoldReason is a non-terminal condition gating stage advancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    Broken,
    Conflicted,
    Blocked,
    Escalated,
    Paused,
    Polish,
    Queued,
    Wishlisted,
}

impl HoldReason {
    pub const ALL: [HoldReason; 8] = [
        HoldReason::Broken,
        HoldReason::Conflicted,
        HoldReason::Blocked,
        HoldReason::Escalated,
        HoldReason::Paused,
        HoldReason::Polish,
        HoldReason::Queued,
        HoldReason::Wishlisted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HoldReason::Broken => "broken",
            HoldReason::Conflicted => "conflicted",
            HoldReason::Blocked => "blocked",
            HoldReason::Escalated => "escalated",
            HoldReason::Paused => "paused",
            HoldReason::Polish => "polish",
            HoldReason::Queued => "queued",
            HoldReason::Wishlisted => "wishlisted",
        }
    }

    /// How callers are expected to resolve this hold at the given stage.
    /// Informative only; the store does not enforce it.
    pub fn resolution(self, stage: Stage) -> HoldResolution {
        match (stage, self) {
            (Stage::Concept, HoldReason::Escalated) => HoldResolution::HumanAdjudication,
            (Stage::Concept, HoldReason::Conflicted) => HoldResolution::Delete,
            (Stage::Planning, HoldReason::Blocked) => HoldResolution::SpawnDependencies,
            (Stage::Planning, HoldReason::Queued) => HoldResolution::AwaitPrerequisites,
            (Stage::Planning, HoldReason::Polish) => HoldResolution::Refine,
            _ => HoldResolution::Clear,
        }
    }
}

impl fmt::Display for HoldReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HoldReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|hold| hold.as_str() == s)
            .ok_or_else(|| Error::InvalidValue {
                field: "hold_reason",
                value: s.to_string(),
            })
    }
}

/// Per-stage contract for resolving a hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldResolution {
    /// A human must adjudicate before the hold may clear.
    HumanAdjudication,
    /// The node is removed instead of cleared.
    Delete,
    /// Third-party dependency: spawn dependency child nodes.
    SpawnDependencies,
    /// Clears once all prerequisite stories reach implemented or later.
    AwaitPrerequisites,
    /// Loops through a refine step before re-entering review.
    Refine,
    /// Generic: clear once the condition is gone.
    Clear,
}

/// Disposition is a terminal classification removing a node from the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Infeasible,
    Rejected,
    Duplicative,
    Deprecated,
    Legacy,
    Archived,
}

impl Disposition {
    pub const ALL: [Disposition; 6] = [
        Disposition::Infeasible,
        Disposition::Rejected,
        Disposition::Duplicative,
        Disposition::Deprecated,
        Disposition::Legacy,
        Disposition::Archived,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Infeasible => "infeasible",
            Disposition::Rejected => "rejected",
            Disposition::Duplicative => "duplicative",
            Disposition::Deprecated => "deprecated",
            Disposition::Legacy => "legacy",
            Disposition::Archived => "archived",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Disposition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| Error::InvalidValue {
                field: "disposition",
                value: s.to_string(),
            })
    }
}

/// PathEdge is one row of the closure relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathEdge {
    pub ancestor_id: String,
    pub descendant_id: String,
    pub depth: i64,
}

impl PathEdge {
    pub fn new(ancestor: impl Into<String>, descendant: impl Into<String>, depth: i64) -> Self {
        Self {
            ancestor_id: ancestor.into(),
            descendant_id: descendant.into(),
            depth,
        }
    }

    pub fn is_self_edge(&self) -> bool {
        self.depth == 0 && self.ancestor_id == self.descendant_id
    }
}

/// CommitRecord links one commit to the story it implements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub story_id: StoryId,
    pub commit_hash: String,
    pub commit_date: DateTime<Utc>,
    pub commit_message: String,
}

/// VettingDecision remembers how a concept signature was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VettingDecision {
    pub signature: String,
    pub decision: VettingOutcome,
}

/// Resolution recorded for a vetted concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VettingOutcome {
    Accepted,
    Rejected,
    DuplicateOf(StoryId),
}

impl fmt::Display for VettingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VettingOutcome::Accepted => write!(f, "accepted"),
            VettingOutcome::Rejected => write!(f, "rejected"),
            VettingOutcome::DuplicateOf(id) => write!(f, "duplicate_of:{}", id),
        }
    }
}

impl FromStr for VettingOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "accepted" => Ok(VettingOutcome::Accepted),
            "rejected" => Ok(VettingOutcome::Rejected),
            other => match other.strip_prefix("duplicate_of:") {
                Some(id) => Ok(VettingOutcome::DuplicateOf(StoryId::parse(id)?)),
                None => Err(Error::InvalidValue {
                    field: "decision",
                    value: other.to_string(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_next() {
        assert!(Stage::Concept < Stage::Planning);
        assert!(Stage::Ready < Stage::Released);
        assert_eq!(Stage::Concept.next(), Some(Stage::Planning));
        assert_eq!(Stage::Verifying.next(), Some(Stage::Implemented));
        assert_eq!(Stage::Released.next(), None);
    }

    #[test]
    fn test_stage_completed() {
        assert!(!Stage::Verifying.is_completed());
        assert!(Stage::Implemented.is_completed());
        assert!(Stage::Ready.is_completed());
        assert!(Stage::Released.is_completed());
    }

    #[test]
    fn test_text_forms_parse_back() {
        for stage in Stage::ALL {
            assert_eq!(stage.to_string().parse::<Stage>().unwrap(), stage);
        }
        for hold in HoldReason::ALL {
            assert_eq!(hold.as_str().parse::<HoldReason>().unwrap(), hold);
        }
        for d in Disposition::ALL {
            assert_eq!(d.as_str().parse::<Disposition>().unwrap(), d);
        }
        assert!("approved".parse::<Stage>().is_err());
        assert!("none".parse::<HoldReason>().is_err());
    }

    #[test]
    fn test_hold_resolution_contracts() {
        assert_eq!(
            HoldReason::Escalated.resolution(Stage::Concept),
            HoldResolution::HumanAdjudication
        );
        assert_eq!(HoldReason::Conflicted.resolution(Stage::Concept), HoldResolution::Delete);
        assert_eq!(
            HoldReason::Blocked.resolution(Stage::Planning),
            HoldResolution::SpawnDependencies
        );
        assert_eq!(
            HoldReason::Queued.resolution(Stage::Planning),
            HoldResolution::AwaitPrerequisites
        );
        assert_eq!(HoldReason::Polish.resolution(Stage::Planning), HoldResolution::Refine);
        assert_eq!(HoldReason::Queued.resolution(Stage::Verifying), HoldResolution::Clear);
    }

    #[test]
    fn test_vetting_outcome_text() {
        let dup = VettingOutcome::DuplicateOf(StoryId::parse("1.3").unwrap());
        assert_eq!(dup.to_string(), "duplicate_of:1.3");
        assert_eq!("duplicate_of:1.3".parse::<VettingOutcome>().unwrap(), dup);
        assert_eq!("accepted".parse::<VettingOutcome>().unwrap(), VettingOutcome::Accepted);
        assert!("maybe".parse::<VettingOutcome>().is_err());
    }

    #[test]
    fn test_new_story_validation() {
        assert!(NewStory::new("Login flow").validate().is_ok());
        assert!(NewStory::new("   ").validate().is_err());
        assert!(NewStory::new("x".repeat(501)).validate().is_err());
    }
}
