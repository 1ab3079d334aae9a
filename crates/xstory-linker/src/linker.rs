//! The reconciliation run.
//!
//! A run resolves the commit range from the checkpoint, classifies each new
//! commit against the active stories and hands the whole result to the store
//! as one batch, so the checkpoint only moves together with the records it
//! covers.
//!
//! Commits are supplied oldest first, as `git log --reverse` prints them.
//! The checkpoint is located in that order; only the commits after it are
//! sorted by date for processing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use xstory_core::{CommitRecord, StoryId};
use xstory_storage::{CommitLink, Database, LinkBatch, LinkStrength};

use crate::context::{CommitTuple, FallbackReason, LinkerContext};
use crate::matcher::{classify, StoryMatcher};
use crate::Result;

/// Summary of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkStats {
    /// Commits inside the resolved range
    pub processed: usize,
    pub strong: usize,
    pub potential: usize,
    /// Commits below the potential threshold
    pub unmatched: usize,
    /// Commits already recorded by an earlier run
    pub duplicates: usize,
    /// Commits dropped for a bad hash or date, no keywords, or a missing or disposed story
    pub skipped: usize,
    /// Stories moved from executing to reviewing
    pub advanced: Vec<StoryId>,
    /// Set when the run scanned the trailing window instead of resuming
    pub fallback: Option<FallbackReason>,
    /// Checkpoint stored by this run
    pub checkpoint: Option<String>,
}

impl LinkStats {
    pub fn total_linked(&self) -> usize {
        self.strong + self.potential
    }
}

/// A commit with a usable hash and date.
#[derive(Debug, Clone)]
pub(crate) struct DatedCommit {
    pub hash: String,
    pub date: DateTime<Utc>,
    pub message: String,
}

/// Commits with a usable hash and date, in input order, and how many were
/// dropped.
pub(crate) fn usable_commits(commits: &[CommitTuple]) -> (Vec<DatedCommit>, usize) {
    let mut dated = Vec::with_capacity(commits.len());
    let mut rejected = 0;
    for commit in commits {
        let hash = commit.hash.trim();
        match commit.parsed_date() {
            Some(date) if !hash.is_empty() => dated.push(DatedCommit {
                hash: hash.to_string(),
                date,
                message: commit.message.clone(),
            }),
            _ => {
                warn!(
                    "Skipping commit {:?} with unusable hash or date {:?}",
                    commit.hash, commit.date
                );
                rejected += 1;
            }
        }
    }
    (dated, rejected)
}

/// The commits of `history` this run must process, in chronological order.
///
/// The checkpoint is found by position in `history`, so a commit dated
/// earlier than the checkpoint but supplied after it is still processed.
/// Same-instant commits keep input order.
pub(crate) fn resolve_range<'a>(
    history: &'a [DatedCommit],
    ctx: &LinkerContext,
) -> (Vec<&'a DatedCommit>, Option<FallbackReason>) {
    let (mut range, fallback): (Vec<&DatedCommit>, _) = if ctx.full_rescan {
        (history.iter().collect(), Some(FallbackReason::FullRescan))
    } else {
        let position = ctx
            .checkpoint
            .as_ref()
            .and_then(|checkpoint| history.iter().rposition(|c| &c.hash == checkpoint));
        match position {
            Some(index) => (history[index + 1..].iter().collect(), None),
            None => {
                let reason = match &ctx.checkpoint {
                    Some(hash) => FallbackReason::CheckpointNotInHistory(hash.clone()),
                    None => FallbackReason::NoCheckpoint,
                };
                let start = ctx.window_start();
                let in_window = history.iter().filter(|c| c.date >= start).collect();
                (in_window, Some(reason))
            }
        }
    };
    range.sort_by_key(|c| c.date);
    (range, fallback)
}

/// CommitLinker reconciles commit history against the story tree.
#[derive(Debug, Clone)]
pub struct CommitLinker {
    ctx: LinkerContext,
}

impl CommitLinker {
    pub fn new(ctx: LinkerContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &LinkerContext {
        &self.ctx
    }

    /// Reconcile `commits` against the active stories in `db`.
    ///
    /// Records and the new checkpoint are written in one transaction; an
    /// error leaves the store as it was.
    pub async fn reconcile(&self, db: &mut Database, commits: &[CommitTuple]) -> Result<LinkStats> {
        let ctx = &self.ctx;
        let mut stats = LinkStats::default();

        let (history, rejected) = usable_commits(commits);
        stats.skipped += rejected;

        let (range, fallback) = resolve_range(&history, ctx);
        if let Some(reason) = &fallback {
            match reason {
                FallbackReason::FullRescan => info!("Full rescan of {} commits", range.len()),
                _ => warn!(
                    "Falling back to a {}-day window scan: {}",
                    ctx.fallback_window.num_days(),
                    reason
                ),
            }
        }
        stats.fallback = fallback;
        stats.processed = range.len();

        let nodes = db.active_nodes().await?;
        let matcher = StoryMatcher::new(&nodes, &ctx.extractor);
        debug!(
            "Matching {} commits against {} stories",
            range.len(),
            matcher.len()
        );

        let known = db.known_commit_hashes().await?;
        let mut seen: HashSet<&str> = HashSet::new();
        let mut links = Vec::new();

        for commit in range {
            if known.contains(&commit.hash) || !seen.insert(commit.hash.as_str()) {
                stats.duplicates += 1;
                continue;
            }

            let keywords = ctx.extractor.extract(&commit.message);
            if keywords.is_empty() {
                warn!("Skipping commit {}: no keywords in message", commit.hash);
                stats.skipped += 1;
                continue;
            }

            let Some(best) = matcher.best_match(&keywords) else {
                stats.unmatched += 1;
                continue;
            };
            let Some(strength) = classify(best.similarity, ctx.strong_threshold, ctx.potential_threshold)
            else {
                debug!(
                    "Commit {} below threshold ({} at {:.2})",
                    commit.hash, best.id, best.similarity
                );
                stats.unmatched += 1;
                continue;
            };

            links.push(CommitLink {
                record: CommitRecord {
                    story_id: best.id,
                    commit_hash: commit.hash.clone(),
                    commit_date: commit.date,
                    commit_message: commit.message.clone(),
                },
                strength,
                similarity: best.similarity,
            });
        }

        // Last supplied commit, even when it fell outside the window
        let checkpoint = history.last().map(|c| c.hash.clone());
        let outcome = db
            .apply_link_batch(LinkBatch {
                links,
                checkpoint: checkpoint.clone(),
            })
            .await?;

        stats.strong = outcome.strong;
        stats.potential = outcome.potential;
        stats.duplicates += outcome.duplicates;
        stats.skipped += outcome.skipped;
        stats.advanced = outcome.advanced;
        stats.checkpoint = checkpoint;

        info!(
            "Reconciled {} commits: {} strong, {} potential, {} unmatched, {} duplicate, {} skipped",
            stats.processed,
            stats.strong,
            stats.potential,
            stats.unmatched,
            stats.duplicates,
            stats.skipped
        );
        Ok(stats)
    }
}

/// Classify a commit message without touching the store.
pub fn preview(
    nodes: &[xstory_core::StoryNode],
    message: &str,
    ctx: &LinkerContext,
) -> Option<(StoryId, LinkStrength, f64)> {
    let matcher = StoryMatcher::new(nodes, &ctx.extractor);
    let best = matcher.best_match(&ctx.extractor.extract(message))?;
    let strength = classify(best.similarity, ctx.strong_threshold, ctx.potential_threshold)?;
    Some((best.id, strength, best.similarity))
}
