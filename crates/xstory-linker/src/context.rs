//! Run inputs: commit tuples and the per-run linker context.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use xstory_core::{KeywordExtractor, XstoryConfig};
use xstory_storage::Database;

use crate::Result;

/// One commit as supplied by the caller's log reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTuple {
    pub hash: String,
    /// RFC 3339 (`git log --format=%aI`) or `git log --format=%ai` style
    pub date: String,
    pub message: String,
}

impl CommitTuple {
    pub fn new(
        hash: impl Into<String>,
        date: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            hash: hash.into(),
            date: date.into(),
            message: message.into(),
        }
    }

    /// Parsed commit date in UTC, if the date string is understood.
    pub fn parsed_date(&self) -> Option<DateTime<Utc>> {
        parse_commit_date(&self.date)
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS +ZZZZ` and naive `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn parse_commit_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::<FixedOffset>::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Why a run scanned the trailing window instead of resuming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// No checkpoint has been stored yet
    NoCheckpoint,
    /// The stored checkpoint is absent from the supplied history
    CheckpointNotInHistory(String),
    /// The caller asked for a full rescan
    FullRescan,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NoCheckpoint => write!(f, "no checkpoint"),
            FallbackReason::CheckpointNotInHistory(hash) => {
                write!(f, "checkpoint {} not in supplied history", hash)
            }
            FallbackReason::FullRescan => write!(f, "full rescan requested"),
        }
    }
}

/// Everything a run needs besides the store and the commits.
#[derive(Debug, Clone)]
pub struct LinkerContext {
    /// Hash of the newest commit reconciled by an earlier run
    pub checkpoint: Option<String>,
    /// Ignore the checkpoint and process every supplied commit
    pub full_rescan: bool,
    /// Reference time for the fallback window
    pub now: DateTime<Utc>,
    pub fallback_window: Duration,
    pub strong_threshold: f64,
    pub potential_threshold: f64,
    pub extractor: KeywordExtractor,
}

impl Default for LinkerContext {
    fn default() -> Self {
        Self::from_config(&XstoryConfig::default())
    }
}

impl LinkerContext {
    /// Context from configuration with no checkpoint.
    pub fn from_config(config: &XstoryConfig) -> Self {
        Self {
            checkpoint: None,
            full_rescan: false,
            now: Utc::now(),
            fallback_window: Duration::days(config.linker.fallback_window_days),
            strong_threshold: config.linker.strong_threshold,
            potential_threshold: config.linker.potential_threshold,
            extractor: config.keyword_extractor(),
        }
    }

    /// Context from configuration with the store's current checkpoint.
    pub async fn load(db: &Database, config: &XstoryConfig) -> Result<Self> {
        let mut ctx = Self::from_config(config);
        ctx.checkpoint = db.checkpoint().await?;
        Ok(ctx)
    }

    pub fn with_checkpoint(mut self, checkpoint: impl Into<String>) -> Self {
        self.checkpoint = Some(checkpoint.into());
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn with_full_rescan(mut self) -> Self {
        self.full_rescan = true;
        self
    }

    /// Oldest commit date admitted by a window scan.
    pub fn window_start(&self) -> DateTime<Utc> {
        self.now - self.fallback_window
    }
}
