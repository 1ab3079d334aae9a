//! Commit link records and the atomic reconciliation write.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};
use turso::{params, Connection};
use xstory_core::{CommitRecord, Stage, StoryId, WorkflowEvent};

use crate::db::{
    count, ensure_writable, fetch_node, finish_tx, first_row, parse_timestamp, store_workflow,
    write_metadata, Database, DbError, Result, LAST_ANALYZED_COMMIT, LAST_UPDATED,
};
use crate::workflow::apply_event_tx;

/// How confidently a commit matches a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStrength {
    /// The commit implements the story
    Strong,
    /// The commit is related to the story
    Potential,
}

impl fmt::Display for LinkStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStrength::Strong => write!(f, "strong"),
            LinkStrength::Potential => write!(f, "potential"),
        }
    }
}

/// A classified commit ready to be recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitLink {
    pub record: CommitRecord,
    pub strength: LinkStrength,
    pub similarity: f64,
}

/// Links plus the checkpoint to store with them.
#[derive(Debug, Clone, Default)]
pub struct LinkBatch {
    pub links: Vec<CommitLink>,
    /// Newest processed commit hash; `None` leaves the checkpoint untouched
    pub checkpoint: Option<String>,
}

/// What happened when a batch was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub strong: usize,
    pub potential: usize,
    /// Hashes already recorded
    pub duplicates: usize,
    /// Links whose story is missing or disposed
    pub skipped: usize,
    /// Stories moved from executing to reviewing
    pub advanced: Vec<StoryId>,
}

impl BatchOutcome {
    pub fn recorded(&self) -> usize {
        self.strong + self.potential
    }
}

impl Database {
    /// Record a batch of links and the checkpoint in one transaction.
    ///
    /// A strong link stamps the story's `last_implemented` with the commit
    /// date and moves an unheld executing story to reviewing. Hashes already
    /// present are counted as duplicates and change nothing. Released stories
    /// keep the record but are not modified.
    ///
    /// A link into a frozen subtree fails the whole batch with
    /// `IntegrityViolation`; nothing is recorded and the checkpoint stays put.
    pub async fn apply_link_batch(&mut self, batch: LinkBatch) -> Result<BatchOutcome> {
        let base_capacity = self.options.base_capacity;

        let tx = self.conn.transaction().await?;
        let result = async {
            let mut outcome = BatchOutcome::default();
            let now = Utc::now();

            for link in &batch.links {
                let record = &link.record;
                if commit_exists(&tx, &record.commit_hash).await? {
                    outcome.duplicates += 1;
                    continue;
                }
                ensure_writable(&tx, &record.story_id).await?;
                let Some(mut node) = fetch_node(&tx, record.story_id.as_str()).await? else {
                    warn!(
                        "Skipping commit {}: story {} not found",
                        record.commit_hash, record.story_id
                    );
                    outcome.skipped += 1;
                    continue;
                };
                if node.disposition.is_some() {
                    debug!(
                        "Skipping commit {}: story {} is disposed",
                        record.commit_hash, record.story_id
                    );
                    outcome.skipped += 1;
                    continue;
                }

                insert_commit(&tx, record).await?;

                match link.strength {
                    LinkStrength::Potential => outcome.potential += 1,
                    LinkStrength::Strong if node.stage == Stage::Released => {
                        outcome.strong += 1;
                        debug!(
                            "Story {} is released; recorded {} without touching it",
                            record.story_id, record.commit_hash
                        );
                    }
                    LinkStrength::Strong => {
                        outcome.strong += 1;
                        node.last_implemented = Some(match node.last_implemented {
                            Some(existing) => existing.max(record.commit_date),
                            None => record.commit_date,
                        });
                        node.updated_at = now;

                        if node.stage == Stage::Executing && node.hold_reason.is_none() {
                            let (advanced, _) =
                                apply_event_tx(&tx, node, WorkflowEvent::Advance, base_capacity, now)
                                    .await?;
                            outcome.advanced.push(advanced.id);
                        } else {
                            store_workflow(&tx, &node).await?;
                        }
                    }
                }
                debug!(
                    "Linked {} to {} ({}, {:.2})",
                    record.commit_hash, record.story_id, link.strength, link.similarity
                );
            }

            if let Some(checkpoint) = &batch.checkpoint {
                write_metadata(&tx, LAST_ANALYZED_COMMIT, checkpoint).await?;
                write_metadata(&tx, LAST_UPDATED, &now.to_rfc3339()).await?;
            }
            Ok::<_, DbError>(outcome)
        }
        .await;
        let outcome = finish_tx!(tx, result)?;

        info!(
            "Recorded {} commit link(s): {} strong, {} potential, {} duplicate, {} skipped",
            outcome.recorded(),
            outcome.strong,
            outcome.potential,
            outcome.duplicates,
            outcome.skipped
        );
        Ok(outcome)
    }

    /// Commits linked to `id`, oldest first.
    pub async fn commits_for(&self, id: &str) -> Result<Vec<CommitRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT story_id, commit_hash, commit_date, commit_message FROM story_commits
                 WHERE story_id = ? ORDER BY commit_date ASC, commit_hash ASC",
                params![id],
            )
            .await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(parse_commit_row(&row)?);
        }
        Ok(records)
    }

    pub async fn commit_count(&self) -> Result<i64> {
        count(&self.conn, "SELECT COUNT(*) FROM story_commits").await
    }

    pub async fn has_commit(&self, hash: &str) -> Result<bool> {
        commit_exists(&self.conn, hash).await
    }

    /// Every recorded commit hash.
    pub async fn known_commit_hashes(&self) -> Result<HashSet<String>> {
        let mut rows = self
            .conn
            .query("SELECT commit_hash FROM story_commits", params![])
            .await?;
        let mut hashes = HashSet::new();
        while let Some(row) = rows.next().await? {
            hashes.insert(row.get(0)?);
        }
        Ok(hashes)
    }
}

async fn commit_exists(conn: &Connection, hash: &str) -> Result<bool> {
    let rows = conn
        .query(
            "SELECT 1 FROM story_commits WHERE commit_hash = ?",
            params![hash],
        )
        .await?;
    Ok(first_row(rows).await?.is_some())
}

async fn insert_commit(conn: &Connection, record: &CommitRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO story_commits (story_id, commit_hash, commit_date, commit_message)
        VALUES (?, ?, ?, ?)
        "#,
        params![
            record.story_id.as_str(),
            record.commit_hash.clone(),
            record.commit_date.to_rfc3339(),
            record.commit_message.clone(),
        ],
    )
    .await?;
    Ok(())
}

fn parse_commit_row(row: &turso::Row) -> Result<CommitRecord> {
    let story_id: String = row.get(0)?;
    let commit_date: String = row.get(2)?;
    Ok(CommitRecord {
        story_id: StoryId::parse(&story_id)?,
        commit_hash: row.get(1)?,
        commit_date: parse_timestamp("commit_date", &commit_date)?,
        commit_message: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_recorded_total() {
        let outcome = BatchOutcome {
            strong: 2,
            potential: 3,
            duplicates: 1,
            ..Default::default()
        };
        assert_eq!(outcome.recorded(), 5);
        assert_eq!(LinkStrength::Potential.to_string(), "potential");
    }
}
