//! Hierarchical story identifiers.
//!
//! Grammar:
//!
//! ```text
//! id      := "root" | ordinal | id "." ordinal     (an id under root has no "root." prefix)
//! ordinal := [1-9][0-9]*
//! ```
//!
//! The id encodes the full ancestor chain, so depth and parent are derivable
//! without touching the store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Literal id of the tree root.
pub const ROOT_ID: &str = "root";

/// A validated story id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoryId(String);

impl StoryId {
    pub fn root() -> Self {
        StoryId(ROOT_ID.to_string())
    }

    /// Parse and validate an id against the grammar.
    pub fn parse(s: &str) -> Result<Self> {
        if s == ROOT_ID {
            return Ok(Self::root());
        }
        if s.is_empty() {
            return Err(Error::InvalidStoryId("empty id".to_string()));
        }
        for segment in s.split('.') {
            parse_ordinal(segment).map_err(|reason| {
                Error::InvalidStoryId(format!("{} ({})", s, reason))
            })?;
        }
        Ok(StoryId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ID
    }

    /// Parent id; `None` only for root.
    pub fn parent(&self) -> Option<StoryId> {
        if self.is_root() {
            return None;
        }
        match self.0.rsplit_once('.') {
            Some((parent, _)) => Some(StoryId(parent.to_string())),
            None => Some(Self::root()),
        }
    }

    /// Number of edges between this id and root.
    pub fn depth(&self) -> i64 {
        if self.is_root() {
            0
        } else {
            self.0.split('.').count() as i64
        }
    }

    /// Last segment as a number; `None` for root.
    pub fn ordinal(&self) -> Option<u64> {
        if self.is_root() {
            return None;
        }
        self.0
            .rsplit('.')
            .next()
            .and_then(|segment| segment.parse().ok())
    }

    /// Id of the `ordinal`-th child of this node.
    pub fn child(&self, ordinal: u64) -> StoryId {
        if self.is_root() {
            StoryId(ordinal.to_string())
        } else {
            StoryId(format!("{}.{}", self.0, ordinal))
        }
    }

    /// Self followed by every ancestor up to root, i.e. ordered by depth
    /// distance from this node.
    pub fn lineage(&self) -> Vec<StoryId> {
        let mut chain = vec![self.clone()];
        let mut current = self.parent();
        while let Some(id) = current {
            current = id.parent();
            chain.push(id);
        }
        chain
    }

    /// Check that this id is a direct child of `parent` under the grammar.
    pub fn ensure_child_of(&self, parent: &StoryId) -> Result<()> {
        match self.parent() {
            Some(ref p) if p == parent => Ok(()),
            _ => Err(Error::InvalidStoryId(format!(
                "{} is not a child id of {}",
                self, parent
            ))),
        }
    }
}

fn parse_ordinal(segment: &str) -> std::result::Result<u64, &'static str> {
    if segment.is_empty() {
        return Err("empty segment");
    }
    if !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err("segment is not a positive integer");
    }
    if segment.starts_with('0') {
        return Err("leading zero or zero ordinal");
    }
    segment.parse::<u64>().map_err(|_| "ordinal out of range")
}

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StoryId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StoryId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<StoryId> for String {
    fn from(id: StoryId) -> Self {
        id.0
    }
}

impl AsRef<str> for StoryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
