//! Identifier scheme for orchestrated entities
//!
//! Ids are opaque strings of the form `PREFIX-HASH`, where `PREFIX` is a
//! two-letter tag and `HASH` is 3-8 base-36 characters, optionally followed
//! by up to three `.N` child segments (`el-abc1.2.3`). Parsing is the single
//! validation entry point; everything else in the crate carries ids as the
//! value types defined here.

mod generator;

pub use generator::{
    CollisionCheck, CountingObserver, GenerateOptions, IdEvent, IdGenerator, IdObserver,
    DEFAULT_HASH_LENGTH, MAX_HASH_LENGTH, MAX_NONCE, MIN_HASH_LENGTH,
};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Maximum child-segment depth
pub const MAX_DEPTH: usize = 3;

static ROOT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{2}-[0-9a-z]{3,8}$").expect("root id regex"));

static CHILD_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{2}-[0-9a-z]{3,8}(\.[0-9]+){1,3}$").expect("child id regex"));

/// A validated element identifier, root or hierarchical
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// Parse and validate an id string
    pub fn parse(raw: &str) -> OrchestratorResult<Self> {
        if ROOT_ID_RE.is_match(raw) {
            return Ok(Self(raw.to_string()));
        }
        if CHILD_ID_RE.is_match(raw) {
            // Child indices are positive; the wire pattern alone admits `.0`
            let valid = raw
                .split('.')
                .skip(1)
                .all(|seg| seg.parse::<u32>().map(|n| n >= 1).unwrap_or(false));
            if valid {
                return Ok(Self(raw.to_string()));
            }
        }
        Err(OrchestratorError::validation(format!(
            "invalid element id: {raw:?}"
        )))
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decompose into prefix, hash, and child segments
    pub fn parsed(&self) -> ParsedId {
        let mut parts = self.0.split('.');
        let root = parts.next().expect("validated id has a root part");
        let (prefix, hash) = root.split_once('-').expect("validated id has a dash");
        let segments: Vec<u32> = parts
            .map(|s| s.parse().expect("validated segment is numeric"))
            .collect();
        ParsedId {
            prefix: prefix.to_string(),
            hash: hash.to_string(),
            segments,
        }
    }

    /// Append a child segment, preserving the hierarchy-depth bound
    pub fn child(&self, n: u32) -> OrchestratorResult<ElementId> {
        if n == 0 {
            return Err(OrchestratorError::validation(
                "child index must be a positive integer",
            ));
        }
        let depth = self.parsed().depth();
        if depth >= MAX_DEPTH {
            return Err(OrchestratorError::constraint(format!(
                "cannot nest below depth {MAX_DEPTH}: {}",
                self.0
            )));
        }
        Ok(Self(format!("{}.{n}", self.0)))
    }

    /// Parent id, or `None` for a root
    pub fn parent(&self) -> Option<ElementId> {
        let (rest, _last) = self.0.rsplit_once('.')?;
        Some(Self(rest.to_string()))
    }

    /// Root ancestor (self, for a root id)
    pub fn root(&self) -> ElementId {
        match self.0.split_once('.') {
            Some((root, _)) => Self(root.to_string()),
            None => self.clone(),
        }
    }

    /// Whether `self` sits anywhere below `other` in the hierarchy
    pub fn is_child_of(&self, other: &ElementId) -> bool {
        self.0.len() > other.0.len()
            && self.0.starts_with(other.as_str())
            && self.0.as_bytes()[other.0.len()] == b'.'
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ElementId {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for ElementId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        ElementId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Decomposed view of a validated id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    /// Two-letter tag
    pub prefix: String,
    /// 3-8 base-36 characters
    pub hash: String,
    /// Child indices, outermost first
    pub segments: Vec<u32>,
}

impl ParsedId {
    /// Number of child segments
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Whether this is a root id (no child segments)
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Reassemble the canonical id string
    pub fn canonical(&self) -> String {
        let mut out = format!("{}-{}", self.prefix, self.hash);
        for seg in &self.segments {
            out.push('.');
            out.push_str(&seg.to_string());
        }
        out
    }
}
