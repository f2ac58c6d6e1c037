use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

use crate::store::{Challenge, Tag};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlagError {
    #[error("Tag already exists: {0}")]
    TagExists(Tag),
    #[error("Unknown flag tag: {0}")]
    UnknownTag(Tag),
}

#[derive(Debug, Clone)]
pub enum FlagSource {
    /// Literal flag string the upstream checks.
    Static(String),
    /// Name of an environment variable the upstream reads at startup.
    Env(String),
}

#[derive(Debug, Clone)]
pub struct FlagConfig {
    pub tag: Tag,
    pub source: FlagSource,
}

struct PoolEntry {
    value: String,
    points: u32,
}

/// Maps challenge tags to the flag value the upstream actually accepts.
/// Populated at event start, read-only afterwards.
pub struct FlagPool {
    entries: Mutex<HashMap<Tag, PoolEntry>>,
}

impl FlagPool {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a flag and returns the value the upstream will check.
    /// Env-sourced flags snapshot the variable at call time; the upstream
    /// reads the same variable when it boots.
    pub fn add_flag(&self, cfg: FlagConfig, points: u32) -> Result<String, FlagError> {
        let value = match &cfg.source {
            FlagSource::Static(s) => s.clone(),
            FlagSource::Env(name) => std::env::var(name).unwrap_or_default(),
        };

        let mut entries = self.entries.lock();
        if entries.contains_key(&cfg.tag) {
            return Err(FlagError::TagExists(cfg.tag));
        }

        entries.insert(
            cfg.tag,
            PoolEntry {
                value: value.clone(),
                points,
            },
        );

        Ok(value)
    }

    pub fn flag_by_tag(&self, tag: &Tag) -> Result<String, FlagError> {
        self.entries
            .lock()
            .get(tag)
            .map(|e| e.value.clone())
            .ok_or_else(|| FlagError::UnknownTag(tag.clone()))
    }

    pub fn points_by_tag(&self, tag: &Tag) -> Result<u32, FlagError> {
        self.entries
            .lock()
            .get(tag)
            .map(|e| e.points)
            .ok_or_else(|| FlagError::UnknownTag(tag.clone()))
    }

    /// Default challenge set for a fresh team: one uncompleted challenge
    /// per pool entry, valued at what the upstream accepts.
    pub fn challenges(&self) -> Vec<Challenge> {
        let entries = self.entries.lock();
        let mut challenges: Vec<Challenge> = entries
            .iter()
            .map(|(tag, entry)| Challenge::new(tag.clone(), &entry.value))
            .collect();
        challenges.sort_by(|a, b| a.tag.as_str().cmp(b.tag.as_str()));

        challenges
    }
}

impl Default for FlagPool {
    fn default() -> Self {
        Self::new()
    }
}
