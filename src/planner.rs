//! Incremental diff: decide which discovered posts to fetch.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::domain::PostRecord;
use crate::store::MetadataStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Everything published since the bound that is not yet complete,
    /// retrying earlier failures and skips.
    Initial { since: DateTime<Utc> },
    /// Only posts the store has never seen, whatever their date.
    Update,
}

impl Mode {
    /// Lower bound to hand to discovery.
    pub fn since(&self) -> Option<DateTime<Utc>> {
        match self {
            Mode::Initial { since } => Some(*since),
            Mode::Update => None,
        }
    }
}

/// The ordered fetch set: discovery order, no post twice, at most `limit`.
pub fn plan(
    discovered: &[PostRecord],
    store: &MetadataStore,
    mode: Mode,
    limit: Option<usize>,
) -> Vec<PostRecord> {
    let mut seen = HashSet::new();

    discovered
        .iter()
        .filter(|post| seen.insert(post.post_id.clone()))
        .filter(|post| match mode {
            Mode::Initial { since } => {
                post.publish_date >= since && !store.is_complete(&post.post_id)
            }
            Mode::Update => !store.contains(&post.post_id),
        })
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}
