//! Prefix-relative diffing of two key collections.
//!
//! # Algorithm
//!
//! Both collections are re-keyed by their suffix relative to their own prefix.
//! Then:
//!
//! 1. Every destination suffix with no source counterpart is a deletion.
//! 2. Every source suffix that is missing from the destination, or present with
//!    a different value, is an upsert.
//!
//! Only values are compared. Store metadata never causes an upsert. A key that
//! does not start with its side's prefix has no suffix and is left out. The
//! result depends on membership alone, so map iteration order does not matter.

use crate::RangeKey;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// All entries of one side of a reconciliation, keyed by full key.
pub type KeyCollection = HashMap<String, RangeKey>;

/// Changes that turn a destination prefix into a copy of a source prefix.
///
/// Keys are suffixes relative to the prefix of each side. A suffix is never
/// both upserted and deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeysDiff {
    /// Suffix to the value that must exist at `prefix + suffix`
    pub upserts: BTreeMap<String, Vec<u8>>,
    /// Suffixes to remove
    pub deletions: BTreeSet<String>,
}

impl KeysDiff {
    /// Create an empty diff.
    pub fn new() -> Self {
        Self::default()
    }

    /// No changes needed; the destination already matches.
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletions.is_empty()
    }

    /// Total number of changes.
    pub fn len(&self) -> usize {
        self.upserts.len() + self.deletions.len()
    }
}

/// Re-key `collection` by suffix, skipping keys outside `prefix`.
fn by_suffix<'a>(collection: &'a KeyCollection, prefix: &str) -> HashMap<&'a str, &'a RangeKey> {
    collection
        .iter()
        .filter_map(|(key, entry)| Some((key.strip_prefix(prefix)?, entry)))
        .collect()
}

/// Compute the diff that makes `dst` under `dst_prefix` mirror `src` under
/// `src_prefix`.
pub fn compute_diff(
    src: &KeyCollection,
    src_prefix: &str,
    dst: &KeyCollection,
    dst_prefix: &str,
) -> KeysDiff {
    let src_by_suffix = by_suffix(src, src_prefix);
    let dst_by_suffix = by_suffix(dst, dst_prefix);

    let mut diff = KeysDiff::new();

    for suffix in dst_by_suffix.keys() {
        if !src_by_suffix.contains_key(suffix) {
            diff.deletions.insert((*suffix).to_string());
        }
    }

    for (suffix, src_entry) in &src_by_suffix {
        let unchanged = dst_by_suffix
            .get(suffix)
            .is_some_and(|dst_entry| dst_entry.value == src_entry.value);
        if !unchanged {
            diff.upserts
                .insert((*suffix).to_string(), src_entry.value.clone());
        }
    }

    diff
}

/// Build a collection from `(key, value)` pairs without store metadata.
pub fn collection_from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> KeyCollection
where
    K: Into<String>,
    V: Into<Vec<u8>>,
{
    pairs
        .into_iter()
        .map(|(key, value)| {
            let entry = RangeKey::detached(key, value);
            (entry.key.clone(), entry)
        })
        .collect()
}
