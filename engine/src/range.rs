//! Key and range types for addressing slices of the keyspace.
//!
//! Keys are ordered by their raw bytes. A [`KeyRange`] is the half-open
//! interval `[key, range_end)`; an empty `range_end` reaches to the end of the
//! keyspace.
//!
//! Values are opaque bytes. Keys are UTF-8 since they double as file paths on
//! the directory side.

use crate::{error::Result, Error};
use std::fmt;

/// One key in the store, as returned by a range read.
///
/// Only `value` takes part in diffing. The remaining fields are assigned by the
/// store and are informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeKey {
    pub key: String,
    pub value: Vec<u8>,
    pub version: i64,
    pub create_revision: i64,
    pub mod_revision: i64,
    pub lease: i64,
}

impl RangeKey {
    /// A key with no store metadata, e.g. a file read from a directory.
    pub fn detached(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            version: 0,
            create_revision: 0,
            mod_revision: 0,
            lease: 0,
        }
    }
}

/// Half-open interval `[key, range_end)` over the keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyRange {
    pub key: Vec<u8>,
    pub range_end: Vec<u8>,
}

impl KeyRange {
    /// Create a range from explicit bounds.
    pub fn new(key: impl Into<Vec<u8>>, range_end: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            range_end: range_end.into(),
        }
    }

    /// The range holding exactly the keys that start with `prefix`.
    pub fn prefix(prefix: &str) -> Result<Self> {
        Ok(Self {
            key: prefix.as_bytes().to_vec(),
            range_end: prefix_range_end(prefix.as_bytes())?,
        })
    }

    /// Whether the range runs to the end of the keyspace.
    pub fn is_unbounded(&self) -> bool {
        self.range_end.is_empty()
    }

    /// Check whether `key` falls inside the range.
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.key.as_slice() && (self.is_unbounded() || key < self.range_end.as_slice())
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "['{}', '{}')",
            String::from_utf8_lossy(&self.key),
            String::from_utf8_lossy(&self.range_end)
        )
    }
}

/// Compute the exclusive upper bound of the range holding every key that
/// starts with `prefix`.
///
/// The last byte below `0xff` is incremented and everything after it dropped.
/// A prefix made only of `0xff` bytes (or an empty prefix) has no finite bound
/// and is rejected.
pub fn prefix_range_end(prefix: &[u8]) -> Result<Vec<u8>> {
    let mut end = prefix.to_vec();
    for idx in (0..end.len()).rev() {
        if end[idx] < 0xff {
            end[idx] += 1;
            end.truncate(idx + 1);
            return Ok(end);
        }
    }

    Err(Error::Unrepresentable {
        prefix: String::from_utf8_lossy(prefix).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_end_increments_last_byte() {
        assert_eq!(prefix_range_end(b"a").unwrap(), b"b".to_vec());
        assert_eq!(prefix_range_end(b"ab").unwrap(), b"ac".to_vec());
        assert_eq!(prefix_range_end(b"/config/").unwrap(), b"/config0".to_vec());
    }

    #[test]
    fn range_end_truncates_trailing_max_bytes() {
        assert_eq!(prefix_range_end(&[b'a', 0xff]).unwrap(), b"b".to_vec());
        assert_eq!(
            prefix_range_end(&[b'x', b'y', 0xff, 0xff]).unwrap(),
            b"xz".to_vec()
        );
    }

    #[test]
    fn range_end_unrepresentable() {
        assert!(matches!(
            prefix_range_end(&[0xff]),
            Err(Error::Unrepresentable { .. })
        ));
        assert!(matches!(
            prefix_range_end(&[0xff, 0xff, 0xff]),
            Err(Error::Unrepresentable { .. })
        ));
        assert!(matches!(
            prefix_range_end(b""),
            Err(Error::Unrepresentable { .. })
        ));
    }

    #[test]
    fn range_contains() {
        let range = KeyRange::prefix("/app/").unwrap();
        assert!(range.contains(b"/app/"));
        assert!(range.contains(b"/app/db/host"));
        assert!(!range.contains(b"/app"));
        assert!(!range.contains(b"/app0"));
        assert!(!range.contains(b"/apq/"));

        let open = KeyRange::new("m", "");
        assert!(open.is_unbounded());
        assert!(open.contains(b"zzz"));
        assert!(!open.contains(b"a"));
    }

    #[test]
    fn range_display() {
        let range = KeyRange::prefix("ab").unwrap();
        assert_eq!(range.to_string(), "['ab', 'ac')");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_prefix_range_bounds_exactly_prefixed_keys(
                prefix in proptest::collection::vec(any::<u8>(), 1..6),
                suffix in proptest::collection::vec(any::<u8>(), 0..6),
                other in proptest::collection::vec(any::<u8>(), 0..8),
            ) {
                prop_assume!(prefix.iter().any(|b| *b < 0xff));
                let end = prefix_range_end(&prefix).unwrap();
                let range = KeyRange::new(prefix.clone(), end);

                let mut inside = prefix.clone();
                inside.extend_from_slice(&suffix);
                prop_assert!(range.contains(&inside));

                prop_assert_eq!(range.contains(&other), other.starts_with(&prefix));
            }
        }
    }
}
