//! Reconciliation passes.
//!
//! A pass reads both sides, diffs them and, when the diff is not empty,
//! applies it to the destination. The two reads are independent: a pass is not
//! a consistent snapshot across both sides, and nothing stops another writer
//! from touching the destination between the read and the apply. Callers that
//! need that guarantee must serialize writers themselves.

use crate::{
    connection::Connection,
    directory::{
        apply_diff_to_directory, directory_content, directory_prefix, ensure_directory_exists,
        FilePermissions,
    },
    error::Result,
    identity::{KeyRangeId, PrefixDirectoryId, PrefixPairId},
    store::KeyValueStore,
    Error, KeyCollection, KeyRange, KeysDiff, RangeKey,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// When a configured synchronization asks to be run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    /// Only when first created
    Once,
    /// Whenever the two sides differ
    OnChange,
    /// Every time (default)
    #[default]
    Always,
}

impl Recurrence {
    /// Decide whether a resync is due. `in_sync` is only consulted for
    /// [`Recurrence::OnChange`].
    pub fn needs_resync(self, in_sync: impl FnOnce() -> Result<bool>) -> Result<bool> {
        match self {
            Recurrence::Once => Ok(false),
            Recurrence::Always => Ok(true),
            Recurrence::OnChange => Ok(!in_sync()?),
        }
    }
}

impl FromStr for Recurrence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "once" => Ok(Recurrence::Once),
            "onchange" => Ok(Recurrence::OnChange),
            "always" => Ok(Recurrence::Always),
            other => Err(Error::InvalidRecurrence(other.to_string())),
        }
    }
}

/// Which side of a directory synchronization is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncSource {
    Directory,
    KeyPrefix,
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncSource::Directory => f.write_str("directory"),
            SyncSource::KeyPrefix => f.write_str("key-prefix"),
        }
    }
}

impl FromStr for SyncSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "directory" => Ok(SyncSource::Directory),
            "key-prefix" => Ok(SyncSource::KeyPrefix),
            other => Err(Error::InvalidSyncSource(other.to_string())),
        }
    }
}

/// What a pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub upserts: usize,
    pub deletions: usize,
}

impl SyncReport {
    /// Nothing had to change.
    pub fn is_noop(&self) -> bool {
        self.upserts == 0 && self.deletions == 0
    }
}

impl From<&KeysDiff> for SyncReport {
    fn from(diff: &KeysDiff) -> Self {
        Self {
            upserts: diff.upserts.len(),
            deletions: diff.deletions.len(),
        }
    }
}

/// Mirror one key prefix into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixSync {
    pub source_prefix: String,
    pub destination_prefix: String,
}

impl PrefixSync {
    pub fn new(source_prefix: impl Into<String>, destination_prefix: impl Into<String>) -> Self {
        Self {
            source_prefix: source_prefix.into(),
            destination_prefix: destination_prefix.into(),
        }
    }

    pub fn identity(&self) -> PrefixPairId {
        PrefixPairId {
            source_prefix: self.source_prefix.clone(),
            destination_prefix: self.destination_prefix.clone(),
        }
    }

    /// Run one pass.
    pub fn run<S: KeyValueStore>(&self, conn: &Connection<S>) -> Result<SyncReport> {
        let diff = conn.diff_prefixes(&self.source_prefix, &self.destination_prefix)?;
        if !diff.is_empty() {
            conn.apply_diff_to_prefix(&self.destination_prefix, &diff)?;
            tracing::info!(
                source = %self.source_prefix,
                destination = %self.destination_prefix,
                upserts = diff.upserts.len(),
                deletions = diff.deletions.len(),
                "synchronized key prefixes"
            );
        }
        Ok(SyncReport::from(&diff))
    }

    /// Whether the destination already mirrors the source.
    pub fn is_in_sync<S: KeyValueStore>(&self, conn: &Connection<S>) -> Result<bool> {
        Ok(conn
            .diff_prefixes(&self.source_prefix, &self.destination_prefix)?
            .is_empty())
    }
}

/// Mirror between a key prefix and a directory, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySync {
    pub key_prefix: String,
    pub directory: PathBuf,
    pub source: SyncSource,
    pub permissions: FilePermissions,
}

impl DirectorySync {
    pub fn new(
        key_prefix: impl Into<String>,
        directory: impl Into<PathBuf>,
        source: SyncSource,
    ) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            directory: directory.into(),
            source,
            permissions: FilePermissions::default(),
        }
    }

    pub fn with_permissions(mut self, permissions: FilePermissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn identity(&self) -> Result<PrefixDirectoryId> {
        Ok(PrefixDirectoryId {
            key_prefix: self.key_prefix.clone(),
            directory: directory_prefix(&self.directory)?,
        })
    }

    fn prepare(&self) -> Result<()> {
        if self.source == SyncSource::KeyPrefix {
            ensure_directory_exists(&self.directory, self.permissions.directories)?;
        }
        Ok(())
    }

    fn diff<S: KeyValueStore>(
        &self,
        conn: &Connection<S>,
        input_is_source: bool,
    ) -> Result<KeysDiff> {
        // A directory that does not exist yet holds no files.
        let files = if self.directory.exists() {
            directory_content(&self.directory)?
        } else {
            KeyCollection::new()
        };
        let prefix = directory_prefix(&self.directory)?;
        conn.diff_prefix_with_input(&self.key_prefix, &files, &prefix, input_is_source)
    }

    /// Run one pass from the configured source to the other side.
    pub fn run<S: KeyValueStore>(&self, conn: &Connection<S>) -> Result<SyncReport> {
        self.prepare()?;
        let diff = self.diff(conn, self.source == SyncSource::Directory)?;

        if !diff.is_empty() {
            match self.source {
                SyncSource::Directory => conn.apply_diff_to_prefix(&self.key_prefix, &diff)?,
                SyncSource::KeyPrefix => {
                    apply_diff_to_directory(&self.directory, &diff, self.permissions)?
                }
            }
            tracing::info!(
                key_prefix = %self.key_prefix,
                directory = %self.directory.display(),
                source = %self.source,
                upserts = diff.upserts.len(),
                deletions = diff.deletions.len(),
                "synchronized directory"
            );
        }
        Ok(SyncReport::from(&diff))
    }

    /// Whether both sides hold the same content. Never touches the filesystem.
    pub fn is_in_sync<S: KeyValueStore>(&self, conn: &Connection<S>) -> Result<bool> {
        // Direction does not matter for emptiness.
        Ok(self.diff(conn, true)?.is_empty())
    }
}

/// A fixed set of keys owned under one prefix.
///
/// Keys are suffixes relative to the prefix. A pass makes the prefix hold
/// exactly these keys: anything else under it is deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPrefixSet {
    pub prefix: String,
    /// Suffix to value
    pub keys: BTreeMap<String, Vec<u8>>,
    pub clear_on_deletion: bool,
}

impl KeyPrefixSet {
    /// An empty set that clears its prefix when removed.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            keys: BTreeMap::new(),
            clear_on_deletion: true,
        }
    }

    pub fn with_key(mut self, suffix: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.keys.insert(suffix.into(), value.into());
        self
    }

    /// The prefix is the identity.
    pub fn identity(&self) -> &str {
        &self.prefix
    }

    fn diff<S: KeyValueStore>(&self, conn: &Connection<S>) -> Result<KeysDiff> {
        let input: KeyCollection = self
            .keys
            .iter()
            .map(|(suffix, value)| {
                let key = format!("{}{}", self.prefix, suffix);
                (key.clone(), RangeKey::detached(key, value.clone()))
            })
            .collect();
        conn.diff_prefix_with_input(&self.prefix, &input, &self.prefix, true)
    }

    /// Write the configured keys and delete every other key under the prefix.
    pub fn run<S: KeyValueStore>(&self, conn: &Connection<S>) -> Result<SyncReport> {
        let diff = self.diff(conn)?;
        if !diff.is_empty() {
            conn.apply_diff_to_prefix(&self.prefix, &diff)?;
            tracing::info!(
                prefix = %self.prefix,
                upserts = diff.upserts.len(),
                deletions = diff.deletions.len(),
                "set key prefix"
            );
        }
        Ok(SyncReport::from(&diff))
    }

    /// Whether the prefix holds exactly the configured keys.
    pub fn is_in_sync<S: KeyValueStore>(&self, conn: &Connection<S>) -> Result<bool> {
        Ok(self.diff(conn)?.is_empty())
    }

    /// Current content of the prefix, keyed by suffix.
    pub fn read<S: KeyValueStore>(
        &self,
        conn: &Connection<S>,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        Ok(conn
            .get_prefix(&self.prefix)?
            .into_values()
            .filter_map(|entry| {
                let suffix = entry.key.strip_prefix(&self.prefix)?.to_string();
                Some((suffix, entry.value))
            })
            .collect())
    }

    pub fn on_delete<S: KeyValueStore>(&self, conn: &Connection<S>) -> Result<()> {
        if self.clear_on_deletion {
            conn.delete_key_range(&KeyRange::prefix(&self.prefix)?)?;
        }
        Ok(())
    }
}

/// A key range owned by a configuration, optionally cleared when it is
/// created or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedRange {
    pub range: KeyRange,
    pub clear_on_creation: bool,
    pub clear_on_deletion: bool,
}

impl ScopedRange {
    /// Cleared on creation, left alone on deletion.
    pub fn new(range: KeyRange) -> Self {
        Self {
            range,
            clear_on_creation: true,
            clear_on_deletion: false,
        }
    }

    pub fn identity(&self) -> KeyRangeId {
        KeyRangeId {
            key: String::from_utf8_lossy(&self.range.key).into_owned(),
            range_end: String::from_utf8_lossy(&self.range.range_end).into_owned(),
        }
    }

    pub fn on_create<S: KeyValueStore>(&self, conn: &Connection<S>) -> Result<()> {
        if self.clear_on_creation {
            conn.delete_key_range(&self.range)?;
        }
        Ok(())
    }

    pub fn on_delete<S: KeyValueStore>(&self, conn: &Connection<S>) -> Result<()> {
        if self.clear_on_deletion {
            conn.delete_key_range(&self.range)?;
        }
        Ok(())
    }
}
