//! Stable string identities for persisted reconciliation configurations.
//!
//! Each identity serializes to a JSON object whose fields appear in
//! declaration order, so the same logical identity always yields the same
//! string.

use crate::{error::Result, Error};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// JSON round-tripping for identity types.
pub trait Identity: Serialize + DeserializeOwned {
    /// Serialize to the persisted identity string.
    fn to_identity_string(&self) -> String {
        // String-only structs always serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a persisted identity string.
    fn from_identity_string(id: &str) -> Result<Self> {
        serde_json::from_str(id).map_err(|e| Error::InvalidIdentity(e.to_string()))
    }
}

/// Identity of a key range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRangeId {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "RangeEnd")]
    pub range_end: String,
}

impl Identity for KeyRangeId {}

/// Identity of a prefix-to-prefix synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrefixPairId {
    #[serde(rename = "SourcePrefix")]
    pub source_prefix: String,
    #[serde(rename = "DestinationPrefix")]
    pub destination_prefix: String,
}

impl Identity for PrefixPairId {}

/// Identity of a prefix-to-directory synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrefixDirectoryId {
    #[serde(rename = "KeyPrefix")]
    pub key_prefix: String,
    #[serde(rename = "Directory")]
    pub directory: String,
}

impl Identity for PrefixDirectoryId {}
