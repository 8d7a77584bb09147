//! Role permission types.

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Access granted by a role over a key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    ReadWrite,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::ReadWrite => "readwrite",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "readwrite" => Ok(Permission::ReadWrite),
            other => Err(Error::InvalidPermission(other.to_string())),
        }
    }
}

/// A permission granted to a role on `[key, range_end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePermission {
    pub permission: Permission,
    pub key: String,
    pub range_end: String,
}

impl RolePermission {
    pub fn new(
        permission: Permission,
        key: impl Into<String>,
        range_end: impl Into<String>,
    ) -> Self {
        Self {
            permission,
            key: key.into(),
            range_end: range_end.into(),
        }
    }
}
