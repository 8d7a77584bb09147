//! # Keysync Engine
//!
//! Key-range reconciliation for mirroring one key prefix of a key-value store
//! into another, or between a key prefix and a directory.
//!
//! ## Design Principles
//!
//! - **Transport agnostic**: the store is reached only through the
//!   [`KeyValueStore`] and [`AuthStore`] traits
//! - **Deterministic**: diffs depend on membership and values only
//! - **All or nothing**: a diff is committed to a prefix as one transaction
//! - **Synchronous**: no background work; the only waits are store calls and
//!   the backoff between retries
//!
//! ## Core Concepts
//!
//! ### Ranges
//!
//! A [`KeyRange`] is the half-open interval `[key, range_end)`.
//! [`prefix_range_end`] turns a prefix into the end of the range holding
//! every key that starts with it.
//!
//! ### Diffs
//!
//! [`compute_diff`] compares two [`KeyCollection`]s, each under its own prefix,
//! and produces a [`KeysDiff`] of upserts and deletions keyed by suffix.
//!
//! ### Retries
//!
//! Every call made through a [`Connection`] follows its [`RetryPolicy`]:
//! transient unavailability is retried after a fixed interval until the
//! budget runs out; every other failure is returned immediately.
//!
//! ## Quick Start
//!
//! ```rust
//! use keysync_engine::{Connection, MemoryStore, PrefixSync, RetryPolicy};
//!
//! let store = MemoryStore::with_keys([
//!     ("/src/a", "1"),
//!     ("/src/b", "2"),
//!     ("/dst/b", "X"),
//!     ("/dst/c", "3"),
//! ]);
//! let conn = Connection::new(store, RetryPolicy::default());
//!
//! let sync = PrefixSync::new("/src/", "/dst/");
//! let report = sync.run(&conn).unwrap();
//! assert_eq!((report.upserts, report.deletions), (2, 1));
//! assert!(sync.is_in_sync(&conn).unwrap());
//! ```

pub mod auth;
pub mod connection;
pub mod diff;
pub mod directory;
pub mod error;
pub mod identity;
pub mod range;
pub mod retry;
pub mod store;
pub mod sync;

// Re-export main types at crate root
pub use auth::{Permission, RolePermission};
pub use connection::Connection;
pub use diff::{collection_from_pairs, compute_diff, KeyCollection, KeysDiff};
pub use directory::{
    apply_diff_to_directory, directory_content, directory_prefix, ensure_directory_exists,
    FilePermissions,
};
pub use error::{Error, Result};
pub use identity::{Identity, KeyRangeId, PrefixDirectoryId, PrefixPairId};
pub use range::{prefix_range_end, KeyRange, RangeKey};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use store::{
    AuthStore, ErrorKind, KeyValueStore, MemoryStore, StoreError, StoreResult, TxnOp, TxnOutcome,
};
pub use sync::{
    DirectorySync, KeyPrefixSet, PrefixSync, Recurrence, ScopedRange, SyncReport, SyncSource,
};
