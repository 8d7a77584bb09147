//! Store transport contract and the in-memory store.
//!
//! The engine talks to a key-value store only through [`KeyValueStore`] and
//! [`AuthStore`]. Every call gets the per-attempt timeout and reports failures
//! as a [`StoreError`] whose [`ErrorKind`] decides how the retry policy treats
//! it.
//!
//! [`MemoryStore`] is a complete in-process implementation with store-assigned
//! revisions and failure injection.

use crate::{KeyRange, RangeKey, RolePermission};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The store is temporarily unavailable; the call may be retried.
    Transient,
    /// The addressed entity (role, user) does not exist.
    NotFound,
    /// Any other failure reported by the store.
    Terminal,
    /// The attempt exceeded its timeout.
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::NotFound => "not found",
            ErrorKind::Terminal => "terminal",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Error reported by a store transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Terminal, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for StoreError {}

/// Result type for transport calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One operation inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl TxnOp {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        TxnOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        TxnOp::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            TxnOp::Put { key, .. } | TxnOp::Delete { key } => key,
        }
    }
}

/// Outcome of a transaction the store accepted for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOutcome {
    Committed,
    Aborted,
}

/// Key-value operations the engine needs from a store.
pub trait KeyValueStore {
    /// Read a single key.
    fn get(&self, key: &str, timeout: Duration) -> StoreResult<Option<RangeKey>>;

    /// Read every key in `range`. An empty range is an empty vector.
    fn get_range(&self, range: &KeyRange, timeout: Duration) -> StoreResult<Vec<RangeKey>>;

    fn put(&self, key: &str, value: &[u8], timeout: Duration) -> StoreResult<()>;

    /// Delete a key. Deleting an absent key succeeds.
    fn delete(&self, key: &str, timeout: Duration) -> StoreResult<()>;

    fn delete_range(&self, range: &KeyRange, timeout: Duration) -> StoreResult<()>;

    /// Apply all of `ops` atomically.
    fn transact(&self, ops: &[TxnOp], timeout: Duration) -> StoreResult<TxnOutcome>;
}

/// Cluster authentication, role and user management. Absent roles or users
/// are reported with [`ErrorKind::NotFound`].
pub trait AuthStore {
    /// Whether authentication is enabled.
    fn auth_status(&self, timeout: Duration) -> StoreResult<bool>;
    fn set_auth_status(&self, enabled: bool, timeout: Duration) -> StoreResult<()>;

    fn list_roles(&self, timeout: Duration) -> StoreResult<Vec<String>>;
    fn get_role(&self, name: &str, timeout: Duration) -> StoreResult<Vec<RolePermission>>;
    fn add_role(&self, name: &str, timeout: Duration) -> StoreResult<()>;
    fn delete_role(&self, name: &str, timeout: Duration) -> StoreResult<()>;
    fn grant_role_permission(
        &self,
        name: &str,
        permission: &RolePermission,
        timeout: Duration,
    ) -> StoreResult<()>;
    fn revoke_role_permission(
        &self,
        name: &str,
        key: &str,
        range_end: &str,
        timeout: Duration,
    ) -> StoreResult<()>;

    fn list_users(&self, timeout: Duration) -> StoreResult<Vec<String>>;
    /// Roles granted to `username`.
    fn get_user(&self, username: &str, timeout: Duration) -> StoreResult<Vec<String>>;
    fn add_user(&self, username: &str, password: &str, timeout: Duration) -> StoreResult<()>;
    fn delete_user(&self, username: &str, timeout: Duration) -> StoreResult<()>;
    fn change_user_password(
        &self,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> StoreResult<()>;
    fn grant_user_role(&self, username: &str, role: &str, timeout: Duration) -> StoreResult<()>;
    fn revoke_user_role(&self, username: &str, role: &str, timeout: Duration) -> StoreResult<()>;
}

const ROLE_NOT_FOUND: &str = "etcdserver: role name not found";
const USER_NOT_FOUND: &str = "etcdserver: user name not found";
const ROOT_USER: &str = "root";

#[derive(Debug, Default)]
struct User {
    #[allow(dead_code)]
    password: String,
    roles: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    keys: BTreeMap<String, RangeKey>,
    revision: i64,
    roles: BTreeMap<String, Vec<RolePermission>>,
    users: BTreeMap<String, User>,
    failures: VecDeque<StoreError>,
    abort_transactions: bool,
    auth_enabled: bool,
    calls: usize,
}

impl Inner {
    /// Count the call and hand back the next injected failure, if any.
    fn enter(&mut self) -> StoreResult<()> {
        self.calls += 1;
        match self.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn put(&mut self, key: &str, value: &[u8], revision: i64) {
        match self.keys.get_mut(key) {
            Some(existing) => {
                existing.value = value.to_vec();
                existing.version += 1;
                existing.mod_revision = revision;
            }
            None => {
                self.keys.insert(
                    key.to_string(),
                    RangeKey {
                        key: key.to_string(),
                        value: value.to_vec(),
                        version: 1,
                        create_revision: revision,
                        mod_revision: revision,
                        lease: 0,
                    },
                );
            }
        }
    }

    fn role(&mut self, name: &str) -> StoreResult<&mut Vec<RolePermission>> {
        self.roles
            .get_mut(name)
            .ok_or_else(|| StoreError::not_found(ROLE_NOT_FOUND))
    }

    fn user(&mut self, username: &str) -> StoreResult<&mut User> {
        self.users
            .get_mut(username)
            .ok_or_else(|| StoreError::not_found(USER_NOT_FOUND))
    }
}

/// In-process store with revision tracking and failure injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given key/value pairs.
    pub fn with_keys<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        let store = Self::new();
        {
            let mut inner = store.lock();
            for (key, value) in pairs {
                inner.revision += 1;
                let revision = inner.revision;
                inner.put(key.as_ref(), value.as_ref(), revision);
            }
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` calls fail with `kind`.
    pub fn fail_next(&self, kind: ErrorKind, count: usize) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner
                .failures
                .push_back(StoreError::new(kind, format!("injected {kind} failure")));
        }
    }

    /// Make every following transaction report [`TxnOutcome::Aborted`].
    pub fn abort_transactions(&self, abort: bool) {
        self.lock().abort_transactions = abort;
    }

    /// Number of transport calls made so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    /// Current store revision.
    pub fn revision(&self) -> i64 {
        self.lock().revision
    }

    /// Copy of every key/value pair, ordered by key.
    pub fn dump(&self) -> BTreeMap<String, Vec<u8>> {
        self.lock()
            .keys
            .values()
            .map(|k| (k.key.clone(), k.value.clone()))
            .collect()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str, _timeout: Duration) -> StoreResult<Option<RangeKey>> {
        let mut inner = self.lock();
        inner.enter()?;
        Ok(inner.keys.get(key).cloned())
    }

    fn get_range(&self, range: &KeyRange, _timeout: Duration) -> StoreResult<Vec<RangeKey>> {
        let mut inner = self.lock();
        inner.enter()?;
        Ok(inner
            .keys
            .values()
            .filter(|k| range.contains(k.key.as_bytes()))
            .cloned()
            .collect())
    }

    fn put(&self, key: &str, value: &[u8], _timeout: Duration) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.enter()?;
        inner.revision += 1;
        let revision = inner.revision;
        inner.put(key, value, revision);
        Ok(())
    }

    fn delete(&self, key: &str, _timeout: Duration) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.enter()?;
        if inner.keys.remove(key).is_some() {
            inner.revision += 1;
        }
        Ok(())
    }

    fn delete_range(&self, range: &KeyRange, _timeout: Duration) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.enter()?;
        let before = inner.keys.len();
        inner.keys.retain(|key, _| !range.contains(key.as_bytes()));
        if inner.keys.len() != before {
            inner.revision += 1;
        }
        Ok(())
    }

    fn transact(&self, ops: &[TxnOp], _timeout: Duration) -> StoreResult<TxnOutcome> {
        let mut inner = self.lock();
        inner.enter()?;
        if inner.abort_transactions {
            return Ok(TxnOutcome::Aborted);
        }

        // The whole transaction lands on a single revision.
        inner.revision += 1;
        let revision = inner.revision;
        for op in ops {
            match op {
                TxnOp::Put { key, value } => inner.put(key, value, revision),
                TxnOp::Delete { key } => {
                    inner.keys.remove(key);
                }
            }
        }
        Ok(TxnOutcome::Committed)
    }
}

impl AuthStore for MemoryStore {
    fn auth_status(&self, _timeout: Duration) -> StoreResult<bool> {
        let mut inner = self.lock();
        inner.enter()?;
        Ok(inner.auth_enabled)
    }

    fn set_auth_status(&self, enabled: bool, _timeout: Duration) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.enter()?;
        if enabled && !inner.auth_enabled {
            // Enabling requires a root user holding the root role.
            let root = inner
                .users
                .get(ROOT_USER)
                .ok_or_else(|| StoreError::terminal("etcdserver: root user does not exist"))?;
            if !root.roles.contains(ROOT_USER) {
                return Err(StoreError::terminal(
                    "etcdserver: root user does not have root role",
                ));
            }
        }
        inner.auth_enabled = enabled;
        Ok(())
    }

    fn list_roles(&self, _timeout: Duration) -> StoreResult<Vec<String>> {
        let mut inner = self.lock();
        inner.enter()?;
        Ok(inner.roles.keys().cloned().collect())
    }

    fn get_role(&self, name: &str, _timeout: Duration) -> StoreResult<Vec<RolePermission>> {
        let mut inner = self.lock();
        inner.enter()?;
        inner.role(name).map(|perms| perms.clone())
    }

    fn add_role(&self, name: &str, _timeout: Duration) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.enter()?;
        if inner.roles.contains_key(name) {
            return Err(StoreError::terminal("etcdserver: role name already exists"));
        }
        inner.roles.insert(name.to_string(), Vec::new());
        Ok(())
    }

    fn delete_role(&self, name: &str, _timeout: Duration) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.enter()?;
        if inner.roles.remove(name).is_none() {
            return Err(StoreError::not_found(ROLE_NOT_FOUND));
        }
        for user in inner.users.values_mut() {
            user.roles.remove(name);
        }
        Ok(())
    }

    fn grant_role_permission(
        &self,
        name: &str,
        permission: &RolePermission,
        _timeout: Duration,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.enter()?;
        let perms = inner.role(name)?;
        // Granting over an existing range replaces its permission.
        perms.retain(|p| p.key != permission.key || p.range_end != permission.range_end);
        perms.push(permission.clone());
        Ok(())
    }

    fn revoke_role_permission(
        &self,
        name: &str,
        key: &str,
        range_end: &str,
        _timeout: Duration,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.enter()?;
        let perms = inner.role(name)?;
        let before = perms.len();
        perms.retain(|p| p.key != key || p.range_end != range_end);
        if perms.len() == before {
            return Err(StoreError::terminal(
                "etcdserver: permission is not granted to the role",
            ));
        }
        Ok(())
    }

    fn list_users(&self, _timeout: Duration) -> StoreResult<Vec<String>> {
        let mut inner = self.lock();
        inner.enter()?;
        Ok(inner.users.keys().cloned().collect())
    }

    fn get_user(&self, username: &str, _timeout: Duration) -> StoreResult<Vec<String>> {
        let mut inner = self.lock();
        inner.enter()?;
        inner
            .user(username)
            .map(|user| user.roles.iter().cloned().collect())
    }

    fn add_user(&self, username: &str, password: &str, _timeout: Duration) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.enter()?;
        if inner.users.contains_key(username) {
            return Err(StoreError::terminal("etcdserver: user name already exists"));
        }
        inner.users.insert(
            username.to_string(),
            User {
                password: password.to_string(),
                roles: BTreeSet::new(),
            },
        );
        Ok(())
    }

    fn delete_user(&self, username: &str, _timeout: Duration) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.enter()?;
        match inner.users.remove(username) {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(USER_NOT_FOUND)),
        }
    }

    fn change_user_password(
        &self,
        username: &str,
        password: &str,
        _timeout: Duration,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.enter()?;
        inner.user(username)?.password = password.to_string();
        Ok(())
    }

    fn grant_user_role(&self, username: &str, role: &str, _timeout: Duration) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.enter()?;
        if !inner.roles.contains_key(role) {
            return Err(StoreError::not_found(ROLE_NOT_FOUND));
        }
        inner.user(username)?.roles.insert(role.to_string());
        Ok(())
    }

    fn revoke_user_role(&self, username: &str, role: &str, _timeout: Duration) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.enter()?;
        if !inner.user(username)?.roles.remove(role) {
            return Err(StoreError::terminal(
                "etcdserver: role is not granted to the user",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Permission;

    const T: Duration = Duration::from_secs(1);

    #[test]
    fn put_assigns_revisions() {
        let store = MemoryStore::new();
        store.put("/a", b"1", T).unwrap();
        store.put("/b", b"2", T).unwrap();
        store.put("/a", b"3", T).unwrap();

        let a = store.get("/a", T).unwrap().unwrap();
        assert_eq!(a.value, b"3");
        assert_eq!(a.version, 2);
        assert_eq!(a.create_revision, 1);
        assert_eq!(a.mod_revision, 3);
        assert_eq!(store.revision(), 3);
    }

    #[test]
    fn range_reads_are_half_open() {
        let store = MemoryStore::with_keys([
            ("/a/1", "x"),
            ("/a/2", "y"),
            ("/a0", "z"),
            ("/b", "w"),
        ]);
        let keys = store
            .get_range(&KeyRange::prefix("/a/").unwrap(), T)
            .unwrap();
        let names: Vec<_> = keys.iter().map(|k| k.key.as_str()).collect();
        assert_eq!(names, vec!["/a/1", "/a/2"]);

        let empty = store
            .get_range(&KeyRange::prefix("/nothing/").unwrap(), T)
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn delete_absent_key_is_noop() {
        let store = MemoryStore::with_keys([("/a", "1")]);
        store.delete("/missing", T).unwrap();
        assert_eq!(store.revision(), 1);
        store.delete("/a", T).unwrap();
        assert!(store.dump().is_empty());
    }

    #[test]
    fn delete_range_removes_only_range() {
        let store = MemoryStore::with_keys([("/a/1", "x"), ("/a/2", "y"), ("/b", "w")]);
        store
            .delete_range(&KeyRange::prefix("/a/").unwrap(), T)
            .unwrap();
        assert_eq!(
            store.dump().into_iter().collect::<Vec<_>>(),
            vec![("/b".to_string(), b"w".to_vec())]
        );
    }

    #[test]
    fn transaction_commits_on_one_revision() {
        let store = MemoryStore::with_keys([("/a", "1"), ("/b", "2")]);
        let outcome = store
            .transact(&[TxnOp::delete("/a"), TxnOp::put("/c", "3"), TxnOp::put("/b", "4")], T)
            .unwrap();
        assert_eq!(outcome, TxnOutcome::Committed);
        assert_eq!(store.revision(), 3);
        assert_eq!(store.get("/c", T).unwrap().unwrap().mod_revision, 3);
        assert_eq!(store.get("/b", T).unwrap().unwrap().mod_revision, 3);
        assert!(store.get("/a", T).unwrap().is_none());
    }

    #[test]
    fn aborted_transaction_changes_nothing() {
        let store = MemoryStore::with_keys([("/a", "1")]);
        store.abort_transactions(true);
        let outcome = store.transact(&[TxnOp::delete("/a")], T).unwrap();
        assert_eq!(outcome, TxnOutcome::Aborted);
        assert_eq!(store.dump().len(), 1);
    }

    #[test]
    fn injected_failures_are_consumed_in_order() {
        let store = MemoryStore::new();
        store.fail_next(ErrorKind::Transient, 2);
        assert_eq!(store.put("/a", b"1", T).unwrap_err().kind, ErrorKind::Transient);
        assert_eq!(store.put("/a", b"1", T).unwrap_err().kind, ErrorKind::Transient);
        store.put("/a", b"1", T).unwrap();
        assert_eq!(store.calls(), 3);
    }

    #[test]
    fn missing_role_and_user_are_not_found() {
        let store = MemoryStore::new();
        assert!(store.get_role("admin", T).unwrap_err().is_not_found());
        assert!(store.get_user("alice", T).unwrap_err().is_not_found());
    }

    #[test]
    fn role_and_user_lifecycle() {
        let store = MemoryStore::new();
        store.add_role("reader", T).unwrap();
        let permission = RolePermission::new(Permission::Read, "/a/", "/a0");
        store.grant_role_permission("reader", &permission, T).unwrap();
        store.add_user("alice", "secret", T).unwrap();
        store.grant_user_role("alice", "reader", T).unwrap();
        assert_eq!(store.get_user("alice", T).unwrap(), vec!["reader".to_string()]);

        store.delete_role("reader", T).unwrap();
        assert!(store.get_user("alice", T).unwrap().is_empty());
        assert_eq!(store.add_user("alice", "x", T).unwrap_err().kind, ErrorKind::Terminal);
    }

    #[test]
    fn binary_values_round_trip() {
        let store = MemoryStore::with_keys([("/bin", [0xff_u8, 0x00, 0xfe])]);
        assert_eq!(store.get("/bin", T).unwrap().unwrap().value, vec![0xff, 0x00, 0xfe]);
    }

    #[test]
    fn enabling_auth_requires_root() {
        let store = MemoryStore::new();
        assert!(!store.auth_status(T).unwrap());
        assert_eq!(store.set_auth_status(true, T).unwrap_err().kind, ErrorKind::Terminal);

        store.add_user("root", "pw", T).unwrap();
        let err = store.set_auth_status(true, T).unwrap_err();
        assert!(err.message.contains("root role"));

        store.add_role("root", T).unwrap();
        store.grant_user_role("root", "root", T).unwrap();
        store.set_auth_status(true, T).unwrap();
        assert!(store.auth_status(T).unwrap());

        store.set_auth_status(false, T).unwrap();
        assert!(!store.auth_status(T).unwrap());
    }
}
