//! Retry-wrapped access to a store.
//!
//! [`Connection`] runs every store call through its [`RetryPolicy`] and wraps
//! failures with the key, prefix or range involved. It also hosts the
//! read-diff-apply building blocks used by the reconciliation passes.

use crate::{
    diff::{compute_diff, KeyCollection, KeysDiff},
    error::Result,
    retry::{RetryPolicy, Sleeper, ThreadSleeper},
    store::{AuthStore, KeyValueStore, StoreResult, TxnOp, TxnOutcome},
    Error, KeyRange, RangeKey, RolePermission,
};
use std::time::Duration;

/// A store handle with a retry policy.
pub struct Connection<S> {
    store: S,
    policy: RetryPolicy,
    sleeper: Box<dyn Sleeper + Send + Sync>,
}

impl<S> Connection<S> {
    /// Create a connection that backs off with [`std::thread::sleep`].
    pub fn new(store: S, policy: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            sleeper: Box::new(ThreadSleeper),
        }
    }

    /// Replace how the connection waits between attempts.
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + Send + Sync + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn retry<T>(
        &self,
        operation: &str,
        call: impl FnMut(Duration) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.policy.run(self.sleeper.as_ref(), operation, call)
    }
}

impl<S: KeyValueStore> Connection<S> {
    /// Read one key. `None` when the key does not exist.
    pub fn get_key(&self, key: &str) -> Result<Option<RangeKey>> {
        self.retry("get", |timeout| self.store.get(key, timeout))
            .map_err(|e| Error::store(format!("Error retrieving key '{key}'"), e))
    }

    pub fn put_key(&self, key: &str, value: impl AsRef<[u8]>) -> Result<()> {
        let value = value.as_ref();
        self.retry("put", |timeout| self.store.put(key, value, timeout))
            .map_err(|e| Error::store(format!("Error setting key '{key}'"), e))
    }

    pub fn delete_key(&self, key: &str) -> Result<()> {
        self.retry("delete", |timeout| self.store.delete(key, timeout))
            .map_err(|e| Error::store(format!("Error deleting key '{key}'"), e))
    }

    pub fn delete_key_range(&self, range: &KeyRange) -> Result<()> {
        self.retry("delete_range", |timeout| self.store.delete_range(range, timeout))
            .map_err(|e| Error::store(format!("Error deleting key range {range}"), e))
    }

    /// Read every entry in `range`, keyed by full key.
    pub fn get_key_range(&self, range: &KeyRange) -> Result<KeyCollection> {
        let entries = self
            .retry("get_range", |timeout| self.store.get_range(range, timeout))
            .map_err(|e| Error::store(format!("Error retrieving key range {range}"), e))?;

        tracing::debug!(range = %range, keys = entries.len(), "read key range");
        Ok(entries
            .into_iter()
            .map(|entry| (entry.key.clone(), entry))
            .collect())
    }

    /// Read every entry whose key starts with `prefix`.
    pub fn get_prefix(&self, prefix: &str) -> Result<KeyCollection> {
        self.get_key_range(&KeyRange::prefix(prefix)?)
    }

    /// Diff that makes `dst_prefix` a copy of `src_prefix`.
    ///
    /// The two prefixes are read one after the other; the result is not a
    /// consistent snapshot across both.
    pub fn diff_prefixes(&self, src_prefix: &str, dst_prefix: &str) -> Result<KeysDiff> {
        let src = self.get_prefix(src_prefix)?;
        let dst = self.get_prefix(dst_prefix)?;
        let diff = compute_diff(&src, src_prefix, &dst, dst_prefix);
        tracing::debug!(
            src_prefix,
            dst_prefix,
            upserts = diff.upserts.len(),
            deletions = diff.deletions.len(),
            "computed prefix diff"
        );
        Ok(diff)
    }

    /// Diff between `prefix` and an externally supplied collection.
    ///
    /// With `input_is_source` the prefix is brought in line with the input,
    /// otherwise the input is the side to change.
    pub fn diff_prefix_with_input(
        &self,
        prefix: &str,
        input: &KeyCollection,
        input_prefix: &str,
        input_is_source: bool,
    ) -> Result<KeysDiff> {
        let keys = self.get_prefix(prefix)?;
        if input_is_source {
            Ok(compute_diff(input, input_prefix, &keys, prefix))
        } else {
            Ok(compute_diff(&keys, prefix, input, input_prefix))
        }
    }

    /// Commit `diff` under `prefix` as one transaction.
    ///
    /// A transient failure re-sends the same operations; puts and deletes are
    /// idempotent so a resend cannot double-apply.
    pub fn apply_diff_to_prefix(&self, prefix: &str, diff: &KeysDiff) -> Result<()> {
        let ops = diff_ops(prefix, diff);
        let outcome = self
            .retry("transact", |timeout| self.store.transact(&ops, timeout))
            .map_err(|e| {
                Error::store(format!("Error applying differential to prefix '{prefix}'"), e)
            })?;

        match outcome {
            TxnOutcome::Committed => Ok(()),
            TxnOutcome::Aborted => Err(Error::TransactionAborted {
                prefix: prefix.to_string(),
            }),
        }
    }
}

/// Deletions first, then puts, all as absolute keys under `prefix`.
fn diff_ops(prefix: &str, diff: &KeysDiff) -> Vec<TxnOp> {
    let deletes = diff
        .deletions
        .iter()
        .map(|suffix| TxnOp::delete(format!("{prefix}{suffix}")));
    let puts = diff
        .upserts
        .iter()
        .map(|(suffix, value)| TxnOp::put(format!("{prefix}{suffix}"), value.clone()));
    deletes.chain(puts).collect()
}

/// Turn a not-found error into `None`.
fn found<T>(result: StoreResult<T>) -> StoreResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

impl<S: AuthStore> Connection<S> {
    /// Whether the cluster has authentication enabled.
    pub fn get_auth_status(&self) -> Result<bool> {
        self.retry("auth_status", |timeout| self.store.auth_status(timeout))
            .map_err(|e| Error::store("Error retrieving authentication status", e))
    }

    pub fn set_auth_status(&self, enabled: bool) -> Result<()> {
        let action = if enabled { "enabling" } else { "disabling" };
        self.retry("auth_set_status", |timeout| {
            self.store.set_auth_status(enabled, timeout)
        })
        .map_err(|e| Error::store(format!("Error {action} authentication"), e))
    }

    pub fn list_roles(&self) -> Result<Vec<String>> {
        self.retry("role_list", |timeout| self.store.list_roles(timeout))
            .map_err(|e| Error::store("Error listing roles", e))
    }

    /// Permissions of role `name`. `None` when the role does not exist.
    pub fn get_role_permissions(&self, name: &str) -> Result<Option<Vec<RolePermission>>> {
        self.retry("role_get", |timeout| found(self.store.get_role(name, timeout)))
            .map_err(|e| Error::store(format!("Error retrieving role '{name}'"), e))
    }

    pub fn add_role(&self, name: &str) -> Result<()> {
        self.retry("role_add", |timeout| self.store.add_role(name, timeout))
            .map_err(|e| Error::store(format!("Error creating role '{name}'"), e))
    }

    pub fn delete_role(&self, name: &str) -> Result<()> {
        self.retry("role_delete", |timeout| self.store.delete_role(name, timeout))
            .map_err(|e| Error::store(format!("Error deleting role '{name}'"), e))
    }

    pub fn grant_role_permission(&self, name: &str, permission: &RolePermission) -> Result<()> {
        self.retry("role_grant_permission", |timeout| {
            self.store.grant_role_permission(name, permission, timeout)
        })
        .map_err(|e| {
            Error::store(
                format!(
                    "Error granting {} on ['{}', '{}') to role '{name}'",
                    permission.permission, permission.key, permission.range_end
                ),
                e,
            )
        })
    }

    pub fn revoke_role_permission(&self, name: &str, key: &str, range_end: &str) -> Result<()> {
        self.retry("role_revoke_permission", |timeout| {
            self.store.revoke_role_permission(name, key, range_end, timeout)
        })
        .map_err(|e| {
            Error::store(
                format!("Error revoking ['{key}', '{range_end}') from role '{name}'"),
                e,
            )
        })
    }

    pub fn list_users(&self) -> Result<Vec<String>> {
        self.retry("user_list", |timeout| self.store.list_users(timeout))
            .map_err(|e| Error::store("Error listing users", e))
    }

    /// Roles of user `username`. `None` when the user does not exist.
    pub fn get_user_roles(&self, username: &str) -> Result<Option<Vec<String>>> {
        self.retry("user_get", |timeout| found(self.store.get_user(username, timeout)))
            .map_err(|e| Error::store(format!("Error retrieving user '{username}'"), e))
    }

    pub fn add_user(&self, username: &str, password: &str) -> Result<()> {
        self.retry("user_add", |timeout| self.store.add_user(username, password, timeout))
            .map_err(|e| Error::store(format!("Error creating user '{username}'"), e))
    }

    pub fn delete_user(&self, username: &str) -> Result<()> {
        self.retry("user_delete", |timeout| self.store.delete_user(username, timeout))
            .map_err(|e| Error::store(format!("Error deleting user '{username}'"), e))
    }

    pub fn change_user_password(&self, username: &str, password: &str) -> Result<()> {
        self.retry("user_change_password", |timeout| {
            self.store.change_user_password(username, password, timeout)
        })
        .map_err(|e| Error::store(format!("Error changing password of user '{username}'"), e))
    }

    pub fn grant_user_role(&self, username: &str, role: &str) -> Result<()> {
        self.retry("user_grant_role", |timeout| {
            self.store.grant_user_role(username, role, timeout)
        })
        .map_err(|e| Error::store(format!("Error granting role '{role}' to user '{username}'"), e))
    }

    pub fn revoke_user_role(&self, username: &str, role: &str) -> Result<()> {
        self.retry("user_revoke_role", |timeout| {
            self.store.revoke_user_role(username, role, timeout)
        })
        .map_err(|e| {
            Error::store(format!("Error revoking role '{role}' from user '{username}'"), e)
        })
    }
}
