//! Store transport over the JSON/HTTP gateway.
//!
//! Requests are `POST`ed as JSON to `/v3/...` paths. Keys and values travel as
//! base64 and 64-bit integers may arrive as strings. Values are opaque bytes;
//! keys must decode to UTF-8. Endpoints are tried in order; only a failure to
//! connect moves on to the next one.

use crate::config::Config;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use keysync_engine::{
    AuthStore, KeyRange, KeyValueStore, Permission, RangeKey, RolePermission, StoreError,
    StoreResult, TxnOp, TxnOutcome,
};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{json, Value};
use std::io;
use std::time::Duration;

/// gRPC status code for an unavailable service.
const UNAVAILABLE: i64 = 14;

const ROLE_NOT_FOUND: &str = "role name not found";
const USER_NOT_FOUND: &str = "user name not found";

/// A store reached through one or more gateway endpoints.
pub struct GatewayStore {
    agent: ureq::Agent,
    endpoints: Vec<String>,
}

impl GatewayStore {
    pub fn new(endpoints: Vec<String>, connection_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connection_timeout)
            .build();
        Self { agent, endpoints }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.endpoints.clone(), config.connection_timeout)
    }

    fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
        timeout: Duration,
    ) -> StoreResult<T> {
        let mut last_failure = None;

        for endpoint in &self.endpoints {
            let url = format!("{endpoint}{path}");
            match self.agent.post(&url).timeout(timeout).send_json(&body) {
                Ok(response) => {
                    return response
                        .into_json::<T>()
                        .map_err(|e| classify_read(&url, e));
                }
                Err(ureq::Error::Status(status, response)) => {
                    let text = response.into_string().unwrap_or_default();
                    return Err(classify_status(status, &text));
                }
                Err(ureq::Error::Transport(transport)) => match transport.kind() {
                    ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Dns => {
                        tracing::debug!(endpoint = %endpoint, "endpoint unreachable: {transport}");
                        last_failure = Some(transport.to_string());
                    }
                    _ if is_timeout(&transport) => {
                        return Err(StoreError::timeout(format!("{url}: {transport}")));
                    }
                    _ => return Err(StoreError::terminal(format!("{url}: {transport}"))),
                },
            }
        }

        Err(StoreError::transient(match last_failure {
            Some(failure) => format!("no reachable endpoint: {failure}"),
            None => "no endpoints configured".to_string(),
        }))
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let io_kind = std::error::Error::source(transport)
        .and_then(|source| source.downcast_ref::<io::Error>())
        .map(io::Error::kind);
    matches!(io_kind, Some(io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock))
        || transport.to_string().contains("timed out")
}

fn classify_read(url: &str, err: io::Error) -> StoreError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            StoreError::timeout(format!("{url}: {err}"))
        }
        _ => StoreError::terminal(format!("{url}: invalid response: {err}")),
    }
}

/// Error body written by the gateway alongside a non-success status.
#[derive(Debug, Default, Deserialize)]
struct GatewayStatus {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: String,
}

/// Map a non-success HTTP response onto an error kind.
fn classify_status(status: u16, body: &str) -> StoreError {
    let parsed: GatewayStatus = serde_json::from_str(body).unwrap_or_default();
    let message = [parsed.message.as_str(), parsed.error.as_str(), body.trim()]
        .into_iter()
        .find(|m| !m.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"));

    if status == 503 || parsed.code == UNAVAILABLE {
        StoreError::transient(message)
    } else if message.contains(ROLE_NOT_FOUND) || message.contains(USER_NOT_FOUND) {
        StoreError::not_found(message)
    } else {
        StoreError::terminal(message)
    }
}

fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn decode_bytes(field: &str, encoded: &str) -> StoreResult<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| StoreError::terminal(format!("{field} is not valid base64: {e}")))
}

fn decode(field: &str, encoded: &str) -> StoreResult<String> {
    String::from_utf8(decode_bytes(field, encoded)?)
        .map_err(|_| StoreError::terminal(format!("{field} is not valid UTF-8")))
}

/// Accept a 64-bit integer written either as a number or as a string.
fn int64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Number(i64),
        Text(String),
    }

    match Wire::deserialize(deserializer)? {
        Wire::Number(n) => Ok(n),
        Wire::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct WireKeyValue {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default, deserialize_with = "int64")]
    version: i64,
    #[serde(default, deserialize_with = "int64")]
    create_revision: i64,
    #[serde(default, deserialize_with = "int64")]
    mod_revision: i64,
    #[serde(default, deserialize_with = "int64")]
    lease: i64,
}

impl WireKeyValue {
    fn into_range_key(self) -> StoreResult<RangeKey> {
        let key = decode("key", &self.key)?;
        let value = decode_bytes(&format!("value of '{key}'"), &self.value)?;
        Ok(RangeKey {
            key,
            value,
            version: self.version,
            create_revision: self.create_revision,
            mod_revision: self.mod_revision,
            lease: self.lease,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<WireKeyValue>,
}

impl RangeResponse {
    fn into_keys(self) -> StoreResult<Vec<RangeKey>> {
        self.kvs.into_iter().map(WireKeyValue::into_range_key).collect()
    }
}

#[derive(Debug, Deserialize)]
struct AuthStatusResponse {
    #[serde(default)]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct TxnResponse {
    #[serde(default)]
    succeeded: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum WirePermType {
    #[default]
    Read,
    Write,
    ReadWrite,
}

impl From<WirePermType> for Permission {
    fn from(perm: WirePermType) -> Self {
        match perm {
            WirePermType::Read => Permission::Read,
            WirePermType::Write => Permission::Write,
            WirePermType::ReadWrite => Permission::ReadWrite,
        }
    }
}

fn perm_type(permission: Permission) -> &'static str {
    match permission {
        Permission::Read => "READ",
        Permission::Write => "WRITE",
        Permission::ReadWrite => "READWRITE",
    }
}

#[derive(Debug, Deserialize)]
struct WirePermission {
    #[serde(rename = "permType", default)]
    perm_type: WirePermType,
    #[serde(default)]
    key: String,
    #[serde(default)]
    range_end: String,
}

#[derive(Debug, Deserialize)]
struct RoleGetResponse {
    #[serde(default)]
    perm: Vec<WirePermission>,
}

impl RoleGetResponse {
    fn into_permissions(self) -> StoreResult<Vec<RolePermission>> {
        self.perm
            .into_iter()
            .map(|p| {
                Ok(RolePermission::new(
                    p.perm_type.into(),
                    decode("permission key", &p.key)?,
                    decode("permission range end", &p.range_end)?,
                ))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RoleListResponse {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UserListResponse {
    #[serde(default)]
    users: Vec<String>,
}

fn range_body(range: &KeyRange) -> Value {
    // A single NUL byte as range end means "every key from `key` on".
    let range_end: &[u8] = if range.is_unbounded() { &[0] } else { &range.range_end };
    json!({ "key": encode(&range.key), "range_end": encode(range_end) })
}

fn txn_body(ops: &[TxnOp]) -> Value {
    let success: Vec<Value> = ops
        .iter()
        .map(|op| match op {
            TxnOp::Put { key, value } => json!({
                "request_put": { "key": encode(key.as_bytes()), "value": encode(value) }
            }),
            TxnOp::Delete { key } => json!({
                "request_delete_range": { "key": encode(key.as_bytes()) }
            }),
        })
        .collect();
    json!({ "success": success })
}

impl KeyValueStore for GatewayStore {
    fn get(&self, key: &str, timeout: Duration) -> StoreResult<Option<RangeKey>> {
        let response: RangeResponse =
            self.call("/v3/kv/range", json!({ "key": encode(key.as_bytes()) }), timeout)?;
        Ok(response.into_keys()?.into_iter().next())
    }

    fn get_range(&self, range: &KeyRange, timeout: Duration) -> StoreResult<Vec<RangeKey>> {
        let response: RangeResponse = self.call("/v3/kv/range", range_body(range), timeout)?;
        response.into_keys()
    }

    fn put(&self, key: &str, value: &[u8], timeout: Duration) -> StoreResult<()> {
        let body = json!({ "key": encode(key.as_bytes()), "value": encode(value) });
        self.call::<Value>("/v3/kv/put", body, timeout).map(drop)
    }

    fn delete(&self, key: &str, timeout: Duration) -> StoreResult<()> {
        let body = json!({ "key": encode(key.as_bytes()) });
        self.call::<Value>("/v3/kv/deleterange", body, timeout).map(drop)
    }

    fn delete_range(&self, range: &KeyRange, timeout: Duration) -> StoreResult<()> {
        self.call::<Value>("/v3/kv/deleterange", range_body(range), timeout)
            .map(drop)
    }

    fn transact(&self, ops: &[TxnOp], timeout: Duration) -> StoreResult<TxnOutcome> {
        let response: TxnResponse = self.call("/v3/kv/txn", txn_body(ops), timeout)?;
        Ok(if response.succeeded {
            TxnOutcome::Committed
        } else {
            TxnOutcome::Aborted
        })
    }
}

impl AuthStore for GatewayStore {
    fn auth_status(&self, timeout: Duration) -> StoreResult<bool> {
        let response: AuthStatusResponse = self.call("/v3/auth/status", json!({}), timeout)?;
        Ok(response.enabled)
    }

    fn set_auth_status(&self, enabled: bool, timeout: Duration) -> StoreResult<()> {
        let path = if enabled {
            "/v3/auth/enable"
        } else {
            "/v3/auth/disable"
        };
        self.call::<Value>(path, json!({}), timeout).map(drop)
    }

    fn list_roles(&self, timeout: Duration) -> StoreResult<Vec<String>> {
        let response: RoleListResponse = self.call("/v3/auth/role/list", json!({}), timeout)?;
        Ok(response.roles)
    }

    fn get_role(&self, name: &str, timeout: Duration) -> StoreResult<Vec<RolePermission>> {
        let response: RoleGetResponse =
            self.call("/v3/auth/role/get", json!({ "role": name }), timeout)?;
        response.into_permissions()
    }

    fn add_role(&self, name: &str, timeout: Duration) -> StoreResult<()> {
        self.call::<Value>("/v3/auth/role/add", json!({ "name": name }), timeout)
            .map(drop)
    }

    fn delete_role(&self, name: &str, timeout: Duration) -> StoreResult<()> {
        self.call::<Value>("/v3/auth/role/delete", json!({ "role": name }), timeout)
            .map(drop)
    }

    fn grant_role_permission(
        &self,
        name: &str,
        permission: &RolePermission,
        timeout: Duration,
    ) -> StoreResult<()> {
        let body = json!({
            "name": name,
            "perm": {
                "permType": perm_type(permission.permission),
                "key": encode(permission.key.as_bytes()),
                "range_end": encode(permission.range_end.as_bytes()),
            }
        });
        self.call::<Value>("/v3/auth/role/grant", body, timeout).map(drop)
    }

    fn revoke_role_permission(
        &self,
        name: &str,
        key: &str,
        range_end: &str,
        timeout: Duration,
    ) -> StoreResult<()> {
        let body = json!({
            "role": name,
            "key": encode(key.as_bytes()),
            "range_end": encode(range_end.as_bytes()),
        });
        self.call::<Value>("/v3/auth/role/revoke", body, timeout).map(drop)
    }

    fn list_users(&self, timeout: Duration) -> StoreResult<Vec<String>> {
        let response: UserListResponse = self.call("/v3/auth/user/list", json!({}), timeout)?;
        Ok(response.users)
    }

    fn get_user(&self, username: &str, timeout: Duration) -> StoreResult<Vec<String>> {
        let response: RoleListResponse =
            self.call("/v3/auth/user/get", json!({ "name": username }), timeout)?;
        Ok(response.roles)
    }

    fn add_user(&self, username: &str, password: &str, timeout: Duration) -> StoreResult<()> {
        let body = json!({ "name": username, "password": password });
        self.call::<Value>("/v3/auth/user/add", body, timeout).map(drop)
    }

    fn delete_user(&self, username: &str, timeout: Duration) -> StoreResult<()> {
        self.call::<Value>("/v3/auth/user/delete", json!({ "name": username }), timeout)
            .map(drop)
    }

    fn change_user_password(
        &self,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> StoreResult<()> {
        let body = json!({ "name": username, "password": password });
        self.call::<Value>("/v3/auth/user/changepw", body, timeout)
            .map(drop)
    }

    fn grant_user_role(&self, username: &str, role: &str, timeout: Duration) -> StoreResult<()> {
        let body = json!({ "user": username, "role": role });
        self.call::<Value>("/v3/auth/user/grant", body, timeout).map(drop)
    }

    fn revoke_user_role(&self, username: &str, role: &str, timeout: Duration) -> StoreResult<()> {
        let body = json!({ "name": username, "role": role });
        self.call::<Value>("/v3/auth/user/revoke", body, timeout).map(drop)
    }
}
