//! JSON-RPC control API of the metrics backend
//!
//! Used for item management and history lookups only; values are pushed through
//! a [`super::sender::ValueSender`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::SinkConfig;
use crate::util::item_key_params;

use super::error::{SinkError, SinkResult};

/// Trapper item type
const ITEM_TYPE_TRAPPER: u8 = 2;

/// Numeric unsigned value type, also the history table queried for it
const VALUE_TYPE_UNSIGNED: u8 = 3;

#[derive(Clone)]
enum Credentials {
    Token(String),
    Login { user: String, password: String },
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct HostRow {
    hostid: String,
}

#[derive(Debug, Default, Deserialize)]
struct ItemRow {
    #[serde(default)]
    itemid: String,
    #[serde(default)]
    lastvalue: Option<String>,
    #[serde(default)]
    prevvalue: Option<String>,
    #[serde(default)]
    lastclock: Option<String>,
}

impl ItemRow {
    /// Items that never received a value report a zero clock.
    fn has_data(&self) -> bool {
        self.lastclock.as_deref().is_none_or(|clock| clock != "0")
    }
}

#[derive(Debug, Deserialize)]
struct HistoryRow {
    value: String,
}

pub struct ControlApi {
    url: String,
    credentials: Credentials,
    client: reqwest::Client,

    /// Token from the last successful login, reused until the backend rejects it
    token: RwLock<Option<String>>,

    request_id: AtomicU64,
}

impl std::fmt::Debug for ControlApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlApi")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl ControlApi {
    pub fn new(config: &SinkConfig) -> SinkResult<Self> {
        let credentials = match (&config.api_token, &config.api_user, &config.api_password) {
            (Some(token), _, _) => Credentials::Token(token.clone()),
            (None, Some(user), Some(password)) => Credentials::Login {
                user: user.clone(),
                password: password.clone(),
            },
            _ => {
                return Err(SinkError::NotAuthenticated(String::from(
                    "neither API token nor user/password configured",
                )));
            }
        };

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .build()?;

        Ok(Self {
            url: config.api_url.clone(),
            credentials,
            client,
            token: RwLock::new(None),
            request_id: AtomicU64::new(1),
        })
    }

    /// Returns a usable token, logging in if none is cached.
    ///
    /// A failed login is not cached, so the next control-plane call tries again.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn authenticate(&self) -> SinkResult<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let mut cached = self.token.write().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let token = match &self.credentials {
            Credentials::Token(token) => token.clone(),
            Credentials::Login { user, password } => {
                let params = json!({ "username": user, "password": password });
                let token: String = self
                    .rpc("user.login", params, None)
                    .await
                    .and_then(|value| Ok(serde_json::from_value(value)?))
                    .map_err(|e| {
                        error!("control API login failed: {e}");
                        SinkError::NotAuthenticated(e.to_string())
                    })?;
                info!("logged in to control API as {user}");
                token
            }
        };

        *cached = Some(token.clone());
        Ok(token)
    }

    async fn invalidate_token(&self) {
        if matches!(self.credentials, Credentials::Login { .. }) {
            self.token.write().await.take();
        }
    }

    async fn rpc(&self, method: &str, params: Value, auth: Option<&str>) -> SinkResult<Value> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let mut body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        if let Some(token) = auth {
            body["auth"] = Value::String(token.to_string());
        }

        trace!("control API call {method} (id {id})");
        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(SinkError::Rpc {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Authenticated call; a rejected session drops the cached token.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> SinkResult<T> {
        let token = self.authenticate().await?;
        match self.rpc(method, params, Some(&token)).await {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(SinkError::Rpc {
                code,
                message,
                data,
            }) => {
                if is_session_error(&message, &data) {
                    warn!("control API session rejected, logging in again on next call");
                    self.invalidate_token().await;
                }
                Err(SinkError::Rpc {
                    code,
                    message,
                    data,
                })
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    pub async fn host_id(&self, host: &str) -> SinkResult<String> {
        let hosts: Vec<HostRow> = self
            .call(
                "host.get",
                json!({ "filter": { "host": host }, "output": ["hostid"] }),
            )
            .await?;

        hosts
            .into_iter()
            .next()
            .map(|row| row.hostid)
            .ok_or_else(|| SinkError::HostNotFound(host.to_string()))
    }

    async fn find_item(&self, host: &str, key: &str, output: &[&str]) -> SinkResult<Option<ItemRow>> {
        let items: Vec<ItemRow> = self
            .call(
                "item.get",
                json!({ "host": host, "filter": { "key_": key }, "output": output }),
            )
            .await?;
        Ok(items.into_iter().next())
    }

    #[instrument(skip(self))]
    pub async fn item_exists(&self, host: &str, key: &str) -> SinkResult<bool> {
        Ok(self.find_item(host, key, &["itemid"]).await?.is_some())
    }

    /// Creates a trapper item and returns its id.
    ///
    /// Without an explicit `name` one is derived from the bracketed key parameters.
    #[instrument(skip(self))]
    pub async fn create_item(&self, host: &str, key: &str, name: Option<&str>) -> SinkResult<String> {
        let host_id = self.host_id(host).await?;
        let template = ItemTemplate::for_key(key);

        #[derive(Deserialize)]
        struct Created {
            itemids: Vec<String>,
        }

        let created: Created = self
            .call(
                "item.create",
                json!({
                    "hostid": host_id,
                    "name": name.map(str::to_string).unwrap_or(template.name),
                    "key_": key,
                    "type": ITEM_TYPE_TRAPPER,
                    "value_type": VALUE_TYPE_UNSIGNED,
                    "delay": "0",
                    "history": "7d",
                    "trends": "90d",
                    "units": template.units,
                    "description": "Queue metric pushed by queuewatch",
                }),
            )
            .await?;

        let item_id = created.itemids.into_iter().next().ok_or_else(|| SinkError::Rpc {
            code: 0,
            message: String::from("item.create returned no item id"),
            data: key.to_string(),
        })?;
        info!("created item {key} on host {host} (id {item_id})");
        Ok(item_id)
    }

    /// Most recent value, `None` if the item is missing or has never received data.
    #[instrument(skip(self))]
    pub async fn get_last_value(&self, host: &str, key: &str) -> SinkResult<Option<i64>> {
        let item = self
            .find_item(host, key, &["itemid", "lastvalue", "lastclock"])
            .await?;

        Ok(item
            .filter(ItemRow::has_data)
            .and_then(|item| item.lastvalue.as_deref().and_then(parse_numeric)))
    }

    /// The two newest values `(latest, previous)`.
    ///
    /// History rows are preferred; without any the item's cached last/previous
    /// fields are used.
    #[instrument(skip(self))]
    pub async fn get_last_two_values(
        &self,
        host: &str,
        key: &str,
    ) -> SinkResult<(Option<i64>, Option<i64>)> {
        let Some(item) = self
            .find_item(host, key, &["itemid", "lastvalue", "prevvalue", "lastclock"])
            .await?
        else {
            debug!("item {key} not found on host {host}");
            return Ok((None, None));
        };

        let history: Vec<HistoryRow> = self
            .call(
                "history.get",
                json!({
                    "itemids": [item.itemid],
                    "history": VALUE_TYPE_UNSIGNED,
                    "sortfield": "clock",
                    "sortorder": "DESC",
                    "limit": 2,
                }),
            )
            .await?;

        if history.is_empty() {
            if !item.has_data() {
                return Ok((None, None));
            }
            return Ok((
                item.lastvalue.as_deref().and_then(parse_numeric),
                item.prevvalue.as_deref().and_then(parse_numeric),
            ));
        }

        let mut values = history.iter().map(|row| parse_numeric(&row.value));
        Ok((values.next().flatten(), values.next().flatten()))
    }
}

fn is_session_error(message: &str, data: &str) -> bool {
    [message, data].iter().any(|text| {
        let text = text.to_lowercase();
        text.contains("re-login") || text.contains("not authorized") || text.contains("not authorised")
    })
}

/// Parses a backend value string, rounding float representations.
fn parse_numeric(value: &str) -> Option<i64> {
    let value = value.trim();
    value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v.round() as i64))
}

/// Display name and units for a newly created item
#[derive(Debug, PartialEq, Eq)]
struct ItemTemplate {
    name: String,
    units: &'static str,
}

impl ItemTemplate {
    fn for_key(key: &str) -> Self {
        let metric = key
            .split('[')
            .next()
            .and_then(|base| base.rsplit('.').next())
            .unwrap_or(key);

        let units = match metric {
            "size" => "messages",
            "consumers" => "consumers",
            _ => "",
        };

        let name = match item_key_params(key).as_deref() {
            Some([vhost, queue, ..]) => format!("Queue {metric}: {vhost}/{queue}"),
            _ => format!("Queue metric: {key}"),
        };

        Self { name, units }
    }
}
