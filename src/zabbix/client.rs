use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{ApiDialect, HostPredicate, HostProvider, MonitoringHost};
use crate::{
    config::{ConfigError, ZabbixConfig},
    errors::TransportError,
};

const SYSTEM: &str = "zabbix";
const CONTENT_TYPE: &str = "application/json-rpc";

/// JSON-RPC client for a single Zabbix frontend.
///
/// The session is established on first use and reused for the lifetime of the
/// client. Login is attempted without HTTP credentials first; only an HTTP 401
/// from the web server triggers a second attempt with basic auth, and every
/// later request then carries those credentials too.
pub struct ZabbixClient {
    http: reqwest::Client,
    config: ZabbixConfig,
    dialect: ApiDialect,
    session: OnceCell<Session>,
    next_id: AtomicU64,
}

#[derive(Debug)]
struct Session {
    token: String,
    basic_auth: bool,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a Value,
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Value,
}

impl ZabbixClient {
    pub fn new(config: ZabbixConfig, timeout: Duration) -> Result<Self, ConfigError> {
        url::Url::parse(&config.url).map_err(|_| ConfigError::InvalidUrl(config.url.clone()))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ConfigError::InvalidUrl(format!("{}: {err}", config.url)))?;
        let dialect = ApiDialect::for_version(config.version);

        info!(url = %config.url, version = %config.version, dialect = ?dialect, "zabbix client configured");

        Ok(Self {
            http,
            config,
            dialect,
            session: OnceCell::new(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn dialect(&self) -> ApiDialect {
        self.dialect
    }

    /// Authenticated call of an arbitrary API method.
    pub async fn query(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let session = self.session().await?;
        self.call(method, &params, Some(&session.token), session.basic_auth)
            .await
    }

    async fn session(&self) -> Result<&Session, TransportError> {
        self.session.get_or_try_init(|| self.login()).await
    }

    async fn login(&self) -> Result<Session, TransportError> {
        let params = self
            .dialect
            .login_params(&self.config.user, &self.config.password);

        debug!(user = %self.config.user, "logging in to zabbix");
        let (result, basic_auth) = match self.call("user.login", &params, None, false).await {
            Ok(result) => (result, false),
            Err(TransportError::Status { status, .. }) if status == StatusCode::UNAUTHORIZED.as_u16() => {
                warn!(
                    http_user = %self.config.http_user(),
                    "zabbix frontend requires http authentication, retrying login with basic auth"
                );
                if self.dialect.token_in_header() {
                    // servers from 7.2 reject the body token this falls back to
                    warn!(
                        version = %self.config.version,
                        "session token will travel in the request body alongside basic auth"
                    );
                }
                (self.call("user.login", &params, None, true).await?, true)
            }
            Err(err) => return Err(err),
        };

        let token = result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TransportError::Decode {
                system: SYSTEM,
                message: "user.login did not return a session token".to_string(),
            })?;

        info!(basic_auth, "zabbix session established");
        Ok(Session { token, basic_auth })
    }

    async fn call(
        &self,
        method: &str,
        params: &Value,
        token: Option<&str>,
        basic_auth: bool,
    ) -> Result<Value, TransportError> {
        // The Authorization header is taken by basic auth, so the token falls back to the body.
        let token_in_header = self.dialect.token_in_header() && !basic_auth;
        let envelope = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            auth: token.filter(|_| !token_in_header),
        };

        let mut request = self
            .http
            .post(&self.config.url)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .json(&envelope);
        if basic_auth {
            request = request.basic_auth(self.config.http_user(), Some(self.config.http_password()));
        }
        if let Some(token) = token.filter(|_| token_in_header) {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                system: SYSTEM,
                status: status.as_u16(),
                body,
            });
        }

        let payload: RpcResponse = response.json().await.map_err(|err| TransportError::Decode {
            system: SYSTEM,
            message: err.to_string(),
        })?;

        if let Some(error) = payload.error {
            return Err(TransportError::Rpc {
                code: error.code,
                message: error.message,
                data: match error.data {
                    Value::String(data) => data,
                    Value::Null => String::new(),
                    other => other.to_string(),
                },
            });
        }

        payload.result.ok_or_else(|| TransportError::Decode {
            system: SYSTEM,
            message: format!("{method} response has neither result nor error"),
        })
    }

    async fn host_get(&self, params: Value) -> Result<Vec<MonitoringHost>, TransportError> {
        let result = self.query("host.get", params).await?;
        let hosts: Vec<MonitoringHost> =
            serde_json::from_value(result).map_err(|err| TransportError::Decode {
                system: SYSTEM,
                message: format!("host.get result: {err}"),
            })?;

        Ok(hosts.into_iter().map(MonitoringHost::normalized).collect())
    }
}

#[async_trait]
impl HostProvider for ZabbixClient {
    async fn find_hosts(
        &self,
        predicate: &HostPredicate,
    ) -> Result<Vec<MonitoringHost>, TransportError> {
        let hosts = self.host_get(host_search_params(predicate)).await?;
        debug!(predicate = %predicate, matches = hosts.len(), "zabbix host search");
        Ok(hosts)
    }

    async fn hosts_by_id(&self, host_id: &str) -> Result<Vec<MonitoringHost>, TransportError> {
        self.host_get(host_id_params(host_id)).await
    }
}

pub(crate) fn host_search_params(predicate: &HostPredicate) -> Value {
    json!({
        "search": { predicate.field.as_str(): predicate.value },
        "output": ["hostid", "host", "name"],
        "selectGroups": ["groupid", "name"],
        "selectInterfaces": ["ip"],
        "selectParentTemplates": ["templateid", "host"],
    })
}

pub(crate) fn host_id_params(host_id: &str) -> Value {
    json!({
        "hostids": host_id,
        "output": ["hostid", "host", "name"],
        "selectInterfaces": ["ip"],
    })
}
