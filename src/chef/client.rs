use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use url::Url;

use super::{
    credentials::ChefCredentials, partial_search_keys, signing::RequestSigner, FullNode,
    NodeProvider, PartialNode, RawNode,
};
use crate::{
    config::{ChefConfig, ConfigError},
    errors::TransportError,
};

const SYSTEM: &str = "chef";
const CHEF_VERSION: &str = "18.0.0";
const SEARCH_PAGE_ROWS: usize = 1000;

/// Signed REST client for one Chef server organisation.
pub struct ChefClient {
    http: reqwest::Client,
    base_url: Url,
    signer: RequestSigner,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct SearchPage<T> {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    rows: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PartialRow {
    #[serde(default)]
    data: Map<String, Value>,
}

impl ChefClient {
    pub fn from_config(config: &ChefConfig, timeout: Duration) -> Result<Self, ConfigError> {
        let credentials = ChefCredentials::load(config)?;
        info!(
            source = %credentials.source.display(),
            server_url = %credentials.server_url,
            client_name = %credentials.client_name,
            "chef credentials loaded"
        );
        Self::new(&credentials, timeout)
    }

    pub fn new(credentials: &ChefCredentials, timeout: Duration) -> Result<Self, ConfigError> {
        let base_url = Url::parse(&credentials.server_url)
            .map_err(|_| ConfigError::InvalidUrl(credentials.server_url.clone()))?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl(credentials.server_url.clone()));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ConfigError::InvalidUrl(format!("{}: {err}", credentials.server_url)))?;

        Ok(Self {
            http,
            base_url,
            signer: RequestSigner::new(&credentials.client_name, &credentials.client_key_pem)?,
        })
    }

    fn endpoint(&self, segments: &[&str], query: &[(&str, String)]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(key, value)| (*key, value.as_str())));
        }
        url
    }

    /// Signed request; `Ok(None)` on 404.
    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Option<T>, TransportError> {
        let payload = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|err| TransportError::Decode {
                system: SYSTEM,
                message: format!("request body: {err}"),
            })?
            .unwrap_or_default();
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let auth_headers = self
            .signer
            .sign(method.as_str(), url.path(), &payload, &timestamp)?;

        let mut request = self
            .http
            .request(method, url.clone())
            .header(header::ACCEPT, "application/json")
            .header("X-Chef-Version", CHEF_VERSION);
        for (name, value) in auth_headers {
            request = request.header(name, value);
        }
        if body.is_some() {
            request = request
                .header(header::CONTENT_TYPE, "application/json")
                .body(payload);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                system: SYSTEM,
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|err| TransportError::Decode {
                system: SYSTEM,
                message: format!("{}: {err}", url.path()),
            })
    }

    /// Collects every page of a node search.
    async fn search_all<T: DeserializeOwned>(
        &self,
        method: Method,
        query: &str,
        body: Option<&Value>,
    ) -> Result<Vec<T>, TransportError> {
        let mut rows = Vec::new();
        loop {
            let url = self.endpoint(
                &["search", "node"],
                &[
                    ("q", query.to_string()),
                    ("start", rows.len().to_string()),
                    ("rows", SEARCH_PAGE_ROWS.to_string()),
                ],
            );
            let page: SearchPage<T> = self
                .send(method.clone(), url, body)
                .await?
                .ok_or_else(|| TransportError::Decode {
                    system: SYSTEM,
                    message: "node search index not found".to_string(),
                })?;

            let fetched = page.rows.len();
            rows.extend(page.rows);
            if fetched == 0 || rows.len() >= page.total {
                break;
            }
        }

        debug!(query = %query, matches = rows.len(), "chef node search");
        Ok(rows)
    }
}

/// Partial search body: each key maps to its attribute path segments.
pub(crate) fn partial_search_body(paths: &[String]) -> Value {
    let mut body = Map::new();
    body.insert("name".to_string(), Value::from(vec!["name"]));
    for key in partial_search_keys(paths) {
        let segments: Vec<Value> = key.split('.').map(Value::from).collect();
        body.insert(key, Value::Array(segments));
    }
    Value::Object(body)
}

#[async_trait]
impl NodeProvider for ChefClient {
    async fn find_node(&self, name: &str) -> Result<Option<FullNode>, TransportError> {
        let url = self.endpoint(&["nodes", name], &[]);
        let node: Option<RawNode> = self.send(Method::GET, url, None).await?;
        Ok(node.map(FullNode::from))
    }

    async fn search_nodes(&self, query: &str) -> Result<Vec<FullNode>, TransportError> {
        let rows: Vec<RawNode> = self.search_all(Method::GET, query, None).await?;
        Ok(rows.into_iter().map(FullNode::from).collect())
    }

    async fn partial_search_nodes(
        &self,
        query: &str,
        paths: &[String],
    ) -> Result<Vec<PartialNode>, TransportError> {
        let body = partial_search_body(paths);
        let keys = partial_search_keys(paths);
        let rows: Vec<PartialRow> = self.search_all(Method::POST, query, Some(&body)).await?;

        rows.into_iter()
            .map(|mut row| -> Result<PartialNode, TransportError> {
                // `name` may also be a requested attribute, so it stays in the row
                let name = row
                    .data
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| TransportError::Decode {
                        system: SYSTEM,
                        message: "partial search row without a node name".to_string(),
                    })?;
                let attributes: BTreeMap<String, Value> = keys
                    .iter()
                    .map(|key| (key.clone(), row.data.remove(key).unwrap_or(Value::Null)))
                    .collect();
                Ok(PartialNode::new(name, attributes))
            })
            .collect()
    }
}
