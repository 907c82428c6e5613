//! Chef node directory access
//!
//! Nodes come back either fully hydrated (every attribute level merged) or
//! partially hydrated from a partial search, where only the requested attribute
//! paths exist. The two shapes are distinct types so a partial node can never
//! be mistaken for a complete one.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::errors::{EntityKind, ResolveError, TransportError};

pub mod client;
pub mod credentials;
pub mod signing;

pub use client::ChefClient;

/// Attributes every partial search returns in addition to the requested ones.
pub const MINIMAL_ATTRIBUTES: [&str; 3] = ["cloud", "fqdn", "ipaddress"];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FullNode {
    pub name: String,
    pub chef_environment: String,
    pub run_list: Vec<String>,
    /// `default` < `normal` < `override` < `automatic`, deep merged.
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PartialNode {
    pub name: String,
    attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "hydration", rename_all = "snake_case")]
pub enum Node {
    Full(FullNode),
    Partial(PartialNode),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("attribute '{path}' was not loaded for partially hydrated node '{node}'")]
pub struct NotHydrated {
    pub node: String,
    pub path: String,
}

/// Node JSON as served by `GET /nodes/:name` and full search rows.
#[derive(Debug, Deserialize)]
pub(crate) struct RawNode {
    name: String,
    #[serde(default = "default_environment")]
    chef_environment: String,
    #[serde(default)]
    run_list: Vec<String>,
    #[serde(default)]
    default: Map<String, Value>,
    #[serde(default)]
    normal: Map<String, Value>,
    #[serde(default, rename = "override")]
    override_: Map<String, Value>,
    #[serde(default)]
    automatic: Map<String, Value>,
}

fn default_environment() -> String {
    "_default".to_string()
}

impl From<RawNode> for FullNode {
    fn from(raw: RawNode) -> Self {
        let mut attributes = raw.default;
        for level in [raw.normal, raw.override_, raw.automatic] {
            deep_merge(&mut attributes, level);
        }

        Self {
            name: raw.name,
            chef_environment: raw.chef_environment,
            run_list: raw.run_list,
            attributes,
        }
    }
}

fn deep_merge(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        let slot = base.entry(key).or_insert(Value::Null);
        match (slot, value) {
            (Value::Object(existing), Value::Object(incoming)) => deep_merge(existing, incoming),
            (slot, value) => *slot = value,
        }
    }
}

impl FullNode {
    /// Dotted-path lookup, e.g. `kernel.release`.
    pub fn attribute(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = self.attributes.get(segments.next()?)?;
        segments.try_fold(first, |value, segment| value.get(segment))
    }

    pub fn attribute_str(&self, path: &str) -> Option<&str> {
        self.attribute(path)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

impl PartialNode {
    pub fn new(name: impl Into<String>, attributes: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            attributes,
        }
    }

    pub fn attribute(&self, path: &str) -> Result<Option<&Value>, NotHydrated> {
        self.attributes
            .get(path)
            .map(|value| Some(value).filter(|value| !value.is_null()))
            .ok_or_else(|| NotHydrated {
                node: self.name.clone(),
                path: path.to_string(),
            })
    }

    pub fn attribute_keys(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Self::Full(node) => &node.name,
            Self::Partial(node) => &node.name,
        }
    }

    pub fn is_fully_hydrated(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AttributeFilter {
    #[default]
    Full,
    Only(Vec<String>),
}

impl AttributeFilter {
    /// An empty path list means the full attribute set.
    pub fn from_paths(paths: Vec<String>) -> Self {
        if paths.is_empty() {
            Self::Full
        } else {
            Self::Only(paths)
        }
    }
}

/// Keys requested by a partial search: the minimal set first, then the caller's
/// paths in order, without duplicates.
pub fn partial_search_keys(paths: &[String]) -> Vec<String> {
    let mut keys: Vec<String> = MINIMAL_ATTRIBUTES.iter().map(|key| key.to_string()).collect();
    for path in paths {
        if !keys.contains(path) {
            keys.push(path.clone());
        }
    }
    keys
}

#[async_trait]
pub trait NodeProvider: Send + Sync {
    /// Exact-name lookup; `None` when the node does not exist.
    async fn find_node(&self, name: &str) -> Result<Option<FullNode>, TransportError>;

    /// Search with the server's native `field:value` syntax, full attributes.
    async fn search_nodes(&self, query: &str) -> Result<Vec<FullNode>, TransportError>;

    /// Search returning only `paths` plus [`MINIMAL_ATTRIBUTES`].
    async fn partial_search_nodes(
        &self,
        query: &str,
        paths: &[String],
    ) -> Result<Vec<PartialNode>, TransportError>;

    async fn search(
        &self,
        query: &str,
        filter: &AttributeFilter,
    ) -> Result<Vec<Node>, TransportError> {
        Ok(match filter {
            AttributeFilter::Full => self
                .search_nodes(query)
                .await?
                .into_iter()
                .map(Node::Full)
                .collect(),
            AttributeFilter::Only(paths) => self
                .partial_search_nodes(query, paths)
                .await?
                .into_iter()
                .map(Node::Partial)
                .collect(),
        })
    }

    async fn reload_node(&self, node: &PartialNode) -> Result<FullNode, ResolveError> {
        self.find_node(&node.name)
            .await?
            .ok_or_else(|| ResolveError::SourceNotFound {
                kind: EntityKind::ChefNode,
                id: node.name.clone(),
                matches: 0,
            })
    }
}

/// Anything that can name a Chef node.
pub trait NodeName {
    fn node_name(&self) -> &str;
}

impl NodeName for str {
    fn node_name(&self) -> &str {
        self
    }
}

impl NodeName for String {
    fn node_name(&self) -> &str {
        self
    }
}

impl NodeName for FullNode {
    fn node_name(&self) -> &str {
        &self.name
    }
}

impl NodeName for PartialNode {
    fn node_name(&self) -> &str {
        &self.name
    }
}

impl NodeName for Node {
    fn node_name(&self) -> &str {
        self.name()
    }
}
