//! In-memory providers shared by the resolver and router tests

use std::{collections::HashMap, sync::Mutex, time::Duration};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::{
    chef::{partial_search_keys, FullNode, NodeProvider, PartialNode},
    errors::TransportError,
    zabbix::{HostInterface, HostPredicate, HostProvider, MonitoringHost},
};

pub(crate) fn host(host_id: &str, technical: &str, visible: &str, ips: &[&str]) -> MonitoringHost {
    MonitoringHost {
        host_id: host_id.to_string(),
        host: technical.to_string(),
        name: visible.to_string(),
        groups: vec![],
        interfaces: ips
            .iter()
            .map(|ip| HostInterface { ip: ip.to_string() })
            .collect(),
        parent_templates: vec![],
    }
}

pub(crate) fn node(name: &str, ipaddress: &str, fqdn: &str, hostname: &str) -> FullNode {
    let attributes: Map<String, Value> = json!({
        "ipaddress": ipaddress,
        "fqdn": fqdn,
        "hostname": hostname,
        "platform": "debian",
        "kernel": {"release": "6.1.0", "machine": "x86_64"}
    })
    .as_object()
    .cloned()
    .unwrap_or_default();

    FullNode {
        name: name.to_string(),
        chef_environment: "prod".to_string(),
        run_list: vec!["role[web]".to_string()],
        attributes,
    }
}

#[derive(Default)]
pub(crate) struct MockHosts {
    searches: HashMap<String, Vec<MonitoringHost>>,
    ids: HashMap<String, Vec<MonitoringHost>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl MockHosts {
    pub(crate) fn with_search(mut self, predicate: &str, hosts: Vec<MonitoringHost>) -> Self {
        self.searches.insert(predicate.to_string(), hosts);
        self
    }

    pub(crate) fn with_id(mut self, host_id: &str, hosts: Vec<MonitoringHost>) -> Self {
        self.ids.insert(host_id.to_string(), hosts);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

#[async_trait]
impl HostProvider for MockHosts {
    async fn find_hosts(
        &self,
        predicate: &HostPredicate,
    ) -> Result<Vec<MonitoringHost>, TransportError> {
        self.record(predicate.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .searches
            .get(&predicate.to_string())
            .cloned()
            .unwrap_or_default())
    }

    async fn hosts_by_id(&self, host_id: &str) -> Result<Vec<MonitoringHost>, TransportError> {
        self.record(format!("hostid={host_id}"));
        Ok(self.ids.get(host_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub(crate) struct MockNodes {
    nodes: Vec<FullNode>,
    searches: HashMap<String, Vec<String>>,
    calls: Mutex<Vec<String>>,
}

impl MockNodes {
    pub(crate) fn with_node(mut self, node: FullNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// `query` answers with the named nodes, in order.
    pub(crate) fn with_search(mut self, query: &str, names: &[&str]) -> Self {
        self.searches.insert(
            query.to_string(),
            names.iter().map(|name| name.to_string()).collect(),
        );
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn matching(&self, query: &str) -> Vec<FullNode> {
        self.searches
            .get(query)
            .into_iter()
            .flatten()
            .filter_map(|name| self.nodes.iter().find(|node| &node.name == name))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NodeProvider for MockNodes {
    async fn find_node(&self, name: &str) -> Result<Option<FullNode>, TransportError> {
        self.record(format!("node={name}"));
        Ok(self.nodes.iter().find(|node| node.name == name).cloned())
    }

    async fn search_nodes(&self, query: &str) -> Result<Vec<FullNode>, TransportError> {
        self.record(query.to_string());
        Ok(self.matching(query))
    }

    async fn partial_search_nodes(
        &self,
        query: &str,
        paths: &[String],
    ) -> Result<Vec<PartialNode>, TransportError> {
        self.record(format!("partial {query}"));
        let keys = partial_search_keys(paths);
        Ok(self
            .matching(query)
            .into_iter()
            .map(|node| {
                let attributes = keys
                    .iter()
                    .map(|key| {
                        let value = node.attribute(key).cloned().unwrap_or(Value::Null);
                        (key.clone(), value)
                    })
                    .collect();
                PartialNode::new(node.name, attributes)
            })
            .collect())
    }
}
