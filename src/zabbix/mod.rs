//! Zabbix host registry access
//!
//! Normalises `host.get` responses into [`MonitoringHost`] records and hides the
//! JSON-RPC dialect differences between server versions behind [`HostProvider`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{EntityKind, ResolveError, TransportError};

pub mod client;
pub mod dialect;

pub use client::ZabbixClient;
pub use dialect::ApiDialect;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitoringHost {
    #[serde(rename = "hostid")]
    pub host_id: String,
    pub host: String,
    /// Visible name; Zabbix reports the technical name when none is set.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub groups: Vec<HostGroup>,
    #[serde(default)]
    pub interfaces: Vec<HostInterface>,
    #[serde(default, rename = "parentTemplates")]
    pub parent_templates: Vec<ParentTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostGroup {
    #[serde(rename = "groupid")]
    pub group_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostInterface {
    #[serde(default)]
    pub ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParentTemplate {
    #[serde(rename = "templateid")]
    pub template_id: String,
    pub host: String,
}

impl MonitoringHost {
    pub(crate) fn normalized(mut self) -> Self {
        if self.name.trim().is_empty() {
            self.name = self.host.clone();
        }
        self
    }

    /// Non-empty interface addresses in interface order.
    pub fn interface_ips(&self) -> impl Iterator<Item = &str> {
        self.interfaces
            .iter()
            .map(|iface| iface.ip.trim())
            .filter(|ip| !ip.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostField {
    Name,
    Ip,
    Host,
}

impl HostField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Ip => "ip",
            Self::Host => "host",
        }
    }
}

/// Single-field `host.get` search criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPredicate {
    pub field: HostField,
    pub value: String,
}

impl HostPredicate {
    pub fn new(field: HostField, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}

impl fmt::Display for HostPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.field.as_str(), self.value)
    }
}

#[async_trait]
pub trait HostProvider: Send + Sync {
    /// Hosts matching the predicate with the server's own search semantics.
    async fn find_hosts(
        &self,
        predicate: &HostPredicate,
    ) -> Result<Vec<MonitoringHost>, TransportError>;

    /// Raw id lookup; callers wanting a single host use [`HostProvider::find_host_by_id`].
    async fn hosts_by_id(&self, host_id: &str) -> Result<Vec<MonitoringHost>, TransportError>;

    async fn find_host_by_id(&self, host_id: &str) -> Result<MonitoringHost, ResolveError> {
        let mut hosts = self.hosts_by_id(host_id).await?;
        if hosts.len() != 1 {
            return Err(ResolveError::SourceNotFound {
                kind: EntityKind::ZabbixHost,
                id: host_id.to_string(),
                matches: hosts.len(),
            });
        }

        Ok(hosts.remove(0))
    }
}

/// Anything that can name a Zabbix host id.
pub trait HostId {
    fn host_id(&self) -> &str;
}

impl HostId for str {
    fn host_id(&self) -> &str {
        self
    }
}

impl HostId for String {
    fn host_id(&self) -> &str {
        self
    }
}

impl HostId for MonitoringHost {
    fn host_id(&self) -> &str {
        &self.host_id
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_host_get_payload_and_defaults_name() {
        let host: MonitoringHost = serde_json::from_value(json!({
            "hostid": "1234",
            "host": "node.domain.net",
            "name": "",
            "groups": [{"groupid": "5", "name": "Discovered hosts"}],
            "parentTemplates": [{"templateid": "13160", "host": "My Linux Template"}],
            "interfaces": [{"ip": "10.190.158.48"}, {"ip": ""}]
        }))
        .expect("valid host payload");
        let host = host.normalized();

        assert_eq!(host.host_id, "1234");
        assert_eq!(host.name, "node.domain.net");
        assert_eq!(host.groups[0].name, "Discovered hosts");
        assert_eq!(host.parent_templates[0].template_id, "13160");
        assert_eq!(host.interface_ips().collect::<Vec<_>>(), vec!["10.190.158.48"]);
    }

    #[test]
    fn reduced_payload_decodes_without_groups_or_templates() {
        let host: MonitoringHost = serde_json::from_value(json!({
            "hostid": "7",
            "host": "db01",
            "name": "Database 01",
            "interfaces": []
        }))
        .expect("valid reduced payload");

        assert!(host.groups.is_empty());
        assert!(host.parent_templates.is_empty());
        assert_eq!(host.normalized().name, "Database 01");
    }

    #[test]
    fn predicate_display_is_field_equals_value() {
        assert_eq!(
            HostPredicate::new(HostField::Ip, "10.0.0.5").to_string(),
            "ip=10.0.0.5"
        );
    }
}
