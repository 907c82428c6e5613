//! Chef node <-> Zabbix host resolution
//!
//! Each direction builds an ordered list of single-field predicates from the
//! source entity and queries the other system one predicate at a time. The
//! first predicate matching exactly one entity wins; zero or several matches
//! move on to the next predicate, and nothing is ever guessed.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    chef::{AttributeFilter, FullNode, Node, NodeName, NodeProvider},
    errors::{EntityKind, PredicateAttempt, ResolveError, TransportError},
    zabbix::{HostField, HostId, HostPredicate, HostProvider, MonitoringHost},
};

/// Chef search criterion, rendered as `field:value` with the value escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePredicate {
    pub field: &'static str,
    pub value: String,
}

impl NodePredicate {
    fn new(field: &'static str, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }

    pub fn query(&self) -> String {
        format!("{}:{}", self.field, escape_query_value(&self.value))
    }
}

impl fmt::Display for NodePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query())
    }
}

/// Backslash-escapes characters the search query syntax treats specially.
pub fn escape_query_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for character in value.chars() {
        if character.is_whitespace() || "+-&|!(){}[]^\"~*?:\\/".contains(character) {
            escaped.push('\\');
        }
        escaped.push(character);
    }
    escaped
}

/// Zabbix searches for a node, most specific identifier first.
pub fn host_predicates(node: &FullNode) -> Vec<HostPredicate> {
    let mut predicates = vec![HostPredicate::new(HostField::Name, node.name.clone())];
    predicates.extend(
        [
            (HostField::Ip, "ipaddress"),
            (HostField::Host, "fqdn"),
            (HostField::Host, "hostname"),
        ]
        .into_iter()
        .filter_map(|(field, path)| {
            node.attribute_str(path)
                .map(|value| HostPredicate::new(field, value))
        }),
    );
    predicates
}

/// Chef searches for a host: visible name, every interface address, then the
/// technical name as fqdn and as short hostname.
pub fn node_predicates(host: &MonitoringHost) -> Vec<NodePredicate> {
    let mut predicates = Vec::new();
    if !host.name.trim().is_empty() {
        predicates.push(NodePredicate::new("name", host.name.trim()));
    }
    predicates.extend(
        host.interface_ips()
            .map(|ip| NodePredicate::new("ipaddress", ip)),
    );
    if !host.host.trim().is_empty() {
        predicates.push(NodePredicate::new("fqdn", host.host.trim()));
        predicates.push(NodePredicate::new("hostname", host.host.trim()));
    }
    predicates
}

pub struct Resolver {
    hosts: Arc<dyn HostProvider>,
    nodes: Arc<dyn NodeProvider>,
    round_trip_timeout: Option<Duration>,
}

impl Resolver {
    pub fn new(hosts: Arc<dyn HostProvider>, nodes: Arc<dyn NodeProvider>) -> Self {
        Self {
            hosts,
            nodes,
            round_trip_timeout: None,
        }
    }

    /// Bounds every individual remote call, not the resolution as a whole.
    pub fn with_round_trip_timeout(mut self, timeout: Duration) -> Self {
        self.round_trip_timeout = Some(timeout);
        self
    }

    async fn round_trip<T, E>(
        &self,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, ResolveError>
    where
        ResolveError: From<E>,
    {
        let Some(limit) = self.round_trip_timeout else {
            return Ok(call.await?);
        };

        match tokio::time::timeout(limit, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TransportError::Timeout(limit).into()),
        }
    }

    pub async fn resolve_node_to_host<N>(&self, node: &N) -> Result<MonitoringHost, ResolveError>
    where
        N: NodeName + ?Sized,
    {
        let name = node.node_name();
        let node = self
            .round_trip(self.nodes.find_node(name))
            .await?
            .ok_or_else(|| ResolveError::SourceNotFound {
                kind: EntityKind::ChefNode,
                id: name.to_string(),
                matches: 0,
            })?;

        self.host_for_node(&node).await
    }

    async fn host_for_node(&self, node: &FullNode) -> Result<MonitoringHost, ResolveError> {
        let mut attempts = Vec::new();
        for predicate in host_predicates(node) {
            let mut hosts = self.round_trip(self.hosts.find_hosts(&predicate)).await?;
            debug!(node = %node.name, predicate = %predicate, matches = hosts.len(), "host predicate evaluated");

            if hosts.len() == 1 {
                let host = hosts.remove(0);
                info!(node = %node.name, host_id = %host.host_id, predicate = %predicate, "node resolved to zabbix host");
                return Ok(host);
            }
            attempts.push(PredicateAttempt {
                predicate: predicate.to_string(),
                matches: hosts.len(),
            });
        }

        warn!(node = %node.name, attempts = attempts.len(), "no unique zabbix host for node");
        Err(ResolveError::AmbiguousOrNoMatch {
            target: EntityKind::ZabbixHost,
            attempts,
        })
    }

    pub async fn resolve_host_to_node<H>(
        &self,
        host: &H,
        filter: &AttributeFilter,
    ) -> Result<Node, ResolveError>
    where
        H: HostId + ?Sized,
    {
        let host = self
            .round_trip(self.hosts.find_host_by_id(host.host_id()))
            .await?;

        let mut attempts = Vec::new();
        for predicate in node_predicates(&host) {
            let query = predicate.query();
            let mut nodes = self.round_trip(self.nodes.search(&query, filter)).await?;
            debug!(host_id = %host.host_id, predicate = %query, matches = nodes.len(), "node predicate evaluated");

            if nodes.len() == 1 {
                let node = nodes.remove(0);
                info!(host_id = %host.host_id, node = %node.name(), predicate = %query, "zabbix host resolved to node");
                return Ok(node);
            }
            attempts.push(PredicateAttempt {
                predicate: query,
                matches: nodes.len(),
            });
        }

        warn!(host_id = %host.host_id, attempts = attempts.len(), "no unique chef node for host");
        Err(ResolveError::AmbiguousOrNoMatch {
            target: EntityKind::ChefNode,
            attempts,
        })
    }

    /// Resolves every node matched by `query`, in search order. The first node
    /// that fails to resolve aborts the whole batch.
    pub async fn resolve_query_to_hosts(
        &self,
        query: &str,
    ) -> Result<Vec<MonitoringHost>, ResolveError> {
        let nodes = self.round_trip(self.nodes.search_nodes(query)).await?;
        if nodes.is_empty() {
            return Err(ResolveError::EmptyQueryResult {
                query: query.to_string(),
            });
        }

        let mut hosts = Vec::with_capacity(nodes.len());
        for node in &nodes {
            hosts.push(self.host_for_node(node).await?);
        }
        Ok(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{host, node, MockHosts, MockNodes};

    fn web01() -> FullNode {
        node("web01", "10.0.0.5", "web01.prod.example.com", "web01")
    }

    fn resolver(hosts: &Arc<MockHosts>, nodes: &Arc<MockNodes>) -> Resolver {
        Resolver::new(hosts.clone(), nodes.clone())
    }

    #[tokio::test]
    async fn unique_name_match_short_circuits() {
        let hosts = Arc::new(
            MockHosts::default()
                .with_search("name=web01", vec![host("1", "web01", "web01", &["10.0.0.5"])])
                .with_search("ip=10.0.0.5", vec![host("2", "other", "other", &[])]),
        );
        let nodes = Arc::new(MockNodes::default().with_node(web01()));

        let resolved = resolver(&hosts, &nodes)
            .resolve_node_to_host("web01")
            .await
            .expect("resolves");

        assert_eq!(resolved.host_id, "1");
        assert_eq!(hosts.calls(), vec!["name=web01"]);
        assert_eq!(nodes.calls(), vec!["node=web01"]);
    }

    #[tokio::test]
    async fn falls_back_to_ip_when_name_has_no_match() {
        let hosts = Arc::new(
            MockHosts::default()
                .with_search("ip=10.0.0.5", vec![host("2", "10.0.0.5", "", &["10.0.0.5"])])
                .with_search(
                    "host=web01.prod.example.com",
                    vec![host("3", "web01.prod.example.com", "", &[])],
                ),
        );
        let nodes = Arc::new(MockNodes::default().with_node(web01()));

        let resolved = resolver(&hosts, &nodes)
            .resolve_node_to_host(&web01())
            .await
            .expect("resolves");

        assert_eq!(resolved.host_id, "2");
        assert_eq!(hosts.calls(), vec!["name=web01", "ip=10.0.0.5"]);
    }

    #[tokio::test]
    async fn skips_ambiguous_predicates() {
        let hosts = Arc::new(
            MockHosts::default()
                .with_search(
                    "name=web01",
                    vec![host("1", "web01a", "", &[]), host("2", "web01b", "", &[])],
                )
                .with_search("host=web01", vec![host("4", "web01", "", &[])]),
        );
        let nodes = Arc::new(MockNodes::default().with_node(web01()));

        let resolved = resolver(&hosts, &nodes)
            .resolve_node_to_host("web01")
            .await
            .expect("resolves");

        assert_eq!(resolved.host_id, "4");
        assert_eq!(hosts.calls().len(), 4);
    }

    #[tokio::test]
    async fn reports_every_attempt_when_nothing_is_unique() {
        let hosts = Arc::new(MockHosts::default().with_search(
            "ip=10.0.0.5",
            vec![host("1", "a", "", &[]), host("2", "b", "", &[])],
        ));
        let nodes = Arc::new(MockNodes::default().with_node(web01()));

        let err = resolver(&hosts, &nodes)
            .resolve_node_to_host("web01")
            .await
            .expect_err("nothing unique");

        match err {
            ResolveError::AmbiguousOrNoMatch { target, attempts } => {
                assert_eq!(target, EntityKind::ZabbixHost);
                let tried: Vec<(&str, usize)> = attempts
                    .iter()
                    .map(|attempt| (attempt.predicate.as_str(), attempt.matches))
                    .collect();
                assert_eq!(
                    tried,
                    vec![
                        ("name=web01", 0),
                        ("ip=10.0.0.5", 2),
                        ("host=web01.prod.example.com", 0),
                        ("host=web01", 0),
                    ]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_node_is_source_not_found() {
        let hosts = Arc::new(MockHosts::default());
        let nodes = Arc::new(MockNodes::default());

        let err = resolver(&hosts, &nodes)
            .resolve_node_to_host("ghost")
            .await
            .expect_err("node does not exist");

        assert!(matches!(
            err,
            ResolveError::SourceNotFound {
                kind: EntityKind::ChefNode,
                matches: 0,
                ..
            }
        ));
        assert!(hosts.calls().is_empty());
    }

    #[tokio::test]
    async fn absent_attributes_produce_no_predicates() {
        let mut bare = web01();
        bare.attributes.remove("ipaddress");
        bare.attributes.remove("hostname");

        let predicates: Vec<String> = host_predicates(&bare)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(predicates, vec!["name=web01", "host=web01.prod.example.com"]);
    }

    #[test]
    fn node_predicates_cover_every_interface() {
        let host = host(
            "10084",
            "web01.prod.example.com",
            "Web 01",
            &["10.0.0.5", "", "192.168.1.5"],
        );

        let queries: Vec<String> = node_predicates(&host).iter().map(NodePredicate::query).collect();
        assert_eq!(
            queries,
            vec![
                "name:Web\\ 01",
                "ipaddress:10.0.0.5",
                "ipaddress:192.168.1.5",
                "fqdn:web01.prod.example.com",
                "hostname:web01.prod.example.com",
            ]
        );
    }

    #[test]
    fn escapes_query_syntax() {
        assert_eq!(escape_query_value("fe80::1"), "fe80\\:\\:1");
        assert_eq!(escape_query_value("web-01"), "web\\-01");
        assert_eq!(escape_query_value("web01"), "web01");
    }

    #[tokio::test]
    async fn host_resolves_to_partially_hydrated_node() {
        let hosts = Arc::new(MockHosts::default().with_id(
            "10084",
            vec![host("10084", "web01.prod.example.com", "web01", &["10.0.0.5"])],
        ));
        let nodes = Arc::new(
            MockNodes::default()
                .with_node(web01())
                .with_search("name:web01", &["web01"]),
        );

        let resolved = resolver(&hosts, &nodes)
            .resolve_host_to_node("10084", &AttributeFilter::from_paths(vec!["kernel.release".to_string()]))
            .await
            .expect("resolves");

        match resolved {
            Node::Partial(partial) => {
                assert_eq!(partial.name, "web01");
                assert_eq!(
                    partial.attribute_keys().collect::<Vec<_>>(),
                    vec!["cloud", "fqdn", "ipaddress", "kernel.release"]
                );
                assert!(partial.attribute("platform").is_err());
            }
            Node::Full(_) => panic!("expected a partially hydrated node"),
        }
        assert_eq!(nodes.calls(), vec!["partial name:web01"]);
    }

    #[tokio::test]
    async fn partial_node_reloads_into_full_node() {
        let hosts = Arc::new(MockHosts::default().with_id(
            "10084",
            vec![host("10084", "web01.prod.example.com", "web01", &["10.0.0.5"])],
        ));
        let nodes = Arc::new(
            MockNodes::default()
                .with_node(web01())
                .with_search("name:web01", &["web01"]),
        );

        let resolved = resolver(&hosts, &nodes)
            .resolve_host_to_node("10084", &AttributeFilter::from_paths(vec!["platform".to_string()]))
            .await
            .expect("resolves");
        let Node::Partial(partial) = resolved else {
            panic!("expected a partially hydrated node");
        };

        let full = nodes.reload_node(&partial).await.expect("reload");
        assert_eq!(full.attribute_str("kernel.release"), Some("6.1.0"));
        assert_eq!(full.chef_environment, "prod");
    }

    #[tokio::test]
    async fn host_to_node_falls_through_interfaces_in_order() {
        let hosts = Arc::new(MockHosts::default().with_id(
            "10084",
            vec![host("10084", "web01.prod.example.com", "Web 01", &["172.16.0.9", "10.0.0.5"])],
        ));
        let nodes = Arc::new(
            MockNodes::default()
                .with_node(web01())
                .with_search("ipaddress:10.0.0.5", &["web01"]),
        );

        let resolved = resolver(&hosts, &nodes)
            .resolve_host_to_node("10084", &AttributeFilter::Full)
            .await
            .expect("resolves");

        assert!(resolved.is_fully_hydrated());
        assert_eq!(resolved.name(), "web01");
        assert_eq!(
            nodes.calls(),
            vec!["name:Web\\ 01", "ipaddress:172.16.0.9", "ipaddress:10.0.0.5"]
        );
    }

    #[tokio::test]
    async fn unknown_host_id_is_source_not_found() {
        let hosts = Arc::new(MockHosts::default());
        let nodes = Arc::new(MockNodes::default().with_node(web01()));

        let err = resolver(&hosts, &nodes)
            .resolve_host_to_node("99999", &AttributeFilter::Full)
            .await
            .expect_err("host does not exist");

        assert!(matches!(
            err,
            ResolveError::SourceNotFound {
                kind: EntityKind::ZabbixHost,
                matches: 0,
                ref id,
            } if id == "99999"
        ));
        assert_eq!(hosts.calls(), vec!["hostid=99999"]);
        assert!(nodes.calls().is_empty());
    }

    #[tokio::test]
    async fn duplicate_host_id_is_rejected() {
        let duplicate = host("10084", "web01", "web01", &[]);
        let hosts = Arc::new(
            MockHosts::default().with_id("10084", vec![duplicate.clone(), duplicate]),
        );
        let nodes = Arc::new(MockNodes::default().with_node(web01()));

        let err = resolver(&hosts, &nodes)
            .resolve_host_to_node("10084", &AttributeFilter::Full)
            .await
            .expect_err("ambiguous id lookup");

        assert!(matches!(
            err,
            ResolveError::SourceNotFound {
                kind: EntityKind::ZabbixHost,
                matches: 2,
                ..
            }
        ));
        assert!(nodes.calls().is_empty());
    }

    #[tokio::test]
    async fn host_without_unique_node_lists_queries() {
        let hosts = Arc::new(MockHosts::default().with_id(
            "7",
            vec![host("7", "db01", "db01", &[])],
        ));
        let nodes = Arc::new(MockNodes::default());

        let err = resolver(&hosts, &nodes)
            .resolve_host_to_node("7", &AttributeFilter::Full)
            .await
            .expect_err("no node");

        assert_eq!(
            err.to_string(),
            "could not find Chef node with searches name:db01 [0 matches], fqdn:db01 [0 matches], hostname:db01 [0 matches]"
        );
    }

    #[tokio::test]
    async fn batch_aborts_on_first_unresolved_node() {
        let hosts = Arc::new(
            MockHosts::default()
                .with_search("name=web01", vec![host("1", "web01", "web01", &[])])
                .with_search(
                    "name=web02",
                    vec![host("2", "web02", "web02", &[]), host("3", "web02b", "", &[])],
                )
                .with_search("name=web03", vec![host("4", "web03", "web03", &[])]),
        );
        let nodes = Arc::new(
            MockNodes::default()
                .with_node(web01())
                .with_node(node("web02", "10.0.0.6", "web02.prod.example.com", "web02"))
                .with_node(node("web03", "10.0.0.7", "web03.prod.example.com", "web03"))
                .with_search("role:web", &["web01", "web02", "web03"]),
        );

        let err = resolver(&hosts, &nodes)
            .resolve_query_to_hosts("role:web")
            .await
            .expect_err("web02 is ambiguous");

        assert!(matches!(err, ResolveError::AmbiguousOrNoMatch { .. }));
        assert!(hosts.calls().iter().all(|call| !call.contains("web03")));
    }

    #[tokio::test]
    async fn batch_preserves_search_order() {
        let hosts = Arc::new(
            MockHosts::default()
                .with_search("name=web03", vec![host("4", "web03", "web03", &[])])
                .with_search("name=web01", vec![host("1", "web01", "web01", &[])]),
        );
        let nodes = Arc::new(
            MockNodes::default()
                .with_node(web01())
                .with_node(node("web03", "10.0.0.7", "web03.prod.example.com", "web03"))
                .with_search("role:web", &["web03", "web01"]),
        );

        let resolved = resolver(&hosts, &nodes)
            .resolve_query_to_hosts("role:web")
            .await
            .expect("resolves");

        assert_eq!(
            resolved.iter().map(|host| host.host_id.as_str()).collect::<Vec<_>>(),
            vec!["4", "1"]
        );
    }

    #[tokio::test]
    async fn empty_batch_query_fails() {
        let hosts = Arc::new(MockHosts::default());
        let nodes = Arc::new(MockNodes::default());

        let err = resolver(&hosts, &nodes)
            .resolve_query_to_hosts("role:nothing")
            .await
            .expect_err("no nodes");

        assert!(matches!(err, ResolveError::EmptyQueryResult { query } if query == "role:nothing"));
    }

    #[tokio::test]
    async fn node_to_host_to_node_round_trip() {
        let hosts = Arc::new(
            MockHosts::default()
                .with_search("name=web01", vec![host("10084", "web01.prod.example.com", "web01", &["10.0.0.5"])])
                .with_id("10084", vec![host("10084", "web01.prod.example.com", "web01", &["10.0.0.5"])]),
        );
        let nodes = Arc::new(
            MockNodes::default()
                .with_node(web01())
                .with_search("name:web01", &["web01"]),
        );
        let resolver = resolver(&hosts, &nodes);

        let host = resolver.resolve_node_to_host("web01").await.expect("node to host");
        let node = resolver
            .resolve_host_to_node(&host, &AttributeFilter::Full)
            .await
            .expect("host to node");

        assert_eq!(node.name(), "web01");
    }

    #[tokio::test]
    async fn slow_round_trip_times_out() {
        let hosts = Arc::new(MockHosts::default().with_delay(Duration::from_millis(500)));
        let nodes = Arc::new(MockNodes::default().with_node(web01()));

        let err = resolver(&hosts, &nodes)
            .with_round_trip_timeout(Duration::from_millis(20))
            .resolve_node_to_host("web01")
            .await
            .expect_err("search is too slow");

        assert!(matches!(
            err,
            ResolveError::Transport(TransportError::Timeout(_))
        ));
        assert_eq!(hosts.calls(), vec!["name=web01"]);
    }
}
