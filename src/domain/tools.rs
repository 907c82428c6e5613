//! Resolution tools exposed via Model Context Protocol
//!
//! Provides `resolve_node_to_host`, `resolve_host_to_node` and
//! `resolve_query_to_hosts` by delegating to the shared [`crate::resolver::Resolver`].

use chrono::{SecondsFormat, Utc};
use rust_mcp_sdk::{
    macros,
    schema::{CallToolRequestParams, CallToolResult, ContentBlock, TextContent, Tool},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::chef::AttributeFilter;
use crate::domain::utils::{
    normalize_attribute_paths, normalize_host_id, normalize_node_name, normalize_query,
};
use crate::mcp::rpc::{
    app_error_to_json_rpc, json_rpc_error, json_rpc_error_with_data, json_rpc_result,
};
use crate::{errors::AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct NodeToHostParams {
    pub node: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HostToNodeParams {
    pub host_id: Option<String>,
    pub attributes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct QueryToHostsParams {
    pub query: Option<String>,
}

#[macros::mcp_tool(
    name = "resolve_node_to_host",
    description = "Find the Zabbix host monitoring a Chef node"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ResolveNodeToHostTool {
    pub node: String,
}

#[macros::mcp_tool(
    name = "resolve_host_to_node",
    description = "Find the Chef node behind a Zabbix host id, optionally loading only some attributes"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ResolveHostToNodeTool {
    pub host_id: String,
    pub attributes: Option<Vec<String>>,
}

#[macros::mcp_tool(
    name = "resolve_query_to_hosts",
    description = "Resolve every Chef node matched by a search query to its Zabbix host"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ResolveQueryToHostsTool {
    pub query: String,
}

pub fn build_tools_list() -> Vec<Tool> {
    vec![
        ResolveNodeToHostTool::tool(),
        ResolveHostToNodeTool::tool(),
        ResolveQueryToHostsTool::tool(),
    ]
}

fn parse_arguments<T: DeserializeOwned>(arguments: Option<Map<String, Value>>) -> Option<T> {
    serde_json::from_value(Value::Object(arguments.unwrap_or_default())).ok()
}

fn tool_result(id: Option<Value>, summary: String, mut structured: Map<String, Value>) -> Value {
    structured.insert(
        "generated_at_utc".to_string(),
        json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );

    json_rpc_result(
        id,
        serde_json::to_value(CallToolResult {
            content: vec![ContentBlock::from(TextContent::new(summary, None, None))],
            is_error: None,
            meta: None,
            structured_content: Some(structured),
        })
        .expect("tool result serialization"),
    )
}

pub async fn handle_tools_call(
    state: &AppState,
    id: Option<Value>,
    params: Option<Value>,
) -> Value {
    let Some(raw_params) = params else {
        return json_rpc_error(id, -32602, "Invalid params");
    };

    let tool_call: CallToolRequestParams = match serde_json::from_value(raw_params) {
        Ok(value) => value,
        Err(_) => return json_rpc_error(id, -32602, "Invalid params"),
    };

    match tool_call.name.as_str() {
        "resolve_node_to_host" => {
            let Some(params) = parse_arguments::<NodeToHostParams>(tool_call.arguments) else {
                return json_rpc_error(id, -32602, "Invalid params");
            };
            let node = match normalize_node_name(params.node) {
                Ok(value) => value,
                Err(err) => return app_error_to_json_rpc(id, err),
            };

            match state.resolver.resolve_node_to_host(&node).await {
                Ok(host) => tool_result(
                    id,
                    format!("Chef node {node} is Zabbix host {} ({})", host.host, host.host_id),
                    Map::from_iter([
                        ("node".to_string(), json!(node)),
                        ("host".to_string(), json!(host)),
                    ]),
                ),
                Err(err) => app_error_to_json_rpc(id, AppError::from(err)),
            }
        }
        "resolve_host_to_node" => {
            let Some(params) = parse_arguments::<HostToNodeParams>(tool_call.arguments) else {
                return json_rpc_error(id, -32602, "Invalid params");
            };
            let host_id = match normalize_host_id(params.host_id) {
                Ok(value) => value,
                Err(err) => return app_error_to_json_rpc(id, err),
            };
            let filter = match normalize_attribute_paths(params.attributes) {
                Ok(paths) => AttributeFilter::from_paths(paths),
                Err(err) => return app_error_to_json_rpc(id, err),
            };

            match state.resolver.resolve_host_to_node(&host_id, &filter).await {
                Ok(node) => tool_result(
                    id,
                    format!("Zabbix host {host_id} is Chef node {}", node.name()),
                    Map::from_iter([
                        ("host_id".to_string(), json!(host_id)),
                        ("node".to_string(), json!(node)),
                    ]),
                ),
                Err(err) => app_error_to_json_rpc(id, AppError::from(err)),
            }
        }
        "resolve_query_to_hosts" => {
            let Some(params) = parse_arguments::<QueryToHostsParams>(tool_call.arguments) else {
                return json_rpc_error(id, -32602, "Invalid params");
            };
            let query = match normalize_query(params.query) {
                Ok(value) => value,
                Err(err) => return app_error_to_json_rpc(id, err),
            };

            match state.resolver.resolve_query_to_hosts(&query).await {
                Ok(hosts) => {
                    let total = hosts.len();
                    tool_result(
                        id,
                        format!("Resolved {total} nodes matching {query}"),
                        Map::from_iter([
                            ("query".to_string(), json!(query)),
                            ("hosts".to_string(), json!(hosts)),
                            ("total".to_string(), json!(total)),
                        ]),
                    )
                }
                Err(err) => app_error_to_json_rpc(id, AppError::from(err)),
            }
        }
        _ => json_rpc_error_with_data(
            id,
            -32601,
            "Method not found",
            Some(json!({
                "code": "tool_not_found",
                "message": "unknown tool name",
                "details": {
                    "name": tool_call.name,
                },
            })),
        ),
    }
}
