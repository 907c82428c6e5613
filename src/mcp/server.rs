//! MCP engine for the resolution server
//!
//! Decodes one JSON-RPC message, dispatches it by [`McpMethod`] and writes one
//! audit line per request. The audit line carries the tool, its resolution
//! arguments (`node`, `host_id`, `query`, `attributes`) and the outcome code;
//! no other parameter is ever logged.

use rust_mcp_sdk::schema::{
    CallToolRequest, Implementation, InitializeRequest, InitializeResult, JsonrpcMessage,
    ListToolsRequest, ListToolsResult, PingRequest, ProtocolVersion, ServerCapabilities,
    ServerCapabilitiesTools,
};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::domain::tools::{build_tools_list, handle_tools_call};
use crate::mcp::rpc::{
    app_error_to_json_rpc, is_json_rpc_error, json_rpc_error, json_rpc_result, request_id_to_value,
};
use crate::{errors::AppError, AppState};

pub const SUPPORTED_PROTOCOL_VERSION: &str = "2024-11-05";

const AUDITED_ARGUMENTS: [&str; 4] = ["node", "host_id", "query", "attributes"];

const INSTRUCTIONS: &str = "Resolve Chef nodes to Zabbix hosts and back. \
    Failures list every search attempted with its match count.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpMethod {
    Initialize,
    Ping,
    ToolsList,
    ToolsCall,
    Unknown,
}

impl McpMethod {
    pub fn parse(method: &str) -> Self {
        match method {
            "initialize" => Self::Initialize,
            "ping" => Self::Ping,
            "tools/list" => Self::ToolsList,
            "tools/call" => Self::ToolsCall,
            _ => Self::Unknown,
        }
    }

    /// Whether the whole request decodes as this method's typed request.
    fn accepts(self, request: Value) -> bool {
        match self {
            Self::Initialize => serde_json::from_value::<InitializeRequest>(request).is_ok(),
            Self::Ping => serde_json::from_value::<PingRequest>(request).is_ok(),
            Self::ToolsList => serde_json::from_value::<ListToolsRequest>(request).is_ok(),
            Self::ToolsCall => serde_json::from_value::<CallToolRequest>(request).is_ok(),
            Self::Unknown => true,
        }
    }
}

/// What a `tools/call` asked to resolve.
#[derive(Debug, Default, PartialEq)]
pub struct AuditEntry {
    pub tool: Option<String>,
    pub arguments: Map<String, Value>,
}

impl AuditEntry {
    pub fn from_params(params: Option<&Value>) -> Self {
        let tool = params
            .and_then(|params| params.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let arguments = params
            .and_then(|params| params.get("arguments"))
            .and_then(Value::as_object)
            .map(|arguments| {
                arguments
                    .iter()
                    .filter(|(key, _)| AUDITED_ARGUMENTS.contains(&key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Self { tool, arguments }
    }
}

pub async fn handle_json_rpc_value(state: &AppState, payload: Value) -> Option<Value> {
    if !payload.is_object() {
        return Some(json_rpc_error(None, -32600, "Invalid Request"));
    }

    let raw_id = payload.get("id").cloned();
    let message = match serde_json::from_value::<JsonrpcMessage>(payload) {
        Ok(message) => message,
        Err(_) => return Some(json_rpc_error(raw_id, -32600, "Invalid Request")),
    };

    match message {
        JsonrpcMessage::Request(request) => {
            let id = Some(request_id_to_value(request.id.clone()));
            if request.method.trim().is_empty() {
                return Some(json_rpc_error(id, -32600, "Invalid Request"));
            }

            let method = McpMethod::parse(&request.method);
            let typed = serde_json::to_value(&request).expect("jsonrpc request serialization");
            if !method.accepts(typed) {
                return Some(json_rpc_error(id, -32602, "Invalid params"));
            }

            Some(
                dispatch(
                    state,
                    id,
                    &request.method,
                    method,
                    request.params.map(Value::Object),
                )
                .await,
            )
        }
        // nothing to answer, and resolving on behalf of a notification would be wasted work
        JsonrpcMessage::Notification(notification) => {
            debug!(method = %notification.method, "mcp notification received");
            None
        }
        JsonrpcMessage::ResultResponse(_) | JsonrpcMessage::ErrorResponse(_) => {
            Some(json_rpc_error(raw_id, -32600, "Invalid Request"))
        }
    }
}

async fn dispatch(
    state: &AppState,
    id: Option<Value>,
    name: &str,
    method: McpMethod,
    params: Option<Value>,
) -> Value {
    let audit = match method {
        McpMethod::ToolsCall => AuditEntry::from_params(params.as_ref()),
        _ => AuditEntry::default(),
    };

    let response = match method {
        McpMethod::Initialize => match negotiate_protocol_version(params.as_ref()) {
            Ok(version) => json_rpc_result(id, initialize_result(version)),
            Err(err) => app_error_to_json_rpc(id, err),
        },
        McpMethod::Ping => json_rpc_result(id, json!({})),
        McpMethod::ToolsList => json_rpc_result(
            id,
            serde_json::to_value(ListToolsResult {
                meta: None,
                next_cursor: None,
                tools: build_tools_list(),
            })
            .expect("tools list result serialization"),
        ),
        McpMethod::ToolsCall => handle_tools_call(state, id, params).await,
        McpMethod::Unknown => json_rpc_error(id, -32601, "Method not found"),
    };

    info!(
        method = %name,
        tool = audit.tool.as_deref().unwrap_or("-"),
        arguments = %serde_json::Value::Object(audit.arguments),
        outcome = %outcome_code(&response),
        "mcp action audited"
    );

    response
}

fn initialize_result(version: ProtocolVersion) -> Value {
    let result = InitializeResult {
        server_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
            description: None,
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(false),
            }),
            ..Default::default()
        },
        protocol_version: version.into(),
        instructions: Some(INSTRUCTIONS.to_string()),
        meta: None,
    };

    serde_json::to_value(result).expect("initialize result serialization")
}

/// `ok`, the error's `data.code` (`ambiguous_match`, `invalid_node`, ...), or
/// the bare JSON-RPC code when the error carries no data.
pub fn outcome_code(response: &Value) -> String {
    if !is_json_rpc_error(response) {
        return "ok".to_string();
    }

    let error = &response["error"];
    error["data"]["code"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| error["code"].to_string())
}

pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<ProtocolVersion, AppError> {
    let offered = params
        .and_then(|params| params.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    match offered {
        "" => Err(AppError::bad_request(
            "invalid_protocol_version",
            "initialize params.protocolVersion is required",
        )),
        SUPPORTED_PROTOCOL_VERSION => Ok(ProtocolVersion::V2024_11_05),
        other => Err(AppError::bad_request(
            "unsupported_protocol_version",
            format!("protocolVersion {other} is not supported, use {SUPPORTED_PROTOCOL_VERSION}"),
        )),
    }
}
