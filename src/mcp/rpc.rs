//! JSON-RPC protocol representations and formatting utilities
//!
//! Maps AppErrors, including resolution failures, onto JSON-RPC error payloads.

use rust_mcp_sdk::schema::{
    JsonrpcErrorResponse, JsonrpcResultResponse, RequestId, Result as McpResult, RpcError,
};
use serde_json::{json, Value};

use crate::errors::AppError;

pub fn is_json_rpc_error(value: &Value) -> bool {
    value.get("error").is_some()
}

pub fn app_error_to_json_rpc(id: Option<Value>, err: AppError) -> Value {
    match err {
        AppError::BadRequest { code, message } => json_rpc_error_with_data(
            id,
            -32602,
            "Invalid params",
            Some(error_data(code, &message, json!({}))),
        ),
        AppError::Unauthorized { code, message } => json_rpc_error_with_data(
            id,
            -32001,
            "Unauthorized",
            Some(error_data(code, message, json!({}))),
        ),
        AppError::NotFound { code, message } => json_rpc_error_with_data(
            id,
            -32002,
            "Resolution failed",
            Some(error_data(code, &message, json!({}))),
        ),
        AppError::Conflict {
            code,
            message,
            details,
        } => json_rpc_error_with_data(
            id,
            -32002,
            "Resolution failed",
            Some(error_data(code, &message, details)),
        ),
        AppError::Upstream { code, message } => json_rpc_error_with_data(
            id,
            -32003,
            "Upstream unavailable",
            Some(error_data(code, &message, json!({}))),
        ),
        AppError::Internal { .. } => json_rpc_error(id, -32603, "Internal error"),
    }
}

fn error_data(code: &str, message: &str, details: Value) -> Value {
    json!({
        "code": code,
        "message": message,
        "details": details
    })
}

pub fn json_rpc_error(id: Option<Value>, code: i32, message: &str) -> Value {
    json_rpc_error_with_data(id, code, message, None)
}

pub fn json_rpc_error_with_data(
    id: Option<Value>,
    code: i32,
    message: &str,
    data: Option<Value>,
) -> Value {
    let response = JsonrpcErrorResponse::new(
        RpcError {
            code: i64::from(code),
            data,
            message: message.to_string(),
        },
        id.as_ref().and_then(value_to_request_id),
    );
    serde_json::to_value(response).expect("jsonrpc error response serialization")
}

pub fn json_rpc_result(id: Option<Value>, result: Value) -> Value {
    if let Some(request_id) = id.as_ref().and_then(value_to_request_id) {
        let extra = result.as_object().cloned();
        let response = JsonrpcResultResponse::new(request_id, McpResult { meta: None, extra });
        return serde_json::to_value(response).expect("jsonrpc result response serialization");
    }

    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn value_to_request_id(value: &Value) -> Option<RequestId> {
    if let Some(string_id) = value.as_str() {
        return Some(RequestId::String(string_id.to_string()));
    }

    value.as_i64().map(RequestId::Integer)
}

pub fn request_id_to_value(id: RequestId) -> Value {
    match id {
        RequestId::String(value) => Value::String(value),
        RequestId::Integer(value) => Value::Number(value.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_keeps_attempts_in_error_data() {
        let response = app_error_to_json_rpc(
            Some(json!(7)),
            AppError::Conflict {
                code: "ambiguous_match",
                message: "could not find Zabbix host with searches name=web01 [2 matches]".to_string(),
                details: json!({"attempts": [{"predicate": "name=web01", "matches": 2}]}),
            },
        );

        assert_eq!(response["id"], 7);
        assert_eq!(response["error"]["code"], -32002);
        assert_eq!(response["error"]["data"]["code"], "ambiguous_match");
        assert_eq!(response["error"]["data"]["details"]["attempts"][0]["matches"], 2);
    }

    #[test]
    fn internal_errors_hide_their_message() {
        let response = app_error_to_json_rpc(Some(json!("a")), AppError::internal("key path leaked"));
        assert_eq!(response["error"]["code"], -32603);
        assert!(response["error"].get("data").is_none());
    }

    #[test]
    fn upstream_maps_to_dedicated_code() {
        let response = app_error_to_json_rpc(
            None,
            AppError::Upstream {
                code: "upstream_unavailable",
                message: "round trip exceeded 30s".to_string(),
            },
        );
        assert_eq!(response["error"]["code"], -32003);
        assert_eq!(response["error"]["data"]["code"], "upstream_unavailable");
    }
}
