use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("unauthorized: {message}")]
    Unauthorized {
        code: &'static str,
        message: &'static str,
    },
    #[error("not found: {message}")]
    NotFound { code: &'static str, message: String },
    #[error("conflict: {message}")]
    Conflict {
        code: &'static str,
        message: String,
        details: serde_json::Value,
    },
    #[error("upstream unavailable: {message}")]
    Upstream { code: &'static str, message: String },
    #[error("internal error")]
    Internal { code: &'static str, message: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: &'static str, message: &'static str) -> Self {
        Self::Unauthorized { code, message }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: "internal_error",
            message: message.into(),
        }
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        let message = err.to_string();
        match err {
            ResolveError::SourceNotFound { .. } => Self::NotFound {
                code: "source_not_found",
                message,
            },
            ResolveError::EmptyQueryResult { .. } => Self::NotFound {
                code: "empty_query_result",
                message,
            },
            ResolveError::AmbiguousOrNoMatch { target, attempts } => Self::Conflict {
                code: "ambiguous_match",
                message,
                details: json!({
                    "target": target,
                    "attempts": attempts,
                }),
            },
            ResolveError::Transport(_) => Self::Upstream {
                code: "upstream_unavailable",
                message,
            },
            ResolveError::Configuration(_) => Self::internal(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            Self::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message, json!({})),
            Self::Unauthorized { code, message } => {
                (StatusCode::UNAUTHORIZED, code, message.to_string(), json!({}))
            }
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, code, message, json!({})),
            Self::Conflict {
                code,
                message,
                details,
            } => (StatusCode::CONFLICT, code, message, details),
            Self::Upstream { code, message } => (StatusCode::BAD_GATEWAY, code, message, json!({})),
            Self::Internal { code, message } => {
                tracing::error!(error = %message, "request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    "internal server error".to_string(),
                    json!({}),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message,
                details,
            }),
        )
            .into_response()
    }
}

/// Failure talking to either remote system. Never used for "no match".
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{system} answered with HTTP {status}: {body}")]
    Status {
        system: &'static str,
        status: u16,
        body: String,
    },
    #[error("zabbix api error {code}: {message} {data}")]
    Rpc {
        code: i64,
        message: String,
        data: String,
    },
    #[error("unexpected {system} response: {message}")]
    Decode {
        system: &'static str,
        message: String,
    },
    #[error("round trip exceeded {0:?}")]
    Timeout(std::time::Duration),
    #[error("failed to sign chef request: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ChefNode,
    ZabbixHost,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChefNode => f.write_str("Chef node"),
            Self::ZabbixHost => f.write_str("Zabbix host"),
        }
    }
}

/// One evaluated search predicate and the number of entities it matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PredicateAttempt {
    pub predicate: String,
    pub matches: usize,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("could not find {kind} '{id}'{}", match_suffix(.matches))]
    SourceNotFound {
        kind: EntityKind,
        id: String,
        matches: usize,
    },
    #[error("could not find {target} with searches {}", format_attempts(.attempts))]
    AmbiguousOrNoMatch {
        target: EntityKind,
        attempts: Vec<PredicateAttempt>,
    },
    #[error("chef search '{query}' returned no nodes")]
    EmptyQueryResult { query: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

fn match_suffix(matches: &usize) -> String {
    if *matches == 0 {
        String::new()
    } else {
        format!(" (lookup matched {matches} entries)")
    }
}

fn format_attempts(attempts: &[PredicateAttempt]) -> String {
    if attempts.is_empty() {
        return "(none applicable)".to_string();
    }

    attempts
        .iter()
        .map(|attempt| format!("{} [{} matches]", attempt.predicate, attempt.matches))
        .collect::<Vec<_>>()
        .join(", ")
}
