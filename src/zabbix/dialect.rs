//! JSON-RPC dialects across Zabbix server releases

use serde_json::{json, Value};

use crate::config::ZabbixVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiDialect {
    /// Before 5.4: `user.login` takes `user`, token travels in the `auth` member.
    Legacy,
    /// 5.4 to 6.2: `user.login` takes `username`, token still in `auth`.
    Username,
    /// 6.4 onwards: token travels in an `Authorization: Bearer` header.
    Bearer,
}

impl ApiDialect {
    pub fn for_version(version: ZabbixVersion) -> Self {
        match (version.major, version.minor) {
            (major, minor) if (major, minor) < (5, 4) => Self::Legacy,
            (major, minor) if (major, minor) < (6, 4) => Self::Username,
            _ => Self::Bearer,
        }
    }

    pub fn login_params(self, user: &str, password: &str) -> Value {
        match self {
            Self::Legacy => json!({ "user": user, "password": password }),
            Self::Username | Self::Bearer => json!({ "username": user, "password": password }),
        }
    }

    pub fn token_in_header(self) -> bool {
        matches!(self, Self::Bearer)
    }
}
