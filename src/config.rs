use std::{
    collections::HashMap, env, fmt, net::SocketAddr, path::PathBuf, sync::LazyLock,
    time::Duration,
};

use regex::Regex;
use thiserror::Error;

pub const DEFAULT_ZABBIX_VERSION: &str = "2.2";
pub const DEFAULT_CHEF_PROFILE: &str = "default";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.(\d+)(?:\.(\d+))?$").expect("zabbix version pattern compiles")
});

#[derive(Debug, Clone)]
pub struct Config {
    pub api_token: String,
    pub bind_addr: String,
    pub bind_port: u16,
    pub zabbix: ZabbixConfig,
    pub chef: ChefConfig,
    pub request_timeout: Duration,
}

#[derive(Clone)]
pub struct ZabbixConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub http_user: Option<String>,
    pub http_password: Option<String>,
    pub version: ZabbixVersion,
}

impl ZabbixConfig {
    /// Basic-auth user, falling back to the API user.
    pub fn http_user(&self) -> &str {
        self.http_user.as_deref().unwrap_or(&self.user)
    }

    pub fn http_password(&self) -> &str {
        self.http_password.as_deref().unwrap_or(&self.password)
    }
}

impl fmt::Debug for ZabbixConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZabbixConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("http_user", &self.http_user)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChefConfig {
    /// Explicit credentials file; `None` searches the standard locations.
    pub config_path: Option<PathBuf>,
    pub profile: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ZabbixVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_API_TOKEN is required and must not be empty")]
    MissingApiToken,
    #[error("missing required option {0}")]
    MissingOption(&'static str),
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("invalid bind address or port")]
    InvalidSocket,
    #[error("REQUEST_TIMEOUT_SECS must be a positive integer")]
    InvalidTimeout,
    #[error("could not determine Zabbix server version from '{0}'")]
    InvalidZabbixVersion(String),
    #[error("no Chef configuration file found in the standard locations")]
    ChefConfigNotFound,
    #[error("failed to read Chef configuration {path}: {message}")]
    ChefConfigRead { path: PathBuf, message: String },
    #[error("Chef configuration {path} is missing '{key}'")]
    ChefConfigIncomplete { path: PathBuf, key: &'static str },
    #[error("invalid Chef client key: {0}")]
    InvalidClientKey(String),
    #[error("invalid remote url '{0}'")]
    InvalidUrl(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_map(values: &HashMap<&str, &str>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| values.get(key).map(|value| value.to_string()))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        // secrets are only checked for blankness; surrounding spaces are part of the value
        let secret = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let required = |key: &'static str| non_empty(key).ok_or(ConfigError::MissingOption(key));

        let api_token = non_empty("MCP_API_TOKEN").ok_or(ConfigError::MissingApiToken)?;
        let bind_addr = non_empty("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = non_empty("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);

        let version = non_empty("ZABBIX_VERSION")
            .unwrap_or_else(|| DEFAULT_ZABBIX_VERSION.to_string())
            .parse::<ZabbixVersion>()?;
        let zabbix = ZabbixConfig {
            url: required("ZABBIX_URL")?,
            user: required("ZABBIX_USER")?,
            password: secret("ZABBIX_PASSWORD")
                .ok_or(ConfigError::MissingOption("ZABBIX_PASSWORD"))?,
            http_user: non_empty("ZABBIX_HTTP_USER"),
            http_password: secret("ZABBIX_HTTP_PASSWORD"),
            version,
        };

        let chef = ChefConfig {
            config_path: non_empty("CHEF_CONFIG").map(PathBuf::from),
            profile: non_empty("CHEF_PROFILE").unwrap_or_else(|| DEFAULT_CHEF_PROFILE.to_string()),
        };

        let request_timeout = non_empty("REQUEST_TIMEOUT_SECS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .ok_or(ConfigError::InvalidTimeout)
            })
            .transpose()?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));

        let config = Self {
            api_token,
            bind_addr,
            bind_port,
            zabbix,
            chef,
            request_timeout,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

impl std::str::FromStr for ZabbixVersion {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidZabbixVersion(value.to_string());
        let captures = VERSION_PATTERN.captures(value.trim()).ok_or_else(invalid)?;

        let component = |index: usize| -> Result<Option<u32>, ConfigError> {
            captures
                .get(index)
                .map(|part| part.as_str().parse::<u32>().map_err(|_| invalid()))
                .transpose()
        };

        Ok(Self {
            major: component(1)?.ok_or_else(invalid)?,
            minor: component(2)?.ok_or_else(invalid)?,
            patch: component(3)?,
        })
    }
}

impl fmt::Display for ZabbixVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}
