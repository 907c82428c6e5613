//! Chef client credentials
//!
//! Understands the TOML `credentials` file and the literal-assignment subset of
//! `knife.rb` / `client.rb`. The first existing standard location wins when no
//! explicit path is configured.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;

use crate::config::{ChefConfig, ConfigError};

const SYSTEM_CLIENT_RB: &str = "/etc/chef/client.rb";

/// `key "value"` or `key 'value'` on a line of its own.
static RUBY_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^\s*(node_name|client_name|client_key|chef_server_url)\s+(?:"([^"]*)"|'([^']*)')\s*$"#,
    )
    .expect("ruby assignment pattern compiles")
});

#[derive(Clone)]
pub struct ChefCredentials {
    pub client_name: String,
    pub server_url: String,
    pub client_key_pem: String,
    pub source: PathBuf,
}

impl fmt::Debug for ChefCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChefCredentials")
            .field("client_name", &self.client_name)
            .field("server_url", &self.server_url)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct RawCredentials {
    client_name: Option<String>,
    client_key: Option<String>,
    server_url: Option<String>,
}

impl ChefCredentials {
    pub fn load(config: &ChefConfig) -> Result<Self, ConfigError> {
        let path = match &config.config_path {
            Some(path) => path.clone(),
            None => standard_locations()
                .into_iter()
                .find(|candidate| candidate.is_file())
                .ok_or(ConfigError::ChefConfigNotFound)?,
        };

        let content = read(&path)?;
        let raw = if is_ruby(&path) {
            parse_ruby(&content, &path)
        } else {
            parse_toml(&content, &config.profile, &path)?
        };

        Self::from_raw(raw, &path)
    }

    fn from_raw(raw: RawCredentials, path: &Path) -> Result<Self, ConfigError> {
        let incomplete = |key| ConfigError::ChefConfigIncomplete {
            path: path.to_path_buf(),
            key,
        };
        let client_name = raw.client_name.ok_or_else(|| incomplete("client_name"))?;
        let server_url = raw.server_url.ok_or_else(|| incomplete("chef_server_url"))?;
        let client_key = raw.client_key.ok_or_else(|| incomplete("client_key"))?;

        let client_key_pem = if client_key.trim_start().starts_with("-----BEGIN") {
            client_key
        } else {
            read(&resolve_key_path(&client_key, path))?
        };

        Ok(Self {
            client_name,
            server_url,
            client_key_pem,
            source: path.to_path_buf(),
        })
    }
}

pub fn standard_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(home) = dirs::home_dir() {
        let chef_dir = home.join(".chef");
        locations.push(chef_dir.join("credentials"));
        locations.push(chef_dir.join("config.rb"));
        locations.push(chef_dir.join("knife.rb"));
    }
    locations.push(PathBuf::from(SYSTEM_CLIENT_RB));
    locations
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|err| ConfigError::ChefConfigRead {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn is_ruby(path: &Path) -> bool {
    path.extension().is_some_and(|extension| extension == "rb")
}

fn resolve_key_path(raw: &str, config_path: &Path) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }

    let path = PathBuf::from(raw);
    if path.is_relative() {
        if let Some(parent) = config_path.parent() {
            return parent.join(path);
        }
    }
    path
}

fn parse_toml(content: &str, profile: &str, path: &Path) -> Result<RawCredentials, ConfigError> {
    let table = content
        .parse::<toml::Table>()
        .map_err(|err| ConfigError::ChefConfigRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    let section = table
        .get(profile)
        .and_then(toml::Value::as_table)
        .ok_or_else(|| ConfigError::ChefConfigRead {
            path: path.to_path_buf(),
            message: format!("profile '{profile}' not found"),
        })?;

    let text = |key: &str| {
        section
            .get(key)
            .and_then(toml::Value::as_str)
            .map(str::to_string)
    };

    Ok(RawCredentials {
        client_name: text("client_name").or_else(|| text("node_name")),
        client_key: text("client_key"),
        server_url: text("chef_server_url"),
    })
}

fn parse_ruby(content: &str, path: &Path) -> RawCredentials {
    let current_dir = path
        .parent()
        .map(|dir| dir.display().to_string())
        .unwrap_or_default();

    let mut raw = RawCredentials::default();
    for captures in RUBY_ASSIGNMENT.captures_iter(content) {
        let value = captures
            .get(2)
            .or_else(|| captures.get(3))
            .map(|value| value.as_str().replace("#{current_dir}", &current_dir))
            .unwrap_or_default();

        match &captures[1] {
            "node_name" | "client_name" => raw.client_name = Some(value),
            "client_key" => raw.client_key = Some(value),
            "chef_server_url" => raw.server_url = Some(value),
            _ => {}
        }
    }
    raw
}
