//! Configuration types, built from environment variables.

use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Default Microsoft Graph root.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Default client-credentials scope.
pub const DEFAULT_GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Default log file used when file logging is enabled without `LOG_FILE`.
pub const DEFAULT_LOG_FILE: &str = "/var/log/smtp/smtp_relay.log";

/// Identity provider + Graph settings.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    /// Authority URL, e.g. `https://login.microsoftonline.com/<tenant>`.
    pub authority: String,
    pub scope: String,
    pub base_url: String,
}

impl GraphConfig {
    /// Client-credentials token endpoint derived from the authority.
    pub fn token_url(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority.trim_end_matches('/'))
    }
}

/// Submission listener settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub hostname: String,
    pub port: u16,
    pub auth_user: String,
    pub auth_pass: SecretString,
    /// Accept any LOGIN/PLAIN credentials without checking them.
    pub allow_any_login: bool,
    pub max_connections: usize,
    pub max_message_size: usize,
}

impl SmtpConfig {
    /// AUTH is mandatory only when both secrets are configured.
    pub fn auth_required(&self) -> bool {
        !self.auth_user.trim().is_empty() && !self.auth_pass.expose_secret().trim().is_empty()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Log sink settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    /// Write to this file instead of stdout.
    pub file: Option<PathBuf>,
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub graph: GraphConfig,
    pub smtp: SmtpConfig,
    pub log: LogConfig,
    /// Keep the sent copy instead of permanently deleting the draft.
    pub save_to_sent: bool,
    /// Raw message bytes are written here before processing, if set.
    pub debug_dump_dir: Option<PathBuf>,
    /// Built-in plugin names to register at startup.
    pub plugins: Vec<String>,
}

impl RelayConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let graph = GraphConfig {
            client_id: required("CLIENT_ID")?,
            client_secret: SecretString::from(required("CLIENT_SECRET")?),
            authority: required("AUTHORITY")?,
            scope: lookup("GRAPH_SCOPE").unwrap_or_else(|| DEFAULT_GRAPH_SCOPE.to_string()),
            base_url: lookup("GRAPH_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_string()),
        };

        let smtp = SmtpConfig {
            hostname: lookup("SMTP_RELAY_HOSTNAME").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "SMTP_RELAY_PORT", 25)?,
            auth_user: lookup("SMTP_AUTH_USER").unwrap_or_default(),
            auth_pass: SecretString::from(lookup("SMTP_AUTH_PASS").unwrap_or_default()),
            allow_any_login: parse_bool(&lookup, "SMTP_ALLOW_ANY_LOGIN", false)?,
            max_connections: parse_or(&lookup, "SMTP_MAX_CONNECTIONS", 100)?,
            max_message_size: parse_or(&lookup, "SMTP_MAX_MESSAGE_SIZE", 35 * 1024 * 1024)?,
        };

        let log = LogConfig {
            level: lookup("LOG_LEVEL")
                .map(|l| l.to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
            file: if parse_bool(&lookup, "LOG_FILE_ENABLED", false)? {
                Some(PathBuf::from(
                    lookup("LOG_FILE").unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()),
                ))
            } else {
                None
            },
        };

        let plugins = lookup("RELAY_PLUGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            graph,
            smtp,
            log,
            save_to_sent: parse_bool(&lookup, "SAVE_TO_SENT", false)?,
            debug_dump_dir: lookup("DEBUG_DUMP_DIR")
                .filter(|d| !d.trim().is_empty())
                .map(PathBuf::from),
            plugins,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}
