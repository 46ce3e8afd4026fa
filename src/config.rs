//! Provider configuration.
//!
//! The host sends the `provider` block as JSON. Unset attributes fall back to
//! environment variables and then to defaults:
//!
//! | Attribute | Environment | Default |
//! | --- | --- | --- |
//! | `host` | `REDSHIFT_HOST` | (required) |
//! | `port` | `REDSHIFT_PORT` | `5439` |
//! | `username` | `REDSHIFT_USER` | `root` |
//! | `password` | `REDSHIFT_PASSWORD` | none |
//! | `database` | `REDSHIFT_DATABASE` | `redshift` |
//! | `sslmode` | `REDSHIFT_SSLMODE` | `require` |
//! | `max_connections` | | `20` |
//! | `connect_timeout` | | `180` |

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::validation;

/// Default Redshift port.
pub const DEFAULT_PORT: u16 = 5439;
/// Default user name.
pub const DEFAULT_USERNAME: &str = "root";
/// Default database the provider connects to.
pub const DEFAULT_DATABASE: &str = "redshift";
/// Default maximum number of open connections per database.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;
/// Default connection timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 180;

const SSL_MODES: &[&str] = &["disable", "prefer", "require", "verify-ca", "verify-full"];

/// Schema of the provider block.
pub fn provider_schema() -> Schema {
    Schema::v0()
        .with_description("Connection settings for the Redshift cluster.")
        .with_attribute(
            "host",
            Attribute::optional_string()
                .with_description("Cluster endpoint host name. Falls back to REDSHIFT_HOST."),
        )
        .with_attribute(
            "port",
            Attribute::optional_int64()
                .with_description("Cluster port. Falls back to REDSHIFT_PORT, then 5439."),
        )
        .with_attribute(
            "username",
            Attribute::optional_string()
                .with_description("User to connect as. Falls back to REDSHIFT_USER, then root."),
        )
        .with_attribute(
            "password",
            Attribute::optional_string()
                .sensitive()
                .with_description("Password. Falls back to REDSHIFT_PASSWORD."),
        )
        .with_attribute(
            "database",
            Attribute::optional_string().with_description(
                "Database to connect to. Falls back to REDSHIFT_DATABASE, then redshift.",
            ),
        )
        .with_attribute(
            "sslmode",
            Attribute::optional_string()
                .with_allowed_values(SSL_MODES)
                .with_description("TLS mode. Falls back to REDSHIFT_SSLMODE, then require."),
        )
        .with_attribute(
            "max_connections",
            Attribute::optional_int64()
                .with_description("Maximum open connections per database; 0 uses the driver default."),
        )
        .with_attribute(
            "connect_timeout",
            Attribute::optional_int64()
                .with_description(
                    "Seconds to wait for a pooled connection, including opening it, before failing.",
                ),
        )
}

/// TLS mode for cluster connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslMode {
    /// Plain TCP.
    Disable,
    /// TLS if the server supports it.
    Prefer,
    /// TLS without certificate verification.
    Require,
    /// TLS, verifying the certificate chain.
    VerifyCa,
    /// TLS, verifying the chain and host name.
    VerifyFull,
}

impl SslMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "disable" => Some(Self::Disable),
            "prefer" => Some(Self::Prefer),
            "require" => Some(Self::Require),
            "verify-ca" => Some(Self::VerifyCa),
            "verify-full" => Some(Self::VerifyFull),
            _ => None,
        }
    }
}

impl From<SslMode> for PgSslMode {
    fn from(mode: SslMode) -> Self {
        match mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
            SslMode::VerifyCa => PgSslMode::VerifyCa,
            SslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

/// The provider block as sent by the host; every attribute may be null.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawProviderConfig {
    host: Option<String>,
    port: Option<i64>,
    username: Option<String>,
    password: Option<String>,
    database: Option<String>,
    sslmode: Option<String>,
    max_connections: Option<i64>,
    connect_timeout: Option<i64>,
}

/// Resolved provider configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Cluster endpoint.
    pub host: String,
    /// Cluster port.
    pub port: u16,
    /// Connecting user.
    pub username: String,
    /// Password, if any.
    pub password: Option<String>,
    /// Default database.
    pub database: String,
    /// TLS mode.
    pub sslmode: SslMode,
    /// Maximum open connections per database (0 = driver default).
    pub max_connections: u32,
    /// Pool acquire timeout. Covers opening a new connection, since the
    /// driver connects while acquiring.
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("sslmode", &self.sslmode)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl ProviderConfig {
    /// Resolve the host's config, reading fallbacks from the process environment.
    pub fn from_value(value: &Value) -> Result<Self, ProviderError> {
        Self::from_value_with_env(value, |key| std::env::var(key).ok())
    }

    /// Resolve the host's config with a custom environment lookup.
    pub fn from_value_with_env<F>(value: &Value, env: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let diagnostics = Self::validate_with_env(value, &env);
        if let Some(first) = diagnostics.iter().find(|d| d.is_error()) {
            return Err(ProviderError::Configuration(match &first.detail {
                Some(detail) => format!("{}: {}", first.summary, detail),
                None => first.summary.clone(),
            }));
        }
        let raw = Self::raw(value)?;

        let port = match raw.port {
            Some(port) => port as u16,
            None => env("REDSHIFT_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
        };
        let sslmode = raw
            .sslmode
            .or_else(|| env("REDSHIFT_SSLMODE"))
            .and_then(|m| SslMode::parse(&m))
            .unwrap_or(SslMode::Require);

        Ok(Self {
            host: non_empty(raw.host)
                .or_else(|| non_empty(env("REDSHIFT_HOST")))
                .unwrap_or_default(),
            port,
            username: non_empty(raw.username)
                .or_else(|| non_empty(env("REDSHIFT_USER")))
                .unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
            password: raw.password.or_else(|| env("REDSHIFT_PASSWORD")),
            database: non_empty(raw.database)
                .or_else(|| non_empty(env("REDSHIFT_DATABASE")))
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            sslmode,
            max_connections: raw
                .max_connections
                .map(|n| n as u32)
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            connect_timeout: Duration::from_secs(
                raw.connect_timeout
                    .map(|n| n as u64)
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            ),
        })
    }

    /// Validate the host's config against the process environment.
    pub fn validate(value: &Value) -> Vec<Diagnostic> {
        Self::validate_with_env(value, |key| std::env::var(key).ok())
    }

    /// Validate the host's config with a custom environment lookup.
    pub fn validate_with_env<F>(value: &Value, env: F) -> Vec<Diagnostic>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut diagnostics = validation::validate(&provider_schema(), value);
        if !diagnostics.is_empty() {
            return diagnostics;
        }
        let raw = match Self::raw(value) {
            Ok(raw) => raw,
            Err(e) => return vec![Diagnostic::error(e.to_string())],
        };

        if non_empty(raw.host.clone())
            .or_else(|| non_empty(env("REDSHIFT_HOST")))
            .is_none()
        {
            diagnostics.push(
                Diagnostic::error("Missing cluster host")
                    .with_detail("Set `host` or the REDSHIFT_HOST environment variable")
                    .with_attribute("host"),
            );
        }
        if let Some(port) = raw.port {
            if !(1..=i64::from(u16::MAX)).contains(&port) {
                diagnostics.push(
                    Diagnostic::error("Invalid port")
                        .with_detail(format!("{} is outside 1-65535", port))
                        .with_attribute("port"),
                );
            }
        } else if let Some(port) = env("REDSHIFT_PORT") {
            if port.parse::<u16>().map_or(true, |p| p == 0) {
                diagnostics.push(
                    Diagnostic::error("Invalid REDSHIFT_PORT")
                        .with_detail(format!("\"{}\" is not a valid port", port))
                        .with_attribute("port"),
                );
            }
        }
        if raw.sslmode.is_none() {
            if let Some(mode) = env("REDSHIFT_SSLMODE") {
                if SslMode::parse(&mode).is_none() {
                    diagnostics.push(
                        Diagnostic::error("Invalid REDSHIFT_SSLMODE")
                            .with_detail(format!("\"{}\" is not one of: {}", mode, SSL_MODES.join(", ")))
                            .with_attribute("sslmode"),
                    );
                }
            }
        }
        if let Some(n) = raw.max_connections {
            if n < 0 || n > i64::from(u32::MAX) {
                diagnostics.push(
                    Diagnostic::error("Invalid max_connections")
                        .with_detail("Must be zero or a positive number")
                        .with_attribute("max_connections"),
                );
            }
        }
        if let Some(n) = raw.connect_timeout {
            if n <= 0 {
                diagnostics.push(
                    Diagnostic::error("Invalid connect_timeout")
                        .with_detail("Must be a positive number of seconds")
                        .with_attribute("connect_timeout"),
                );
            }
        }
        if raw.password.is_none() && env("REDSHIFT_PASSWORD").is_none() {
            diagnostics.push(
                Diagnostic::warning("No password configured")
                    .with_detail("Connections will only succeed if the cluster trusts this client")
                    .with_attribute("password"),
            );
        }
        diagnostics
    }

    fn raw(value: &Value) -> Result<RawProviderConfig, ProviderError> {
        if value.is_null() {
            return Ok(RawProviderConfig::default());
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Connection options for `database`.
    pub fn connect_options(&self, database: &str) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .database(database)
            .ssl_mode(self.sslmode.into())
            .application_name(env!("CARGO_PKG_NAME"));
        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
