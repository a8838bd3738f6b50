//! IMAP connection configuration

use crate::error::{Error, Result};
use std::env;
use std::time::Duration;

/// Configuration for an [`ImapStore`](crate::ImapStore).
///
/// Mirrors the property bag recognised at store construction. Only the
/// host and credentials are required; everything else defaults to the
/// conservative single-connection profile.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,

    /// Connect over implicit TLS (port 993 mode) instead of plain TCP.
    pub implicit_tls: bool,
    /// Attempt a STARTTLS upgrade when the server advertises it.
    pub starttls: bool,
    /// Skip server certificate verification. Needed for bridges and test
    /// servers with self-signed certificates.
    pub danger_accept_invalid_certs: bool,

    /// Try SASL `AUTHENTICATE` before falling back to `LOGIN`. When
    /// false, `AUTHENTICATE` is only used if the server disables
    /// `LOGIN` outright.
    pub sasl: bool,
    /// Authorization identity for SASL; defaults to the username.
    pub sasl_authorization_id: Option<String>,
    pub auth_plain_disabled: bool,
    pub auth_login_disabled: bool,

    /// Maximum number of pooled connections (excluding a dedicated store
    /// connection).
    pub pool_size: usize,
    /// Idle threshold after which a pooled connection is health-checked or
    /// evicted, and the bound on blocking pool acquires.
    pub pool_timeout: Duration,
    /// Reserve one connection for store-level commands.
    pub separate_store_connection: bool,

    /// Freshness window for cached folder STATUS results.
    pub status_cache_timeout: Duration,

    /// Socket read deadline for commands. `None` (the default) blocks
    /// indefinitely; expiry is fatal to the connection.
    pub command_timeout: Option<Duration>,
}

pub(crate) const DEFAULT_PORT: u16 = 143;
pub(crate) const DEFAULT_TLS_PORT: u16 = 993;

impl ImapConfig {
    /// Configuration for `host` with the default plaintext port.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            password: password.into(),
            implicit_tls: false,
            starttls: false,
            danger_accept_invalid_certs: false,
            sasl: false,
            sasl_authorization_id: None,
            auth_plain_disabled: false,
            auth_login_disabled: false,
            pool_size: 1,
            pool_timeout: Duration::from_millis(45_000),
            separate_store_connection: false,
            status_cache_timeout: Duration::from_millis(1_000),
            command_timeout: None,
        }
    }

    /// Same as [`ImapConfig::new`] but over implicit TLS on port 993.
    #[must_use]
    pub fn new_tls(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut config = Self::new(host, username, password);
        config.implicit_tls = true;
        config.port = DEFAULT_TLS_PORT;
        config
    }

    /// Load IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `localhost`)
    /// - `IMAP_PORT` (default: `143`, or `993` when `IMAP_TLS=1`)
    /// - `IMAP_TLS` (default: unset)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let username = env::var("IMAP_USERNAME")
            .map_err(|_| Error::Config("IMAP_USERNAME not set".into()))?;
        let password = env::var("IMAP_PASSWORD")
            .map_err(|_| Error::Config("IMAP_PASSWORD not set".into()))?;
        let host = env::var("IMAP_HOST").unwrap_or_else(|_| "localhost".to_string());

        let tls = env::var("IMAP_TLS").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
        let mut config = if tls {
            Self::new_tls(host, username, password)
        } else {
            Self::new(host, username, password)
        };

        if let Ok(port) = env::var("IMAP_PORT") {
            config.port = port
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?;
        }
        Ok(config)
    }

    /// The authorization identity to present in SASL exchanges.
    #[must_use]
    pub fn authorization_id(&self) -> &str {
        self.sasl_authorization_id
            .as_deref()
            .unwrap_or(&self.username)
    }
}
