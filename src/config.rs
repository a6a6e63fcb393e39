//! Configuration module for the IMAP session, SMTP relay, and server settings
//!
//! All configuration is loaded from environment variables (optionally seeded
//! from a `.env` file). Lookups go through a caller-supplied function so the
//! parsing rules can be exercised without touching the process environment.

use std::env;
use std::env::VarError;

use secrecy::SecretString;

use crate::errors::{AppError, AppResult};

/// IMAP session configuration
///
/// Passwords are stored using `SecretString` to prevent accidental logging.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    /// IMAP server hostname
    pub host: String,
    /// IMAP server port (typically 993 for TLS, 143 for plain)
    pub port: u16,
    /// Whether to wrap the connection in implicit TLS
    pub tls: bool,
    /// Username for LOGIN
    pub username: String,
    /// Password stored in a type that prevents accidental logging
    pub password: SecretString,
}

/// SMTP relay configuration
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// Relay hostname
    pub host: String,
    /// Relay port (465 implicit TLS, 587 STARTTLS)
    pub port: u16,
    /// Whether TLS is used at all; `false` disables STARTTLS upgrades too
    pub tls: bool,
    /// Username for AUTH; also the From address of outbound mail
    pub username: String,
    /// Relay password
    pub password: SecretString,
}

/// OAuth settings
///
/// Accepted so that `USE_OAUTH=true` relaxes password validation; tokens are
/// never exchanged or refreshed.
#[derive(Debug, Clone, Default)]
pub struct OAuthConfig {
    pub enabled: bool,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
}

/// Server-wide configuration
///
/// Cloned into tool handlers via `Arc` for shared read-only access.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
    pub oauth: OAuthConfig,
    /// TCP connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// TLS handshake/greeting/LOGIN timeout in milliseconds
    pub greeting_timeout_ms: u64,
    /// Per-command socket timeout in milliseconds
    pub socket_timeout_ms: u64,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if required variables are missing or any value
    /// is malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// IMAP_HOST=imap.gmail.com
    /// IMAP_USERNAME=user@gmail.com
    /// IMAP_PASSWORD=app-password
    /// SMTP_HOST=smtp.gmail.com
    /// SMTP_PORT=587
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        Self::load_with(|key| env::var(key))
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn load_with<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let oauth = OAuthConfig {
            enabled: parse_bool(&lookup, "USE_OAUTH", false)?,
            client_id: optional(&lookup, "OAUTH_CLIENT_ID")?,
            client_secret: optional(&lookup, "OAUTH_CLIENT_SECRET")?
                .map(|v| SecretString::new(v.into())),
            refresh_token: optional(&lookup, "OAUTH_REFRESH_TOKEN")?
                .map(|v| SecretString::new(v.into())),
        };

        let imap_username = optional(&lookup, "IMAP_USERNAME")?;
        let imap_password = optional(&lookup, "IMAP_PASSWORD")?;
        if (imap_username.is_none() || imap_password.is_none()) && !oauth.enabled {
            return Err(AppError::invalid(
                "IMAP credentials are required; set IMAP_USERNAME and IMAP_PASSWORD",
            ));
        }
        let imap_username = imap_username.unwrap_or_default();
        let imap_password = imap_password.unwrap_or_default();

        let imap = ImapConfig {
            host: with_default(&lookup, "IMAP_HOST", "imap.gmail.com")?,
            port: parse_u16(&lookup, "IMAP_PORT", 993)?,
            tls: parse_bool(&lookup, "IMAP_TLS", true)?,
            username: imap_username.clone(),
            password: SecretString::new(imap_password.clone().into()),
        };

        let smtp = SmtpConfig {
            host: with_default(&lookup, "SMTP_HOST", "smtp.gmail.com")?,
            port: parse_u16(&lookup, "SMTP_PORT", 587)?,
            tls: parse_bool(&lookup, "SMTP_TLS", true)?,
            username: optional(&lookup, "SMTP_USERNAME")?.unwrap_or(imap_username),
            password: SecretString::new(
                optional(&lookup, "SMTP_PASSWORD")?
                    .unwrap_or(imap_password)
                    .into(),
            ),
        };

        Ok(Self {
            imap,
            smtp,
            oauth,
            connect_timeout_ms: parse_u64(&lookup, "MAIL_CONNECT_TIMEOUT_MS", 30_000)?,
            greeting_timeout_ms: parse_u64(&lookup, "MAIL_GREETING_TIMEOUT_MS", 15_000)?,
            socket_timeout_ms: parse_u64(&lookup, "MAIL_SOCKET_TIMEOUT_MS", 300_000)?,
        })
    }
}

/// Read a variable, treating unset and blank values as absent
fn optional<F>(lookup: &F, key: &str) -> AppResult<Option<String>>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match lookup(key) {
        Ok(v) if !v.trim().is_empty() => Ok(Some(v)),
        Ok(_) | Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

fn with_default<F>(lookup: &F, key: &str, default: &str) -> AppResult<String>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    Ok(optional(lookup, key)?.unwrap_or_else(|| default.to_owned()))
}

/// Parse a boolean variable with flexible values
///
/// Accepts: `1`, `true`, `yes`, `y`, `on` (truthy) or `0`, `false`, `no`,
/// `n`, `off` (falsy). Case-insensitive. Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set to an unrecognized value.
fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> AppResult<bool>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match optional(lookup, key)? {
        Some(v) => parse_bool_value(&v).ok_or_else(|| {
            AppError::InvalidInput(format!("invalid boolean environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn parse_u16<F>(lookup: &F, key: &str, default: u16) -> AppResult<u16>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match optional(lookup, key)? {
        Some(v) => v.trim().parse::<u16>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u16 environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

fn parse_u64<F>(lookup: &F, key: &str, default: u64) -> AppResult<u64>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match optional(lookup, key)? {
        Some(v) => v.trim().parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::env::VarError;

    use secrecy::ExposeSecret;

    use super::{ServerConfig, parse_bool_value};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, VarError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned().ok_or(VarError::NotPresent)
    }

    #[test]
    fn parse_bool_value_accepts_common_truthy_and_falsy_values() {
        for truthy in ["1", "true", "TRUE", " yes ", "Y", "on"] {
            assert_eq!(parse_bool_value(truthy), Some(true));
        }

        for falsy in ["0", "false", "FALSE", " no ", "N", "off"] {
            assert_eq!(parse_bool_value(falsy), Some(false));
        }
    }

    #[test]
    fn parse_bool_value_rejects_unrecognized_values() {
        for invalid in ["", "2", "maybe", "enabled", "disabled"] {
            assert_eq!(parse_bool_value(invalid), None);
        }
    }

    #[test]
    fn loads_defaults_with_only_credentials() {
        let config = ServerConfig::load_with(lookup(&[
            ("IMAP_USERNAME", "user@example.com"),
            ("IMAP_PASSWORD", "secret"),
        ]))
        .expect("config loads");

        assert_eq!(config.imap.host, "imap.gmail.com");
        assert_eq!(config.imap.port, 993);
        assert!(config.imap.tls);
        assert_eq!(config.smtp.host, "smtp.gmail.com");
        assert_eq!(config.smtp.port, 587);
        assert!(config.smtp.tls);
        assert_eq!(config.smtp.username, "user@example.com");
        assert_eq!(config.smtp.password.expose_secret(), "secret");
        assert!(!config.oauth.enabled);
        assert_eq!(config.socket_timeout_ms, 300_000);
    }

    #[test]
    fn explicit_smtp_settings_override_imap_fallbacks() {
        let config = ServerConfig::load_with(lookup(&[
            ("IMAP_USERNAME", "user@example.com"),
            ("IMAP_PASSWORD", "secret"),
            ("IMAP_TLS", "false"),
            ("IMAP_PORT", "143"),
            ("SMTP_HOST", "relay.example.com"),
            ("SMTP_PORT", "2525"),
            ("SMTP_USERNAME", "relay-user@example.com"),
            ("SMTP_PASSWORD", "relay-secret"),
            ("SMTP_TLS", "off"),
        ]))
        .expect("config loads");

        assert!(!config.imap.tls);
        assert_eq!(config.imap.port, 143);
        assert_eq!(config.smtp.host, "relay.example.com");
        assert_eq!(config.smtp.port, 2525);
        assert_eq!(config.smtp.username, "relay-user@example.com");
        assert_eq!(config.smtp.password.expose_secret(), "relay-secret");
        assert!(!config.smtp.tls);
    }

    #[test]
    fn missing_credentials_fail_without_oauth() {
        let err = ServerConfig::load_with(lookup(&[("IMAP_USERNAME", "user@example.com")]))
            .expect_err("password is required");
        assert!(err.to_string().contains("IMAP credentials are required"));
    }

    #[test]
    fn oauth_flag_relaxes_credential_check() {
        let config = ServerConfig::load_with(lookup(&[
            ("USE_OAUTH", "true"),
            ("OAUTH_CLIENT_ID", "client"),
        ]))
        .expect("oauth mode loads without passwords");
        assert!(config.oauth.enabled);
        assert_eq!(config.oauth.client_id.as_deref(), Some("client"));
        assert!(config.imap.username.is_empty());
    }

    #[test]
    fn rejects_malformed_port() {
        let err = ServerConfig::load_with(lookup(&[
            ("IMAP_USERNAME", "user@example.com"),
            ("IMAP_PASSWORD", "secret"),
            ("IMAP_PORT", "imaps"),
        ]))
        .expect_err("port must be numeric");
        assert!(err.to_string().contains("IMAP_PORT"));
    }
}
