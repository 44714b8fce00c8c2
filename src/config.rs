use mssql_client::{Config, Credentials};
use serde::Deserialize;
use std::time::Duration;

use crate::error::{CursorError, Result};

/// Alias given to the derived table in the calculated `COUNT(*)` query.
pub const DEFAULT_COUNT_ALIAS: &str = "port_cnt";

/// Connection settings for [`MssqlDatabase::connect`](crate::MssqlDatabase::connect).
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub database: String,
    pub auth: AuthConfig,
    #[serde(default = "default_true")]
    pub encrypt: bool,
    #[serde(default)]
    pub trust_server_certificate: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default)]
    pub packet_size: u16,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum AuthConfig {
    #[serde(rename = "sql")]
    Sql { username: String, password: String },
    #[serde(rename = "ntlm")]
    Ntlm {
        username: String,
        password: String,
        domain: String,
    },
    #[serde(rename = "windows")]
    Windows,
    #[serde(rename = "azure_ad")]
    AzureAd { username: String, password: String },
    #[serde(rename = "azure_ad_token")]
    AzureAdToken { token: String },
}

fn default_port() -> u16 {
    1433
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    15_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_app_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

impl ConnectionConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| CursorError::Config(format!("Invalid connection config JSON: {e}")))
    }

    /// Build the driver configuration.
    pub fn to_client_config(&self) -> Result<Config> {
        let mut config = Config::new()
            .host(&self.server)
            .port(self.port)
            .credentials(self.auth.credentials()?)
            .application_name(&self.app_name)
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .encrypt(self.encrypt)
            .trust_server_certificate(self.trust_server_certificate);
        if !self.database.is_empty() {
            config = config.database(&self.database);
        }

        // Settings without builder methods
        config.command_timeout = Duration::from_millis(self.request_timeout_ms);
        config.instance = self.instance_name.clone().or_else(|| config.instance.take());
        if self.packet_size != 0 {
            config.packet_size = self.packet_size;
        }
        Ok(config)
    }
}

impl AuthConfig {
    fn credentials(&self) -> Result<Credentials> {
        let (user, password) = match self {
            AuthConfig::AzureAdToken { token } => return Ok(Credentials::azure_token(token.clone())),
            AuthConfig::Windows => {
                return Err(CursorError::Config(
                    "Windows authentication is not supported by the mssql-client driver".into(),
                ))
            }
            // NTLM logins are passed as domain\user
            AuthConfig::Ntlm {
                username,
                password,
                domain,
            } => (format!("{domain}\\{username}"), password),
            AuthConfig::Sql { username, password } | AuthConfig::AzureAd { username, password } => {
                (username.clone(), password)
            }
        };
        Ok(Credentials::sql_server(user, password.clone()))
    }
}

/// Per-cursor behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CursorOptions {
    /// Count rows with a wrapped `COUNT(*)` query (`true`) or ask the
    /// result handle for its native row count (`false`).
    #[serde(default = "default_true")]
    pub calculate_row_count: bool,
    #[serde(default = "default_count_alias")]
    pub count_alias: String,
}

fn default_count_alias() -> String {
    DEFAULT_COUNT_ALIAS.to_string()
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            calculate_row_count: true,
            count_alias: default_count_alias(),
        }
    }
}

impl CursorOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| CursorError::Config(format!("Invalid cursor options JSON: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// The count alias is pasted into SQL, so it must be a plain identifier.
    pub fn validate(&self) -> Result<()> {
        let alias = &self.count_alias;
        let mut chars = alias.chars();
        let starts_ok = chars.next().is_some_and(|c| c.is_alphabetic() || c == '_');
        if starts_ok && chars.all(|c| c.is_alphanumeric() || c == '_') {
            Ok(())
        } else {
            Err(CursorError::Config(format!("Invalid count alias: {alias:?}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sql_auth() {
        let json = r#"{
            "server": "localhost",
            "port": 1433,
            "database": "master",
            "auth": {"type": "sql", "username": "sa", "password": "secret"},
            "encrypt": true,
            "trust_server_certificate": true,
            "connect_timeout_ms": 15000,
            "request_timeout_ms": 30000,
            "app_name": "etl",
            "instance_name": null,
            "packet_size": 4096
        }"#;
        let cfg = ConnectionConfig::from_json(json).unwrap();
        assert_eq!(cfg.server, "localhost");
        assert_eq!(cfg.port, 1433);
        let client_cfg = cfg.to_client_config().unwrap();
        assert_eq!(client_cfg.host, "localhost");
        assert_eq!(client_cfg.port, 1433);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let json = r#"{
            "server": "db.internal",
            "auth": {"type": "sql", "username": "reader", "password": "pw"}
        }"#;
        let cfg = ConnectionConfig::from_json(json).unwrap();
        assert_eq!(cfg.port, 1433);
        assert!(cfg.encrypt);
        assert!(!cfg.trust_server_certificate);
        assert_eq!(cfg.request_timeout_ms, 30_000);
        assert_eq!(cfg.app_name, "mssqlcursor");
        assert!(cfg.database.is_empty());
    }

    #[test]
    fn parse_azure_ad_token() {
        let json = r#"{
            "server": "myserver.database.windows.net",
            "database": "mydb",
            "auth": {"type": "azure_ad_token", "token": "eyJ..."}
        }"#;
        let cfg = ConnectionConfig::from_json(json).unwrap();
        assert!(matches!(cfg.auth, AuthConfig::AzureAdToken { .. }));
        let _client_cfg = cfg.to_client_config().unwrap();
    }

    #[test]
    fn windows_auth_is_rejected() {
        let json = r#"{"server": "localhost", "auth": {"type": "windows"}}"#;
        let cfg = ConnectionConfig::from_json(json).unwrap();
        assert!(matches!(cfg.to_client_config(), Err(CursorError::Config(_))));
    }

    #[test]
    fn invalid_json_returns_error() {
        let result = ConnectionConfig::from_json("not json");
        assert!(matches!(result, Err(CursorError::Config(_))));
    }

    #[test]
    fn cursor_options_defaults() {
        let opts = CursorOptions::from_json("{}").unwrap();
        assert_eq!(opts, CursorOptions::default());
        assert!(opts.calculate_row_count);
        assert_eq!(opts.count_alias, "port_cnt");
    }

    #[test]
    fn cursor_options_native_count() {
        let opts =
            CursorOptions::from_json(r#"{"calculate_row_count": false, "count_alias": "c"}"#)
                .unwrap();
        assert!(!opts.calculate_row_count);
        assert_eq!(opts.count_alias, "c");
    }

    #[test]
    fn ntlm_user_is_domain_qualified() {
        let json = r#"{
            "server": "localhost",
            "auth": {"type": "ntlm", "username": "etl", "password": "pw", "domain": "CORP"},
            "instance_name": "SQLEXPRESS"
        }"#;
        let cfg = ConnectionConfig::from_json(json).unwrap();
        assert!(cfg.auth.credentials().is_ok());
        let client_cfg = cfg.to_client_config().unwrap();
        assert_eq!(client_cfg.instance.as_deref(), Some("SQLEXPRESS"));
    }

    #[test]
    fn validate_rejects_bad_aliases() {
        for alias in ["", "1abc", "x y", "x; DROP TABLE t; --", "a-b"] {
            let opts = CursorOptions {
                count_alias: alias.to_string(),
                ..CursorOptions::default()
            };
            assert!(matches!(opts.validate(), Err(CursorError::Config(_))), "{alias:?}");
        }
        assert!(CursorOptions::default().validate().is_ok());
    }

    #[test]
    fn cursor_options_reject_unsafe_alias() {
        let result = CursorOptions::from_json(r#"{"count_alias": "x; DROP TABLE t"}"#);
        assert!(matches!(result, Err(CursorError::Config(_))));
    }
}
