//! Connection options.

use no_panic::no_panic;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::frontend::startup::CLIENT_ONLY_KEYS;

/// SSL connection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Don't use SSL
    #[default]
    Disable,
    /// Try SSL, fall back to unencrypted if the server declines
    Prefer,
    /// Require SSL connection
    Require,
}

impl SslMode {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "disable" | "false" | "0" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" | "true" | "1" => Ok(SslMode::Require),
            _ => Err(Error::Config(format!(
                "Invalid sslmode: expected one of ['disable', 'prefer', 'require'], got {}",
                value
            ))),
        }
    }
}

/// Connection options for PostgreSQL.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `"localhost"`
    pub host: String,

    /// Port number for the PostgreSQL server.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Unix socket path. Takes precedence over `host`/`port`.
    ///
    /// Default: `None`
    pub socket: Option<String>,

    /// Username for authentication. Required.
    ///
    /// Default: `""`
    pub user: String,

    /// Database name to use. Required.
    ///
    /// Default: `""`
    pub database: String,

    /// Password, sent only when the server asks for one.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Application name to report to the server.
    ///
    /// Default: `None`
    pub application_name: Option<String>,

    /// SSL connection mode.
    ///
    /// Default: `SslMode::Disable`
    pub ssl_mode: SslMode,

    /// Additional startup parameters, forwarded verbatim in order.
    ///
    /// Default: `[]`
    pub params: Vec<(String, String)>,
}

impl Default for Opts {
    #[no_panic]
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            socket: None,
            user: String::new(),
            database: String::new(),
            password: None,
            application_name: None,
            ssl_mode: SslMode::Disable,
            params: Vec::new(),
        }
    }
}

impl Opts {
    /// Check that the options can start a session.
    pub fn validate(&self) -> Result<()> {
        if self.user.is_empty() {
            return Err(Error::Config("user is required".into()));
        }
        if self.database.is_empty() {
            return Err(Error::Config("database is required".into()));
        }
        Ok(())
    }

    /// Key/value pairs of the StartupMessage, in wire order.
    pub fn startup_params(&self) -> Vec<(&str, &str)> {
        let mut params = vec![
            ("user", self.user.as_str()),
            ("database", self.database.as_str()),
        ];
        if let Some(app) = &self.application_name {
            params.push(("application_name", app.as_str()));
        }
        for (name, value) in &self.params {
            if CLIENT_ONLY_KEYS.contains(&name.as_str()) {
                continue;
            }
            params.push((name.as_str(), value.as_str()));
        }
        params
    }

    /// `host:port` for TCP connections.
    pub fn tcp_addr(&self) -> String {
        let host = if self.host.is_empty() {
            "localhost"
        } else {
            self.host.as_str()
        };
        format!("{host}:{}", self.port)
    }
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a PostgreSQL connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port]/database[?param1=value1&..]`
    ///
    /// Recognized query parameters:
    /// - `sslmode` / `ssl`: disable, prefer, require
    /// - `application_name`: application name
    /// - `socket`: Unix socket path
    ///
    /// Every other key is forwarded as a startup parameter.
    fn try_from(url: &Url) -> Result<Self> {
        if !["postgres", "postgresql", "pg"].contains(&url.scheme()) {
            return Err(Error::Config(format!(
                "Invalid scheme: expected 'postgres://' or 'pg://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(5432),
            user: url.username().to_string(),
            password: url.password().map(|s| s.to_string()),
            database: url.path().trim_start_matches('/').to_string(),
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sslmode" | "ssl" => {
                    opts.ssl_mode = SslMode::parse(&value)?;
                }
                "application_name" => {
                    opts.application_name = Some(value.to_string());
                }
                "socket" => {
                    opts.socket = Some(value.to_string());
                }
                "password" => {
                    opts.password = Some(value.to_string());
                }
                _ => {
                    opts.params.push((key.to_string(), value.to_string()));
                }
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        let url = Url::parse(s).map_err(|e| Error::Config(format!("Invalid URL: {}", e)))?;
        Self::try_from(&url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url() {
        let opts = Opts::try_from(
            "postgres://alice:pw@db.example:6543/app?sslmode=prefer&application_name=cli&search_path=s",
        )
        .unwrap();
        assert_eq!(opts.host, "db.example");
        assert_eq!(opts.port, 6543);
        assert_eq!(opts.user, "alice");
        assert_eq!(opts.password.as_deref(), Some("pw"));
        assert_eq!(opts.database, "app");
        assert_eq!(opts.ssl_mode, SslMode::Prefer);
        assert_eq!(opts.application_name.as_deref(), Some("cli"));
        assert_eq!(opts.params, vec![("search_path".into(), "s".into())]);
    }

    #[test]
    fn test_bad_scheme_and_sslmode() {
        assert!(matches!(
            Opts::try_from("mysql://u@h/db"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Opts::try_from("postgres://u@h/db?sslmode=maybe"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_validate() {
        let mut opts = Opts::default();
        assert!(matches!(opts.validate(), Err(Error::Config(_))));
        opts.user = "u".into();
        assert!(matches!(opts.validate(), Err(Error::Config(_))));
        opts.database = "d".into();
        opts.validate().unwrap();
    }

    #[test]
    fn test_startup_params_skip_client_keys() {
        let opts = Opts {
            user: "u".into(),
            database: "d".into(),
            password: Some("secret".into()),
            application_name: Some("app".into()),
            params: vec![
                ("ssl".into(), "true".into()),
                ("password".into(), "leak".into()),
                ("TimeZone".into(), "UTC".into()),
            ],
            ..Opts::default()
        };
        assert_eq!(
            opts.startup_params(),
            vec![
                ("user", "u"),
                ("database", "d"),
                ("application_name", "app"),
                ("TimeZone", "UTC"),
            ]
        );
    }

    #[test]
    fn test_tcp_addr_defaults_to_localhost() {
        let opts = Opts::default();
        assert_eq!(opts.tcp_addr(), "localhost:5432");
    }
}
