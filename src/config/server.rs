// ABOUTME: Server configuration for SSH connections.
// ABOUTME: Parses formats like "host", "user@host", "host:port", "user@host:port".

use crate::ssh::SessionConfig;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub key: Option<PathBuf>,
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
    #[serde(default)]
    pub trust_first_connection: bool,
}

fn default_port() -> u16 {
    22
}

impl ServerConfig {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("server address cannot be empty".to_string());
        }

        // Parse format: [user@]host[:port]
        let (user_part, rest) = match s.split_once('@') {
            Some((user, rest)) => (Some(user), rest),
            None => (None, s),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port_str)) => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port: {}", port_str))?;
                (host, port)
            }
            None => (rest, 22),
        };

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }
        if user_part.is_some_and(str::is_empty) {
            return Err("user cannot be empty".to_string());
        }

        Ok(ServerConfig {
            host: host.to_string(),
            port,
            user: user_part.map(|s| s.to_string()),
            key: None,
            known_hosts: None,
            trust_first_connection: false,
        })
    }

    /// User to log in as: the configured user, else `$USER`, else `root`.
    pub fn user_or_default(&self) -> String {
        self.user
            .clone()
            .unwrap_or_else(|| std::env::var("USER").unwrap_or_else(|_| "root".to_string()))
    }

    /// Build the SSH session configuration for this server.
    pub fn ssh_session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(&self.host, self.user_or_default())
            .port(self.port)
            .trust_on_first_use(self.trust_first_connection);
        if let Some(key) = &self.key {
            config = config.key_path(key);
        }
        if let Some(known_hosts) = &self.known_hosts {
            config = config.known_hosts_path(known_hosts);
        }
        config
    }
}
