// ABOUTME: Configuration types and parsing for remsh.yml.
// ABOUTME: Describes the remote device: server address, OS class, environment, timeouts.

mod deserialize;
mod env_value;
mod server;

pub use env_value::{EnvValue, resolve_env_map};
pub use server::ServerConfig;

use crate::device::{DEFAULT_COMMAND_TIMEOUT, RemoteOs};
use crate::error::{Error, Result};
use crate::exec::Env;
use deserialize::deserialize_server;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "remsh.yml";
pub const CONFIG_FILENAME_ALT: &str = "remsh.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".remsh/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_server")]
    pub server: ServerConfig,

    #[serde(default)]
    pub os: RemoteOs,

    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Extra default environment sent with every command.
    #[serde(default)]
    pub env: HashMap<String, EnvValue>,
}

fn default_command_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

impl Config {
    /// Configuration for a server given on the command line.
    pub fn for_server(server: ServerConfig) -> Self {
        Self {
            server,
            os: RemoteOs::default(),
            command_timeout: default_command_timeout(),
            env: HashMap::new(),
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Configured environment with all values resolved.
    pub fn resolved_env(&self) -> Result<Env> {
        resolve_env_map(&self.env)
    }
}
