// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Accepts servers as "user@host:port" strings or detailed tables.

use serde::Deserialize;

use super::ServerConfig;

pub fn deserialize_server<'de, D>(deserializer: D) -> Result<ServerConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    ServerEntry::deserialize(deserializer)?
        .into_server_config()
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServerEntry {
    Simple(String),
    Detailed(ServerConfig),
}

impl ServerEntry {
    fn into_server_config(self) -> Result<ServerConfig, String> {
        match self {
            ServerEntry::Simple(s) => ServerConfig::parse(&s),
            ServerEntry::Detailed(c) => Ok(c),
        }
    }
}
