// ABOUTME: SSH session management using russh.
// ABOUTME: Handles connection and authentication, and serves as the shared transport.

use super::channel::SshExecChannel;
use super::error::{Error, Result};
use crate::transport::{BoxStream, ExecChannel, Transport, TransportError};
use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use russh::Disconnect;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;

/// Host dialed for forwarded ports, relative to the remote machine.
const TUNNEL_HOST: &str = "localhost";

/// Configuration for establishing an SSH session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Remote host to connect to.
    pub host: String,
    /// SSH port (default: 22).
    pub port: u16,
    /// Username for authentication.
    pub user: String,
    /// Optional path to private key file.
    /// If None, will try SSH agent then default key locations.
    pub key_path: Option<PathBuf>,
    /// Whether to accept unknown hosts (Trust On First Use).
    /// If false, connection to unknown hosts will fail.
    pub trust_on_first_use: bool,
    /// Optional path to known_hosts file.
    /// If None, uses the default ~/.ssh/known_hosts.
    pub known_hosts_path: Option<PathBuf>,
    /// Idle time after which the connection is dropped.
    pub inactivity_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            key_path: None,
            trust_on_first_use: false,
            known_hosts_path: None,
            inactivity_timeout: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn trust_on_first_use(mut self, tofu: bool) -> Self {
        self.trust_on_first_use = tofu;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }
}

/// SSH client handler for russh.
pub(crate) struct SshHandler {
    host: String,
    port: u16,
    trust_on_first_use: bool,
    known_hosts_path: Option<PathBuf>,
}

impl SshHandler {
    fn new(config: &SessionConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            trust_on_first_use: config.trust_on_first_use,
            known_hosts_path: config.known_hosts_path.clone(),
        }
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let check_result = match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match check_result {
            Ok(true) => Ok(true),
            Ok(false) if self.trust_on_first_use => {
                tracing::warn!(
                    "Trust-On-First-Use: accepting unknown host key for {}:{}",
                    self.host,
                    self.port
                );
                let learn_result = match &self.known_hosts_path {
                    Some(path) => {
                        learn_known_hosts_path(&self.host, self.port, server_public_key, path)
                    }
                    None => learn_known_hosts(&self.host, self.port, server_public_key),
                };
                if let Err(e) = learn_result {
                    tracing::warn!("Failed to save host key to known_hosts: {}", e);
                }
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(russh::keys::Error::KeyChanged { .. }) => {
                tracing::warn!("host key for {}:{} has changed", self.host, self.port);
                Ok(false)
            }
            // Unreadable known_hosts is treated as an unknown host.
            Err(_) => Ok(self.trust_on_first_use),
        }
    }
}

/// Authentication method resolved from config.
enum AuthMethod {
    Agent(AgentClient<UnixStream>),
    KeyFile(Arc<ssh_key::PrivateKey>),
}

/// An established SSH connection.
///
/// Implements [`Transport`]: every command gets its own session channel and
/// every tunnel its own `direct-tcpip` channel, multiplexed by russh.
pub struct Session {
    config: SessionConfig,
    handle: Handle<SshHandler>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl Session {
    /// Connect to the remote host.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let auth_method = Self::resolve_auth_method(&config).await?;

        let russh_config = Config {
            inactivity_timeout: config.inactivity_timeout,
            ..Default::default()
        };

        let mut session = client::connect(
            Arc::new(russh_config),
            (config.host.as_str(), config.port),
            SshHandler::new(&config),
        )
        .await
        .map_err(|e| {
            if e.to_string().contains("Connection refused") {
                Error::Connection(format!(
                    "connection refused to {}:{}",
                    config.host, config.port
                ))
            } else {
                Error::Connection(e.to_string())
            }
        })?;

        let auth_success = Self::authenticate(&mut session, &config, auth_method).await?;
        if !auth_success {
            return Err(Error::AuthenticationFailed);
        }

        tracing::debug!("connected to {}@{}:{}", config.user, config.host, config.port);
        Ok(Self {
            config,
            handle: session,
        })
    }

    /// Resolve which authentication method to use.
    async fn resolve_auth_method(config: &SessionConfig) -> Result<AuthMethod> {
        if let Some(key_path) = &config.key_path {
            let key = load_secret_key(key_path, None).map_err(|e| Error::KeyLoadFailed {
                path: key_path.clone(),
                reason: e.to_string(),
            })?;
            return Ok(AuthMethod::KeyFile(Arc::new(key)));
        }

        if let Ok(agent) = AgentClient::connect_env().await {
            return Ok(AuthMethod::Agent(agent));
        }

        let home = std::env::var("HOME").map_err(|_| {
            Error::AgentUnavailable("SSH agent not available and HOME not set".to_string())
        })?;

        let default_keys = [
            format!("{}/.ssh/id_ed25519", home),
            format!("{}/.ssh/id_rsa", home),
            format!("{}/.ssh/id_ecdsa", home),
        ];

        for key_path in &default_keys {
            if let Ok(key) = load_secret_key(key_path, None) {
                return Ok(AuthMethod::KeyFile(Arc::new(key)));
            }
        }

        Err(Error::AgentUnavailable(
            "SSH agent not available and no default keys found".to_string(),
        ))
    }

    async fn authenticate(
        session: &mut Handle<SshHandler>,
        config: &SessionConfig,
        auth_method: AuthMethod,
    ) -> Result<bool> {
        match auth_method {
            AuthMethod::Agent(mut agent) => {
                let keys = agent.request_identities().await.map_err(|e| {
                    Error::AgentUnavailable(format!("failed to list agent keys: {}", e))
                })?;

                if keys.is_empty() {
                    return Err(Error::AgentUnavailable("no keys in SSH agent".to_string()));
                }

                for key in &keys {
                    match session
                        .authenticate_publickey_with(&config.user, key.clone(), None, &mut agent)
                        .await
                    {
                        Ok(result) if result.success() => return Ok(true),
                        _ => continue,
                    }
                }
                Ok(false)
            }
            AuthMethod::KeyFile(key) => {
                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(Error::Protocol)?
                    .flatten();

                let result = session
                    .authenticate_publickey(&config.user, PrivateKeyWithHashAlg::new(key, hash_alg))
                    .await
                    .map_err(Error::Protocol)?;

                Ok(result.success())
            }
        }
    }

    /// Disconnect the session. Open channels and tunnels are torn down.
    pub async fn disconnect(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)?;
        Ok(())
    }
}

#[async_trait]
impl Transport for Session {
    async fn open_channel(&self) -> std::result::Result<Box<dyn ExecChannel>, TransportError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| TransportError::ChannelOpen(e.to_string()))?;
        Ok(Box::new(SshExecChannel::new(channel)))
    }

    async fn dial(&self, port: u16) -> std::result::Result<BoxStream, TransportError> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(TUNNEL_HOST, u32::from(port), "127.0.0.1", 0)
            .await
            .map_err(|e| TransportError::Dial {
                port,
                reason: e.to_string(),
            })?;
        Ok(Box::new(channel.into_stream()))
    }
}
