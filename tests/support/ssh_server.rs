// ABOUTME: In-process SSH server for exercising the russh transport end to end.
// ABOUTME: Exec requests are answered from a fixed script instead of a shell.

use parking_lot::Mutex;
use remsh::ssh::{Session, SessionConfig};
use russh::keys::ssh_key::LineEnding;
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::{Algorithm, PrivateKey};
use russh::server::{self, Auth, Msg, Session as ServerSession};
use russh::{Channel, ChannelId, CryptoVec, Sig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

/// What the server saw, shared across connections.
#[derive(Default)]
pub struct Recorded {
    pub commands: Mutex<Vec<String>>,
    pub signals: Mutex<Vec<String>>,
}

/// A scripted SSH server listening on 127.0.0.1.
///
/// Known command lines:
/// - `echo hello`: prints `hello`, reports exit 0, then EOF.
/// - `eof-first`: prints `late`, sends EOF, then reports exit 7.
/// - `stderr`: prints `oops` on stderr and exits 1.
/// - `cat`: echoes stdin and exits 0 once stdin ends.
/// - `sleep`: runs until a signal arrives and reports it as the exit signal.
///
/// Anything else is rejected with a channel failure. `direct-tcpip`
/// channels echo their input.
pub struct ScriptedServer {
    pub port: u16,
    pub recorded: Arc<Recorded>,
    dir: TempDir,
}

impl ScriptedServer {
    pub async fn start() -> Self {
        let host_key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .expect("host key generation should succeed");
        let config = Arc::new(server::Config {
            inactivity_timeout: None,
            auth_rejection_time: Duration::from_millis(100),
            auth_rejection_time_initial: Some(Duration::ZERO),
            keys: vec![host_key],
            ..Default::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let port = listener.local_addr().expect("local addr").port();
        let recorded = Arc::new(Recorded::default());

        let shared = Arc::clone(&recorded);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = ScriptHandler {
                    recorded: Arc::clone(&shared),
                    running: HashMap::new(),
                };
                if let Err(e) = server::run_stream(Arc::clone(&config), socket, handler).await {
                    tracing::debug!("ssh test server session failed: {}", e);
                }
            }
        });

        Self {
            port,
            recorded,
            dir: tempfile::tempdir().expect("tempdir should be created"),
        }
    }

    /// Client configuration with a fresh key and a private known_hosts file.
    pub fn session_config(&self) -> SessionConfig {
        let client_key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .expect("client key generation should succeed");
        let key_path = self.dir.path().join("id_ed25519");
        let encoded = client_key
            .to_openssh(LineEnding::LF)
            .expect("client key should encode");
        std::fs::write(&key_path, encoded.as_bytes()).expect("client key should be written");

        SessionConfig::new("127.0.0.1", "remsh")
            .port(self.port)
            .key_path(key_path)
            .trust_on_first_use(true)
            .known_hosts_path(self.dir.path().join("known_hosts"))
    }

    pub async fn connect(&self) -> Session {
        Session::connect(self.session_config())
            .await
            .expect("connection should succeed")
    }
}

struct ScriptHandler {
    recorded: Arc<Recorded>,
    /// Command line of each channel on this connection.
    running: HashMap<ChannelId, String>,
}

fn send(session: &mut ServerSession, channel: ChannelId, data: &[u8]) -> Result<(), russh::Error> {
    session.data(channel, CryptoVec::from_slice(data))
}

fn finish(session: &mut ServerSession, channel: ChannelId) -> Result<(), russh::Error> {
    session.eof(channel)?;
    session.close(channel)
}

impl server::Handler for ScriptHandler {
    type Error = russh::Error;

    async fn auth_publickey(
        &mut self,
        _user: &str,
        _public_key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut ServerSession,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut ServerSession,
    ) -> Result<bool, Self::Error> {
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(channel.into_stream());
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
            let _ = writer.shutdown().await;
        });
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut ServerSession,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        self.recorded.commands.lock().push(command.clone());
        self.running.insert(channel, command.clone());

        match command.as_str() {
            "echo hello" => {
                session.channel_success(channel)?;
                send(session, channel, b"hello\n")?;
                session.exit_status_request(channel, 0)?;
                finish(session, channel)?;
            }
            "eof-first" => {
                session.channel_success(channel)?;
                send(session, channel, b"late\n")?;
                session.eof(channel)?;
                session.exit_status_request(channel, 7)?;
                session.close(channel)?;
            }
            "stderr" => {
                session.channel_success(channel)?;
                session.extended_data(channel, 1, CryptoVec::from_slice(b"oops\n"))?;
                session.exit_status_request(channel, 1)?;
                finish(session, channel)?;
            }
            "cat" | "sleep" => session.channel_success(channel)?,
            _ => session.channel_failure(channel)?,
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut ServerSession,
    ) -> Result<(), Self::Error> {
        send(session, channel, data)
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut ServerSession,
    ) -> Result<(), Self::Error> {
        if self.running.get(&channel).map(String::as_str) == Some("cat") {
            session.exit_status_request(channel, 0)?;
            finish(session, channel)?;
        }
        Ok(())
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        signal: Sig,
        session: &mut ServerSession,
    ) -> Result<(), Self::Error> {
        self.recorded.signals.lock().push(format!("{signal:?}"));
        session.exit_signal_request(channel, signal, false, "", "en")?;
        finish(session, channel)
    }
}
