// ABOUTME: Command descriptor for remote execution.
// ABOUTME: Also provides POSIX shell quoting for values placed on the command line.

use super::env::Env;
use crate::transport::{BoxReader, BoxWriter};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

/// Description of a single remote command invocation.
///
/// Arguments are joined with spaces and interpreted by the remote shell, so
/// redirections such as `>` work as-is. Use [`quote`] for untrusted values.
pub struct Cmd {
    pub name: String,
    pub args: Vec<String>,
    pub dir: Option<String>,
    pub env: Env,
    pub(crate) stdin: Option<BoxReader>,
    pub(crate) stdout: Option<BoxWriter>,
    pub(crate) stderr: Option<BoxWriter>,
}

impl Cmd {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            dir: None,
            env: Env::new(),
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the command from this remote directory.
    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Set an environment variable for this command only.
    pub fn env(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.env.set(key, value);
        self
    }

    pub fn stdin(mut self, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdin = Some(Box::new(reader));
        self
    }

    pub fn stdout(mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stdout = Some(Box::new(writer));
        self
    }

    pub fn stderr(mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stderr = Some(Box::new(writer));
        self
    }
}

impl fmt::Debug for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cmd")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("dir", &self.dir)
            .field("env", &self.env)
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c)
}

/// Quote `value` so the remote POSIX shell sees it as a single word.
///
/// Values made only of safe characters are returned unchanged.
pub fn quote(value: &str) -> String {
    if !value.is_empty() && value.chars().all(is_safe) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}
