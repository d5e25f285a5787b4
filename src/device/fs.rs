// ABOUTME: File and directory operations built on remote POSIX utilities.
// ABOUTME: Temp resources come with explicit cleanup handles the caller runs.

use super::{Device, RemoteOs};
use crate::error::{Error, Result};
use crate::exec::{Cmd, quote};
use std::fmt;
use std::path::Path;
use tokio::io::AsyncRead;

/// Executable bits added to pushed files when the local filesystem has none.
const FORCED_EXEC_BITS: u32 = 0o550;

/// Whether the local filesystem records executable permission bits.
const LOCAL_FS_HAS_EXEC_BITS: bool = cfg!(unix);

/// Removes a remote resource created by [`Device::make_temp_dir`] or
/// [`Device::temp_file`].
///
/// Nothing happens unless [`Cleanup::run`] is called.
#[must_use = "remote temporary resources are only removed by Cleanup::run"]
pub struct Cleanup {
    device: Device,
    cmd: Cmd,
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleanup").field("cmd", &self.cmd).finish()
    }
}

impl Cleanup {
    /// Remove the resource.
    ///
    /// Runs under the device command timeout. A failure carries the
    /// command's output.
    pub async fn run(self) -> Result<()> {
        self.device.run(self.cmd).await
    }
}

/// Mode to apply to a pushed file on a remote of class `os`.
///
/// Files from a local filesystem without executable bits would otherwise
/// lose them on a POSIX remote.
pub fn push_mode(local_mode: u32, os: RemoteOs, local_has_exec_bits: bool) -> u32 {
    let mode = local_mode & 0o7777;
    if os.is_posix() && !local_has_exec_bits {
        mode | FORCED_EXEC_BITS
    } else {
        mode
    }
}

#[cfg(unix)]
fn local_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn local_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Last path component of a `find -printf '%f\n'` line.
fn base_name(line: &str) -> &str {
    line.rsplit('/').next().unwrap_or(line)
}

impl Device {
    fn require_posix(&self, operation: &'static str) -> Result<()> {
        if self.os.is_posix() {
            Ok(())
        } else {
            Err(Error::Unsupported {
                operation,
                os: self.os,
            })
        }
    }

    /// Root of the remote filesystem.
    pub fn root_path(&self) -> Result<&'static str> {
        self.require_posix("root path")?;
        Ok("/")
    }

    /// Create a temporary directory, returning its path and a cleanup handle.
    pub async fn make_temp_dir(&self) -> Result<(String, Cleanup)> {
        self.require_posix("temporary directory creation")?;
        let dir = self.call(Cmd::new("mktemp").arg("-d")).await?;
        let cleanup = Cleanup {
            device: self.clone(),
            cmd: Cmd::new("rm").args(["-rf", quote(&dir).as_str()]),
        };
        Ok((dir, cleanup))
    }

    /// Create a temporary file, returning its path and a cleanup handle.
    pub async fn temp_file(&self) -> Result<(String, Cleanup)> {
        self.require_posix("temporary file creation")?;
        let file = self.call(Cmd::new("mktemp")).await?;
        let cleanup = Cleanup {
            device: self.clone(),
            cmd: Cmd::new("rm").args(["-f", quote(&file).as_str()]),
        };
        Ok((file, cleanup))
    }

    /// Write `contents` to `dest`, then set its permission bits to `mode`.
    pub async fn write_file<R>(&self, contents: R, mode: u32, dest: &str) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let dest = quote(dest);
        let perm = format!("{:04o}", mode & 0o7777);
        let cmd = Cmd::new("cat")
            .args([">", dest.as_str(), ";", "chmod", perm.as_str(), dest.as_str()])
            .stdin(contents);
        self.run(cmd).await
    }

    /// Copy a local file to `dest` on the remote, keeping its permission bits.
    pub async fn push_file(&self, source: impl AsRef<Path>, dest: &str) -> Result<()> {
        let file = tokio::fs::File::open(source.as_ref()).await?;
        let metadata = file.metadata().await?;
        let mode = push_mode(local_mode(&metadata), self.os, LOCAL_FS_HAS_EXEC_BITS);
        self.write_file(file, mode, dest).await
    }

    /// Raw contents of a remote file.
    pub async fn file_contents(&self, path: &str) -> Result<Vec<u8>> {
        let cmd = Cmd::new("cat").arg(quote(path));
        let command = self.launcher.command_line(&cmd);
        let output = self.output(cmd).await?;
        if !output.success() {
            return Err(Error::CommandFailed {
                command,
                status: output.status,
                stdout: String::new(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output.stdout)
    }

    pub async fn remove_file(&self, path: &str) -> Result<()> {
        self.run(Cmd::new("rm").args(["-f", quote(path).as_str()])).await
    }

    async fn find(&self, path: &str, filters: &[&str]) -> Result<Vec<String>> {
        let path = if path.is_empty() {
            self.root_path()?
        } else {
            path
        };
        // find may partially succeed; keep whatever it printed.
        let cmd = Cmd::new("find")
            .args([quote(path).as_str(), "-mindepth", "1", "-maxdepth", "1"])
            .args(filters.iter().copied())
            .args(["-printf", "'%f\\n'", "2>/dev/null"]);
        let output = self.output(cmd).await?;
        if !output.success() {
            tracing::debug!("find in {} exited with {}", path, output.status);
        }
        Ok(output
            .stdout_lossy()
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| base_name(line).to_string())
            .collect())
    }

    /// Names of the directories directly inside `path`.
    pub async fn list_directories(&self, path: &str) -> Result<Vec<String>> {
        self.find(path, &["-type", "d"]).await
    }

    /// Names of the regular files directly inside `path`.
    pub async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        self.find(path, &["-type", "f"]).await
    }

    /// Names of the executable regular files directly inside `path`.
    pub async fn list_executables(&self, path: &str) -> Result<Vec<String>> {
        self.find(path, &["-type", "f", "-executable"]).await
    }

    /// Whether `path` is a directory. Any failure counts as `false`.
    pub async fn is_directory(&self, path: &str) -> bool {
        self.run(Cmd::new("cd").arg(quote(path))).await.is_ok()
    }

    /// Whether `path` exists and is not a directory. Any failure counts as `false`.
    pub async fn is_file(&self, path: &str) -> bool {
        if self.is_directory(path).await {
            return false;
        }
        self.run(Cmd::new("stat").arg(quote(path))).await.is_ok()
    }

    /// Directory the remote shell starts in.
    pub async fn working_directory(&self) -> Result<String> {
        self.call(Cmd::new("pwd")).await
    }

    /// Query the remote default environment with `env`.
    pub async fn fetch_env(&self) -> Result<crate::exec::Env> {
        let output = self.call(Cmd::new("env")).await?;
        Ok(crate::exec::Env::parse(&output))
    }
}
