// ABOUTME: Remote command execution: descriptors, launcher and process handles.
// ABOUTME: Commands run through the remote POSIX shell on their own channel.

mod cmd;
mod env;
mod launcher;
mod process;

pub use cmd::{Cmd, quote};
pub use env::Env;
pub use launcher::CommandLauncher;
pub use process::{KillHandle, RemoteProcess};
