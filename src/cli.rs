// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "remsh")]
#[command(about = "Run commands, forward ports and move files on a remote device over SSH")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Remote server as [user@]host[:port], overriding remsh.yml
    #[arg(short = 'H', long, global = true)]
    pub host: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command on the device, streaming its output
    Exec {
        /// Remote working directory
        #[arg(short, long)]
        dir: Option<String>,

        /// Forward local stdin to the command
        #[arg(short, long)]
        interactive: bool,

        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Forward an ephemeral local port to a port on the device
    Forward {
        /// Port on the device
        remote_port: u16,
    },

    /// Copy a local file to the device, keeping its permission bits
    Push { local: PathBuf, remote: String },

    /// Print the contents of a remote file
    Cat { path: String },

    /// List entries of a remote directory
    Ls {
        path: String,

        /// Only list directories
        #[arg(short, long, conflicts_with = "executables")]
        dirs: bool,

        /// Only list executable files
        #[arg(short = 'x', long)]
        executables: bool,
    },

    /// Print the remote working directory
    Pwd,
}
