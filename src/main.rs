// ABOUTME: Entry point for the remsh CLI application.
// ABOUTME: Parses arguments, connects to the device and dispatches subcommands.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use remsh::config::{Config, ServerConfig};
use remsh::device::Device;
use remsh::error::{Error, Result};
use remsh::exec::{Cmd, quote};
use remsh::ssh::Session;
use std::env;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

/// Exit code used when the remote command was killed by a signal.
const SIGNALED_EXIT_CODE: i32 = 255;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Resolve configuration from `--host` and/or the discovered config file.
fn load_config(host: Option<&str>) -> Result<Config> {
    let cwd = env::current_dir()?;
    let discovered = Config::discover(&cwd);

    match (host, discovered) {
        (Some(host), Ok(mut config)) => {
            config.server = ServerConfig::parse(host).map_err(Error::InvalidConfig)?;
            Ok(config)
        }
        (Some(host), Err(Error::ConfigNotFound(_))) => Ok(Config::for_server(
            ServerConfig::parse(host).map_err(Error::InvalidConfig)?,
        )),
        (_, result) => result,
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.host.as_deref())?;
    let extra_env = config.resolved_env()?;

    tracing::debug!("connecting to {}", config.server.host);
    let session = Arc::new(Session::connect(config.server.ssh_session_config()).await?);

    let device = Device::connect(session.clone(), config.os)
        .await?
        .command_timeout(config.command_timeout);
    let env = device.default_env().merged(&extra_env);
    let device = device.with_env(env);

    let result = dispatch(&device, cli.command).await;

    if let Err(e) = session.disconnect().await {
        tracing::debug!("disconnect failed: {}", e);
    }
    result
}

async fn dispatch(device: &Device, command: Commands) -> Result<i32> {
    match command {
        Commands::Exec {
            dir,
            interactive,
            command,
        } => exec(device, dir, interactive, command).await,
        Commands::Forward { remote_port } => {
            let handle = device.forward_port(remote_port).await?;
            println!("127.0.0.1:{} -> device:{}", handle.port(), remote_port);
            tokio::signal::ctrl_c().await?;
            handle.stop();
            Ok(0)
        }
        Commands::Push { local, remote } => {
            device.push_file(&local, &remote).await?;
            Ok(0)
        }
        Commands::Cat { path } => {
            let contents = device.file_contents(&path).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&contents).await?;
            stdout.flush().await?;
            Ok(0)
        }
        Commands::Ls {
            path,
            dirs,
            executables,
        } => {
            let entries = if dirs {
                device.list_directories(&path).await?
            } else if executables {
                device.list_executables(&path).await?
            } else {
                device.list_files(&path).await?
            };
            for entry in entries {
                println!("{entry}");
            }
            Ok(0)
        }
        Commands::Pwd => {
            println!("{}", device.working_directory().await?);
            Ok(0)
        }
    }
}

/// Run a command with its output streamed to the local terminal.
async fn exec(
    device: &Device,
    dir: Option<String>,
    interactive: bool,
    command: Vec<String>,
) -> Result<i32> {
    let mut words = command.into_iter();
    let Some(name) = words.next() else {
        return Err(Error::InvalidConfig("no command given".to_string()));
    };

    let mut cmd = Cmd::new(name)
        .args(words.map(|word| quote(&word)))
        .stdout(tokio::io::stdout())
        .stderr(tokio::io::stderr());
    if let Some(dir) = dir {
        cmd = cmd.dir(dir);
    }
    if interactive {
        cmd = cmd.stdin(tokio::io::stdin());
    }

    let status = device.start(cmd).await?.wait().await?;
    tracing::debug!("remote command finished with {}", status);
    Ok(status
        .code()
        .map(|code| code as i32)
        .unwrap_or(SIGNALED_EXIT_CODE))
}
