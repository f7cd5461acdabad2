use anyhow::Context;
use clap::Parser;
use rexec_server::{command::DEFAULT_SHELL, config, Executor, Server};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Serve a fixed set of shell commands to rexec clients
#[derive(Parser, Debug)]
#[command(name = "rexec-server", version)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:0")]
    addr: String,

    /// Shell used to run command lines
    #[arg(long, default_value = DEFAULT_SHELL)]
    shell: String,

    /// JSON file listing the commands to serve
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let commands = config::load_commands(&cli.config)?;
    for command in &commands {
        info!("Registered command: {}", command.name);
    }

    let server = Server::new(commands).with_executor(Executor::with_shell(cli.shell));
    for name in server.registry().duplicate_names() {
        warn!("Command {} is defined more than once, using the first definition", name);
    }

    let listener = TcpListener::bind(&cli.addr)
        .await
        .with_context(|| format!("failed to listen on {}", cli.addr))?;
    info!("Listening on: {}", listener.local_addr()?);

    Arc::new(server)
        .serve_with_shutdown(listener, shutdown_signal())
        .await;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Interrupt received, shutting down"),
        Err(e) => {
            error!("Failed to listen for interrupt: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
