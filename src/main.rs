use anyhow::{anyhow, Context};
use clap::Parser;
use rexec::{transport::TcpConnector, Client, Request};
use std::io::Write;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Run a command registered on a rexec server
#[derive(Parser, Debug)]
#[command(name = "rexec", version)]
struct Cli {
    /// Server address to connect to
    #[arg(long)]
    addr: String,

    /// Named argument to send with the request, as KEY=VALUE
    #[arg(short = 'a', long = "arg", value_parser = parse_key_val)]
    args: Vec<(String, String)>,

    /// Name of the registered command to run
    command: String,
}

fn parse_key_val(s: &str) -> anyhow::Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got `{}`", s))?;
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so the remote stdout is relayed untouched
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    match run(Cli::parse()).await {
        Ok(code) => ExitCode::from(exit_status(code)),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut request = Request::new(cli.command);
    request.args.extend(cli.args);

    let client = Client::new(TcpConnector::new(cli.addr));
    let response = client.call_request(request).await?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(response.stdout.as_bytes())?;
    stdout.flush().context("failed to write stdout")?;

    let mut stderr = std::io::stderr().lock();
    stderr.write_all(response.stderr.as_bytes())?;
    stderr.flush().context("failed to write stderr")?;

    Ok(response.exit_code)
}

// Process exit statuses are 0-255; anything else is reported as 1
fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
