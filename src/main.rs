use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tftp_gateway::tftp::Client;
use tftp_gateway::{Gateway, GatewayConfig};
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tftp-gateway")]
#[command(about = "TFTP front end for an HTTP object store")]
struct Cli {
    /// -v info, -vv debug, -vvv trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway
    Serve {
        #[arg(long, help = "Base URL of the object store")]
        base_url: Option<String>,

        #[arg(short, long, help = "UDP address to listen on")]
        listen: Option<String>,

        #[arg(short, long, help = "Path to gateway.toml")]
        config: Option<PathBuf>,
    },

    /// Download a file from a TFTP server
    Get {
        #[arg(help = "Server address, host:port")]
        server: String,

        #[arg(help = "Remote filename")]
        remote: String,

        #[arg(short, long, help = "Write here instead of stdout")]
        output: Option<PathBuf>,

        #[arg(long)]
        block_size: Option<u16>,
    },

    /// Upload a file to a TFTP server
    Put {
        #[arg(help = "Server address, host:port")]
        server: String,

        #[arg(help = "Local file to send")]
        local: PathBuf,

        #[arg(long, help = "Remote filename, defaults to the local file name")]
        remote: Option<String>,

        #[arg(long)]
        block_size: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve {
            base_url,
            listen,
            config,
        } => serve(base_url, listen, config).await,
        Commands::Get {
            server,
            remote,
            output,
            block_size,
        } => get(&server, &remote, output.as_deref(), block_size).await,
        Commands::Put {
            server,
            local,
            remote,
            block_size,
        } => put(&server, &local, remote, block_size).await,
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tftp_gateway={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

async fn serve(
    base_url: Option<String>,
    listen: Option<String>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    // CLI flags override file and environment
    let mut config = GatewayConfig::load(config_path.as_deref())?;
    if let Some(base_url) = base_url {
        config.base_url = base_url;
    }
    if let Some(listen) = listen {
        config.listen = listen;
    }

    let gateway = Gateway::new(config)?;

    // Bind before spawning anything; a bind failure is fatal
    let listener = gateway.bind(&gateway.config().listen).await?;

    let shutdown_handle = gateway.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, shutting down");
                shutdown_handle.shutdown();
            }
            Err(err) => {
                // Keep serving; the process can still be stopped externally
                tracing::error!(error = %err, "failed to install Ctrl-C handler");
            }
        }
    });

    gateway.serve(listener).await
}

async fn resolve(server: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(server)
        .await
        .with_context(|| format!("cannot resolve {}", server))?
        .next()
        .with_context(|| format!("no address for {}", server))
}

fn client(addr: SocketAddr, block_size: Option<u16>) -> Client {
    match block_size {
        Some(size) => Client::new(addr).with_block_size(size),
        None => Client::new(addr),
    }
}

async fn get(server: &str, remote: &str, output: Option<&Path>, block_size: Option<u16>) -> Result<()> {
    let addr = resolve(server).await?;
    let download = client(addr, block_size)
        .get(remote)
        .await
        .with_context(|| format!("download of {} failed", remote))?;

    match output {
        Some(path) => tokio::fs::write(path, &download.data)
            .await
            .with_context(|| format!("cannot write {}", path.display()))?,
        None => {
            use tokio::io::AsyncWriteExt;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&download.data).await?;
            stdout.flush().await?;
        }
    }
    tracing::info!(bytes = download.data.len(), "download complete");
    Ok(())
}

async fn put(server: &str, local: &Path, remote: Option<String>, block_size: Option<u16>) -> Result<()> {
    // fail fast on missing file
    let data = tokio::fs::read(local)
        .await
        .with_context(|| format!("cannot read {}", local.display()))?;

    let remote = match remote {
        Some(remote) => remote,
        None => local
            .file_name()
            .and_then(|n| n.to_str())
            .context("local path has no file name, pass --remote")?
            .to_string(),
    };

    let addr = resolve(server).await?;
    let sent = client(addr, block_size)
        .put(&remote, Bytes::from(data))
        .await
        .with_context(|| format!("upload of {} failed", remote))?;
    tracing::info!(bytes = sent, "upload complete");
    Ok(())
}
