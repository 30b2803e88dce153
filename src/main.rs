use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{debug, info};

use opsd::anthropic::AnthropicClient;
use opsd::api::{AppState, create_router};
use opsd::cli::{CliConfig, CliRunner};
use opsd::config::OpsConfig;
use opsd::store::{Db, Store};
use opsd::turn::TurnBroker;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = OpsConfig::load(cli.common.config.as_deref())?;
    init_logging(&cli.common);
    debug!("resolved config: {:#?}", config);

    match cli.command {
        Command::Serve(cmd) => {
            if let Some(host) = cmd.host {
                config.server.host = host;
            }
            if let Some(port) = cmd.port {
                config.server.port = port;
            }
            if let Some(db) = cmd.db {
                config.storage.db_path = Some(db);
            }
            serve(config)
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Session broker for AI agent backends.")]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Output machine readable JSON logs
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve(ServeCommand),
}

#[derive(Debug, Args)]
struct ServeCommand {
    /// Bind address override
    #[arg(long)]
    host: Option<String>,
    /// Port override
    #[arg(long)]
    port: Option<u16>,
    /// Database file override
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,
}

fn init_logging(opts: &CommonOpts) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = if opts.quiet {
        "error"
    } else {
        match opts.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("opsd={level},tower_http={level}")));

    if opts.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(io::stderr().is_terminal())
                    .with_writer(io::stderr),
            )
            .try_init()
            .ok();
    }
}

#[tokio::main]
async fn serve(config: OpsConfig) -> Result<()> {
    let db_path = config.storage.resolve_db_path()?;
    info!("Database path: {}", db_path.display());
    let db = Db::open(&db_path).await?;
    let store = Store::new(db);

    let cli = CliRunner::new(CliConfig {
        binary: config.cli.binary.clone(),
        timeout: config.cli.timeout(),
    });
    let anthropic = AnthropicClient::new(config.anthropic.clone());
    let broker = TurnBroker::new(store.clone(), cli, anthropic);

    let app = create_router(AppState::new(store, broker));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid bind address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("Listening on http://{addr}");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
