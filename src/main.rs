use anyhow::{Result, bail};
use clap::Parser;
use minisocks::{
    Socks5Server, UserPass,
    config::{FileConfig, load_config},
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "A lightweight SOCKS5 proxy", long_about = None)]
struct Args {
    /// Listener address [default: 127.0.0.1:1080]
    #[arg(short, long)]
    listen: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Username for SOCKS5 proxy
    #[arg(short, long)]
    username: Option<String>,

    /// Password for SOCKS5 proxy
    #[arg(short, long)]
    password: Option<String>,

    /// Seconds allowed for negotiation, request and dial
    #[arg(long)]
    handshake_timeout: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_log: bool,
}

const DEFAULT_LISTEN: &str = "127.0.0.1:1080";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    setup_logging(args.verbose, args.json_log);

    let mut file_config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            load_config(path)?
        }
        None => FileConfig::default(),
    };

    // Command line overrides the file
    match (args.username, args.password) {
        (Some(username), Some(password)) => {
            info!("Authentication enabled");
            file_config.add_user(UserPass { username, password });
        }
        (None, None) => (),
        _ => bail!("must provide both username and password (or neither)"),
    }
    if args.handshake_timeout.is_some() {
        file_config.handshake_timeout = args.handshake_timeout;
    }

    let listen = args
        .listen
        .or_else(|| file_config.listen.clone())
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());

    let mut server = Socks5Server::new(listen).with_config(file_config.server_config());

    info!("Starting SOCKS5 proxy: {}", server.listen_addr);
    server.run().await
}

/// setup_logging installs the global subscriber. RUST_LOG wins over the
/// verbose flag when set
fn setup_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}
