use anyhow::Context;
use clap::Parser;
use inboxer_bridge::bridge::api::{ApiClient, ApiSession, MailApi};
use inboxer_bridge::bridge::config::{self, BridgeConfig};
use inboxer_bridge::bridge::{logging, run_imap_listener, BridgeContext, UidStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

/// IMAP bridge to the Inboxer mail API
#[derive(Parser, Debug)]
#[command(name = "bridge", version, about)]
struct Cli {
    /// Enable debug logging (also VERBOSE=1)
    #[arg(short, long)]
    verbose: bool,

    /// Print a sample bridge.toml and exit
    #[arg(long)]
    sample_config: bool,

    /// Data directory for bridge.toml and the UID map
    /// (default: $BRIDGE_DATA_DIR, then ~/.inboxer-bridge)
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.sample_config {
        print!("{}", BridgeConfig::sample()?);
        return Ok(());
    }

    logging::init(cli.verbose || logging::verbose_from_env());

    let data_dir = config::data_dir(cli.data_dir);
    let config = BridgeConfig::load(&data_dir)
        .await
        .context("failed to load configuration")?;
    let uid_store = UidStore::open(&data_dir)
        .with_context(|| format!("failed to open UID store in {:?}", data_dir))?;

    let api: Arc<dyn MailApi> = Arc::new(ApiClient::new(&config.api.url));
    probe_backend(&api, &config).await;

    let listen_addr = config.listen_addr();
    let listener = TcpListener::bind(listen_addr.as_str())
        .await
        .with_context(|| format!("failed to bind IMAP listener on {}", listen_addr))?;

    print_setup(&config, &data_dir);

    let ctx = Arc::new(BridgeContext {
        api,
        uid_store: Arc::new(uid_store),
        server_name: config.imap.server_name.clone(),
    });

    tokio::select! {
        _ = run_imap_listener(listener, ctx) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to wait for Ctrl-C")?;
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}

/// Check the backend is reachable; the bridge starts either way
async fn probe_backend(api: &Arc<dyn MailApi>, config: &BridgeConfig) {
    let Some(token) = config.api.token.as_deref() else {
        tracing::info!("No API token configured, skipping backend health check");
        return;
    };

    match ApiSession::new(api.clone(), token).health().await {
        Ok(()) => tracing::info!("Backend at {} is reachable", config.api.url),
        Err(e) => tracing::warn!("Backend health check against {} failed: {}", config.api.url, e),
    }
}

fn print_setup(config: &BridgeConfig, data_dir: &std::path::Path) {
    println!("Inboxer IMAP bridge listening on {}", config.listen_addr());
    println!("Data directory: {}", data_dir.display());
    println!();
    println!("Configure your mail client with:");
    println!("  IMAP server: {}", config.imap.host);
    println!("  Port:        {}", config.imap.port);
    println!("  Security:    none (plaintext, local use only)");
    println!("  Username:    anything");
    println!("  Password:    your Inboxer API token");
}
