use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use peer_signal::config::AppConfig;
use peer_signal::logger::init_logging;
use peer_signal::peer::{PlaceholderVideo, WebrtcTransportFactory};
use peer_signal::signaling::websocket::WebSocketChannel;
use peer_signal::{SessionCoordinator, SessionEvent};

#[derive(Parser)]
#[command(name = "peer-signal")]
#[command(version)]
#[command(about = "Negotiates a peer-to-peer video session through a WebSocket relay", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Relay WebSocket URL
    #[arg(long)]
    relay: Option<String>,

    /// Session both peers join
    #[arg(short, long)]
    session: Option<String>,

    /// Identifier announced to the relay, random when absent
    #[arg(long)]
    peer_id: Option<String>,

    #[arg(short, long)]
    debug: bool,

    /// text or json
    #[arg(long)]
    log_format: Option<String>,
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(relay) = &cli.relay {
        config.relay.url = relay.clone();
    }
    if let Some(session) = &cli.session {
        config.session.id = session.clone();
    }
    if let Some(peer_id) = &cli.peer_id {
        config.session.peer_id = Some(peer_id.clone());
    }
    if cli.debug {
        config.logging.level = "debug".into();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.logging.level, &config.logging.format);

    let peer_id = config.session.peer_id_or_random();
    info!(
        relay = %config.relay.url,
        session = %config.session.id,
        peer = %peer_id,
        "starting session"
    );

    let channel = WebSocketChannel::new(&config.relay.url, &config.session.id, &peer_id);
    let factory = WebrtcTransportFactory::new(config.ice.servers.clone());
    let (coordinator, mut events) =
        SessionCoordinator::new(config.session.id.clone(), channel, factory);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{event:?}");
            if matches!(event, SessionEvent::Failed(_) | SessionEvent::Closed) {
                break;
            }
        }
    });

    let media = PlaceholderVideo {
        stream_id: peer_id.clone(),
    };
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    let outcome = coordinator.run_until(media, shutdown).await;
    let _ = printer.await;

    let summary = outcome.context("session failed")?;
    info!(
        role = ?summary.role,
        state = ?summary.state,
        candidates_applied = summary.candidates_applied,
        local_candidates_sent = summary.local_candidates_sent,
        "session finished"
    );
    Ok(())
}
