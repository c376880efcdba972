//! Process entrypoint: parse flags, bind the loopback listener, print the
//! connection line, wait for Ctrl-C, shut everything down.

use std::sync::Arc;

use clap::Parser;
use rand::RngCore;
use tracing::{error, info};

use rovo_bridge::app_state::{AppState, ArcIndexHost, HistoryBackend, ProductionSessionFactory};
use rovo_bridge::config::{Cli, Config};
use rovo_bridge::history::HistoryStore;
use rovo_bridge::indexer::{Indexer, IndexerConfig};
use rovo_bridge::router::{self, RouterError};
use rovo_bridge::session::SessionConfig;

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] rovo_bridge::config::ConfigError),
    #[error(transparent)]
    Index(#[from] rovo_bridge::indexer::IndexError),
    #[error(transparent)]
    Router(#[from] RouterError),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = rovo_bridge::logging::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), StartupError> {
    let config = Config::from_cli(cli)?;

    let workspace_root = config
        .workspace_root
        .canonicalize()
        .unwrap_or(config.workspace_root.clone());

    let indexer = Arc::new(Indexer::new(IndexerConfig {
        root: workspace_root,
        watch_cap: config.watch_cap,
        event_cap: config.event_cap,
        debounce: config.debounce,
    }));
    indexer.start().await?;

    let history_path = default_history_path();
    let history: Arc<dyn HistoryBackend> =
        Arc::new(HistoryStore::with_cap(history_path, config.history_cap));

    let auth_token = generate_token();

    let state = AppState::new(
        Arc::new(ArcIndexHost(Arc::clone(&indexer))),
        Arc::new(ProductionSessionFactory),
        history,
        auth_token.clone(),
    );

    let default_session_config = SessionConfig {
        command: config.default_command.clone(),
        args: config.default_args.clone(),
        cwd: config.default_cwd.clone(),
        env: Vec::new(),
        pty_mode: config.pty_mode,
        cols: 80,
        rows: 24,
    };

    let (port, sessions) = router::serve(config.bind_addr, state, default_session_config).await?;
    info!(port, "listening");

    if config.print_conn_json {
        println!(
            "{}",
            serde_json::json!({
                "port": port,
                "token": auth_token,
                "uiBase": format!("http://127.0.0.1:{port}/"),
            })
        );
    }

    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl-C handler");
    info!("shutting down");
    router::shutdown_all_sessions(&sessions).await;
    indexer.close().await;
    Ok(())
}

fn default_history_path() -> std::path::PathBuf {
    let base = dirs::home_dir().unwrap_or_else(|| {
        std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."))
    });
    base.join(".rovo-bridge").join("history.json")
}

/// At least 128 bits of entropy, hex-encoded, never persisted
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_has_at_least_128_bits_of_entropy() {
        let token = generate_token();
        // 32 bytes hex-encoded -> 64 hex chars -> 256 bits, comfortably over the floor.
        assert_eq!(token.len(), 64);
        assert_ne!(token, generate_token());
    }
}
