//! Command-line flags and the typed `Config` they resolve to
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::session::PtyMode;

#[derive(Parser, Debug)]
#[command(name = "rovo-bridge", about = "Loopback bridge daemon for an embeddable IDE companion")]
pub struct Cli {
    /// Address to bind the loopback listener to, e.g. `127.0.0.1:0` for an
    /// ephemeral port.
    #[arg(long, default_value = "127.0.0.1:0")]
    pub http: String,

    /// Serve the bundled static UI on every non-`/ws` path.
    #[arg(long)]
    pub serve_ui: bool,

    /// Write `{"port":..,"token":..,"uiBase":..}` as the first line of
    /// stdout once the listener is bound.
    #[arg(long)]
    pub print_conn_json: bool,

    /// Default shell/command a new session spawns when the client doesn't
    /// name one explicitly.
    #[arg(long, default_value = "bash")]
    pub cmd: String,

    /// Arguments passed to `--cmd`.
    #[arg(long)]
    pub cmd_arg: Vec<String>,

    /// Working directory new sessions start in. Defaults to the daemon's
    /// own working directory.
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Workspace root the indexer scans and watches.
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    #[arg(long, value_enum, default_value = "auto")]
    pub pty_mode: PtyModeArg,

    /// Maximum number of directories kept under active watch.
    #[arg(long, default_value_t = 10_000)]
    pub watch_cap: usize,

    /// Maximum number of distinct pending filesystem events before the next
    /// refresh is forced to a full scan.
    #[arg(long, default_value_t = 1_000)]
    pub event_cap: usize,

    /// Minimum interval between refreshes, in milliseconds.
    #[arg(long, default_value_t = 250)]
    pub debounce_ms: u64,

    /// Maximum number of saved prompt-history entries kept.
    #[arg(long, default_value_t = 10_000)]
    pub history_cap: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PtyModeArg {
    Auto,
    Force,
    Disabled,
}

impl From<PtyModeArg> for PtyMode {
    fn from(value: PtyModeArg) -> Self {
        match value {
            PtyModeArg::Auto => PtyMode::Auto,
            PtyModeArg::Force => PtyMode::Force,
            PtyModeArg::Disabled => PtyMode::Disabled,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid --http address {0:?}: {1}")]
    BadAddress(String, std::net::AddrParseError),
}

/// Resolved, typed configuration. Distinct from `Cli` so callers that build
/// one programmatically (tests, embedders) don't need to go through flag
/// parsing.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub serve_ui: bool,
    pub print_conn_json: bool,
    pub default_command: String,
    pub default_args: Vec<String>,
    pub default_cwd: Option<PathBuf>,
    pub workspace_root: PathBuf,
    pub pty_mode: PtyMode,
    pub watch_cap: usize,
    pub event_cap: usize,
    pub debounce: Duration,
    pub history_cap: usize,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let bind_addr = cli
            .http
            .parse()
            .map_err(|e| ConfigError::BadAddress(cli.http.clone(), e))?;
        Ok(Config {
            bind_addr,
            serve_ui: cli.serve_ui,
            print_conn_json: cli.print_conn_json,
            default_command: cli.cmd,
            default_args: cli.cmd_arg,
            default_cwd: cli.cwd,
            workspace_root: cli.workspace,
            pty_mode: cli.pty_mode.into(),
            watch_cap: cli.watch_cap,
            event_cap: cli.event_cap,
            debounce: Duration::from_millis(cli.debounce_ms),
            history_cap: cli.history_cap,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            serve_ui: false,
            print_conn_json: false,
            default_command: "bash".to_string(),
            default_args: Vec::new(),
            default_cwd: None,
            workspace_root: PathBuf::from("."),
            pty_mode: PtyMode::Auto,
            watch_cap: 10_000,
            event_cap: 1_000,
            debounce: Duration::from_millis(250),
            history_cap: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_port_is_the_default() {
        let cli = Cli::parse_from(["rovo-bridge"]);
        let cfg = Config::from_cli(cli).unwrap();
        assert_eq!(cfg.bind_addr.port(), 0);
        assert!(cfg.bind_addr.ip().is_loopback());
    }

    #[test]
    fn bad_address_is_rejected() {
        let cli = Cli::parse_from(["rovo-bridge", "--http", "not-an-address"]);
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::BadAddress(_, _))
        ));
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "rovo-bridge",
            "--http",
            "127.0.0.1:9000",
            "--cmd",
            "zsh",
            "--watch-cap",
            "50",
        ]);
        let cfg = Config::from_cli(cli).unwrap();
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.default_command, "zsh");
        assert_eq!(cfg.watch_cap, 50);
    }
}
