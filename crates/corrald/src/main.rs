//! corrald — Corral operator binary.
//!
//! Opens the fleet state store and answers capacity questions the way the
//! placement and alerting workflows ask them. Results are printed as JSON.
//!
//! # Usage
//!
//! ```text
//! corrald --data-dir /var/lib/corral load --file fleet.json
//! corrald --config /etc/corral/corral.toml capacity order --level cluster --resource cpu --zone 1
//! corrald capacity fit --cpu 4 --memory 8192 --zone 1 --level cluster --order-by memory
//! ```

mod capacity;
mod fleet;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{debug, info};

use corral_core::CorralConfig;
use corral_state::StateStore;

use crate::capacity::CapacityCommand;

#[derive(Parser)]
#[command(name = "corrald", about = "Corral host liveness and capacity engine")]
struct Cli {
    /// Path to corral.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the state store.
    #[arg(long, global = true, default_value = "/var/lib/corral")]
    data_dir: PathBuf,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capacity ranking, fit and threshold queries.
    Capacity {
        #[command(subcommand)]
        command: CapacityCommand,
    },

    /// List hosts of a cluster with status and hypervisor family.
    Hosts {
        #[arg(long)]
        cluster: u64,
    },

    /// Import hosts, pools, volumes and capacity rows from a JSON snapshot.
    Load {
        #[arg(long)]
        file: PathBuf,
    },

    /// Parse and validate the configuration, then print the effective values.
    CheckConfig,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::CheckConfig => fleet::check_config(&config),
        Command::Capacity { command } => {
            let store = open_store(&cli.data_dir)?;
            capacity::run(command, store, &config)
        }
        Command::Hosts { cluster } => {
            let store = open_store(&cli.data_dir)?;
            fleet::list_hosts(&store, cluster)
        }
        Command::Load { file } => {
            let store = open_store(&cli.data_dir)?;
            fleet::load_snapshot(&store, &file)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,corrald=debug,corral=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CorralConfig> {
    match path {
        Some(path) => {
            let config = CorralConfig::from_file(path)?;
            info!(path = %path.display(), "configuration loaded");
            Ok(config)
        }
        None => {
            debug!("no configuration file given, using defaults");
            Ok(CorralConfig::default())
        }
    }
}

fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("corral.redb");
    let store = StateStore::open(&db_path)?;
    debug!(path = ?db_path, "state store opened");
    Ok(store)
}

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_capacity_order_with_global_flags() {
        let cli = Cli::try_parse_from([
            "corrald",
            "capacity",
            "order",
            "--level",
            "host",
            "--resource",
            "memory",
            "--cluster",
            "7",
            "--data-dir",
            "/tmp/corral",
            "--log-json",
        ])
        .unwrap();
        assert!(cli.log_json);
        assert_eq!(cli.data_dir, PathBuf::from("/tmp/corral"));
        assert!(matches!(cli.command, Command::Capacity { .. }));
    }
}
