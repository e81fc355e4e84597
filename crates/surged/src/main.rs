//! surged — the surge control-plane daemon.
//!
//! Assembles the subsystems around one coordinator loop:
//! - coordination store (in-memory in standalone mode)
//! - provisioning client (simulated in standalone mode)
//! - ring log persisted under the data directory
//! - worker pool, sized from the manager configuration
//!
//! # Usage
//!
//! ```text
//! surged standalone --data-dir /var/lib/surge --seed endpoints.toml
//! ```

mod cloud;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;

use surge_core::{EndpointConfig, ManagerConfig};
use surge_eventlog::FileLogStore;
use surge_manager::{CoordStore, MemoryStore, NullLbHook, ScaleManager};

use crate::cloud::DevCloud;

#[derive(Parser)]
#[command(name = "surged", about = "Surge autoscaling control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run single-process with an in-memory store and simulated cloud.
    Standalone {
        /// Manager configuration file (TOML); defaults apply if omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for the persisted event log.
        #[arg(long, default_value = "/var/lib/surge")]
        data_dir: PathBuf,

        /// Endpoint definitions (TOML) registered at startup.
        #[arg(long)]
        seed: Option<PathBuf>,
    },
}

/// Endpoint definitions accepted by `--seed`.
#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    endpoints: HashMap<String, EndpointConfig>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,surged=debug,surge=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            config,
            data_dir,
            seed,
        } => run_standalone(config, data_dir, seed),
    }
}

fn run_standalone(
    config_path: Option<PathBuf>,
    data_dir: PathBuf,
    seed: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("surge daemon starting in standalone mode");

    let config = match &config_path {
        Some(path) => ManagerConfig::from_file(path)?,
        None => ManagerConfig::default(),
    };

    std::fs::create_dir_all(&data_dir)?;

    let store: Arc<dyn CoordStore> = Arc::new(MemoryStore::new());
    let cloud = Arc::new(DevCloud::new(store.clone()));
    let log_store = Arc::new(FileLogStore::new(data_dir.join("events.bin")));

    let mut manager = ScaleManager::new(
        config,
        store.clone(),
        cloud,
        Arc::new(NullLbHook),
        log_store,
    )?;
    let handle = manager.handle();
    manager.serve()?;

    if let Some(path) = seed {
        let seeds = load_seeds(&path)?;
        for (name, endpoint_config) in &seeds.endpoints {
            info!(endpoint = %name, template = %endpoint_config.template_id, "seeding endpoint");
            handle.create_endpoint(name, endpoint_config)?;
        }
    }

    info!("coordinator running");
    manager.run();
    Ok(())
}

fn load_seeds(path: &PathBuf) -> anyhow::Result<SeedFile> {
    let content = std::fs::read_to_string(path)?;
    let seeds: SeedFile = toml::from_str(&content)?;
    Ok(seeds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_file_parses() {
        let seeds: SeedFile = toml::from_str(
            r#"
[endpoints.web]
template_id = "tmpl-web"
min_instances = 2
max_instances = 8
rules = ["20<=rate<=50"]

[endpoints.api]
template_id = "tmpl-api"
"#,
        )
        .unwrap();
        assert_eq!(seeds.endpoints.len(), 2);
        assert_eq!(seeds.endpoints["web"].min_instances, 2);
        assert_eq!(seeds.endpoints["api"].max_instances, 1);
    }

    #[test]
    fn empty_seed_file_is_valid() {
        let seeds: SeedFile = toml::from_str("").unwrap();
        assert!(seeds.endpoints.is_empty());
    }
}
