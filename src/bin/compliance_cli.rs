//! Compliance Graph Command Line Interface
//!
//! Loads declarations, runs the engine over them and reports the result.
//!
//! # Usage
//!
//! ```bash
//! # Read declaration directories and persist the graph
//! compliance_cli --config compliance.yaml load
//!
//! # Converge the graph once, running every attestation
//! compliance_cli attest
//!
//! # Per-node summary, or one row per attestation
//! compliance_cli report --mode summary
//! compliance_cli report --mode detailed --output json
//!
//! # Keep reconciling until Ctrl-C
//! compliance_cli run
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use compliance_graph::catalog::{self, OutputFormat, ReportMode, StorageDriver};
use compliance_graph::{Configuration, Engine, EngineConfig, MemoryStore, ProviderRegistry};

#[derive(Parser)]
#[command(name = "compliance_cli")]
#[command(version = "0.1.0")]
#[command(about = "Load, attest and report on a compliance graph")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// CLI configuration file (YAML)
    #[arg(long, short, global = true, env = "COMPLIANCE_CONFIG", default_value = "compliance.yaml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Read declaration directories and persist the graph
    Load,

    /// Converge the persisted graph once and persist the result
    Attest,

    /// Render the persisted graph
    Report {
        #[arg(long, short, value_enum, default_value_t = ReportMode::Summary)]
        mode: ReportMode,

        #[arg(long, short, value_enum, default_value_t = OutputFormat::Tsv)]
        output: OutputFormat,
    },

    /// Reconcile continuously until Ctrl-C, then persist the graph
    Run,
}

/// Contents of the `--config` file.
#[derive(Debug, Deserialize)]
struct CliConfig {
    resource_path: Option<PathBuf>,
    requirement_path: Option<PathBuf>,
    implementation_path: Option<PathBuf>,
    attestation_path: Option<PathBuf>,
    provider_path: Option<PathBuf>,
    #[serde(default = "default_driver")]
    driver: String,
    #[serde(default)]
    driver_config: BTreeMap<String, String>,
    #[serde(default)]
    engine: EngineConfig,
}

fn default_driver() -> String {
    "file".to_string()
}

impl CliConfig {
    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: CliConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.engine.apply_env()?;

        // Relative paths are relative to the config file.
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for dir in config.declaration_dirs_mut() {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        Ok(config)
    }

    fn declaration_dirs_mut(&mut self) -> impl Iterator<Item = &mut PathBuf> {
        [
            &mut self.resource_path,
            &mut self.requirement_path,
            &mut self.implementation_path,
            &mut self.attestation_path,
            &mut self.provider_path,
        ]
        .into_iter()
        .flatten()
    }

    fn declaration_dirs(&self) -> Vec<&Path> {
        [
            &self.resource_path,
            &self.requirement_path,
            &self.implementation_path,
            &self.attestation_path,
            &self.provider_path,
        ]
        .into_iter()
        .flatten()
        .map(PathBuf::as_path)
        .collect()
    }

    fn storage(&self) -> Result<Box<dyn StorageDriver>> {
        Ok(catalog::open_driver(&self.driver, &self.driver_config)?)
    }
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Logs go to stderr so report output on stdout stays machine-readable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "compliance_graph=info,compliance_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let result = match CliConfig::from_file(&cli.config) {
        Ok(config) => match cli.command {
            Commands::Load => cmd_load(&config).await,
            Commands::Attest => cmd_attest(&config).await,
            Commands::Report { mode, output } => cmd_report(&config, mode, output).await,
            Commands::Run => cmd_run(&config).await,
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

async fn cmd_load(config: &CliConfig) -> Result<()> {
    let dirs = config.declaration_dirs();
    if dirs.is_empty() {
        bail!("no declaration paths configured");
    }
    let configuration = catalog::load_dirs(dirs.as_slice())?;
    config.storage()?.save(&configuration).await?;
    info!(objects = configuration.len(), "Graph loaded");
    Ok(())
}

fn engine(config: &CliConfig, store: Arc<MemoryStore>) -> Result<Engine> {
    let providers = ProviderRegistry::with_builtin()?;
    Ok(Engine::new(store, Arc::new(providers), config.engine.clone()))
}

async fn cmd_attest(config: &CliConfig) -> Result<()> {
    let storage = config.storage()?;
    let store = Arc::new(MemoryStore::new());
    storage.load().await?.seed(store.as_ref()).await?;

    let engine = engine(config, store.clone())?;
    let report = engine.converge().await?;

    let configuration = Configuration::from_store(store.as_ref()).await?;
    storage.save(&configuration).await?;

    if let Some((key, error)) = report.errors.first() {
        bail!(
            "{} object(s) failed to reconcile, first {key}: {error}",
            report.errors.len()
        );
    }
    if !report.converged {
        warn!(passes = report.passes, "Graph saved before reaching a fixed point");
    }
    Ok(())
}

async fn cmd_report(config: &CliConfig, mode: ReportMode, output: OutputFormat) -> Result<()> {
    let configuration = config.storage()?.load().await?;
    print!("{}", catalog::render(&configuration, mode, output)?);
    Ok(())
}

async fn cmd_run(config: &CliConfig) -> Result<()> {
    let storage = config.storage()?;
    let store = Arc::new(MemoryStore::new());
    storage.load().await?.seed(store.as_ref()).await?;
    let engine = engine(config, store.clone())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!(error = %e, "Could not listen for Ctrl-C, stopping"),
        }
        let _ = shutdown_tx.send(true);
    });

    engine.run(shutdown_rx).await;

    let configuration = Configuration::from_store(store.as_ref()).await?;
    storage.save(&configuration).await?;
    info!(objects = configuration.len(), "Graph saved");
    Ok(())
}
