//! RSCA - trajectory engine CLI
//!
//! The `rsca` command feeds JSON requests through the engine's dispatcher and
//! prints JSON responses on stdout. Logs go to stderr.
//!
//! ## Commands
//!
//! - `run`: dispatch one request or a batch of requests
//! - `project`: project trajectories for a set of cycles
//! - `analyze`: classify the risk of a trajectory
//! - `config`: print the effective configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, Level};

use rsca_core::{
    analyze, project_adaptive, project_by_group, ComputationDispatcher, Cycle, EngineConfig,
    EngineRequest, ProportionalLimits, TrajectoryPoint, METRICS,
};

#[derive(Parser)]
#[command(name = "rsca")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cumulative-average trajectory and redistribution engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Engine configuration file (TOML)
    #[arg(long, global = true, env = "RSCA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch a request file: one JSON request or an array of them
    Run {
        /// Path to the request JSON
        request: PathBuf,
    },

    /// Project every group's trajectory from a cycles file
    Project {
        /// Path to a JSON array of cycles
        cycles: PathBuf,

        /// Fixed ceiling for the cumulative average
        #[arg(long, default_value_t = 4.2, conflicts_with = "adaptive")]
        ceiling: f64,

        /// Use adaptive targets from the configured band instead of a fixed ceiling
        #[arg(long)]
        adaptive: bool,
    },

    /// Analyze a trajectory against the configured target band
    Analyze {
        /// Path to a JSON array of trajectory points
        trajectory: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// A request file holds either a single request or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RequestFile {
    Batch(Vec<EngineRequest>),
    Single(Box<EngineRequest>),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    rsca_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { request } => cmd_run(&config, &request).await,
        Commands::Project {
            cycles,
            ceiling,
            adaptive,
        } => cmd_project(&config, &cycles, ceiling, adaptive),
        Commands::Analyze { trajectory } => cmd_analyze(&config, &trajectory),
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Load and validate the engine config; no path means defaults.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    config.validate().context("Invalid engine configuration")?;
    Ok(config)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_run(config: &EngineConfig, path: &Path) -> Result<()> {
    let dispatcher = ComputationDispatcher::new(config, Arc::new(ProportionalLimits::default()))?;

    let outcome = match read_json::<RequestFile>(path)? {
        RequestFile::Single(request) => {
            let response = dispatcher.submit(*request).response().await;
            print_json(&response)?;
            response.is_success()
        }
        RequestFile::Batch(requests) => {
            info!(count = requests.len(), "dispatching batch");
            let responses = dispatcher.submit_all(requests).await;
            print_json(&responses)?;
            responses.iter().all(|r| r.is_success())
        }
    };

    METRICS.flush();
    if !outcome {
        bail!("one or more requests failed");
    }
    Ok(())
}

fn cmd_project(config: &EngineConfig, path: &Path, ceiling: f64, adaptive: bool) -> Result<()> {
    let cycles: Vec<Cycle> = read_json(path)?;
    if adaptive {
        let groups = rsca_core::partition_by_group(&cycles)
            .into_iter()
            .map(|(key, group)| project_adaptive(&group, &config.target).map(|p| (key, p)))
            .collect::<rsca_core::Result<std::collections::BTreeMap<_, _>>>()?;
        print_json(&groups)
    } else {
        print_json(&project_by_group(&cycles, ceiling)?)
    }
}

fn cmd_analyze(config: &EngineConfig, path: &Path) -> Result<()> {
    let trajectory: Vec<TrajectoryPoint> = read_json(path)?;
    let analysis = analyze(&trajectory, &config.target)?;
    print_json(&analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_defaults_without_path() {
        let config = load_config(None).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_config_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[dispatcher]
max_concurrent = 8

[redistribution]
tolerance = 0.02

[target]
ideal = 4.1
safe_min = 3.9
safe_max = 4.3
min_limit = 3.7
max_limit = 4.5
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.dispatcher.max_concurrent, 8);
        assert_eq!(config.redistribution.tolerance, 0.02);
        assert_eq!(config.target.ideal, 4.1);
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatcher]\nmax_concurrent = 0").unwrap();
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Invalid engine configuration"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/rsca.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_request_file_accepts_single_and_batch() {
        let single = r#"{"kind":"CALCULATE_STRATEGY","correlation_id":"s","cycles":[],"ceiling":4.2}"#;
        assert!(matches!(
            serde_json::from_str::<RequestFile>(single).unwrap(),
            RequestFile::Single(_)
        ));
        let batch = format!("[{single},{single}]");
        match serde_json::from_str::<RequestFile>(&batch).unwrap() {
            RequestFile::Batch(requests) => assert_eq!(requests.len(), 2),
            RequestFile::Single(_) => panic!("expected batch"),
        }
    }

    #[tokio::test]
    async fn test_run_single_request_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"kind":"CALCULATE_STRATEGY","correlation_id":"cli-1","cycles":[],"ceiling":4.2}}"#
        )
        .unwrap();
        cmd_run(&EngineConfig::default(), file.path()).await.unwrap();
    }
}
