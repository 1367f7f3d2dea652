//! CLI for agentlern.
//!
//! Records bot interactions and rewards, exports training data, runs
//! optimization passes against the trainer and serves the same operations
//! over HTTP.

mod server;
mod trainer;

use agentlern_collector::InteractionLog;
use agentlern_core::{Config, ContextMap, EventSink, NullSink, TrainingSample, TASK_TYPES};
use agentlern_optimizer::{OptimizationDriver, PromptStore};
use agentlern_reward::RewardScorer;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::server::AppState;
use crate::trainer::HttpTrainerSink;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory (overrides AGL_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Bind address (default: AGL_API_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (default: AGL_API_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Record one interaction
    Record {
        #[arg(long)]
        user_id: String,

        #[arg(long, default_value = agentlern_core::DEFAULT_TASK_TYPE)]
        task_type: String,

        #[arg(long)]
        message: String,

        #[arg(long)]
        response: String,

        /// Additional context as a JSON object
        #[arg(long)]
        context: Option<String>,

        #[arg(long, allow_negative_numbers = true)]
        reward: Option<f64>,
    },
    /// Set the reward of a recorded interaction
    Reward {
        #[arg(long)]
        id: String,

        #[arg(long, allow_negative_numbers = true)]
        reward: f64,

        #[arg(long)]
        feedback: Option<String>,
    },
    /// Show interaction statistics
    Stats,
    /// Export all interactions as a training snapshot
    Export {
        /// Output path (default: <data_dir>/export.json)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run optimization passes over the recorded training data
    Optimize {
        #[arg(long, default_value = "100")]
        iterations: usize,

        /// Only use interactions rewarded with at least this value
        #[arg(long, allow_negative_numbers = true)]
        min_reward: Option<f64>,
    },
    /// List persisted optimization results
    History,
    /// Score a hypothetical response
    Analyze {
        #[arg(long)]
        message: String,

        #[arg(long)]
        response: String,

        #[arg(long)]
        task_type: Option<String>,
    },
    /// Read or override system prompts
    Prompt {
        #[command(subcommand)]
        action: PromptAction,
    },
    /// List known task types
    TaskTypes,
}

#[derive(Subcommand)]
enum PromptAction {
    /// Print the prompt in effect for a task type
    Get {
        #[arg(long)]
        task_type: Option<String>,
    },
    /// Override the prompt for a task type
    Set {
        #[arg(long)]
        task_type: String,

        #[arg(long)]
        prompt: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Forwards to the trainer when `AGL_TRAINER_URL` is set.
fn build_sink(cfg: &Config) -> Result<Arc<dyn EventSink>> {
    match &cfg.trainer_url {
        Some(url) => {
            info!(%url, "forwarding events to trainer");
            Ok(Arc::new(HttpTrainerSink::new(url)?))
        }
        None => Ok(Arc::new(NullSink)),
    }
}

fn parse_context(raw: Option<&str>) -> Result<Option<ContextMap>> {
    raw.map(|s| serde_json::from_str(s).context("--context must be a JSON object"))
        .transpose()
}

fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve {host}:{port}"))?
        .next()
        .with_context(|| format!("No address for {host}:{port}"))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_log(cfg: &Config, sink: Arc<dyn EventSink>) -> Result<InteractionLog> {
    let log = InteractionLog::open(&cfg.data_dir)
        .with_context(|| format!("Failed to open interaction log in {:?}", cfg.data_dir))?;
    Ok(log.with_sink(sink))
}

fn serve(
    cfg: &Config,
    sink: Arc<dyn EventSink>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let host = host.unwrap_or_else(|| cfg.api_host.clone());
    let addr = resolve_addr(&host, port.unwrap_or(cfg.api_port))?;

    // The blocking trainer client must be created and dropped outside the runtime.
    let state = AppState::open(cfg, sink)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let outcome = runtime.block_on(server::serve(state.clone(), addr));
    drop(runtime);
    drop(state);
    outcome
}

fn optimize(
    cfg: &Config,
    sink: Arc<dyn EventSink>,
    iterations: usize,
    min_reward: Option<f64>,
) -> Result<()> {
    let log = open_log(cfg, sink.clone())?;
    let samples: Vec<TrainingSample> = log.training_data(min_reward).collect();
    if samples.is_empty() {
        anyhow::bail!("No training data available. Record some interactions first.");
    }

    let prompts = PromptStore::in_dir(&cfg.data_dir)?;
    let scorer = RewardScorer::from_config(cfg)?;
    let driver =
        OptimizationDriver::new(&cfg.data_dir, scorer).with_model_name(cfg.model_name.clone());

    let result = driver.run_with_progress(
        &samples,
        iterations,
        &prompts,
        sink.as_ref(),
        |i, mean| {
            debug!(iteration = i + 1, total = iterations, mean, "optimization pass");
            Ok(())
        },
    )?;
    print_json(&result)
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut cfg = Config::from_env().context("Invalid configuration")?;
    if let Some(dir) = cli.data_dir {
        cfg.data_dir = dir;
    }
    let sink = build_sink(&cfg)?;

    match cli.command {
        Commands::Serve { host, port } => serve(&cfg, sink, host, port)?,
        Commands::Record {
            user_id,
            task_type,
            message,
            response,
            context,
            reward,
        } => {
            let context = parse_context(context.as_deref())?;
            let mut log = open_log(&cfg, sink)?;
            let id = log.record(&user_id, &task_type, &message, &response, context, reward)?;
            print_json(&json!({ "interaction_id": id }))?;
        }
        Commands::Reward {
            id,
            reward,
            feedback,
        } => {
            let mut log = open_log(&cfg, sink)?;
            log.set_reward(&id, reward, feedback)?;
            print_json(&json!({ "interaction_id": id, "reward": reward }))?;
        }
        Commands::Stats => {
            let log = open_log(&cfg, sink)?;
            print_json(&log.statistics())?;
        }
        Commands::Export { output } => {
            let log = open_log(&cfg, sink)?;
            let path = log.export(output.as_deref())?;
            print_json(&json!({
                "output_path": path.display().to_string(),
                "num_samples": log.len(),
            }))?;
        }
        Commands::Optimize {
            iterations,
            min_reward,
        } => optimize(&cfg, sink, iterations, min_reward)?,
        Commands::History => {
            let driver = OptimizationDriver::new(&cfg.data_dir, RewardScorer::from_config(&cfg)?);
            let history = driver.history()?;
            print_json(&json!({ "total_runs": history.len(), "history": history }))?;
        }
        Commands::Analyze {
            message,
            response,
            task_type,
        } => {
            let scorer = RewardScorer::from_config(&cfg)?;
            print_json(&scorer.analyze(&message, &response, task_type.as_deref()))?;
        }
        Commands::Prompt { action } => {
            let mut prompts = PromptStore::in_dir(&cfg.data_dir)?;
            match action {
                PromptAction::Get { task_type } => {
                    print_json(&prompts.view(task_type.as_deref()))?;
                }
                PromptAction::Set { task_type, prompt } => {
                    prompts.update(&task_type, &prompt)?;
                    print_json(&json!({ "task_type": task_type, "is_optimized": true }))?;
                }
            }
        }
        Commands::TaskTypes => {
            let table: Map<String, Value> = TASK_TYPES
                .iter()
                .map(|(name, label)| ((*name).to_string(), Value::from(*label)))
                .collect();
            print_json(&table)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_negative_reward_parses() {
        let cli = Cli::try_parse_from(["agentlern", "reward", "--id", "u_1", "--reward", "-0.5"])
            .unwrap();
        match cli.command {
            Commands::Reward { id, reward, .. } => {
                assert_eq!(id, "u_1");
                assert_eq!(reward, -0.5);
            }
            _ => panic!("expected reward command"),
        }
    }

    #[test]
    fn test_global_data_dir() {
        let cli = Cli::try_parse_from(["agentlern", "stats", "--data-dir", "/tmp/agl"]).unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/agl")));
    }

    #[test]
    fn test_optimize_defaults() {
        let cli = Cli::try_parse_from(["agentlern", "optimize"]).unwrap();
        match cli.command {
            Commands::Optimize {
                iterations,
                min_reward,
            } => {
                assert_eq!(iterations, 100);
                assert_eq!(min_reward, None);
            }
            _ => panic!("expected optimize command"),
        }
    }

    #[test]
    fn test_parse_context() {
        assert_eq!(parse_context(None).unwrap(), None);
        let ctx = parse_context(Some(r#"{"date": "2026-02-07", "attendees": 3}"#))
            .unwrap()
            .unwrap();
        assert_eq!(ctx["attendees"], 3);
        assert!(parse_context(Some("[1, 2]")).is_err());
        assert!(parse_context(Some("{broken")).is_err());
    }

    #[test]
    fn test_resolve_addr() {
        let addr = resolve_addr("127.0.0.1", 8081).unwrap();
        assert_eq!(addr.port(), 8081);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_build_sink_without_trainer() {
        let cfg = Config::default();
        let sink = build_sink(&cfg).unwrap();
        assert!(sink.open_session("test", &json!({})).is_ok());
    }
}
