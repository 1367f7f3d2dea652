#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Iterative scoring of training data against the external trainer.
//!
//! The [`OptimizationDriver`] turns training samples into three-turn
//! exchanges, scores them with the [`RewardScorer`] once per iteration and
//! forwards steps and rewards through an [`EventSink`]. The actual model
//! update happens in the trainer; this crate only feeds it and keeps a
//! summary per run under `<data_dir>/optimization_results/`.

pub mod error;
pub mod prompts;

use agentlern_core::{
    clock, telemetry, ContextMap, EventSink, RewardEvent, StepEvent, TrainingSample,
    DEFAULT_TASK_TYPE,
};
use agentlern_reward::RewardScorer;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

pub use error::{OptimizerError, ProgressError, Result};
pub use prompts::{PromptStore, PromptView, DEFAULT_SYSTEM_PROMPT};

const RESULTS_DIR: &str = "optimization_results";
const RESULT_PREFIX: &str = "result_";
const SESSION_NAME: &str = "line_calendar_bot_optimization";
/// Number of trailing rewards averaged into `avg_final_reward`
const FINAL_WINDOW: usize = 10;
/// Iterations between progress log lines
const LOG_EVERY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// A sample as a system/user/assistant exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Exchange {
    pub messages: [ChatMessage; 3],
    pub reward: f64,
    pub task_type: String,
}

impl Exchange {
    #[must_use]
    pub fn user_turn(&self) -> &str {
        &self.messages[1].content
    }

    #[must_use]
    pub fn assistant_turn(&self) -> &str {
        &self.messages[2].content
    }
}

/// Summary of one optimization run. Written once, never modified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationResult {
    pub start_time: String,
    pub end_time: String,
    pub num_samples: usize,
    pub num_iterations: usize,
    /// Mean reward per iteration, or per-sample rewards after a fallback.
    pub rewards: Vec<f64>,
    /// `None` when nothing was scored.
    pub best_reward: Option<f64>,
    pub avg_final_reward: f64,
    /// Set when the trainer session could not be opened.
    #[serde(default)]
    pub fallback: bool,
    /// Prompt overrides in effect during the run.
    #[serde(default)]
    pub final_prompts: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct OptimizationDriver {
    results_dir: PathBuf,
    scorer: RewardScorer,
    model_name: String,
}

impl OptimizationDriver {
    /// Results go to `<data_dir>/optimization_results/`.
    pub fn new(data_dir: &Path, scorer: RewardScorer) -> Self {
        Self {
            results_dir: data_dir.join(RESULTS_DIR),
            scorer,
            model_name: String::new(),
        }
    }

    /// Model name reported to the trainer when a session opens.
    #[must_use]
    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    #[must_use]
    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    #[must_use]
    pub fn scorer(&self) -> &RewardScorer {
        &self.scorer
    }

    /// Wraps every sample into a system/user/assistant exchange, the system
    /// turn taken from `prompts` for the sample's task type.
    #[must_use]
    pub fn prepare(&self, samples: &[TrainingSample], prompts: &PromptStore) -> Vec<Exchange> {
        samples
            .iter()
            .map(|sample| {
                let task_type = if sample.task_type.is_empty() {
                    DEFAULT_TASK_TYPE.to_string()
                } else {
                    sample.task_type.clone()
                };
                Exchange {
                    messages: [
                        ChatMessage {
                            role: Role::System,
                            content: prompts.get(Some(&task_type)).to_string(),
                        },
                        ChatMessage {
                            role: Role::User,
                            content: sample.input.clone(),
                        },
                        ChatMessage {
                            role: Role::Assistant,
                            content: sample.output.clone(),
                        },
                    ],
                    reward: sample.reward,
                    task_type,
                }
            })
            .collect()
    }

    /// [`run_with_progress`](Self::run_with_progress) without a callback.
    pub fn run(
        &self,
        samples: &[TrainingSample],
        iterations: usize,
        prompts: &PromptStore,
        sink: &dyn EventSink,
    ) -> Result<OptimizationResult> {
        self.run_with_progress(samples, iterations, prompts, sink, |_, _| Ok(()))
    }

    /// Runs `iterations` scoring passes over `samples` and persists the result.
    ///
    /// `progress` receives `(iteration_index, mean_reward)` after every pass.
    /// If it fails, the run stops and the error is returned as
    /// [`OptimizerError::Progress`]; nothing is persisted.
    ///
    /// If the trainer session cannot be opened, the passes are replaced by a
    /// single direct scoring of every sample.
    pub fn run_with_progress<F>(
        &self,
        samples: &[TrainingSample],
        iterations: usize,
        prompts: &PromptStore,
        sink: &dyn EventSink,
        mut progress: F,
    ) -> Result<OptimizationResult>
    where
        F: FnMut(usize, f64) -> std::result::Result<(), ProgressError>,
    {
        let started = OffsetDateTime::now_utc();
        telemetry::info(&format!(
            "Starting optimization with {} samples",
            samples.len()
        ));

        let exchanges = self.prepare(samples, prompts);
        let mut rewards = Vec::new();
        let session_meta = json!({ "model": self.model_name, "samples": samples.len() });

        let (best_reward, fallback) = match sink.open_session(SESSION_NAME, &session_meta) {
            Ok(()) => {
                let outcome =
                    self.train_passes(&exchanges, iterations, sink, &mut rewards, &mut progress);
                if let Err(e) = sink.close_session() {
                    telemetry::warn(&format!("Failed to close trainer session: {e}"));
                }
                (outcome?, false)
            }
            Err(e) => {
                telemetry::warn(&format!(
                    "Trainer session unavailable, scoring directly: {e}"
                ));
                rewards.extend(exchanges.iter().map(|ex| self.score(ex)));
                (rewards.iter().copied().reduce(f64::max), true)
            }
        };

        let result = OptimizationResult {
            start_time: clock::iso8601(started),
            end_time: clock::iso8601_now(),
            num_samples: samples.len(),
            num_iterations: iterations,
            avg_final_reward: trailing_mean(&rewards, FINAL_WINDOW),
            rewards,
            best_reward,
            fallback,
            final_prompts: prompts.overrides().clone(),
        };
        self.save(&result)?;
        Ok(result)
    }

    /// All persisted results, oldest first. Empty if no run finished yet.
    pub fn history(&self) -> Result<Vec<OptimizationResult>> {
        if !self.results_dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.results_dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_result_file(path))
            .collect();
        paths.sort();

        paths
            .into_iter()
            .map(|path| {
                let content = fs::read_to_string(&path)?;
                serde_json::from_str(&content)
                    .map_err(|source| OptimizerError::Corrupt { path, source })
            })
            .collect()
    }

    fn train_passes<F>(
        &self,
        exchanges: &[Exchange],
        iterations: usize,
        sink: &dyn EventSink,
        rewards: &mut Vec<f64>,
        progress: &mut F,
    ) -> Result<Option<f64>>
    where
        F: FnMut(usize, f64) -> std::result::Result<(), ProgressError>,
    {
        let mut best: Option<f64> = None;

        for iteration in 0..iterations {
            let mut total = 0.0;
            for exchange in exchanges {
                let step = StepEvent {
                    name: format!("train_{}", exchange.task_type),
                    input: exchange.user_turn().to_string(),
                    output: exchange.assistant_turn().to_string(),
                    metadata: None,
                };
                if let Err(e) = sink.record_step(&step) {
                    telemetry::warn(&format!("Failed to forward step: {e}"));
                }

                let reward = self.score(exchange);
                if let Err(e) = sink.record_reward(&RewardEvent {
                    reward,
                    metadata: None,
                }) {
                    telemetry::warn(&format!("Failed to forward reward: {e}"));
                }
                total += reward;
            }

            #[allow(clippy::cast_precision_loss)]
            let mean = if exchanges.is_empty() {
                0.0
            } else {
                total / exchanges.len() as f64
            };
            rewards.push(mean);
            best = Some(best.map_or(mean, |b| b.max(mean)));

            progress(iteration, mean).map_err(OptimizerError::Progress)?;

            if (iteration + 1) % LOG_EVERY == 0 {
                telemetry::info(&format!(
                    "Iteration {}/{iterations}, Avg Reward: {mean:.4}",
                    iteration + 1
                ));
            }
        }

        Ok(best)
    }

    fn score(&self, exchange: &Exchange) -> f64 {
        let mut context = ContextMap::new();
        context.insert("task_type".to_string(), json!(exchange.task_type));
        self.scorer
            .score(exchange.user_turn(), exchange.assistant_turn(), &context)
    }

    fn save(&self, result: &OptimizationResult) -> Result<PathBuf> {
        fs::create_dir_all(&self.results_dir)?;
        let path = self.results_dir.join(format!(
            "{RESULT_PREFIX}{}.json",
            clock::file_stamp(OffsetDateTime::now_utc())
        ));
        // create_new: an existing result is never overwritten.
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, result)?;
        writer.flush()?;
        telemetry::info(&format!("Results saved to {}", path.display()));
        Ok(path)
    }
}

fn is_result_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(RESULT_PREFIX) && n.ends_with(".json"))
}

#[allow(clippy::cast_precision_loss)]
fn trailing_mean(values: &[f64], window: usize) -> f64 {
    let tail = &values[values.len().saturating_sub(window)..];
    if tail.is_empty() {
        return 0.0;
    }
    tail.iter().sum::<f64>() / tail.len() as f64
}
