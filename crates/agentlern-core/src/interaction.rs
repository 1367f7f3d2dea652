//! Records exchanged between the interaction log, the exporter and the
//! optimization driver.
//!
//! An [`Interaction`] is one line of `interactions.jsonl`. A
//! [`TrainingSample`] is the reduced form handed to the optimizer and written
//! into export snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Free-form metadata attached to an interaction.
pub type ContextMap = BTreeMap<String, Value>;

/// One recorded user/bot exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    /// `{user_id}_{timestamp}` with microsecond precision.
    pub id: String,
    /// RFC 3339 creation time.
    pub timestamp: String,
    pub user_id: String,
    /// Usually one of [`crate::TASK_TYPES`], not enforced.
    pub task_type: String,
    pub user_message: String,
    pub bot_response: String,
    #[serde(default)]
    pub context: ContextMap,
    /// Reward in `[-1.0, 1.0]`, absent until set.
    #[serde(default)]
    pub reward: Option<f64>,
    #[serde(default)]
    pub feedback: Option<String>,
}

impl Interaction {
    /// Reduces the record to what training consumes. An unset reward becomes `0.0`.
    #[must_use]
    pub fn to_sample(&self) -> TrainingSample {
        TrainingSample {
            input: self.user_message.clone(),
            output: self.bot_response.clone(),
            task_type: self.task_type.clone(),
            reward: self.reward.unwrap_or(0.0),
            context: self.context.clone(),
        }
    }
}

/// Input/output pair as used for optimization and export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingSample {
    pub input: String,
    pub output: String,
    pub task_type: String,
    pub reward: f64,
    #[serde(default)]
    pub context: ContextMap,
}

/// Aggregate view over the interaction log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Statistics {
    pub total_interactions: usize,
    pub interactions_by_task: BTreeMap<String, usize>,
    /// Mean over rewarded interactions only; `0.0` when none are rewarded.
    pub average_reward: f64,
    pub rewarded_count: usize,
}
