#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Core types shared by the agentlern crates.
//!
//! Holds the interaction record, the statistics view, the trainer sink trait
//! and the environment config. Nothing here touches the file system.

pub mod clock;
pub mod config;
pub mod interaction;
pub mod sink;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use interaction::{ContextMap, Interaction, Statistics, TrainingSample};
pub use sink::{EventSink, NullSink, RewardEvent, SinkError, StepEvent};

/// Known task categories with their display labels.
pub const TASK_TYPES: &[(&str, &str)] = &[
    ("calendar_create", "カレンダー予定作成"),
    ("calendar_query", "カレンダー予定確認"),
    ("task_create", "タスク作成"),
    ("task_complete", "タスク完了"),
    ("reminder_set", "リマインダー設定"),
    ("general_query", "一般質問"),
    ("error_handling", "エラー対応"),
];

/// Task type assumed when a sample carries none.
pub const DEFAULT_TASK_TYPE: &str = "general";

#[must_use]
pub fn is_known_task_type(task_type: &str) -> bool {
    TASK_TYPES.iter().any(|(name, _)| *name == task_type)
}
