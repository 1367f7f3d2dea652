//! Forwarding of training events to the external trainer.
//!
//! Callers treat every [`EventSink`] call as best-effort: a failed call is
//! logged as a warning where it happens and never aborts the operation that
//! triggered it.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Trainer unreachable: {0}")]
    Unavailable(String),
    #[error("Trainer rejected event: {0}")]
    Rejected(String),
    #[error("Event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A single input/output step.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StepEvent {
    pub name: String,
    pub input: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A reward attached to the most recent step or to a recorded interaction.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RewardEvent {
    pub reward: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Receiver for steps and rewards. Implementations must be shareable across
/// request handlers, so all methods take `&self`.
pub trait EventSink: Send + Sync {
    /// Opens a reporting session. Failure here makes the optimizer skip
    /// forwarding for the whole run.
    fn open_session(&self, name: &str, metadata: &Value) -> Result<(), SinkError>;
    fn record_step(&self, step: &StepEvent) -> Result<(), SinkError>;
    fn record_reward(&self, reward: &RewardEvent) -> Result<(), SinkError>;
    fn close_session(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink used when no trainer is configured. Accepts and drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn open_session(&self, _name: &str, _metadata: &Value) -> Result<(), SinkError> {
        Ok(())
    }

    fn record_step(&self, _step: &StepEvent) -> Result<(), SinkError> {
        Ok(())
    }

    fn record_reward(&self, _reward: &RewardEvent) -> Result<(), SinkError> {
        Ok(())
    }
}
