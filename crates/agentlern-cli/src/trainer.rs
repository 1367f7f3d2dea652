//! HTTP forwarding of steps and rewards to the external trainer.

use agentlern_core::{EventSink, RewardEvent, SinkError, StepEvent};
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Posts events as JSON to `{base}/v1/…`. Any non-2xx answer is an error.
///
/// Uses a blocking client: call it from a plain thread or from
/// `spawn_blocking`, never from an async task.
#[derive(Debug)]
pub struct HttpTrainerSink {
    client: Client,
    base: Url,
}

impl HttpTrainerSink {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = build_trainer_url(base_url).context("Failed to build trainer URL")?;
        let client = Client::builder()
            .timeout(TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, base })
    }

    fn post(&self, path: &str, body: &impl Serialize) -> Result<(), SinkError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| SinkError::Unavailable(format!("invalid endpoint {path}: {e}")))?;
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SinkError::Rejected(format!("{status} from {path}")));
        }
        Ok(())
    }
}

impl EventSink for HttpTrainerSink {
    fn open_session(&self, name: &str, metadata: &Value) -> Result<(), SinkError> {
        self.post("sessions", &json!({ "name": name, "metadata": metadata }))
    }

    fn record_step(&self, step: &StepEvent) -> Result<(), SinkError> {
        self.post("steps", step)
    }

    fn record_reward(&self, reward: &RewardEvent) -> Result<(), SinkError> {
        self.post("rewards", reward)
    }

    fn close_session(&self) -> Result<(), SinkError> {
        self.post("sessions/close", &json!({}))
    }
}

/// Normalizes the configured base URL to `…/v1/`, keeping any path prefix.
fn build_trainer_url(base: &str) -> Result<Url> {
    let mut target_url = Url::parse(base).context("Invalid base URL")?;

    let mut segments: Vec<String> = target_url
        .path_segments()
        .map(|iter| iter.map(String::from).collect())
        .unwrap_or_default();

    if let Some(last) = segments.last() {
        if last.is_empty() {
            segments.pop();
        }
    }
    if segments.ends_with(&["v1".to_string()]) {
        segments.pop();
    }

    target_url
        .path_segments_mut()
        .map_err(|()| anyhow::anyhow!("URL cannot be used as a base: {base}"))?
        .clear()
        .extend(segments)
        .push("v1")
        .push("");

    Ok(target_url)
}
