//! Per task type overrides of the system prompt.

use crate::error::{OptimizerError, Result};
use agentlern_core::telemetry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const PROMPT_FILE: &str = "optimized_prompts.json";

/// Used for every task type without an override.
pub const DEFAULT_SYSTEM_PROMPT: &str = "あなたはLINE Calendar Botのアシスタントです。
ユーザーの予定管理、タスク管理、リマインダー設定をサポートします。
日本語で簡潔に、親しみやすく応答してください。";

/// The prompt answering a lookup, as reported to clients.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PromptView {
    /// The requested task type, or `"default"`.
    pub task_type: String,
    pub prompt: String,
    pub is_optimized: bool,
}

/// Prompt overrides persisted as one JSON object.
#[derive(Debug, Clone)]
pub struct PromptStore {
    path: PathBuf,
    overrides: BTreeMap<String, String>,
}

impl PromptStore {
    /// Loads the overrides from `path`; a missing file means no overrides.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let overrides = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|source| OptimizerError::Corrupt {
                path: path.clone(),
                source,
            })?
        } else {
            BTreeMap::new()
        };
        if !overrides.is_empty() {
            telemetry::info(&format!("Loaded {} optimized prompts", overrides.len()));
        }
        Ok(Self { path, overrides })
    }

    /// Opens `<data_dir>/optimized_prompts.json`.
    pub fn in_dir(data_dir: &Path) -> Result<Self> {
        Self::open(data_dir.join(PROMPT_FILE))
    }

    /// The override for `task_type`, or [`DEFAULT_SYSTEM_PROMPT`].
    #[must_use]
    pub fn get(&self, task_type: Option<&str>) -> &str {
        task_type
            .and_then(|t| self.overrides.get(t))
            .map_or(DEFAULT_SYSTEM_PROMPT, String::as_str)
    }

    /// Resolves `task_type` for display. A missing or empty task type asks
    /// for the default prompt.
    #[must_use]
    pub fn view(&self, task_type: Option<&str>) -> PromptView {
        let task_type = task_type.filter(|t| !t.is_empty());
        PromptView {
            task_type: task_type.unwrap_or("default").to_string(),
            prompt: self.get(task_type).to_string(),
            is_optimized: task_type.is_some_and(|t| self.is_overridden(t)),
        }
    }

    #[must_use]
    pub fn is_overridden(&self, task_type: &str) -> bool {
        self.overrides.contains_key(task_type)
    }

    #[must_use]
    pub fn overrides(&self) -> &BTreeMap<String, String> {
        &self.overrides
    }

    /// Sets the override for `task_type` and writes the whole mapping.
    /// Memory is only updated once the file is written.
    pub fn update(&mut self, task_type: &str, prompt: &str) -> Result<()> {
        let mut next = self.overrides.clone();
        next.insert(task_type.to_string(), prompt.to_string());
        self.persist(&next)?;
        self.overrides = next;
        Ok(())
    }

    fn persist(&self, overrides: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            serde_json::to_writer_pretty(&mut writer, overrides)?;
            writer.flush()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
