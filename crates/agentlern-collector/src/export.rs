//! Snapshot export of the training data.

use crate::{InteractionLog, Result};
use agentlern_core::{clock, telemetry, Statistics, TrainingSample};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const EXPORT_FILE: &str = "export.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportMetadata {
    pub exported_at: String,
    pub total_samples: usize,
    pub statistics: Statistics,
}

/// Contents of an export file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportSnapshot {
    pub metadata: ExportMetadata,
    pub data: Vec<TrainingSample>,
}

impl InteractionLog {
    /// Builds the snapshot of all interactions without writing it.
    #[must_use]
    pub fn snapshot(&self) -> ExportSnapshot {
        let data: Vec<TrainingSample> = self.training_data(None).collect();
        ExportSnapshot {
            metadata: ExportMetadata {
                exported_at: clock::iso8601_now(),
                total_samples: data.len(),
                statistics: self.statistics(),
            },
            data,
        }
    }

    #[must_use]
    pub fn default_export_path(&self) -> PathBuf {
        self.data_dir().join(EXPORT_FILE)
    }

    /// Writes the snapshot as pretty JSON to `path`, or to
    /// `<data_dir>/export.json`, and returns the path written.
    pub fn export(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path.map_or_else(|| self.default_export_path(), Path::to_path_buf);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let snapshot = self.snapshot();

        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, &snapshot)?;
        writer.flush()?;

        telemetry::info(&format!(
            "Exported {} samples to {}",
            snapshot.metadata.total_samples,
            path.display()
        ));
        Ok(path)
    }
}
