//! Downloadable JSON export of a generated app.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::models::GeneratedArtifact;
use crate::codegen::split_normalized;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub app_name: String,
    pub description: String,
    pub prompt: String,
    pub generated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Normalized path → content
    pub files: BTreeMap<String, String>,
}

impl ExportDocument {
    /// `None` when the artifact has no code yet.
    pub fn from_artifact(artifact: &GeneratedArtifact) -> Option<Self> {
        let code = artifact.raw_code.as_deref()?;
        let files = split_normalized(code)
            .into_iter()
            .map(|f| (f.path, f.content))
            .collect();
        Some(Self {
            app_name: artifact.name.clone(),
            description: artifact.description.clone(),
            prompt: artifact.prompt.clone(),
            generated_at: artifact.created_at,
            completed_at: artifact.completed_at,
            files,
        })
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize export document")
    }
}

/// `My App!` → `my_app__export.json`
pub fn export_file_name(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("{}_export.json", stem)
}
