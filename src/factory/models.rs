use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::codegen::FileArtifact;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Pending,
    Building,
    Completed,
    Failed,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// No further transition happens within a cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for ArtifactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "building" => Ok(Self::Building),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid app status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Active,
    Disabled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedArtifact {
    pub id: i64,
    pub config_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub prompt: String,
    pub raw_code: Option<String>,
    pub status: ArtifactStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildRule {
    pub id: i64,
    pub config_id: i64,
    pub name: String,
    pub description: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Configuration {
    pub id: i64,
    pub api_key: Option<String>,
    pub provider: String,
    pub interval_minutes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Configuration {
    /// Key usable for generation: present and non-blank.
    pub fn usable_api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

/// Configuration as returned by the API: the key itself is never echoed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigurationView {
    pub id: i64,
    pub has_api_key: bool,
    pub provider: String,
    pub interval_minutes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Configuration> for ConfigurationView {
    fn from(config: &Configuration) -> Self {
        Self {
            id: config.id,
            has_api_key: config.usable_api_key().is_some(),
            provider: config.provider.clone(),
            interval_minutes: config.interval_minutes,
            created_at: config.created_at,
            updated_at: config.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CronJob {
    pub id: i64,
    pub config_id: i64,
    pub status: JobStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub lease_holder: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

/// A job with its configuration's interval, for status listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSummary {
    #[serde(flatten)]
    pub job: CronJob,
    pub interval_minutes: i64,
}

/// A generated application idea.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppIdea {
    pub name: String,
    pub description: String,
    #[serde(default = "default_target_audience")]
    pub target_audience: String,
    #[serde(default = "default_problem")]
    pub problem: String,
    #[serde(default = "default_monetization")]
    pub monetization: String,
}

fn default_target_audience() -> String {
    "General users".to_string()
}

fn default_problem() -> String {
    "To be determined".to_string()
}

fn default_monetization() -> String {
    "Subscription/Freemium".to_string()
}

impl AppIdea {
    /// Idea with the default audience, problem and monetization.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            target_audience: default_target_audience(),
            problem: default_problem(),
            monetization: default_monetization(),
        }
    }

    /// Text form stored as an artifact's prompt.
    pub fn to_prompt_text(&self) -> String {
        format!(
            "Name: {}\nDescription: {}\nTarget Audience: {}\nProblem: {}\nMonetization: {}",
            self.name, self.description, self.target_audience, self.problem, self.monetization
        )
    }
}

/// Per-idea scores, each in `0..=10`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdeaScores {
    pub complexity: u8,
    pub functionality: u8,
    pub value: u8,
    pub profitability: u8,
    pub uniqueness: u8,
}

impl IdeaScores {
    pub const NEUTRAL: IdeaScores = IdeaScores {
        complexity: 5,
        functionality: 5,
        value: 5,
        profitability: 5,
        uniqueness: 5,
    };

    pub fn total(&self) -> u32 {
        [
            self.complexity,
            self.functionality,
            self.value,
            self.profitability,
            self.uniqueness,
        ]
        .iter()
        .map(|&s| u32::from(s))
        .sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedIdea {
    pub idea: AppIdea,
    pub scores: IdeaScores,
    pub total_score: u32,
    pub reasoning: String,
}
