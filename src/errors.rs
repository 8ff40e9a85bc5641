//! Typed error hierarchy for appfoundry.
//!
//! Three enums cover the three layers:
//! - `FactoryError`: store and API failures
//! - `GenerationError`: text-generation client failures
//! - `StageFailure`: a pipeline stage that could not produce its result

use std::fmt;

use thiserror::Error;

/// Errors from the store and HTTP API.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("No configuration found")]
    ConfigNotFound,

    #[error("App {id} not found")]
    ArtifactNotFound { id: i64 },

    #[error("Cron job {id} not found")]
    JobNotFound { id: i64 },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Schedule offset of {minutes} minutes is out of range")]
    ScheduleOverflow { minutes: i64 },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the text-generation client.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("No API key configured")]
    MissingApiKey,

    #[error("Request to generation API failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Generation API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Generation API returned no text")]
    EmptyResponse,

    #[error("Failed to decode generation response: {0}")]
    Decode(String),
}

/// Pipeline stage names, as recorded in failure messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ideas,
    Evaluation,
    Generation,
    Fix,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ideas => "ideas",
            Self::Evaluation => "evaluation",
            Self::Generation => "generation",
            Self::Fix => "fix",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFailureKind {
    /// The generation service failed or returned nothing usable.
    Upstream,
    /// The stage ran but produced an empty result.
    EmptyResult,
    /// Reading or writing the store failed.
    Persistence,
    /// Evaluations were not ordered by descending total.
    InvalidRanking,
}

/// A pipeline stage that failed; the message becomes the job's error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{stage} stage failed: {message}")]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: StageFailureKind,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: Stage, kind: StageFailureKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }

    pub fn upstream(stage: Stage, err: &GenerationError) -> Self {
        Self::new(stage, StageFailureKind::Upstream, err.to_string())
    }

    pub fn persistence(stage: Stage, err: &anyhow::Error) -> Self {
        Self::new(stage, StageFailureKind::Persistence, format!("{:#}", err))
    }
}
