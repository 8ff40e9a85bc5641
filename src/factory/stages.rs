//! The three build stages (ideas, evaluation, app generation) plus the
//! on-demand code fix, backed by a [`TextGenerator`] and the store.
//!
//! Prompt construction and response parsing are plain functions so they can
//! be tested without a model; [`LlmPipeline`] wires them to the generator.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::db::DbHandle;
use super::llm::{GenerationRequest, TextGenerator};
use super::models::{AppIdea, ArtifactStatus, BuildRule, EvaluatedIdea, GeneratedArtifact, IdeaScores};
use super::orchestrator::{BuildPipeline, CycleContext};
use crate::codegen::sanitize_files;
use crate::errors::{Stage, StageFailure, StageFailureKind};
use crate::util::{extract_json_array, truncate};

pub const DEFAULT_IDEA_COUNT: usize = 10;

pub const IDEAS_TEMPERATURE: f32 = 0.9;
pub const EVALUATION_TEMPERATURE: f32 = 0.7;
pub const GENERATION_TEMPERATURE: f32 = 0.8;
pub const FIX_TEMPERATURE: f32 = 0.3;

const NEUTRAL_REASONING: &str = "Default scoring";

static NAME_LINE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Name:\s*([^\n]+)").unwrap());

static DESCRIPTION_LINE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Description:\s*([^\n]+)").unwrap());

static LIST_NUMBER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\s*").unwrap());

// ── Ideas ─────────────────────────────────────────────────────────────

pub fn ideas_prompt(count: usize) -> String {
    format!(
        r#"Generate {count} unique, SUBSTANTIAL web app ideas that could be profitable SaaS products.

These must be apps that need REAL FUNCTIONALITY, not simple forms or display pages.

Each idea should:
1. Require real logic, calculations or data processing
2. Have several interactive features
3. Manage data (create, edit, filter, sort)
4. Solve a specific, valuable problem for a niche audience
5. Justify a $10-50/month subscription
6. Work as a single-page application with local storage
7. NOT be a recipe generator, basic calculator, todo list or portfolio site

Return ONLY a JSON array in this exact format (no markdown, no explanations):
[
  {{
    "name": "Specific, descriptive app name",
    "description": "Core features and functionality in 2-3 sentences",
    "targetAudience": "Specific niche audience",
    "problem": "Specific problem it solves, with measurable outcomes",
    "monetization": "Subscription tier structure"
  }}
]"#
    )
}

/// Parse the ideas response. A missing or malformed JSON array falls back to
/// one idea per non-empty line. At most `count` ideas are returned.
pub fn parse_ideas(text: &str, count: usize) -> Vec<AppIdea> {
    let parsed = extract_json_array(text)
        .and_then(|json| serde_json::from_str::<Vec<AppIdea>>(json).ok());
    let mut ideas = match parsed {
        Some(ideas) => ideas,
        None => {
            debug!("Ideas response was not a JSON array, falling back to lines");
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .take(count)
                .enumerate()
                .map(|(i, line)| {
                    let description = LIST_NUMBER_REGEX.replace(line, "");
                    AppIdea::new(format!("Idea {}", i + 1), description.trim())
                })
                .collect()
        }
    };
    ideas.truncate(count);
    ideas
}

// ── Evaluation ────────────────────────────────────────────────────────

pub fn evaluation_prompt(ideas: &[AppIdea], existing_names: &[String]) -> String {
    let existing = if existing_names.is_empty() {
        "None".to_string()
    } else {
        existing_names.join(", ")
    };
    let ideas_json = serde_json::to_string_pretty(ideas).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"Evaluate these {count} web app ideas for building substantial, functional SaaS products.

SCORING CRITERIA (0-10 for each):
1. complexityScore: real logic, calculations, state management
2. functionalityScore: interactive features beyond basic CRUD
3. valueScore: clear, measurable benefit to users
4. profitabilityScore: can users justify paying $10-50/month
5. uniquenessScore: differentiation from existing solutions

Penalize oversaturated ideas (todo lists, recipe generators, basic calculators).
Reward analytics, automation and time-saving features.

Existing apps (avoid similar): {existing}

Ideas to evaluate:
{ideas_json}

Return ONLY a JSON array (no markdown, no explanations):
[
  {{
    "index": 0,
    "complexityScore": 8,
    "functionalityScore": 9,
    "valueScore": 7,
    "profitabilityScore": 8,
    "uniquenessScore": 6,
    "totalScore": 38,
    "reasoning": "Why this scored high or low"
  }}
]"#,
        count = ideas.len(),
    )
}

/// One entry of the evaluator's response. Every field is optional; missing
/// scores count as zero.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvaluation {
    #[serde(default)]
    pub index: Option<i64>,
    #[serde(default)]
    pub complexity_score: Option<f64>,
    #[serde(default)]
    pub functionality_score: Option<f64>,
    #[serde(default)]
    pub value_score: Option<f64>,
    #[serde(default)]
    pub profitability_score: Option<f64>,
    #[serde(default)]
    pub uniqueness_score: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

fn clamp_score(score: Option<f64>) -> u8 {
    match score {
        Some(s) if s.is_finite() => s.round().clamp(0.0, 10.0) as u8,
        _ => 0,
    }
}

impl RawEvaluation {
    pub fn scores(&self) -> IdeaScores {
        IdeaScores {
            complexity: clamp_score(self.complexity_score),
            functionality: clamp_score(self.functionality_score),
            value: clamp_score(self.value_score),
            profitability: clamp_score(self.profitability_score),
            uniqueness: clamp_score(self.uniqueness_score),
        }
    }
}

/// `None` when the evaluator returned no parseable JSON array.
pub fn parse_evaluations(text: &str) -> Option<Vec<RawEvaluation>> {
    let json = extract_json_array(text)?;
    serde_json::from_str(json).ok()
}

/// Attach scores to every idea and sort by total, descending.
///
/// Evaluations are matched by `index`, then by position; an idea with
/// neither gets zero scores. Without any evaluations every idea gets the
/// neutral score, so the original order decides. The sort is stable.
pub fn rank_ideas(ideas: &[AppIdea], evaluations: Option<&[RawEvaluation]>) -> Vec<EvaluatedIdea> {
    let mut ranked: Vec<EvaluatedIdea> = ideas
        .iter()
        .enumerate()
        .map(|(i, idea)| {
            let (scores, reasoning) = match evaluations {
                None => (IdeaScores::NEUTRAL, NEUTRAL_REASONING.to_string()),
                Some(evals) => {
                    let matched = evals
                        .iter()
                        .find(|e| e.index == Some(i as i64))
                        .or_else(|| evals.get(i));
                    match matched {
                        Some(e) => (e.scores(), e.reasoning.clone().unwrap_or_default()),
                        None => (IdeaScores::default(), String::new()),
                    }
                }
            };
            EvaluatedIdea {
                idea: idea.clone(),
                total_score: scores.total(),
                scores,
                reasoning,
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.total_score.cmp(&a.total_score));
    ranked
}

/// Totals are non-increasing.
pub fn is_ranked(evaluated: &[EvaluatedIdea]) -> bool {
    evaluated
        .windows(2)
        .all(|w| w[0].total_score >= w[1].total_score)
}

// ── App generation ────────────────────────────────────────────────────

/// Name and description recovered from an idea's text form.
pub fn parse_idea_text(text: &str) -> (String, String) {
    let name = NAME_LINE_REGEX
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| truncate(text.lines().next().unwrap_or(""), 50));
    let description = DESCRIPTION_LINE_REGEX
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| truncate(text, 200));
    (name, description)
}

pub fn generation_system_prompt(rules: &[BuildRule]) -> String {
    let rules_text = rules
        .iter()
        .map(|r| format!("- {}: {}", r.name, r.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"You are an expert Next.js app builder who creates production-ready, fully functional web applications.

The app MUST have:
1. Real functionality: actual logic, calculations and data processing, not mockups
2. State management with React hooks
3. Form handling with validation and error messages
4. Data persistence with localStorage or realistic generated data
5. Loading, empty and error states
6. Every feature mentioned in the idea, fully implemented

DESIGN REQUIREMENTS:
{rules_text}

TECHNICAL REQUIREMENTS:
- TypeScript with proper type definitions
- Tailwind CSS, fully responsive
- Next.js app router with "use client" where needed
- No external libraries beyond React and Next.js

SYNTAX RULES:
- In JSX expressions, avoid template literals with ${{}} interpolation; use string concatenation
- Every JSX expression must be valid and parseable

OUTPUT FORMAT:
- Separate files with a line of the exact form: --- FILE: <path> ---
- No markdown code fences and no explanations outside the files"#
    )
}

pub fn generation_prompt(idea_text: &str) -> String {
    format!(
        r#"Build a COMPLETE, FULLY FUNCTIONAL Next.js app for:
{idea_text}

Provide complete code with file separators:
--- FILE: app/page.tsx ---
[Main page, with "use client" if interactive]

--- FILE: components/[ComponentName].tsx ---
[Reusable components with typed props]

--- FILE: lib/[utilName].ts ---
[Utility functions and business logic]

--- FILE: types/index.ts ---
[TypeScript interfaces and types]"#
    )
}

// ── Code fix ──────────────────────────────────────────────────────────

pub const FIX_SYSTEM_PROMPT: &str = r#"You are an expert code debugger. Fix syntax and runtime errors in React/TypeScript code.

Rules:
1. Fix the specific error mentioned
2. Keep all existing functionality, structure and logic
3. Keep every "--- FILE: <path> ---" separator line exactly as given
4. Do not use markdown code fences
5. Make sure all JSX is valid and properly escaped

Return ONLY the complete, corrected code."#;

pub fn fix_prompt(code: &str, error: &str) -> String {
    format!(
        "Fix this code that has the following error:\n\nERROR:\n{error}\n\nORIGINAL CODE:\n{code}\n\nReturn the FIXED code only (no markdown, no explanations)."
    )
}

// ── Pipeline ──────────────────────────────────────────────────────────

/// Production pipeline: stages call the text generator and persist through
/// the store.
pub struct LlmPipeline {
    generator: Arc<dyn TextGenerator>,
    db: DbHandle,
    idea_count: usize,
}

impl LlmPipeline {
    pub fn new(generator: Arc<dyn TextGenerator>, db: DbHandle, idea_count: usize) -> Self {
        Self {
            generator,
            db,
            idea_count: idea_count.max(1),
        }
    }

    pub fn idea_count(&self) -> usize {
        self.idea_count
    }

    pub async fn ideas(&self, api_key: Option<&str>, count: usize) -> Result<Vec<AppIdea>, StageFailure> {
        let request = GenerationRequest::new(ideas_prompt(count), IDEAS_TEMPERATURE).with_api_key(api_key);
        let text = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| StageFailure::upstream(Stage::Ideas, &e))?;
        let ideas = parse_ideas(&text, count);
        info!(count = ideas.len(), "Generated ideas");
        Ok(ideas)
    }

    pub async fn evaluate(
        &self,
        api_key: Option<&str>,
        ideas: &[AppIdea],
    ) -> Result<Vec<EvaluatedIdea>, StageFailure> {
        if ideas.is_empty() {
            return Err(StageFailure::new(
                Stage::Evaluation,
                StageFailureKind::EmptyResult,
                "No ideas provided",
            ));
        }
        let existing = self
            .db
            .call(|db| db.artifact_names())
            .await
            .map_err(|e| StageFailure::persistence(Stage::Evaluation, &e))?;
        let request = GenerationRequest::new(evaluation_prompt(ideas, &existing), EVALUATION_TEMPERATURE)
            .with_api_key(api_key);
        let text = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| StageFailure::upstream(Stage::Evaluation, &e))?;
        let evaluations = parse_evaluations(&text);
        if evaluations.is_none() {
            warn!("Evaluation response was not a JSON array, using neutral scores");
        }
        let ranked = rank_ideas(ideas, evaluations.as_deref());
        if let Some(best) = ranked.first() {
            info!(name = %best.idea.name, score = best.total_score, "Ranked ideas");
        }
        Ok(ranked)
    }

    /// Generate, sanitize and store an app for `idea_text`. Returns the
    /// artifact id; the artifact ends Completed, or Failed with the error.
    pub async fn build_app(
        &self,
        config_id: i64,
        api_key: Option<&str>,
        idea_text: &str,
    ) -> Result<i64, StageFailure> {
        let (name, description) = parse_idea_text(idea_text);
        let prompt = idea_text.to_string();
        let (rules, artifact) = self
            .db
            .call(move |db| {
                let rules = db.list_rules(config_id)?;
                let artifact = db.create_artifact(
                    Some(config_id),
                    &name,
                    &description,
                    &prompt,
                    ArtifactStatus::Building,
                )?;
                Ok((rules, artifact))
            })
            .await
            .map_err(|e| StageFailure::persistence(Stage::Generation, &e))?;
        info!(app_id = artifact.id, name = %artifact.name, rules = rules.len(), "Building app");

        let request = GenerationRequest::new(generation_prompt(idea_text), GENERATION_TEMPERATURE)
            .with_system(generation_system_prompt(&rules))
            .with_api_key(api_key);
        let failure = match self.generator.generate(&request).await {
            Err(e) => StageFailure::upstream(Stage::Generation, &e),
            Ok(text) => {
                let code = sanitize_files(&text);
                if code.trim().is_empty() {
                    StageFailure::new(
                        Stage::Generation,
                        StageFailureKind::EmptyResult,
                        "Generated code was empty",
                    )
                } else {
                    return self.complete(artifact.id, code).await;
                }
            }
        };

        self.mark_failed(artifact.id, &failure.message).await;
        Err(failure)
    }

    async fn complete(&self, id: i64, code: String) -> Result<i64, StageFailure> {
        let completed = self
            .db
            .call(move |db| db.complete_artifact(id, &code))
            .await;
        match completed {
            Ok(true) => {
                info!(app_id = id, "App completed");
                Ok(id)
            }
            Ok(false) => Err(StageFailure::new(
                Stage::Generation,
                StageFailureKind::Persistence,
                format!("App {} was no longer building", id),
            )),
            Err(e) => {
                let failure = StageFailure::persistence(Stage::Generation, &e);
                self.mark_failed(id, &failure.message).await;
                Err(failure)
            }
        }
    }

    async fn mark_failed(&self, id: i64, message: &str) {
        let message = message.to_string();
        if let Err(e) = self.db.call(move |db| db.fail_artifact(id, &message)).await {
            warn!(app_id = id, "Failed to record app failure: {:#}", e);
        }
    }

    /// Ask the generator to fix `artifact`'s code for `error`, then store the
    /// sanitized result. Status is left alone.
    pub async fn fix_code(
        &self,
        api_key: Option<&str>,
        artifact: &GeneratedArtifact,
        error: &str,
    ) -> Result<String, StageFailure> {
        let code = artifact
            .raw_code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| StageFailure::new(Stage::Fix, StageFailureKind::EmptyResult, "App has no code to fix"))?;
        if error.trim().is_empty() {
            return Err(StageFailure::new(
                Stage::Fix,
                StageFailureKind::EmptyResult,
                "An error message is required",
            ));
        }

        info!(app_id = artifact.id, "Fixing app code");
        let request = GenerationRequest::new(fix_prompt(code, error), FIX_TEMPERATURE)
            .with_system(FIX_SYSTEM_PROMPT)
            .with_api_key(api_key);
        let text = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| StageFailure::upstream(Stage::Fix, &e))?;
        let fixed = sanitize_files(&text);
        if fixed.trim().is_empty() {
            return Err(StageFailure::new(
                Stage::Fix,
                StageFailureKind::EmptyResult,
                "Fixed code was empty",
            ));
        }

        let id = artifact.id;
        let stored = fixed.clone();
        self.db
            .call(move |db| db.update_artifact_code(id, &stored))
            .await
            .map_err(|e| StageFailure::persistence(Stage::Fix, &e))?;
        Ok(fixed)
    }
}

#[async_trait]
impl BuildPipeline for LlmPipeline {
    async fn generate_ideas(&self, ctx: &CycleContext) -> Result<Vec<AppIdea>, StageFailure> {
        self.ideas(ctx.config.usable_api_key(), self.idea_count).await
    }

    async fn evaluate_ideas(
        &self,
        ctx: &CycleContext,
        ideas: &[AppIdea],
    ) -> Result<Vec<EvaluatedIdea>, StageFailure> {
        self.evaluate(ctx.config.usable_api_key(), ideas).await
    }

    async fn generate_app(&self, ctx: &CycleContext, idea: &AppIdea) -> Result<i64, StageFailure> {
        self.build_app(ctx.config.id, ctx.config.usable_api_key(), &idea.to_prompt_text())
            .await
    }
}
