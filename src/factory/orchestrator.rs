//! Autonomous build cycle.
//!
//! A pass sweeps stale builds, selects due jobs and runs one cycle per job
//! under a lease. A cycle walks [`CycleState`] through the pipeline stages;
//! every validation lives in the pure [`transition`] reducer, and the
//! resulting [`Settlement`] is turned into a job update by the scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::db::DbHandle;
use super::models::{AppIdea, Configuration, EvaluatedIdea, JobSummary};
use super::scheduler::{RetryPolicy, Settlement, settle};
use super::stages::is_ranked;
use crate::errors::{FactoryError, StageFailure};

/// Error recorded on builds abandoned by an earlier pass.
pub const STALE_BUILD_ERROR: &str = "Build abandoned: no result before the lease expired";

pub const DEFAULT_LEASE_SECONDS: i64 = 900;

/// Longest accepted lease: one day.
pub const MAX_LEASE_SECONDS: i64 = 86_400;

/// What a cycle needs to know about the job it runs for.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub job_id: i64,
    pub config: Configuration,
}

#[async_trait]
pub trait BuildPipeline: Send + Sync {
    async fn generate_ideas(&self, ctx: &CycleContext) -> Result<Vec<AppIdea>, StageFailure>;

    async fn evaluate_ideas(
        &self,
        ctx: &CycleContext,
        ideas: &[AppIdea],
    ) -> Result<Vec<EvaluatedIdea>, StageFailure>;

    /// Build the selected idea; returns the stored artifact's id.
    async fn generate_app(&self, ctx: &CycleContext, idea: &AppIdea) -> Result<i64, StageFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleState {
    RunningIdeas,
    RunningEvaluation { ideas: Vec<AppIdea> },
    RunningGeneration { selected: EvaluatedIdea },
    Settled(Settlement),
}

impl CycleState {
    pub fn name(&self) -> &'static str {
        match self {
            CycleState::RunningIdeas => "running_ideas",
            CycleState::RunningEvaluation { .. } => "running_evaluation",
            CycleState::RunningGeneration { .. } => "running_generation",
            CycleState::Settled(_) => "settled",
        }
    }
}

/// Output of the stage the current state ran.
#[derive(Debug, Clone)]
pub enum StageResult {
    Ideas(Result<Vec<AppIdea>, StageFailure>),
    Evaluation(Result<Vec<EvaluatedIdea>, StageFailure>),
    Generation(Result<i64, StageFailure>),
}

fn fail(reason: impl Into<String>) -> CycleState {
    CycleState::Settled(Settlement::Failure {
        reason: reason.into(),
    })
}

/// Advance a cycle by one stage result.
pub fn transition(state: CycleState, result: StageResult) -> CycleState {
    match (state, result) {
        (CycleState::Settled(s), _) => CycleState::Settled(s),

        (CycleState::RunningIdeas, StageResult::Ideas(Err(f))) => fail(f.to_string()),
        (CycleState::RunningIdeas, StageResult::Ideas(Ok(ideas))) => {
            if ideas.is_empty() {
                fail("No ideas generated")
            } else {
                CycleState::RunningEvaluation { ideas }
            }
        }

        (CycleState::RunningEvaluation { .. }, StageResult::Evaluation(Err(f))) => {
            fail(f.to_string())
        }
        (CycleState::RunningEvaluation { .. }, StageResult::Evaluation(Ok(evaluated))) => {
            if !is_ranked(&evaluated) {
                return fail("Evaluated ideas are not ranked by total score");
            }
            match evaluated.into_iter().next() {
                Some(selected) => CycleState::RunningGeneration { selected },
                None => fail("No evaluated ideas received"),
            }
        }

        (CycleState::RunningGeneration { .. }, StageResult::Generation(Err(f))) => {
            fail(f.to_string())
        }
        (CycleState::RunningGeneration { .. }, StageResult::Generation(Ok(artifact_id))) => {
            CycleState::Settled(Settlement::Success { artifact_id })
        }

        (state, _) => fail(format!("Unexpected stage result in state {}", state.name())),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: i64,
    pub config_id: i64,
    pub settlement: Settlement,
    pub next_run: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub holder: String,
    /// Stale builds failed by the sweep
    pub swept: usize,
    pub due: usize,
    pub outcomes: Vec<JobOutcome>,
    /// Jobs whose lease was held by someone else
    pub skipped: Vec<i64>,
    pub errors: Vec<String>,
}

impl PassReport {
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }
}

pub struct Orchestrator {
    db: DbHandle,
    pipeline: Arc<dyn BuildPipeline>,
    policy: RetryPolicy,
    lease_ttl: Duration,
}

impl Orchestrator {
    pub fn new(db: DbHandle, pipeline: Arc<dyn BuildPipeline>) -> Self {
        Self {
            db,
            pipeline,
            policy: RetryPolicy::default(),
            lease_ttl: Duration::seconds(DEFAULT_LEASE_SECONDS),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_lease_seconds(mut self, seconds: i64) -> Self {
        self.lease_ttl = Duration::seconds(seconds.clamp(1, MAX_LEASE_SECONDS));
        self
    }

    fn lease_overflow(&self) -> FactoryError {
        FactoryError::ScheduleOverflow {
            minutes: self.lease_ttl.num_minutes(),
        }
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    /// Run one pass over every due job.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> anyhow::Result<PassReport> {
        let mut report = PassReport {
            holder: Uuid::new_v4().to_string(),
            ..Default::default()
        };

        let cutoff = now
            .checked_sub_signed(self.lease_ttl)
            .ok_or_else(|| self.lease_overflow())?;
        report.swept = self
            .db
            .call(move |db| db.fail_stale_builds(cutoff, STALE_BUILD_ERROR))
            .await?;
        if report.swept > 0 {
            warn!(count = report.swept, "Failed stale builds");
        }

        let due = self.db.call(move |db| db.due_jobs(now)).await?;
        report.due = due.len();
        info!(due = report.due, holder = %report.holder, "Starting build pass");

        for job in due {
            if let Err(e) = self.process_job(&job, now, &mut report).await {
                error!(job_id = job.job.id, "Failed to process job: {:#}", e);
                report.errors.push(format!("job {}: {:#}", job.job.id, e));
            }
        }

        info!(
            processed = report.processed(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "Build pass finished"
        );
        Ok(report)
    }

    async fn process_job(
        &self,
        summary: &JobSummary,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> anyhow::Result<()> {
        let job_id = summary.job.id;
        let config_id = summary.job.config_id;
        let holder = report.holder.clone();
        let expires = now
            .checked_add_signed(self.lease_ttl)
            .ok_or_else(|| self.lease_overflow())?;

        let lease_holder = holder.clone();
        let acquired = self
            .db
            .call(move |db| db.try_acquire_lease(job_id, &lease_holder, now, expires))
            .await?;
        if !acquired {
            info!(job_id, "Job lease held elsewhere, skipping");
            report.skipped.push(job_id);
            return Ok(());
        }

        let config = self.db.call(move |db| db.get_configuration(config_id)).await?;
        let settlement = match config {
            Some(config) => {
                info!(job_id, config_id, "Starting build cycle");
                self.run_cycle(&CycleContext { job_id, config }).await
            }
            None => Settlement::Failure {
                reason: format!("Configuration {} not found", config_id),
            },
        };

        let update = settle(
            &summary.job,
            &settlement,
            now,
            summary.interval_minutes,
            &self.policy,
        );
        let update = match update {
            Ok(update) => update,
            Err(e) => {
                let release_holder = holder.clone();
                self.db
                    .call(move |db| db.release_lease(job_id, &release_holder))
                    .await?;
                return Err(e.into());
            }
        };
        let next_run = update.next_run;
        let applied = self
            .db
            .call(move |db| db.apply_job_update(&update, &holder))
            .await?;
        if !applied {
            warn!(job_id, "Lease was taken over before the job could be updated");
        }

        match &settlement {
            Settlement::Success { artifact_id } => {
                info!(job_id, artifact_id, %next_run, "Build cycle succeeded")
            }
            Settlement::Failure { reason } => {
                warn!(job_id, %next_run, "Build cycle failed: {}", reason)
            }
        }
        report.outcomes.push(JobOutcome {
            job_id,
            config_id,
            settlement,
            next_run,
        });
        Ok(())
    }

    /// Drive one cycle to its settlement.
    pub async fn run_cycle(&self, ctx: &CycleContext) -> Settlement {
        let mut state = CycleState::RunningIdeas;
        loop {
            let result = match &state {
                CycleState::RunningIdeas => {
                    StageResult::Ideas(self.pipeline.generate_ideas(ctx).await)
                }
                CycleState::RunningEvaluation { ideas } => {
                    StageResult::Evaluation(self.pipeline.evaluate_ideas(ctx, ideas).await)
                }
                CycleState::RunningGeneration { selected } => {
                    info!(
                        name = %selected.idea.name,
                        score = selected.total_score,
                        "Selected best idea"
                    );
                    StageResult::Generation(self.pipeline.generate_app(ctx, &selected.idea).await)
                }
                CycleState::Settled(settlement) => return settlement.clone(),
            };
            state = transition(state, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{Stage, StageFailureKind};
    use crate::factory::db::FactoryDb;
    use crate::factory::models::{ArtifactStatus, IdeaScores};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn evaluated(name: &str, total: u32) -> EvaluatedIdea {
        EvaluatedIdea {
            idea: AppIdea::new(name, ""),
            scores: IdeaScores::default(),
            total_score: total,
            reasoning: String::new(),
        }
    }

    /// Canned stage results; `generate_app` stores a completed artifact.
    struct StubPipeline {
        db: DbHandle,
        ideas: Vec<AppIdea>,
        evaluations: Vec<EvaluatedIdea>,
        generation_calls: AtomicUsize,
    }

    impl StubPipeline {
        fn new(db: DbHandle, evaluations: Vec<EvaluatedIdea>) -> Self {
            Self {
                db,
                ideas: vec![AppIdea::new("A", ""), AppIdea::new("B", "")],
                evaluations,
                generation_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BuildPipeline for StubPipeline {
        async fn generate_ideas(&self, _ctx: &CycleContext) -> Result<Vec<AppIdea>, StageFailure> {
            Ok(self.ideas.clone())
        }

        async fn evaluate_ideas(
            &self,
            _ctx: &CycleContext,
            _ideas: &[AppIdea],
        ) -> Result<Vec<EvaluatedIdea>, StageFailure> {
            Ok(self.evaluations.clone())
        }

        async fn generate_app(&self, ctx: &CycleContext, idea: &AppIdea) -> Result<i64, StageFailure> {
            self.generation_calls.fetch_add(1, Ordering::SeqCst);
            let name = idea.name.clone();
            let config_id = ctx.config.id;
            self.db
                .call(move |db| {
                    let app = db.create_artifact(Some(config_id), &name, "", "", ArtifactStatus::Building)?;
                    db.complete_artifact(app.id, "code")?;
                    Ok(app.id)
                })
                .await
                .map_err(|e| StageFailure::persistence(Stage::Generation, &e))
        }
    }

    /// A database with one keyed configuration whose job is due at `now`.
    fn due_db(now: DateTime<Utc>) -> DbHandle {
        let db = FactoryDb::new_in_memory().unwrap();
        db.upsert_configuration(Some("key"), "google", 60).unwrap();
        db.initialize_jobs(now - Duration::hours(2)).unwrap();
        DbHandle::new(db)
    }

    #[test]
    fn test_transition_happy_path() {
        let state = transition(
            CycleState::RunningIdeas,
            StageResult::Ideas(Ok(vec![AppIdea::new("A", "")])),
        );
        assert_eq!(state.name(), "running_evaluation");

        let state = transition(
            state,
            StageResult::Evaluation(Ok(vec![evaluated("A", 30), evaluated("B", 20)])),
        );
        match &state {
            CycleState::RunningGeneration { selected } => assert_eq!(selected.idea.name, "A"),
            other => panic!("unexpected state {:?}", other),
        }

        let state = transition(state, StageResult::Generation(Ok(9)));
        assert_eq!(state, CycleState::Settled(Settlement::Success { artifact_id: 9 }));
    }

    #[test]
    fn test_transition_rejects_empty_and_unranked() {
        let state = transition(CycleState::RunningIdeas, StageResult::Ideas(Ok(vec![])));
        assert_eq!(
            state,
            CycleState::Settled(Settlement::Failure {
                reason: "No ideas generated".into()
            })
        );

        let evaluating = CycleState::RunningEvaluation {
            ideas: vec![AppIdea::new("A", "")],
        };
        let state = transition(evaluating.clone(), StageResult::Evaluation(Ok(vec![])));
        assert_eq!(
            state,
            CycleState::Settled(Settlement::Failure {
                reason: "No evaluated ideas received".into()
            })
        );

        let state = transition(
            evaluating,
            StageResult::Evaluation(Ok(vec![evaluated("A", 10), evaluated("B", 20)])),
        );
        assert!(matches!(state, CycleState::Settled(Settlement::Failure { .. })));
    }

    #[test]
    fn test_transition_stage_failure_and_mismatch() {
        let failure = StageFailure::new(Stage::Ideas, StageFailureKind::Upstream, "quota");
        let state = transition(CycleState::RunningIdeas, StageResult::Ideas(Err(failure)));
        assert_eq!(
            state,
            CycleState::Settled(Settlement::Failure {
                reason: "ideas stage failed: quota".into()
            })
        );

        let state = transition(CycleState::RunningIdeas, StageResult::Generation(Ok(1)));
        assert!(matches!(state, CycleState::Settled(Settlement::Failure { .. })));

        // settled is absorbing
        let settled = CycleState::Settled(Settlement::Success { artifact_id: 1 });
        assert_eq!(
            transition(settled.clone(), StageResult::Generation(Ok(2))),
            settled
        );
    }

    #[tokio::test]
    async fn test_empty_evaluation_fails_with_backoff_and_keeps_last_run() {
        let now = Utc::now();
        let db = due_db(now);
        let job_id = db.lock_sync().unwrap().list_jobs().unwrap()[0].job.id;
        let pipeline = Arc::new(StubPipeline::new(db.clone(), vec![]));
        let orchestrator = Orchestrator::new(db.clone(), pipeline.clone());

        let report = orchestrator.run_pass(now).await.unwrap();
        assert_eq!(report.processed(), 1);
        assert!(!report.outcomes[0].settlement.is_success());
        assert_eq!(pipeline.generation_calls.load(Ordering::SeqCst), 0);

        let job = db.lock_sync().unwrap().get_job(job_id).unwrap().unwrap().job;
        assert_eq!(job.last_run, None);
        assert_eq!(job.error_message.as_deref(), Some("No evaluated ideas received"));
        assert_eq!(
            job.next_run.map(crate::factory::db::fmt_ts),
            Some(crate::factory::db::fmt_ts(now + Duration::minutes(5)))
        );
        assert!(job.lease_holder.is_none());
    }

    #[tokio::test]
    async fn test_success_sets_last_run_and_advances_by_interval() {
        let now = Utc::now();
        let db = due_db(now);
        let pipeline = Arc::new(StubPipeline::new(
            db.clone(),
            vec![evaluated("B", 40), evaluated("A", 10)],
        ));
        let orchestrator = Orchestrator::new(db.clone(), pipeline);

        let report = orchestrator.run_pass(now).await.unwrap();
        assert!(report.outcomes[0].settlement.is_success());

        let guard = db.lock_sync().unwrap();
        let job = guard.list_jobs().unwrap().remove(0).job;
        assert_eq!(job.last_run.map(crate::factory::db::fmt_ts), Some(crate::factory::db::fmt_ts(now)));
        assert_eq!(
            job.next_run.map(crate::factory::db::fmt_ts),
            Some(crate::factory::db::fmt_ts(now + Duration::minutes(60)))
        );
        assert!(job.error_message.is_none());

        let apps = guard.list_artifacts().unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "B");
        assert_eq!(apps[0].status, ArtifactStatus::Completed);
    }

    #[tokio::test]
    async fn test_held_lease_skips_job() {
        let now = Utc::now();
        let db = due_db(now);
        let job_id = {
            let guard = db.lock_sync().unwrap();
            let job_id = guard.list_jobs().unwrap()[0].job.id;
            assert!(guard
                .try_acquire_lease(job_id, "other-pass", now, now + Duration::minutes(10))
                .unwrap());
            job_id
        };
        let pipeline = Arc::new(StubPipeline::new(db.clone(), vec![evaluated("A", 1)]));
        let orchestrator = Orchestrator::new(db.clone(), pipeline.clone());

        let report = orchestrator.run_pass(now).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.skipped, vec![job_id]);
        assert_eq!(report.processed(), 0);
        assert_eq!(pipeline.generation_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_lease_seconds_are_clamped() {
        let db = DbHandle::new(FactoryDb::new_in_memory().unwrap());
        let pipeline = Arc::new(StubPipeline::new(db.clone(), vec![]));
        let huge = Orchestrator::new(db.clone(), pipeline.clone()).with_lease_seconds(i64::MAX);
        assert_eq!(huge.lease_ttl(), Duration::seconds(MAX_LEASE_SECONDS));
        let zero = Orchestrator::new(db, pipeline).with_lease_seconds(0);
        assert_eq!(zero.lease_ttl(), Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_stale_builds_are_failed() {
        let now = Utc::now();
        let db = DbHandle::new(FactoryDb::new_in_memory().unwrap());
        let app_id = db
            .lock_sync()
            .unwrap()
            .create_artifact(None, "Orphan", "", "", ArtifactStatus::Building)
            .unwrap()
            .id;
        let pipeline = Arc::new(StubPipeline::new(db.clone(), vec![]));
        let orchestrator = Orchestrator::new(db.clone(), pipeline).with_lease_seconds(60);

        // still within the lease window
        assert_eq!(orchestrator.run_pass(now).await.unwrap().swept, 0);

        let report = orchestrator
            .run_pass(now + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(report.swept, 1);
        assert_eq!(report.due, 0);
        let app = db.lock_sync().unwrap().get_artifact(app_id).unwrap().unwrap();
        assert_eq!(app.status, ArtifactStatus::Failed);
        assert_eq!(app.error.as_deref(), Some(STALE_BUILD_ERROR));
    }
}
