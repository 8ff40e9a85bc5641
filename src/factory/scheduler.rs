//! Retry scheduling for recurring build jobs.
//!
//! Everything here is pure: the orchestrator computes a [`JobUpdate`] from
//! a cycle's [`Settlement`] and the store persists it verbatim.

use chrono::{DateTime, Duration, TimeDelta, Utc};
use serde::Serialize;

use super::models::{CronJob, JobStatus};
use crate::errors::FactoryError;

/// Minutes a failed cycle waits before the job is due again.
pub const DEFAULT_FAILURE_BACKOFF_MINUTES: i64 = 5;

/// Longest accepted job interval: one year.
pub const MAX_INTERVAL_MINUTES: i64 = 525_600;

/// Longest accepted failure backoff: one week.
pub const MAX_FAILURE_BACKOFF_MINUTES: i64 = 10_080;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub failure_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            failure_backoff: Duration::minutes(DEFAULT_FAILURE_BACKOFF_MINUTES),
        }
    }
}

impl RetryPolicy {
    pub fn with_backoff_minutes(minutes: i64) -> Self {
        Self {
            failure_backoff: Duration::minutes(minutes.clamp(1, MAX_FAILURE_BACKOFF_MINUTES)),
        }
    }
}

/// Terminal outcome of one build cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Settlement {
    Success { artifact_id: i64 },
    Failure { reason: String },
}

impl Settlement {
    pub fn is_success(&self) -> bool {
        matches!(self, Settlement::Success { .. })
    }
}

/// Column values to write back to a job after a cycle. Applying it also
/// releases the job's lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobUpdate {
    pub job_id: i64,
    pub status: JobStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub error_message: Option<String>,
}

/// Active, and either never scheduled or scheduled at or before `now`.
pub fn is_due(job: &CronJob, now: DateTime<Utc>) -> bool {
    job.status == JobStatus::Active && job.next_run.is_none_or(|next| next <= now)
}

/// Reject intervals outside `1..=MAX_INTERVAL_MINUTES`.
pub fn validate_interval(interval_minutes: i64) -> Result<i64, FactoryError> {
    if !(1..=MAX_INTERVAL_MINUTES).contains(&interval_minutes) {
        return Err(FactoryError::BadRequest(format!(
            "interval_minutes must be between 1 and {}",
            MAX_INTERVAL_MINUTES
        )));
    }
    Ok(interval_minutes)
}

fn shift(now: DateTime<Utc>, minutes: i64) -> Result<DateTime<Utc>, FactoryError> {
    TimeDelta::try_minutes(minutes)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or(FactoryError::ScheduleOverflow { minutes })
}

/// `now` plus `interval_minutes`, clamped into the accepted interval range.
pub fn next_run_after_success(
    now: DateTime<Utc>,
    interval_minutes: i64,
) -> Result<DateTime<Utc>, FactoryError> {
    shift(now, interval_minutes.clamp(1, MAX_INTERVAL_MINUTES))
}

pub fn next_run_after_failure(
    now: DateTime<Utc>,
    policy: &RetryPolicy,
) -> Result<DateTime<Utc>, FactoryError> {
    now.checked_add_signed(policy.failure_backoff)
        .ok_or(FactoryError::ScheduleOverflow {
            minutes: policy.failure_backoff.num_minutes(),
        })
}

/// First run of a newly created job: one interval from now.
pub fn initial_next_run(
    now: DateTime<Utc>,
    interval_minutes: i64,
) -> Result<DateTime<Utc>, FactoryError> {
    next_run_after_success(now, interval_minutes)
}

/// `now` minus `interval_minutes`, clamped like [`next_run_after_success`].
pub fn one_interval_before(
    now: DateTime<Utc>,
    interval_minutes: i64,
) -> Result<DateTime<Utc>, FactoryError> {
    shift(now, -interval_minutes.clamp(1, MAX_INTERVAL_MINUTES))
}

/// Reduce a settlement to the update for `job`.
pub fn settle(
    job: &CronJob,
    settlement: &Settlement,
    now: DateTime<Utc>,
    interval_minutes: i64,
    policy: &RetryPolicy,
) -> Result<JobUpdate, FactoryError> {
    let update = match settlement {
        Settlement::Success { .. } => JobUpdate {
            job_id: job.id,
            status: JobStatus::Active,
            last_run: Some(now),
            next_run: next_run_after_success(now, interval_minutes)?,
            error_message: None,
        },
        Settlement::Failure { reason } => JobUpdate {
            job_id: job.id,
            status: JobStatus::Active,
            last_run: job.last_run,
            next_run: next_run_after_failure(now, policy)?,
            error_message: Some(reason.clone()),
        },
    };
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    fn job(next_run: Option<DateTime<Utc>>) -> CronJob {
        CronJob {
            id: 7,
            config_id: 1,
            status: JobStatus::Active,
            last_run: Some(at(8, 0)),
            next_run,
            error_message: Some("old".into()),
            lease_holder: None,
            lease_expires_at: None,
        }
    }

    #[test]
    fn test_is_due() {
        assert!(is_due(&job(None), at(10, 0)));
        assert!(is_due(&job(Some(at(10, 0))), at(10, 0)));
        assert!(!is_due(&job(Some(at(10, 1))), at(10, 0)));

        let mut disabled = job(None);
        disabled.status = JobStatus::Disabled;
        assert!(!is_due(&disabled, at(10, 0)));
    }

    #[test]
    fn test_success_advances_by_interval_and_clears_error() {
        let update = settle(
            &job(None),
            &Settlement::Success { artifact_id: 3 },
            at(10, 0),
            60,
            &RetryPolicy::default(),
        )
        .unwrap();
        assert_eq!(update.job_id, 7);
        assert_eq!(update.last_run, Some(at(10, 0)));
        assert_eq!(update.next_run, at(11, 0));
        assert_eq!(update.error_message, None);
        assert_eq!(update.status, JobStatus::Active);
    }

    #[test]
    fn test_failure_backs_off_and_keeps_last_run() {
        let update = settle(
            &job(None),
            &Settlement::Failure {
                reason: "No evaluated ideas received".into(),
            },
            at(10, 0),
            60,
            &RetryPolicy::default(),
        )
        .unwrap();
        assert_eq!(update.last_run, Some(at(8, 0)));
        assert_eq!(update.next_run, at(10, 5));
        assert_eq!(
            update.error_message.as_deref(),
            Some("No evaluated ideas received")
        );
        assert_eq!(update.status, JobStatus::Active);
    }

    #[test]
    fn test_custom_backoff_and_initial_run() {
        let policy = RetryPolicy::with_backoff_minutes(15);
        assert_eq!(next_run_after_failure(at(10, 0), &policy).unwrap(), at(10, 15));
        assert_eq!(initial_next_run(at(10, 0), 30).unwrap(), at(10, 30));
        assert_eq!(one_interval_before(at(10, 0), 30).unwrap(), at(9, 30));
        // intervals below one minute are clamped
        assert_eq!(next_run_after_success(at(10, 0), 0).unwrap(), at(10, 1));
    }

    #[test]
    fn test_huge_interval_is_clamped_to_a_year() {
        let next = next_run_after_success(at(10, 0), 1_000_000_000_000).unwrap();
        assert_eq!(next, at(10, 0) + Duration::minutes(MAX_INTERVAL_MINUTES));
        let before = one_interval_before(at(10, 0), i64::MAX).unwrap();
        assert_eq!(before, at(10, 0) - Duration::minutes(MAX_INTERVAL_MINUTES));

        let policy = RetryPolicy::with_backoff_minutes(i64::MAX);
        assert_eq!(
            policy.failure_backoff,
            Duration::minutes(MAX_FAILURE_BACKOFF_MINUTES)
        );
    }

    #[test]
    fn test_overflow_at_the_end_of_time_is_an_error() {
        let end = DateTime::<Utc>::MAX_UTC;
        assert!(matches!(
            next_run_after_success(end, 60),
            Err(FactoryError::ScheduleOverflow { minutes: 60 })
        ));
        let update = settle(
            &job(None),
            &Settlement::Failure { reason: "x".into() },
            end,
            60,
            &RetryPolicy::default(),
        );
        assert!(update.is_err());
    }

    #[test]
    fn test_validate_interval_bounds() {
        assert_eq!(validate_interval(1).unwrap(), 1);
        assert_eq!(validate_interval(MAX_INTERVAL_MINUTES).unwrap(), MAX_INTERVAL_MINUTES);
        for bad in [0, -5, MAX_INTERVAL_MINUTES + 1, 1_000_000_000_000] {
            assert!(matches!(
                validate_interval(bad),
                Err(FactoryError::BadRequest(_))
            ));
        }
    }
}
