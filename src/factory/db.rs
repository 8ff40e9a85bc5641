use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::*;
use super::scheduler::{JobUpdate, initial_next_run, one_interval_before, validate_interval};
use crate::errors::FactoryError;

/// Async-safe handle to the factory database.
///
/// Wraps `FactoryDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<FactoryDb>>,
}

impl DbHandle {
    pub fn new(db: FactoryDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&FactoryDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| FactoryError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup, CLI
    /// commands and tests; never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, FactoryDb>> {
        Ok(self.inner.lock().map_err(|_| FactoryError::LockPoisoned)?)
    }
}

/// Fixed-width RFC 3339 (millisecond precision, `Z`), so stored timestamps
/// compare correctly as text.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in database: {}", s))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

pub struct FactoryDb {
    conn: Connection,
}

impl FactoryDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS configurations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    api_key TEXT,
                    provider TEXT NOT NULL DEFAULT 'google',
                    interval_minutes INTEGER NOT NULL DEFAULT 60,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS build_rules (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    config_id INTEGER NOT NULL REFERENCES configurations(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    category TEXT NOT NULL DEFAULT 'general',
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS generated_apps (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    config_id INTEGER REFERENCES configurations(id) ON DELETE SET NULL,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    prompt TEXT NOT NULL DEFAULT '',
                    raw_code TEXT,
                    status TEXT NOT NULL DEFAULT 'pending',
                    error TEXT,
                    created_at TEXT NOT NULL,
                    completed_at TEXT
                );

                CREATE TABLE IF NOT EXISTS cron_jobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    config_id INTEGER NOT NULL UNIQUE REFERENCES configurations(id) ON DELETE CASCADE,
                    status TEXT NOT NULL DEFAULT 'active',
                    last_run TEXT,
                    next_run TEXT,
                    error_message TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_build_rules_config ON build_rules(config_id);
                CREATE INDEX IF NOT EXISTS idx_generated_apps_status ON generated_apps(status, created_at);
                CREATE INDEX IF NOT EXISTS idx_cron_jobs_next_run ON cron_jobs(status, next_run);
                ",
            )
            .context("Failed to create tables")?;

        // Additive migrations (columns are nullable, safe to re-run).
        // Only "duplicate column" errors are ignored.
        for (column, ddl) in [
            ("lease_holder", "ALTER TABLE cron_jobs ADD COLUMN lease_holder TEXT"),
            ("lease_expires_at", "ALTER TABLE cron_jobs ADD COLUMN lease_expires_at TEXT"),
        ] {
            match self.conn.execute(ddl, []) {
                Ok(_) => {}
                Err(e) if e.to_string().contains("duplicate column") => {}
                Err(e) => return Err(anyhow::anyhow!("Failed to add {} column: {}", column, e)),
            }
        }

        Ok(())
    }

    // ── Configuration ─────────────────────────────────────────────────

    const CONFIG_COLUMNS: &'static str =
        "id, api_key, provider, interval_minutes, created_at, updated_at";

    fn query_configuration(&self, sql: &str, id: Option<i64>) -> Result<Option<Configuration>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare configuration query")?;
        let map = |row: &rusqlite::Row<'_>| {
            Ok(ConfigurationRow {
                id: row.get(0)?,
                api_key: row.get(1)?,
                provider: row.get(2)?,
                interval_minutes: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        };
        let row = match id {
            Some(id) => stmt.query_row(params![id], map).optional(),
            None => stmt.query_row([], map).optional(),
        }
        .context("Failed to query configuration")?;
        row.map(ConfigurationRow::into_configuration).transpose()
    }

    /// The most recently created configuration.
    pub fn get_active_configuration(&self) -> Result<Option<Configuration>> {
        self.query_configuration(
            &format!(
                "SELECT {} FROM configurations ORDER BY created_at DESC, id DESC LIMIT 1",
                Self::CONFIG_COLUMNS
            ),
            None,
        )
    }

    pub fn get_configuration(&self, id: i64) -> Result<Option<Configuration>> {
        self.query_configuration(
            &format!("SELECT {} FROM configurations WHERE id = ?1", Self::CONFIG_COLUMNS),
            Some(id),
        )
    }

    /// Update the active configuration, or create the first one.
    pub fn upsert_configuration(
        &self,
        api_key: Option<&str>,
        provider: &str,
        interval_minutes: i64,
    ) -> Result<Configuration> {
        validate_interval(interval_minutes)?;
        let now = fmt_ts(Utc::now());
        let id = match self.get_active_configuration()? {
            Some(existing) => {
                self.conn
                    .execute(
                        "UPDATE configurations SET api_key = ?1, provider = ?2, interval_minutes = ?3, updated_at = ?4 WHERE id = ?5",
                        params![api_key, provider, interval_minutes, now, existing.id],
                    )
                    .context("Failed to update configuration")?;
                existing.id
            }
            None => {
                self.conn
                    .execute(
                        "INSERT INTO configurations (api_key, provider, interval_minutes, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                        params![api_key, provider, interval_minutes, now],
                    )
                    .context("Failed to insert configuration")?;
                self.conn.last_insert_rowid()
            }
        };
        self.get_configuration(id)?
            .context("Configuration not found after upsert")
    }

    // ── Build rules ───────────────────────────────────────────────────

    pub fn create_rule(
        &self,
        config_id: i64,
        name: &str,
        description: &str,
        category: &str,
    ) -> Result<BuildRule> {
        self.conn
            .execute(
                "INSERT INTO build_rules (config_id, name, description, category, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![config_id, name, description, category, fmt_ts(Utc::now())],
            )
            .context("Failed to insert build rule")?;
        let id = self.conn.last_insert_rowid();
        self.list_rules(config_id)?
            .into_iter()
            .find(|r| r.id == id)
            .context("Build rule not found after insert")
    }

    pub fn list_rules(&self, config_id: i64) -> Result<Vec<BuildRule>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, config_id, name, description, category, created_at
                 FROM build_rules WHERE config_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_rules")?;
        let rows = stmt
            .query_map(params![config_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .context("Failed to query build rules")?;
        let mut rules = Vec::new();
        for row in rows {
            let (id, config_id, name, description, category, created_at) =
                row.context("Failed to read build rule row")?;
            rules.push(BuildRule {
                id,
                config_id,
                name,
                description,
                category,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(rules)
    }

    pub fn delete_rule(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM build_rules WHERE id = ?1", params![id])
            .context("Failed to delete build rule")?;
        Ok(count > 0)
    }

    // ── Generated apps ────────────────────────────────────────────────

    const APP_COLUMNS: &'static str =
        "id, config_id, name, description, prompt, raw_code, status, error, created_at, completed_at";

    fn query_artifacts(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<GeneratedArtifact>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare app query")?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(ArtifactRow {
                    id: row.get(0)?,
                    config_id: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                    prompt: row.get(4)?,
                    raw_code: row.get(5)?,
                    status: row.get(6)?,
                    error: row.get(7)?,
                    created_at: row.get(8)?,
                    completed_at: row.get(9)?,
                })
            })
            .context("Failed to query apps")?;
        let mut apps = Vec::new();
        for row in rows {
            let r = row.context("Failed to read app row")?;
            apps.push(r.into_artifact()?);
        }
        Ok(apps)
    }

    pub fn create_artifact(
        &self,
        config_id: Option<i64>,
        name: &str,
        description: &str,
        prompt: &str,
        status: ArtifactStatus,
    ) -> Result<GeneratedArtifact> {
        self.conn
            .execute(
                "INSERT INTO generated_apps (config_id, name, description, prompt, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![config_id, name, description, prompt, status.as_str(), fmt_ts(Utc::now())],
            )
            .context("Failed to insert app")?;
        let id = self.conn.last_insert_rowid();
        self.get_artifact(id)?.context("App not found after insert")
    }

    pub fn get_artifact(&self, id: i64) -> Result<Option<GeneratedArtifact>> {
        let sql = format!("SELECT {} FROM generated_apps WHERE id = ?1", Self::APP_COLUMNS);
        Ok(self.query_artifacts(&sql, &[&id])?.into_iter().next())
    }

    /// All apps, newest first.
    pub fn list_artifacts(&self) -> Result<Vec<GeneratedArtifact>> {
        let sql = format!(
            "SELECT {} FROM generated_apps ORDER BY created_at DESC, id DESC",
            Self::APP_COLUMNS
        );
        self.query_artifacts(&sql, &[])
    }

    /// Lowercased names of every stored app.
    pub fn artifact_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM generated_apps ORDER BY id")
            .context("Failed to prepare artifact_names")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query app names")?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row.context("Failed to read app name")?.to_lowercase());
        }
        Ok(names)
    }

    /// Building → Completed. Returns false if the app was no longer building.
    pub fn complete_artifact(&self, id: i64, raw_code: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE generated_apps SET raw_code = ?1, status = 'completed', error = NULL, completed_at = ?2
                 WHERE id = ?3 AND status = 'building'",
                params![raw_code, fmt_ts(Utc::now()), id],
            )
            .context("Failed to complete app")?;
        Ok(count > 0)
    }

    /// Building → Failed. Returns false if the app was no longer building.
    pub fn fail_artifact(&self, id: i64, error: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE generated_apps SET status = 'failed', error = ?1 WHERE id = ?2 AND status = 'building'",
                params![error, id],
            )
            .context("Failed to mark app failed")?;
        Ok(count > 0)
    }

    /// Replace stored code without touching status.
    pub fn update_artifact_code(&self, id: i64, raw_code: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE generated_apps SET raw_code = ?1 WHERE id = ?2",
                params![raw_code, id],
            )
            .context("Failed to update app code")?;
        Ok(count > 0)
    }

    pub fn delete_artifact(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM generated_apps WHERE id = ?1", params![id])
            .context("Failed to delete app")?;
        Ok(count > 0)
    }

    /// Fail every app still building that was created before `cutoff`.
    pub fn fail_stale_builds(&self, cutoff: DateTime<Utc>, error: &str) -> Result<usize> {
        let count = self
            .conn
            .execute(
                "UPDATE generated_apps SET status = 'failed', error = ?1
                 WHERE status = 'building' AND created_at < ?2",
                params![error, fmt_ts(cutoff)],
            )
            .context("Failed to sweep stale builds")?;
        Ok(count)
    }

    // ── Cron jobs ─────────────────────────────────────────────────────

    const JOB_SELECT: &'static str = "SELECT cj.id, cj.config_id, cj.status, cj.last_run, cj.next_run, cj.error_message,
                cj.lease_holder, cj.lease_expires_at, c.interval_minutes
         FROM cron_jobs cj JOIN configurations c ON cj.config_id = c.id";

    fn query_jobs(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<JobSummary>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare cron job query")?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(JobRow {
                    id: row.get(0)?,
                    config_id: row.get(1)?,
                    status: row.get(2)?,
                    last_run: row.get(3)?,
                    next_run: row.get(4)?,
                    error_message: row.get(5)?,
                    lease_holder: row.get(6)?,
                    lease_expires_at: row.get(7)?,
                    interval_minutes: row.get(8)?,
                })
            })
            .context("Failed to query cron jobs")?;
        let mut jobs = Vec::new();
        for row in rows {
            let r = row.context("Failed to read cron job row")?;
            jobs.push(r.into_summary()?);
        }
        Ok(jobs)
    }

    pub fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        self.query_jobs(&format!("{} ORDER BY cj.id", Self::JOB_SELECT), &[])
    }

    pub fn get_job(&self, id: i64) -> Result<Option<JobSummary>> {
        let sql = format!("{} WHERE cj.id = ?1", Self::JOB_SELECT);
        Ok(self.query_jobs(&sql, &[&id])?.into_iter().next())
    }

    /// Active jobs whose next run has passed and whose configuration has a key.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<JobSummary>> {
        let sql = format!(
            "{} WHERE cj.status = 'active'
               AND (cj.next_run IS NULL OR cj.next_run <= ?1)
               AND c.api_key IS NOT NULL AND trim(c.api_key) != ''
             ORDER BY cj.id",
            Self::JOB_SELECT
        );
        self.query_jobs(&sql, &[&fmt_ts(now)])
    }

    /// Create a job for every keyed configuration that has none, and give
    /// unscheduled jobs a first run. Existing schedules are left alone.
    /// Returns the number of jobs created.
    pub fn initialize_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, interval_minutes FROM configurations
                 WHERE api_key IS NOT NULL AND trim(api_key) != ''",
            )
            .context("Failed to prepare initialize_jobs")?;
        let configs = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))
            .context("Failed to query keyed configurations")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read configuration row")?;

        let mut created = 0;
        for (config_id, interval) in configs {
            let next_run = fmt_ts(initial_next_run(now, interval)?);
            created += self
                .conn
                .execute(
                    "INSERT OR IGNORE INTO cron_jobs (config_id, status, next_run) VALUES (?1, 'active', ?2)",
                    params![config_id, next_run],
                )
                .context("Failed to insert cron job")?;
            self.conn
                .execute(
                    "UPDATE cron_jobs SET next_run = ?1 WHERE config_id = ?2 AND next_run IS NULL",
                    params![next_run, config_id],
                )
                .context("Failed to schedule cron job")?;
        }
        Ok(created)
    }

    /// Claim `job_id` for `holder` until `expires_at`. Succeeds only when no
    /// lease is held or the held one expired at or before `now`.
    pub fn try_acquire_lease(
        &self,
        job_id: i64,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE cron_jobs SET lease_holder = ?1, lease_expires_at = ?2
                 WHERE id = ?3
                   AND (lease_holder IS NULL OR lease_expires_at IS NULL OR lease_expires_at <= ?4)",
                params![holder, fmt_ts(expires_at), job_id, fmt_ts(now)],
            )
            .context("Failed to acquire job lease")?;
        Ok(count == 1)
    }

    pub fn release_lease(&self, job_id: i64, holder: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE cron_jobs SET lease_holder = NULL, lease_expires_at = NULL
                 WHERE id = ?1 AND lease_holder = ?2",
                params![job_id, holder],
            )
            .context("Failed to release job lease")?;
        Ok(count == 1)
    }

    /// Persist a settled cycle and release `holder`'s lease. Writes nothing
    /// if another holder has taken the job over.
    pub fn apply_job_update(&self, update: &JobUpdate, holder: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE cron_jobs
                 SET status = ?1, last_run = ?2, next_run = ?3, error_message = ?4,
                     lease_holder = NULL, lease_expires_at = NULL
                 WHERE id = ?5 AND (lease_holder IS NULL OR lease_holder = ?6)",
                params![
                    update.status.as_str(),
                    update.last_run.map(fmt_ts),
                    fmt_ts(update.next_run),
                    update.error_message,
                    update.job_id,
                    holder
                ],
            )
            .context("Failed to update cron job")?;
        Ok(count == 1)
    }

    /// Make every active job due immediately: next run one minute ago, last
    /// run one interval ago, errors and leases cleared.
    pub fn reset_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        let jobs: Vec<JobSummary> = self
            .list_jobs()?
            .into_iter()
            .filter(|j| j.job.status == JobStatus::Active)
            .collect();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let due_at = one_interval_before(now, 1)?;
        for summary in &jobs {
            let last_run = one_interval_before(now, summary.interval_minutes)?;
            tx.execute(
                "UPDATE cron_jobs
                 SET next_run = ?1, last_run = ?2, error_message = NULL,
                     lease_holder = NULL, lease_expires_at = NULL
                 WHERE id = ?3",
                params![
                    fmt_ts(due_at),
                    fmt_ts(last_run),
                    summary.job.id
                ],
            )
            .context("Failed to reset cron job")?;
        }
        tx.commit().context("Failed to commit schedule reset")?;
        Ok(jobs.len())
    }

    pub fn set_job_status(&self, job_id: i64, status: JobStatus) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE cron_jobs SET status = ?1 WHERE id = ?2",
                params![status.as_str(), job_id],
            )
            .context("Failed to update cron job status")?;
        Ok(count > 0)
    }
}

// ── Internal row helpers ──────────────────────────────────────────────

struct ConfigurationRow {
    id: i64,
    api_key: Option<String>,
    provider: String,
    interval_minutes: i64,
    created_at: String,
    updated_at: String,
}

impl ConfigurationRow {
    fn into_configuration(self) -> Result<Configuration> {
        Ok(Configuration {
            id: self.id,
            api_key: self.api_key,
            provider: self.provider,
            interval_minutes: self.interval_minutes,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

/// Intermediate row for generated_apps before status and timestamps are typed.
struct ArtifactRow {
    id: i64,
    config_id: Option<i64>,
    name: String,
    description: String,
    prompt: String,
    raw_code: Option<String>,
    status: String,
    error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl ArtifactRow {
    fn into_artifact(self) -> Result<GeneratedArtifact> {
        let status = ArtifactStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse app status")?;
        Ok(GeneratedArtifact {
            id: self.id,
            config_id: self.config_id,
            name: self.name,
            description: self.description,
            prompt: self.prompt,
            raw_code: self.raw_code,
            status,
            error: self.error,
            created_at: parse_ts(&self.created_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
        })
    }
}

struct JobRow {
    id: i64,
    config_id: i64,
    status: String,
    last_run: Option<String>,
    next_run: Option<String>,
    error_message: Option<String>,
    lease_holder: Option<String>,
    lease_expires_at: Option<String>,
    interval_minutes: i64,
}

impl JobRow {
    fn into_summary(self) -> Result<JobSummary> {
        let status = JobStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse cron job status")?;
        Ok(JobSummary {
            job: CronJob {
                id: self.id,
                config_id: self.config_id,
                status,
                last_run: parse_opt_ts(self.last_run)?,
                next_run: parse_opt_ts(self.next_run)?,
                error_message: self.error_message,
                lease_holder: self.lease_holder,
                lease_expires_at: parse_opt_ts(self.lease_expires_at)?,
            },
            interval_minutes: self.interval_minutes,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::scheduler::MAX_INTERVAL_MINUTES;
    use chrono::Duration;

    fn keyed_db() -> Result<(FactoryDb, Configuration)> {
        let db = FactoryDb::new_in_memory()?;
        let config = db.upsert_configuration(Some("key"), "google", 60)?;
        Ok((db, config))
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = FactoryDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('configurations', 'build_rules', 'generated_apps', 'cron_jobs')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 4, "Expected 4 tables to exist");

        // migrations are re-runnable
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_reopen_file_database() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("appfoundry.db");
        {
            let db = FactoryDb::new(&path)?;
            db.upsert_configuration(Some("k"), "google", 30)?;
        }
        let db = FactoryDb::new(&path)?;
        let config = db.get_active_configuration()?.expect("config should persist");
        assert_eq!(config.interval_minutes, 30);
        Ok(())
    }

    #[test]
    fn test_timestamps_are_fixed_width() {
        let ts = DateTime::parse_from_rfc3339("2025-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(fmt_ts(ts), "2025-01-02T03:04:05.000Z");
        assert_eq!(parse_ts(&fmt_ts(ts)).unwrap(), ts);
    }

    #[test]
    fn test_upsert_configuration_updates_in_place() -> Result<()> {
        let db = FactoryDb::new_in_memory()?;
        assert!(db.get_active_configuration()?.is_none());

        let first = db.upsert_configuration(None, "google", 60)?;
        let second = db.upsert_configuration(Some("abc"), "google", 15)?;
        assert_eq!(first.id, second.id);
        assert_eq!(second.api_key.as_deref(), Some("abc"));
        assert_eq!(second.interval_minutes, 15);
        Ok(())
    }

    #[test]
    fn test_rules_crud() -> Result<()> {
        let (db, config) = keyed_db()?;
        let rule = db.create_rule(config.id, "Mono", "Black and white only", "design")?;
        assert_eq!(rule.name, "Mono");
        db.create_rule(config.id, "Mobile", "Responsive", "layout")?;

        let rules = db.list_rules(config.id)?;
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].category, "design");

        assert!(db.delete_rule(rule.id)?);
        assert!(!db.delete_rule(rule.id)?);
        assert_eq!(db.list_rules(config.id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_artifact_lifecycle() -> Result<()> {
        let (db, config) = keyed_db()?;
        let app = db.create_artifact(Some(config.id), "Tracker", "Tracks", "Name: Tracker", ArtifactStatus::Building)?;
        assert_eq!(app.status, ArtifactStatus::Building);
        assert!(app.raw_code.is_none());

        assert!(db.complete_artifact(app.id, "code")?);
        // terminal: a second settlement is refused
        assert!(!db.fail_artifact(app.id, "late")?);

        let done = db.get_artifact(app.id)?.expect("app should exist");
        assert_eq!(done.status, ArtifactStatus::Completed);
        assert_eq!(done.raw_code.as_deref(), Some("code"));
        assert!(done.completed_at.is_some());

        assert!(db.update_artifact_code(app.id, "fixed")?);
        let fixed = db.get_artifact(app.id)?.expect("app should exist");
        assert_eq!(fixed.raw_code.as_deref(), Some("fixed"));
        assert_eq!(fixed.status, ArtifactStatus::Completed);

        assert!(db.delete_artifact(app.id)?);
        assert!(db.get_artifact(app.id)?.is_none());
        Ok(())
    }

    #[test]
    fn test_list_artifacts_newest_first_and_names() -> Result<()> {
        let db = FactoryDb::new_in_memory()?;
        db.create_artifact(None, "Alpha", "", "", ArtifactStatus::Pending)?;
        db.create_artifact(None, "Beta", "", "", ArtifactStatus::Pending)?;
        let apps = db.list_artifacts()?;
        assert_eq!(apps[0].name, "Beta");
        assert_eq!(db.artifact_names()?, vec!["alpha".to_string(), "beta".to_string()]);
        Ok(())
    }

    #[test]
    fn test_fail_stale_builds() -> Result<()> {
        let db = FactoryDb::new_in_memory()?;
        let building = db.create_artifact(None, "A", "", "", ArtifactStatus::Building)?;
        let pending = db.create_artifact(None, "B", "", "", ArtifactStatus::Pending)?;

        assert_eq!(db.fail_stale_builds(Utc::now() - Duration::hours(1), "stale")?, 0);
        assert_eq!(db.fail_stale_builds(Utc::now() + Duration::seconds(1), "stale")?, 1);

        let swept = db.get_artifact(building.id)?.expect("app should exist");
        assert_eq!(swept.status, ArtifactStatus::Failed);
        assert_eq!(swept.error.as_deref(), Some("stale"));
        let untouched = db.get_artifact(pending.id)?.expect("app should exist");
        assert_eq!(untouched.status, ArtifactStatus::Pending);
        Ok(())
    }

    #[test]
    fn test_initialize_jobs_is_create_only() -> Result<()> {
        let (db, _) = keyed_db()?;
        let now = Utc::now();
        assert_eq!(db.initialize_jobs(now)?, 1);
        assert_eq!(db.initialize_jobs(now + Duration::hours(5))?, 0);

        let jobs = db.list_jobs()?;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].interval_minutes, 60);
        assert_eq!(
            jobs[0].job.next_run.map(fmt_ts),
            Some(fmt_ts(now + Duration::minutes(60)))
        );
        Ok(())
    }

    #[test]
    fn test_upsert_rejects_out_of_range_interval() -> Result<()> {
        let (db, config) = keyed_db()?;
        let err = db
            .upsert_configuration(Some("key"), "google", 1_000_000_000_000)
            .unwrap_err();
        assert!(err.to_string().contains("interval_minutes must be between 1"));
        assert!(db.upsert_configuration(Some("key"), "google", 0).is_err());

        let stored = db.get_configuration(config.id)?.expect("config should exist");
        assert_eq!(stored.interval_minutes, 60);
        Ok(())
    }

    #[test]
    fn test_scheduling_clamps_stored_huge_interval() -> Result<()> {
        let (db, config) = keyed_db()?;
        db.conn.execute(
            "UPDATE configurations SET interval_minutes = ?1 WHERE id = ?2",
            params![1_000_000_000_000i64, config.id],
        )?;
        let now = Utc::now();
        assert_eq!(db.initialize_jobs(now)?, 1);
        let jobs = db.list_jobs()?;
        assert_eq!(
            jobs[0].job.next_run.map(fmt_ts),
            Some(fmt_ts(now + Duration::minutes(MAX_INTERVAL_MINUTES)))
        );

        assert_eq!(db.reset_jobs(now)?, 1);
        let job = &db.list_jobs()?[0].job;
        assert_eq!(
            job.last_run.map(fmt_ts),
            Some(fmt_ts(now - Duration::minutes(MAX_INTERVAL_MINUTES)))
        );
        assert!(job.next_run.is_some_and(|t| t < now));
        Ok(())
    }

    #[test]
    fn test_initialize_jobs_skips_configs_without_key() -> Result<()> {
        let db = FactoryDb::new_in_memory()?;
        db.upsert_configuration(Some(""), "google", 60)?;
        assert_eq!(db.initialize_jobs(Utc::now())?, 0);
        Ok(())
    }

    #[test]
    fn test_due_jobs() -> Result<()> {
        let (db, _) = keyed_db()?;
        let now = Utc::now();
        db.initialize_jobs(now)?;
        assert!(db.due_jobs(now)?.is_empty());
        assert_eq!(db.due_jobs(now + Duration::minutes(60))?.len(), 1);

        let job_id = db.list_jobs()?[0].job.id;
        db.set_job_status(job_id, JobStatus::Disabled)?;
        assert!(db.due_jobs(now + Duration::days(1))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_lease_is_exclusive_until_expiry() -> Result<()> {
        let (db, _) = keyed_db()?;
        let now = Utc::now();
        db.initialize_jobs(now)?;
        let job_id = db.list_jobs()?[0].job.id;
        let expires = now + Duration::minutes(15);

        assert!(db.try_acquire_lease(job_id, "a", now, expires)?);
        assert!(!db.try_acquire_lease(job_id, "b", now + Duration::minutes(1), expires)?);
        // expired leases can be taken over
        assert!(db.try_acquire_lease(job_id, "b", expires, expires + Duration::minutes(15))?);
        assert!(!db.release_lease(job_id, "a")?);
        assert!(db.release_lease(job_id, "b")?);
        assert!(db.try_acquire_lease(job_id, "c", now, expires)?);
        Ok(())
    }

    #[test]
    fn test_apply_job_update_releases_lease() -> Result<()> {
        let (db, _) = keyed_db()?;
        let now = Utc::now();
        db.initialize_jobs(now)?;
        let job_id = db.list_jobs()?[0].job.id;
        db.try_acquire_lease(job_id, "holder", now, now + Duration::minutes(15))?;

        let update = JobUpdate {
            job_id,
            status: JobStatus::Active,
            last_run: None,
            next_run: now + Duration::minutes(5),
            error_message: Some("boom".into()),
        };
        // someone else's update is refused while the lease is held
        assert!(!db.apply_job_update(&update, "intruder")?);
        assert!(db.apply_job_update(&update, "holder")?);

        let job = db.get_job(job_id)?.expect("job should exist").job;
        assert_eq!(job.error_message.as_deref(), Some("boom"));
        assert!(job.lease_holder.is_none());
        assert!(job.lease_expires_at.is_none());
        Ok(())
    }

    #[test]
    fn test_reset_jobs_makes_jobs_due() -> Result<()> {
        let (db, _) = keyed_db()?;
        let now = Utc::now();
        db.initialize_jobs(now)?;
        assert_eq!(db.reset_jobs(now)?, 1);
        let due = db.due_jobs(now)?;
        assert_eq!(due.len(), 1);
        assert!(due[0].job.error_message.is_none());
        Ok(())
    }
}
