//! Integration tests for AppFoundry
//!
//! These tests drive the binary end to end against temporary directories.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use appfoundry::factory::db::FactoryDb;
use appfoundry::factory::models::ArtifactStatus;

/// Helper to create an appfoundry Command isolated from the caller's env
fn appfoundry(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("appfoundry");
    cmd.current_dir(dir.path())
        .env_remove("APPFOUNDRY_DB_PATH")
        .env_remove("APPFOUNDRY_PORT")
        .env_remove("APPFOUNDRY_MODEL")
        .env_remove("GOOGLE_GENERATIVE_AI_API_KEY")
        .env_remove("CRON_SECRET")
        .env_remove("RUST_LOG");
    cmd
}

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join(".appfoundry/appfoundry.db")
}

/// Helper to create the database in the default location
fn init_db(dir: &TempDir) {
    appfoundry(dir).arg("init-db").assert().success();
}

const TWO_FILES: &str = "--- FILE: app/page.tsx ---
export default function Home() {
  return (<div className=\"p-4\"><h1>hi</h1></div>);
}
--- FILE: lib/util.ts ---
export const add = (a: number, b: number) => a + b;
";

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        appfoundry(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("reset-schedule"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        appfoundry(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_missing_explicit_config_fails() {
        let dir = TempDir::new().unwrap();
        appfoundry(&dir)
            .args(["--config", "nope.toml", "status"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read config file"));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_init_creates_toml() {
        let dir = TempDir::new().unwrap();
        appfoundry(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created appfoundry.toml"));

        let content = fs::read_to_string(dir.path().join(".appfoundry/appfoundry.toml")).unwrap();
        assert!(content.contains("[scheduler]"));
        assert!(content.contains("lease_seconds = 900"));
    }

    #[test]
    fn test_config_validate_reports_problems() {
        let dir = TempDir::new().unwrap();
        appfoundry(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));

        fs::write(
            dir.path().join("bad.toml"),
            "[generation]\nidea_count = 0\n",
        )
        .unwrap();
        appfoundry(&dir)
            .args(["--config", "bad.toml", "config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("idea_count must be at least 1"));
    }

    #[test]
    fn test_config_show_masks_secrets() {
        let dir = TempDir::new().unwrap();
        appfoundry(&dir)
            .env("GOOGLE_GENERATIVE_AI_API_KEY", "very-secret-key")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("********"))
            .stdout(predicate::str::contains("very-secret-key").not());
    }

    #[test]
    fn test_env_db_path_is_used() {
        let dir = TempDir::new().unwrap();
        appfoundry(&dir)
            .env("APPFOUNDRY_DB_PATH", "custom/apps.db")
            .arg("init-db")
            .assert()
            .success();
        assert!(dir.path().join("custom/apps.db").exists());
    }
}

// =============================================================================
// Database and scheduling
// =============================================================================

mod scheduling {
    use super::*;

    #[test]
    fn test_init_db_creates_file() {
        let dir = TempDir::new().unwrap();
        appfoundry(&dir)
            .arg("init-db")
            .assert()
            .success()
            .stdout(predicate::str::contains("Database initialized"));
        assert!(db_path(&dir).exists());

        // Re-running migrates in place
        init_db(&dir);
    }

    #[test]
    fn test_status_requires_database() {
        let dir = TempDir::new().unwrap();
        appfoundry(&dir)
            .arg("status")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Database not found"));
        assert!(!db_path(&dir).exists());
    }

    #[test]
    fn test_status_lists_jobs() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        appfoundry(&dir)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No jobs scheduled"));

        {
            let db = FactoryDb::new(&db_path(&dir)).unwrap();
            db.upsert_configuration(Some("k"), "google", 45).unwrap();
            db.initialize_jobs(chrono::Utc::now()).unwrap();
        }

        appfoundry(&dir)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("active"))
            .stdout(predicate::str::contains("45m"));
    }

    #[test]
    fn test_reset_schedule_makes_jobs_due() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        {
            let db = FactoryDb::new(&db_path(&dir)).unwrap();
            db.upsert_configuration(Some("k"), "google", 60).unwrap();
            db.initialize_jobs(chrono::Utc::now()).unwrap();
        }

        appfoundry(&dir)
            .arg("reset-schedule")
            .assert()
            .success()
            .stdout(predicate::str::contains("1 job(s)"));

        let db = FactoryDb::new(&db_path(&dir)).unwrap();
        let due = db.due_jobs(chrono::Utc::now()).unwrap();
        assert_eq!(due.len(), 1);
        assert!(due[0].job.error_message.is_none());
    }

    #[test]
    fn test_cycle_with_no_due_jobs() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        appfoundry(&dir)
            .arg("cycle")
            .assert()
            .success()
            .stdout(predicate::str::contains("Processed 0 cron jobs"));

        appfoundry(&dir)
            .args(["cycle", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"outcomes\": []"));
    }
}

// =============================================================================
// Local file commands
// =============================================================================

mod files {
    use super::*;

    #[test]
    fn test_split_lists_blocks() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.txt"), TWO_FILES).unwrap();
        appfoundry(&dir)
            .args(["split", "app.txt"])
            .assert()
            .success()
            .stdout(predicate::str::contains("app/page.tsx"))
            .stdout(predicate::str::contains("lib/util.ts"))
            .stdout(predicate::str::contains("2 file(s)"));
    }

    #[test]
    fn test_split_without_delimiters_uses_default_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("raw.tsx"), "export default function A() { return null }").unwrap();
        appfoundry(&dir)
            .args(["split", "raw.tsx"])
            .assert()
            .success()
            .stdout(predicate::str::contains("app/page.tsx"))
            .stdout(predicate::str::contains("1 file(s)"));
    }

    #[test]
    fn test_split_missing_file() {
        let dir = TempDir::new().unwrap();
        appfoundry(&dir)
            .args(["split", "missing.txt"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read"));
    }

    #[test]
    fn test_static_preview_to_stdout() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.txt"), TWO_FILES).unwrap();
        appfoundry(&dir)
            .args(["preview", "app.txt", "--static"])
            .assert()
            .success()
            .stdout(predicate::str::contains("<h1>hi</h1>"))
            .stdout(predicate::str::contains("sandpack-client").not());
    }

    #[test]
    fn test_sandbox_preview_to_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.txt"), TWO_FILES).unwrap();
        appfoundry(&dir)
            .args(["preview", "app.txt", "--output", "out.html"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Wrote sandbox preview of app/page.tsx"));

        let html = fs::read_to_string(dir.path().join("out.html")).unwrap();
        assert!(html.contains("sandpack-client"));
        assert!(html.contains("<title>app</title>"));
    }
}

// =============================================================================
// Export
// =============================================================================

mod export {
    use super::*;

    fn stored_app(dir: &TempDir, code: Option<&str>) -> i64 {
        let db = FactoryDb::new(&db_path(dir)).unwrap();
        let app = db
            .create_artifact(None, "Budget Buddy", "Tracks money", "Name: Budget Buddy", ArtifactStatus::Building)
            .unwrap();
        if let Some(code) = code {
            db.complete_artifact(app.id, code).unwrap();
        }
        app.id
    }

    #[test]
    fn test_export_writes_document() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        let id = stored_app(&dir, Some(TWO_FILES));

        appfoundry(&dir)
            .args(["export", &id.to_string(), "--output", "export.json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Exported Budget Buddy (2 files)"));

        let doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("export.json")).unwrap())
                .unwrap();
        assert_eq!(doc["appName"], "Budget Buddy");
        assert!(doc["files"]["lib/util.ts"].as_str().unwrap().contains("a + b"));
    }

    #[test]
    fn test_export_to_stdout() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        let id = stored_app(&dir, Some("const x = 1;"));
        appfoundry(&dir)
            .args(["export", &id.to_string()])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"app/page.tsx\": \"const x = 1;\""));
    }

    #[test]
    fn test_export_unknown_app() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        appfoundry(&dir)
            .args(["export", "42"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("App 42 not found"));
    }

    #[test]
    fn test_export_without_code() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        let id = stored_app(&dir, None);
        appfoundry(&dir)
            .args(["export", &id.to_string()])
            .assert()
            .failure()
            .stderr(predicate::str::contains("has no code to export"));
    }
}
