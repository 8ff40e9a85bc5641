//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `serve`         | `Serve`                                            |
//! | `db`            | `InitDb`, `Status`, `ResetSchedule`                |
//! | `cycle`         | `Cycle`                                            |
//! | `files`         | `Split`, `Preview`                                 |
//! | `export`        | `Export`                                           |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod cycle;
pub mod db;
pub mod export;
pub mod files;
pub mod serve;

use std::path::{Path, PathBuf};

use appfoundry::config::AppConfig;

pub use config::cmd_config;
pub use cycle::cmd_cycle;
pub use db::{cmd_init_db, cmd_reset_schedule, cmd_status};
pub use export::cmd_export;
pub use files::{cmd_preview, cmd_split};
pub use serve::cmd_serve;

/// The `--db-path` flag if given, else the configured path.
pub fn db_path(config: &AppConfig, flag: Option<&Path>) -> PathBuf {
    flag.map(Path::to_path_buf)
        .unwrap_or_else(|| config.database.path.clone())
}
