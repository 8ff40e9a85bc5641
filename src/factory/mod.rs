//! App factory: scheduled generation of small web apps.
//!
//! ## Overview
//!
//! A configuration (API key, provider, interval) owns one recurring job.
//! Each time the job is due, a cycle asks the text generator for ideas,
//! ranks them, and builds the best one into a stored artifact. Failed cycles
//! retry after a short backoff; stored artifacts are previewed and exported
//! over HTTP.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │  / cron  │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘          │         │                                        │
//!                       │         │ Orchestrator::run_pass()               │
//!                       │         v                                        │
//!                       │  orchestrator.rs  (lease, transition, settle)    │
//!                       │         │                                        │
//!                       │         │ BuildPipeline (ideas → eval → build)   │
//!                       │         v                                        │
//!                       │  stages.rs  (LlmPipeline, prompts, parsing)      │
//!                       │         │                                        │
//!                       │         │ TextGenerator::generate()              │
//!                       │         v                                        │
//!                       │  llm.rs   (GeminiClient)                         │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module           | Responsibility                                         |
//! |------------------|--------------------------------------------------------|
//! | `models`         | Shared types: `GeneratedArtifact`, `CronJob`, `AppIdea` |
//! | `db`             | SQLite access via `DbHandle` (thin `Arc<Mutex<_>>`)    |
//! | `scheduler`      | Pure due/next-run/settlement arithmetic               |
//! | `export`         | JSON export document for one artifact                 |
//!
//! ## Typical Pass
//!
//! 1. `POST /api/cron/trigger` (or an authorized `/api/cron`) calls
//!    `Orchestrator::run_pass(now)`.
//! 2. Builds left `building` past the lease TTL are failed.
//! 3. For each due job, a lease is taken with an atomic update; a job leased
//!    by another pass is skipped.
//! 4. The cycle runs ideas, evaluation and generation in order. Each stage
//!    result is fed to `transition`, which either advances or settles.
//! 5. `scheduler::settle` turns the settlement into a `JobUpdate`, written
//!    back together with the lease release.

pub mod api;
pub mod db;
pub mod export;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod scheduler;
pub mod server;
pub mod stages;
