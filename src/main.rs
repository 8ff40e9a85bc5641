use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use appfoundry::config::AppConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "appfoundry")]
#[command(version, about = "Scheduled generation, preview and export of small web apps")]
pub struct Cli {
    /// Path to appfoundry.toml (defaults to .appfoundry/appfoundry.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Port to serve on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path (overrides config)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (CORS permissive, bind all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// Create or migrate the database
    InitDb {
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Run one pass over every due job
    Cycle {
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Print the pass report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List scheduled jobs
    Status {
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Make every active job due now and clear its last error
    ResetSchedule {
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Show the file blocks of a generated source file
    Split {
        file: PathBuf,
    },
    /// Assemble an HTML preview from a generated source file
    Preview {
        file: PathBuf,

        /// Render the static projection only, without the sandbox runtime
        #[arg(long = "static")]
        static_only: bool,

        /// Write the document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write the export document of a stored app
    Export {
        id: i64,

        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Write the document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any problems
    Validate,
    /// Write a default appfoundry.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    appfoundry::logging::init_tracing(cli.verbose, cli.log_json)?;

    let mut config = match &cli.command {
        // The file may not exist yet.
        Commands::Config {
            command: Some(ConfigCommands::Init),
        } => AppConfig::default(),
        _ => AppConfig::resolve(cli.config.as_deref())?,
    };
    config.apply_env()?;

    match &cli.command {
        Commands::Serve { port, db_path, dev } => {
            cmd::cmd_serve(config, *port, db_path.clone(), *dev).await?;
        }
        Commands::InitDb { db_path } => {
            cmd::cmd_init_db(&cmd::db_path(&config, db_path.as_deref()))?
        }
        Commands::Cycle { db_path, json } => {
            let path = cmd::db_path(&config, db_path.as_deref());
            cmd::cmd_cycle(&config, &path, *json).await?;
        }
        Commands::Status { db_path } => {
            cmd::cmd_status(&cmd::db_path(&config, db_path.as_deref()))?
        }
        Commands::ResetSchedule { db_path } => {
            cmd::cmd_reset_schedule(&cmd::db_path(&config, db_path.as_deref()))?
        }
        Commands::Split { file } => cmd::cmd_split(file)?,
        Commands::Preview {
            file,
            static_only,
            output,
        } => cmd::cmd_preview(&config, file, *static_only, output.as_deref())?,
        Commands::Export {
            id,
            db_path,
            output,
        } => {
            let path = cmd::db_path(&config, db_path.as_deref());
            cmd::cmd_export(&path, *id, output.as_deref())?;
        }
        Commands::Config { command } => {
            cmd::cmd_config(&config, cli.config.as_deref(), command.clone())?
        }
    }

    Ok(())
}
