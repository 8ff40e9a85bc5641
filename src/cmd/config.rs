//! Configuration view and validation commands: `appfoundry config`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use appfoundry::config::{AppConfig, CONFIG_DIR, CONFIG_FILE};

use super::super::ConfigCommands;

fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| Path::new(CONFIG_DIR).join(CONFIG_FILE))
}

pub fn cmd_config(
    config: &AppConfig,
    explicit: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let path = config_path(explicit);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("AppFoundry Configuration");
            println!("========================");
            println!();
            if path.exists() {
                println!("Config file: {}", path.display());
            } else {
                println!("No {} found; using defaults.", path.display());
            }
            println!();

            // Effective values, secrets masked
            let mut shown = config.clone();
            if shown.generation.api_key.is_some() {
                shown.generation.api_key = Some("********".to_string());
            }
            if shown.scheduler.cron_secret.is_some() {
                shown.scheduler.cron_secret = Some("********".to_string());
            }
            let rendered =
                toml::to_string_pretty(&shown).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            let problems = config.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration problems:");
                for problem in problems {
                    println!("  - {}", console::style(problem).red());
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let rendered = toml::to_string_pretty(&AppConfig::default())
                .context("Failed to render default configuration")?;
            std::fs::write(&path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Created {} at {}", CONFIG_FILE, path.display());
        }
    }

    Ok(())
}
