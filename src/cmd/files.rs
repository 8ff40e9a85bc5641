//! Local file commands: `split` and `preview`.

use std::path::Path;

use anyhow::{Context, Result};

use appfoundry::codegen::split_files;
use appfoundry::config::AppConfig;
use appfoundry::preview::assemble_preview;

fn read_source(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

pub fn cmd_split(file: &Path) -> Result<()> {
    let text = read_source(file)?;
    let files = split_files(&text);
    for f in &files {
        println!(
            "{:<40} {} bytes",
            console::style(&f.path).bold(),
            f.content.len()
        );
    }
    println!("{} file(s)", files.len());
    Ok(())
}

pub fn cmd_preview(
    config: &AppConfig,
    file: &Path,
    static_only: bool,
    output: Option<&Path>,
) -> Result<()> {
    let text = read_source(file)?;
    let mut options = config.preview.to_options();
    if static_only {
        options.runtime = None;
    }
    let name = file
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Preview".to_string());

    let preview = assemble_preview(&text, &name, &options);
    match output {
        Some(path) => {
            std::fs::write(path, &preview.html)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "Wrote {} preview of {} to {}",
                preview.strategy.as_str(),
                preview.main_path.as_deref().unwrap_or("-"),
                path.display()
            );
        }
        None => print!("{}", preview.html),
    }
    Ok(())
}
