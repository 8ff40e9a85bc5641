//! Export command: `appfoundry export <id>`.

use std::path::Path;

use anyhow::{Context, Result, anyhow};

use appfoundry::factory::export::ExportDocument;

use super::db::open_existing;

pub fn cmd_export(db_path: &Path, id: i64, output: Option<&Path>) -> Result<()> {
    let db = open_existing(db_path)?;
    let app = db
        .get_artifact(id)?
        .ok_or_else(|| anyhow!("App {} not found", id))?;
    let doc = ExportDocument::from_artifact(&app)
        .ok_or_else(|| anyhow!("App {} has no code to export", id))?;
    let json = doc.to_json_pretty()?;

    match output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "Exported {} ({} files) to {}",
                app.name,
                doc.files.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}
