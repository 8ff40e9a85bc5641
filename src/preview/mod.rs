//! Preview assembly for stored artifacts.
//!
//! Two strategies share the same preparation (split, normalize, sanitize,
//! balance): a static projection rendered as an inert document, and a
//! sandboxed runtime bundle wrapped in an HTML shell that falls back to the
//! static markup. Assembly is pure.

pub mod bundle;
pub mod page;

use serde::Serialize;
use tracing::debug;

use crate::codegen::balance::balance_template_delimiters;
use crate::codegen::extract::extract_return_block;
use crate::codegen::jsx::project_to_html;
use crate::codegen::{FileArtifact, sanitize_code, split_normalized};

pub use bundle::{RuntimeOptions, SandboxBundle};

const PAGE_FILES: &[&str] = &["page.tsx", "page.ts", "page.jsx", "page.js"];

#[derive(Debug, Clone, Default)]
pub struct PreviewOptions {
    /// Sandboxed runtime settings; `None` renders the static projection only.
    pub runtime: Option<RuntimeOptions>,
    pub stylesheet_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewStrategy {
    Static,
    Sandbox,
}

impl PreviewStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewStrategy::Static => "static",
            PreviewStrategy::Sandbox => "sandbox",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub strategy: PreviewStrategy,
    pub html: String,
    pub bundle: Option<SandboxBundle>,
    pub main_path: Option<String>,
}

/// Split, de-duplicate and repair the files of a stored artifact.
pub fn prepare_files(raw_code: &str) -> Vec<FileArtifact> {
    split_normalized(raw_code)
        .into_iter()
        .map(|file| {
            let sanitized = sanitize_code(&file.content);
            let content = balance_template_delimiters(&sanitized).into_owned();
            FileArtifact { content, ..file }
        })
        .collect()
}

/// Index of the file the preview renders.
pub fn find_main_file(files: &[FileArtifact]) -> Option<usize> {
    let is_page = |f: &FileArtifact| PAGE_FILES.iter().any(|p| f.path.contains(p));
    files
        .iter()
        .position(|f| f.path.starts_with("app/page.") && is_page(f))
        .or_else(|| files.iter().position(is_page))
        .or_else(|| files.iter().position(FileArtifact::is_code))
        .or(if files.is_empty() { None } else { Some(0) })
}

/// Static markup of the main file's primary return expression.
pub fn static_markup(main: &FileArtifact) -> Option<String> {
    let block = extract_return_block(&main.content)?;
    let html = project_to_html(&block);
    (!html.is_empty()).then_some(html)
}

/// Build a preview document for `raw_code`.
pub fn assemble_preview(raw_code: &str, name: &str, options: &PreviewOptions) -> Preview {
    let files = prepare_files(raw_code);
    let stylesheet = options.stylesheet_url.as_deref();
    let Some(main) = find_main_file(&files) else {
        return Preview {
            strategy: PreviewStrategy::Static,
            html: page::unavailable_document(name, &[], stylesheet),
            bundle: None,
            main_path: None,
        };
    };
    let main_file = &files[main];
    let markup = static_markup(main_file);
    debug!(
        main = %main_file.path,
        files = files.len(),
        projected = markup.is_some(),
        "Assembling preview"
    );

    match &options.runtime {
        Some(runtime) if main_file.is_code() => {
            let bundle = bundle::build_bundle(&files, main);
            let html = bundle::shell_document(&bundle, name, runtime, markup.as_deref(), stylesheet);
            Preview {
                strategy: PreviewStrategy::Sandbox,
                html,
                bundle: Some(bundle),
                main_path: Some(main_file.path.clone()),
            }
        }
        _ => {
            let html = match &markup {
                Some(markup) => page::static_document(name, markup, stylesheet),
                None => {
                    let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
                    page::unavailable_document(name, &paths, stylesheet)
                }
            };
            Preview {
                strategy: PreviewStrategy::Static,
                html,
                bundle: None,
                main_path: Some(main_file.path.clone()),
            }
        }
    }
}

/// Placeholder for an artifact without code.
pub fn no_code_preview(name: &str) -> String {
    page::no_code_document(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: &str = "--- FILE: ./src/components/Hero.tsx ---\nexport default function Hero() { return <h1>Hero</h1>; }\n--- FILE: app/page.tsx ---\n```tsx\nexport default function Home(){ return (<div>hi</div>) }\n```\n";

    #[test]
    fn test_static_preview_projects_main_page() {
        let preview = assemble_preview(APP, "Demo", &PreviewOptions::default());
        assert_eq!(preview.strategy, PreviewStrategy::Static);
        assert_eq!(preview.main_path.as_deref(), Some("app/page.tsx"));
        assert!(preview.html.contains("<div id=\"root\" class=\"preview-container\"><div>hi</div></div>"));
        assert!(preview.bundle.is_none());
    }

    #[test]
    fn test_prepare_files_normalizes_and_repairs() {
        let files = prepare_files("--- FILE: @/lib/a.ts ---\nconst s = `open ${x\n--- FILE: lib/a.ts ---\nconst t = `${y}`;\n");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "lib/a.ts");
        assert_eq!(files[0].content, "const t = `${y}`;");

        let files = prepare_files("const s = `open ${x");
        assert_eq!(files[0].content.matches('`').count() % 2, 0);
    }

    #[test]
    fn test_main_file_selection() {
        let files = vec![
            FileArtifact::new("README.md", "x"),
            FileArtifact::new("components/A.tsx", "x"),
            FileArtifact::new("pages/page.jsx", "x"),
            FileArtifact::new("app/page.tsx", "x"),
        ];
        assert_eq!(find_main_file(&files), Some(3));
        assert_eq!(find_main_file(&files[..3]), Some(2));
        assert_eq!(find_main_file(&files[..2]), Some(1));
        assert_eq!(find_main_file(&files[..1]), Some(0));
        assert_eq!(find_main_file(&[]), None);
    }

    #[test]
    fn test_unavailable_when_nothing_projects() {
        let raw = "--- FILE: app/page.tsx ---\nexport const x = 1;\n--- FILE: lib/b.ts ---\nexport const y = 2;";
        let preview = assemble_preview(raw, "Demo", &PreviewOptions::default());
        assert!(preview.html.contains("Preview unavailable"));
        assert!(preview.html.contains("<li>lib/b.ts</li>"));
    }

    #[test]
    fn test_sandbox_preview() {
        let options = PreviewOptions {
            runtime: Some(RuntimeOptions::default()),
            stylesheet_url: None,
        };
        let preview = assemble_preview(APP, "Demo", &options);
        assert_eq!(preview.strategy, PreviewStrategy::Sandbox);
        let bundle = preview.bundle.unwrap();
        let app = &bundle.files["/App.tsx"];
        assert!(app.contains("function Hero()"));
        assert!(app.contains("export default PreviewRoot;"));
        assert!(preview.html.contains(r#"var fallback = "<div>hi<\/div>";"#));
    }

    #[test]
    fn test_sandbox_falls_back_to_static_for_non_code_main() {
        let options = PreviewOptions {
            runtime: Some(RuntimeOptions::default()),
            stylesheet_url: None,
        };
        let preview = assemble_preview("--- FILE: notes.md ---\nhello", "Notes", &options);
        assert_eq!(preview.strategy, PreviewStrategy::Static);
    }
}
