//! The `--- FILE: <path> ---` block convention.
//!
//! Generated applications arrive as one blob of text in which each file is
//! introduced by a delimiter line. This module splits such a blob into
//! ordered [`FileArtifact`]s and joins them back canonically.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Path used when the text carries no delimiter at all.
pub const DEFAULT_FILE_PATH: &str = "app/page.tsx";

static DELIMITER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^---\s*FILE:\s*(.*?)\s*---$").unwrap());

/// One file recovered from a generated blob. Paths are taken as written:
/// neither unique nor normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArtifact {
    pub path: String,
    pub content: String,
}

impl FileArtifact {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Extension without the dot, lowercased.
    pub fn extension(&self) -> Option<String> {
        let name = self.path.rsplit('/').next()?;
        let (_, ext) = name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }

    /// TypeScript or JavaScript source, with or without JSX.
    pub fn is_code(&self) -> bool {
        matches!(
            self.extension().as_deref(),
            Some("tsx" | "ts" | "jsx" | "js" | "mjs")
        )
    }
}

/// Path named by a delimiter line, if `line` is one.
pub fn delimiter_path(line: &str) -> Option<&str> {
    let caps = DELIMITER_REGEX.captures(line.trim())?;
    let path = caps.get(1)?.as_str();
    if path.is_empty() { None } else { Some(path) }
}

pub fn has_delimiters(text: &str) -> bool {
    text.lines().any(|line| delimiter_path(line).is_some())
}

/// Split `text` into file blocks in order of appearance.
///
/// Text before the first delimiter is discarded. Duplicate paths stay as
/// separate entries. Without any delimiter the whole (trimmed) input
/// becomes a single block at [`DEFAULT_FILE_PATH`].
pub fn split_files(text: &str) -> Vec<FileArtifact> {
    // (path, content start, delimiter line start)
    let mut marks: Vec<(&str, usize, usize)> = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        if let Some(path) = delimiter_path(line.trim_end_matches(['\n', '\r'])) {
            marks.push((path, offset, line_start));
        }
    }

    if marks.is_empty() {
        return vec![FileArtifact::new(DEFAULT_FILE_PATH, text.trim())];
    }

    marks
        .iter()
        .enumerate()
        .map(|(i, &(path, content_start, _))| {
            let content_end = marks.get(i + 1).map(|m| m.2).unwrap_or(text.len());
            FileArtifact::new(path, text[content_start..content_end].trim())
        })
        .collect()
}

/// Canonical join: one delimiter line per block, content, blank line.
pub fn join_files(files: &[FileArtifact]) -> String {
    let mut out = String::new();
    for file in files {
        out.push_str(&format!("--- FILE: {} ---\n{}\n\n", file.path, file.content));
    }
    out
}

/// Normalize a generated path for use as a map key.
///
/// Backslashes become slashes, repeated slashes collapse, and leading `./`,
/// `/`, the `@/` and `~/` aliases and a `src/` root are removed.
pub fn normalize_path(path: &str) -> String {
    let mut p = path.trim().replace('\\', "/");
    while p.contains("//") {
        p = p.replace("//", "/");
    }
    loop {
        let stripped = p
            .strip_prefix("./")
            .or_else(|| p.strip_prefix('/'))
            .or_else(|| p.strip_prefix("@/"))
            .or_else(|| p.strip_prefix("~/"))
            .or_else(|| p.strip_prefix("src/"));
        match stripped {
            Some(rest) => p = rest.to_string(),
            None => break,
        }
    }
    p
}

/// Make paths unique: the last block for a path wins, placed where that
/// path first appeared.
pub fn dedupe_by_path(files: Vec<FileArtifact>) -> Vec<FileArtifact> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<FileArtifact> = Vec::with_capacity(files.len());
    for file in files {
        if let Some(&i) = index.get(&file.path) {
            out[i].content = file.content;
            continue;
        }
        index.insert(file.path.clone(), out.len());
        out.push(file);
    }
    out
}

/// Split, normalize every path and de-duplicate.
pub fn split_normalized(text: &str) -> Vec<FileArtifact> {
    let files = split_files(text)
        .into_iter()
        .map(|f| FileArtifact::new(normalize_path(&f.path), f.content))
        .collect();
    dedupe_by_path(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_single_block() {
        let text = "--- FILE: app/page.tsx ---\nexport default function Home(){ return (<div>hi</div>) }\n";
        let files = split_files(text);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "app/page.tsx");
        assert_eq!(
            files[0].content,
            "export default function Home(){ return (<div>hi</div>) }"
        );
    }

    #[test]
    fn test_split_discards_preamble_and_keeps_order() {
        let text = "Here is your app:\n--- FILE: b.ts ---\nB\n--- FILE: a.ts ---\n\n  A  \n";
        let files = split_files(text);
        assert_eq!(
            files,
            vec![FileArtifact::new("b.ts", "B"), FileArtifact::new("a.ts", "A")]
        );
    }

    #[test]
    fn test_split_without_delimiters_uses_default_path() {
        let files = split_files("\n  const x = 1;\n\n");
        assert_eq!(files, vec![FileArtifact::new(DEFAULT_FILE_PATH, "const x = 1;")]);

        let empty = split_files("");
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].content, "");
    }

    #[test]
    fn test_split_keeps_duplicate_paths() {
        let text = "--- FILE: a.ts ---\none\n--- FILE: a.ts ---\ntwo\n";
        let files = split_files(text);
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].content, "two");
    }

    #[test]
    fn test_split_handles_crlf_and_padding() {
        let text = "--- FILE: lib/x.ts ---\r\nexport const x = 1;\r\n   ---  FILE:  y.ts  ---  \r\ny\r\n";
        let files = split_files(text);
        assert_eq!(files[0], FileArtifact::new("lib/x.ts", "export const x = 1;"));
        assert_eq!(files[1], FileArtifact::new("y.ts", "y"));
    }

    #[test]
    fn test_empty_path_is_not_a_delimiter() {
        assert_eq!(delimiter_path("--- FILE:  ---"), None);
        assert_eq!(delimiter_path("--- FILE: a.ts ---"), Some("a.ts"));
        assert_eq!(delimiter_path("text --- FILE: a.ts ---"), None);
    }

    #[test]
    fn test_split_is_left_inverse_of_join() {
        let files = vec![
            FileArtifact::new("app/page.tsx", "export default function Page() {\n  return <p/>;\n}"),
            FileArtifact::new("lib/util.ts", "export const add = (a: number, b: number) => a + b;"),
            FileArtifact::new("app/page.tsx", "// second copy"),
            FileArtifact::new("README.md", "# Title\n\n--- not a delimiter"),
        ];
        assert_eq!(split_files(&join_files(&files)), files);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./app/page.tsx"), "app/page.tsx");
        assert_eq!(normalize_path("/app//page.tsx"), "app/page.tsx");
        assert_eq!(normalize_path("@/components/Button.tsx"), "components/Button.tsx");
        assert_eq!(normalize_path("src\\lib\\db.ts"), "lib/db.ts");
    }

    #[test]
    fn test_dedupe_keeps_first_position_last_content() {
        let files = vec![
            FileArtifact::new("a", "1"),
            FileArtifact::new("b", "2"),
            FileArtifact::new("a", "3"),
        ];
        assert_eq!(
            dedupe_by_path(files),
            vec![FileArtifact::new("a", "3"), FileArtifact::new("b", "2")]
        );
    }

    #[test]
    fn test_split_normalized_merges_aliases() {
        let text = "--- FILE: ./app/page.tsx ---\nold\n--- FILE: app/page.tsx ---\nnew\n";
        let files = split_normalized(text);
        assert_eq!(files, vec![FileArtifact::new("app/page.tsx", "new")]);
    }

    #[test]
    fn test_is_code() {
        assert!(FileArtifact::new("app/page.tsx", "").is_code());
        assert!(!FileArtifact::new("app/globals.css", "").is_code());
        assert!(!FileArtifact::new("Makefile", "").is_code());
    }
}
