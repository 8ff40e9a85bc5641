//! Sandboxed runtime bundle.
//!
//! Every code file is re-hosted into a single `/App.tsx` unit (see
//! [`crate::codegen::modules`]) so cross-file imports never need resolving
//! by the runtime. The entry point mounts whatever that unit exports.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;
use serde_json::json;

use super::page::{escape_html, head};
use crate::codegen::FileArtifact;
use crate::codegen::modules::{
    CONVENTIONAL_EXPORTS, ImportDecl, PREVIEW_ROOT, RewriteOptions, RewrittenModule,
    rewrite_module,
};

pub const ENTRY_PATH: &str = "/index.tsx";
pub const APP_PATH: &str = "/App.tsx";

const REACT_VERSION: &str = "18.2.0";
const TYPESCRIPT_VERSION: &str = "5.6.2";

const SUPPORT_DIRS: &[&str] = &["types/", "lib/", "utils/", "hooks/"];

/// Packages pinned in `package.json` regardless of imports.
const PROVIDED_PACKAGES: &[&str] = &["react", "react-dom", "typescript"];

const INDEX_TSX: &str = r#"import React from 'react';
import { createRoot } from 'react-dom/client';
import * as Mod from './App';

const M: any = Mod;
const C = M.default || M.App || M.Home || M.Page || (() => React.createElement('div', null, 'No App component found'));
createRoot(document.getElementById('root')!).render(React.createElement(C));
"#;

const LINK_SHIM: &str = "export default function Link({ href, children, ...rest }: any) { return <a href={href} {...rest}>{children}</a>; }\n";

const IMAGE_SHIM: &str = "export default function Image({ fill, priority, ...props }: any) { return <img {...props} />; }\n";

const INDEX_HTML: &str = "<div id=\"root\"></div>\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxBundle {
    pub files: BTreeMap<String, String>,
    pub entry: String,
}

/// Runtime shell settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub client_script_url: String,
    pub bundler_url: String,
    pub timeout_ms: u64,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            client_script_url:
                "https://unpkg.com/@codesandbox/sandpack-client@2.13.8/dist/sandpack-client.umd.js"
                    .to_string(),
            bundler_url: "https://sandpack.codesandbox.io".to_string(),
            timeout_ms: 7000,
        }
    }
}

/// Files the runtime must never see.
pub fn is_excluded(path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or(path);
    let stem = file.split('.').next().unwrap_or(file);
    stem == "layout"
        || stem == "middleware"
        || file.contains(".config.")
        || path.starts_with("app/api/")
        || path.starts_with("pages/api/")
}

fn order_rank(path: &str, is_main: bool) -> u8 {
    if is_main {
        2
    } else if SUPPORT_DIRS.iter().any(|dir| path.starts_with(dir)) {
        0
    } else {
        1
    }
}

/// Name other files would import a module by.
fn module_key(path: &str) -> String {
    let mut segments: Vec<&str> = path.split('/').collect();
    let file = segments.pop().unwrap_or(path);
    let stem = file.split('.').next().unwrap_or(file);
    match (stem, segments.last()) {
        ("index", Some(dir)) => dir.to_string(),
        _ => stem.to_string(),
    }
}

/// Merged import header for the concatenated unit.
#[derive(Default)]
struct ImportHeader {
    react_named: BTreeSet<String>,
    lines: Vec<String>,
    bound: HashSet<String>,
    aliases: Vec<String>,
    packages: BTreeSet<String>,
}

impl ImportHeader {
    fn new() -> Self {
        let mut header = Self::default();
        header.bound.insert("React".to_string());
        header
    }

    fn bind(&mut self, local: &str) -> bool {
        self.bound.insert(local.to_string())
    }

    fn add_external(&mut self, decl: &ImportDecl) {
        match decl.specifier.as_str() {
            "react" => {
                for local in decl.default.iter().chain(decl.namespace.iter()) {
                    if self.bind(local) {
                        self.aliases.push(format!("const {} = React;", local));
                    }
                }
                for named in &decl.named {
                    if self.bind(named.local()) {
                        self.react_named.insert(match &named.alias {
                            Some(alias) => format!("{} as {}", named.name, alias),
                            None => named.name.clone(),
                        });
                    }
                }
            }
            "next/link" | "next/image" => {
                let shim = format!("./{}", decl.specifier);
                if let Some(local) = &decl.default {
                    if self.bind(local) {
                        self.lines.push(format!("import {} from '{}';", local, shim));
                    }
                }
            }
            _ => {
                let Some(package) = decl.package_name() else {
                    return;
                };
                if package == "next" {
                    // only link and image are shimmed
                    return;
                }
                if let Some(line) = self.external_line(decl) {
                    self.lines.push(line);
                }
                if !PROVIDED_PACKAGES.contains(&package.as_str()) {
                    self.packages.insert(package);
                }
            }
        }
    }

    fn external_line(&mut self, decl: &ImportDecl) -> Option<String> {
        let mut clauses = Vec::new();
        if let Some(local) = &decl.default {
            if self.bind(local) {
                clauses.push(local.clone());
            }
        }
        if let Some(local) = &decl.namespace {
            if self.bind(local) {
                clauses.push(format!("* as {}", local));
            }
        }
        let named: Vec<String> = decl
            .named
            .iter()
            .filter(|n| self.bound.insert(n.local().to_string()))
            .map(|n| match &n.alias {
                Some(alias) => format!("{} as {}", n.name, alias),
                None => n.name.clone(),
            })
            .collect();
        if !named.is_empty() {
            clauses.push(format!("{{ {} }}", named.join(", ")));
        }
        if clauses.is_empty() {
            return None;
        }
        // a namespace import cannot share a clause with named imports
        if decl.namespace.is_some() && clauses.len() > 1 {
            return Some(
                clauses
                    .iter()
                    .map(|c| format!("import {} from '{}';", c, decl.specifier))
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
        }
        Some(format!("import {} from '{}';", clauses.join(", "), decl.specifier))
    }

    fn render(&self) -> String {
        let mut out = if self.react_named.is_empty() {
            "import React from 'react';\n".to_string()
        } else {
            format!(
                "import React, {{ {} }} from 'react';\n",
                self.react_named.iter().cloned().collect::<Vec<_>>().join(", ")
            )
        };
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        for alias in &self.aliases {
            out.push_str(alias);
            out.push('\n');
        }
        out
    }
}

/// Build the runtime file set around `files[main]`.
pub fn build_bundle(files: &[FileArtifact], main: usize) -> SandboxBundle {
    let mut order: Vec<usize> = (0..files.len())
        .filter(|&i| i == main || (files[i].is_code() && !is_excluded(&files[i].path)))
        .collect();
    order.sort_by_key(|&i| order_rank(&files[i].path, i == main));

    let modules: Vec<(usize, RewrittenModule)> = order
        .iter()
        .map(|&i| {
            let options = if i == main {
                RewriteOptions::main()
            } else {
                RewriteOptions::supporting(&files[i].path)
            };
            (i, rewrite_module(&files[i].content, &options))
        })
        .collect();

    let mut header = ImportHeader::new();
    for (_, module) in &modules {
        for decl in module.imports.iter().filter(|d| !d.type_only && !d.is_side_effect()) {
            if !decl.is_local() {
                header.add_external(decl);
            }
        }
    }
    for (_, module) in &modules {
        header.bound.extend(module.declared.iter().cloned());
    }

    let by_key: HashMap<String, &RewrittenModule> = modules
        .iter()
        .filter(|(i, _)| *i != main)
        .map(|(i, module)| (module_key(&files[*i].path), module))
        .collect();
    let local_aliases = resolve_local_imports(&modules, &by_key, &mut header.bound);

    let mut app = header.render();
    for (i, module) in &modules {
        app.push_str(&format!("\n// {}\n", files[*i].path));
        app.push_str(module.code.trim());
        app.push('\n');
    }
    if !local_aliases.is_empty() {
        app.push('\n');
        app.push_str(&local_aliases.join("\n"));
        app.push('\n');
    }

    let main_module = modules.iter().find(|(i, _)| *i == main).map(|(_, m)| m);
    if main_module.is_some_and(|m| m.default_binding.is_some()) {
        app.push_str(&format!("\nexport default {};\n", PREVIEW_ROOT));
    }
    let conventional: Vec<&str> = CONVENTIONAL_EXPORTS
        .iter()
        .copied()
        .filter(|name| modules.iter().any(|(_, m)| m.declared.iter().any(|d| d == name)))
        .collect();
    if !conventional.is_empty() {
        app.push_str(&format!("export {{ {} }};\n", conventional.join(", ")));
    }

    let mut dependencies = serde_json::Map::new();
    dependencies.insert("react".into(), json!(REACT_VERSION));
    dependencies.insert("react-dom".into(), json!(REACT_VERSION));
    dependencies.insert("typescript".into(), json!(TYPESCRIPT_VERSION));
    for package in &header.packages {
        dependencies.insert(package.clone(), json!("latest"));
    }
    let package_json = json!({
        "name": "preview-app",
        "private": true,
        "main": ENTRY_PATH,
        "dependencies": dependencies,
    });
    let tsconfig = json!({
        "compilerOptions": {
            "target": "ES2019",
            "module": "ESNext",
            "jsx": "react-jsx",
            "esModuleInterop": true,
            "skipLibCheck": true,
            "moduleResolution": "bundler",
            "resolveJsonModule": true,
            "allowJs": true,
            "strict": false
        }
    });

    let mut out = BTreeMap::new();
    out.insert(APP_PATH.to_string(), app);
    out.insert(ENTRY_PATH.to_string(), INDEX_TSX.to_string());
    out.insert("/next/link.tsx".to_string(), LINK_SHIM.to_string());
    out.insert("/next/image.tsx".to_string(), IMAGE_SHIM.to_string());
    out.insert("/index.html".to_string(), INDEX_HTML.to_string());
    out.insert("/package.json".to_string(), pretty(&package_json));
    out.insert("/tsconfig.json".to_string(), pretty(&tsconfig));

    SandboxBundle {
        files: out,
        entry: ENTRY_PATH.to_string(),
    }
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// `const` aliases so local import names resolve inside the single unit.
fn resolve_local_imports(
    modules: &[(usize, RewrittenModule)],
    by_key: &HashMap<String, &RewrittenModule>,
    bound: &mut HashSet<String>,
) -> Vec<String> {
    let mut aliases = Vec::new();
    for (_, module) in modules {
        for decl in module.imports.iter().filter(|d| d.is_local() && !d.type_only) {
            let target = by_key.get(decl.stem());
            if let (Some(local), Some(target)) = (&decl.default, target) {
                if let Some(binding) = &target.default_binding {
                    if local != binding && bound.insert(local.clone()) {
                        aliases.push(format!("const {} = {};", local, binding));
                    }
                }
            }
            if let (Some(local), Some(target)) = (&decl.namespace, target) {
                if bound.insert(local.clone()) {
                    aliases.push(format!("const {} = {{ {} }};", local, target.declared.join(", ")));
                }
            }
            for named in &decl.named {
                if let Some(alias) = &named.alias {
                    if bound.insert(alias.clone()) {
                        aliases.push(format!("const {} = {};", alias, named.name));
                    }
                }
            }
        }
    }
    aliases
}

/// Embed JSON in an inline script without ending it early.
pub fn script_safe_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "null".to_string())
        .replace("</", "<\\/")
        .replace("<!--", "<\\u0021--")
}

/// HTML shell that boots the runtime with the bundle and falls back to
/// `fallback_markup` on error or timeout.
pub fn shell_document(
    bundle: &SandboxBundle,
    title: &str,
    runtime: &RuntimeOptions,
    fallback_markup: Option<&str>,
    stylesheet_url: Option<&str>,
) -> String {
    let files: BTreeMap<&str, serde_json::Value> = bundle
        .files
        .iter()
        .map(|(path, code)| (path.as_str(), json!({ "code": code })))
        .collect();
    let setup = json!({ "entry": bundle.entry, "bundlerURL": runtime.bundler_url });

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
{head}
<body>
  <div class="preview-container">
    <div id="sandpack"><div class="preview-message">Loading preview…</div></div>
  </div>
  <script src="{client}"></script>
  <script>
    (function () {{
      var files = {files};
      var setup = {setup};
      var fallback = {fallback};
      var el = document.getElementById('sandpack');
      var ready = false;
      var replaced = false;
      function showFallback(message) {{
        if (replaced || !el) return;
        replaced = true;
        el.innerHTML = fallback
          ? '<div>' + fallback + '</div>'
          : '<div class="preview-message">' + message + '</div>';
      }}
      var Sandpack = window.Sandpack || {{}};
      if (!Sandpack.SandpackClient || !el) {{
        showFallback('Preview runtime unavailable.');
        return;
      }}
      try {{
        var client = new Sandpack.SandpackClient(el, {{
          files: files,
          template: 'react-ts',
          entry: setup.entry
        }}, {{
          showOpenInCodeSandbox: false,
          showErrorScreen: false,
          showLoadingScreen: true,
          bundlerURL: setup.bundlerURL
        }});
        client.listen(function (msg) {{
          if (msg.type === 'done') ready = true;
          if (msg.type === 'error' || (msg.type === 'action' && msg.action === 'show-error')) {{
            showFallback('Preview error.');
          }}
        }});
      }} catch (e) {{
        showFallback('Preview error.');
      }}
      setTimeout(function () {{
        if (!ready) showFallback('Preview timed out.');
      }}, {timeout});
    }})();
  </script>
</body>
</html>
"#,
        head = head(title, stylesheet_url, "#sandpack{height:560px;width:100%}"),
        client = escape_html(&runtime.client_script_url),
        files = script_safe_json(&files),
        setup = script_safe_json(&setup),
        fallback = script_safe_json(&fallback_markup),
        timeout = runtime.timeout_ms,
    )
}
