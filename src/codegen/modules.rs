//! Re-hosting a module as a standalone unit.
//!
//! The sandbox preview concatenates every generated file into one module,
//! so each file loses its own `import`/`export` syntax. Imports are parsed
//! into [`ImportDecl`]s (the assembler re-adds the external ones once),
//! default exports become plain local bindings, and a narrow set of
//! type-only syntax is removed. Everything works on the token stream, so
//! strings, templates and comments are never rewritten.

use serde::Serialize;

use super::extract::extract_return_block;
use super::jsx::project_to_html;
use super::lexer::{Token, TokenKind, is_closed_group, next_significant, tokenize};

/// Local binding the preview entry point mounts.
pub const PREVIEW_ROOT: &str = "PreviewRoot";

/// Component names the entry point falls back to, in order.
pub const CONVENTIONAL_EXPORTS: &[&str] = &["App", "Home", "Page"];

const DIRECTIVES: &[&str] = &["use client", "use server", "use strict"];

const GENERIC_WRAPPERS: &[&str] = &[
    "useState",
    "useRef",
    "useMemo",
    "useCallback",
    "useReducer",
    "useContext",
    "createContext",
    "forwardRef",
];

const CAST_PRIMITIVES: &[&str] = &[
    "const", "string", "number", "boolean", "any", "unknown", "never", "object", "bigint",
];

const DECLARATION_KEYWORDS: &[&str] = &[
    "const", "let", "var", "function", "class", "async", "enum", "abstract",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedImport {
    pub name: String,
    pub alias: Option<String>,
}

impl NamedImport {
    /// Name the importing module uses.
    pub fn local(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportDecl {
    pub specifier: String,
    pub default: Option<String>,
    pub namespace: Option<String>,
    pub named: Vec<NamedImport>,
    pub type_only: bool,
}

impl ImportDecl {
    /// Import of another generated file rather than a package.
    pub fn is_local(&self) -> bool {
        let s = self.specifier.as_str();
        s.starts_with('.') || s.starts_with('/') || s.starts_with("@/") || s.starts_with("~/")
    }

    /// Import with no bindings, such as a stylesheet.
    pub fn is_side_effect(&self) -> bool {
        self.default.is_none() && self.namespace.is_none() && self.named.is_empty()
    }

    /// Registry package the specifier resolves to (`@scope/name` or `name`).
    pub fn package_name(&self) -> Option<String> {
        if self.is_local() {
            return None;
        }
        let mut parts = self.specifier.split('/');
        let first = parts.next()?;
        if first.is_empty() {
            return None;
        }
        if first.starts_with('@') {
            let second = parts.next()?;
            Some(format!("{}/{}", first, second))
        } else {
            Some(first.to_string())
        }
    }

    /// Final path segment without extension, used to match local files.
    pub fn stem(&self) -> &str {
        let last = self.specifier.rsplit('/').next().unwrap_or(&self.specifier);
        last.split('.').next().unwrap_or(last)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RewriteOptions {
    /// Binding given to anonymous default exports.
    pub fallback_name: String,
    /// When set, the module must end up exposing this binding (the main file).
    pub root_binding: Option<String>,
}

impl RewriteOptions {
    pub fn main() -> Self {
        Self {
            fallback_name: PREVIEW_ROOT.to_string(),
            root_binding: Some(PREVIEW_ROOT.to_string()),
        }
    }

    pub fn supporting(path: &str) -> Self {
        Self {
            fallback_name: component_name_for_path(path),
            root_binding: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RewrittenModule {
    pub code: String,
    pub imports: Vec<ImportDecl>,
    pub default_binding: Option<String>,
    /// Top-level names declared by the module.
    pub declared: Vec<String>,
}

/// PascalCase identifier derived from a file path's stem.
pub fn component_name_for_path(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    let stem = file.split('.').next().unwrap_or(file);
    let mut name = String::new();
    for part in stem.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            name.push(first.to_ascii_uppercase());
            name.push_str(chars.as_str());
        }
    }
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "Module");
    }
    name
}

struct Edit {
    start: usize,
    end: usize,
    replacement: String,
}

/// Strip module syntax from `src` so it can be concatenated with other files.
pub fn rewrite_module(src: &str, options: &RewriteOptions) -> RewrittenModule {
    let tokens = tokenize(src);
    let mut module = RewrittenModule::default();
    let mut edits: Vec<Edit> = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].is_trivia() || !at_statement_start(&tokens, i) {
            i += 1;
            continue;
        }
        i = rewrite_statement(src, &tokens, i, options, &mut module, &mut edits);
    }

    let code = apply_edits(src, &edits);
    let mut code = strip_inline_types(&code);

    if let Some(root) = &options.root_binding {
        match &module.default_binding {
            Some(binding) if binding != root => {
                code.push_str(&format!("\nconst {} = {};\n", root, binding));
            }
            Some(_) => {}
            None => {
                if let Some(name) = CONVENTIONAL_EXPORTS
                    .iter()
                    .find(|n| module.declared.iter().any(|d| d == *n))
                {
                    code.push_str(&format!("\nconst {} = {};\n", root, name));
                    module.default_binding = Some(root.clone());
                } else if let Some(wrapper) = synthesize_root(src, root) {
                    code.push_str(&wrapper);
                    module.default_binding = Some(root.clone());
                }
            }
        }
    }

    module.code = code;
    module
}

/// Minimal component rendering the static projection of the first return block.
fn synthesize_root(src: &str, root: &str) -> Option<String> {
    let block = extract_return_block(src)?;
    let html = project_to_html(&block);
    if html.is_empty() {
        return None;
    }
    let literal = serde_json::to_string(&html).ok()?;
    Some(format!(
        "\nfunction {}() {{\n  return <div className=\"p-4\" dangerouslySetInnerHTML={{{{ __html: {} }}}} />;\n}}\n",
        root, literal
    ))
}

fn apply_edits(src: &str, edits: &[Edit]) -> String {
    let mut out = String::with_capacity(src.len());
    let mut cursor = 0;
    for edit in edits {
        if edit.start < cursor {
            continue;
        }
        out.push_str(&src[cursor..edit.start]);
        out.push_str(&edit.replacement);
        cursor = edit.end;
    }
    out.push_str(&src[cursor..]);
    out
}

fn prev_significant(tokens: &[Token<'_>], before: usize) -> Option<usize> {
    (0..before).rev().find(|&i| !tokens[i].is_trivia())
}

/// Punctuation after which a line break does not end a statement.
fn is_continuation(tok: &Token<'_>) -> bool {
    tok.kind == TokenKind::Punct
        && matches!(
            tok.text,
            "=" | "," | "(" | "[" | "." | "|" | "&" | ":" | "?" | "+" | "-" | "*" | "/" | "<" | ">"
                | "!" | "%"
        )
}

fn at_statement_start(tokens: &[Token<'_>], i: usize) -> bool {
    let Some(p) = prev_significant(tokens, i) else {
        return true;
    };
    let prev = &tokens[p];
    if prev.is_punct(';') || prev.is_punct('}') || prev.kind == TokenKind::Block {
        return true;
    }
    let newline_between = tokens[p + 1..i].iter().any(|t| t.text.contains('\n'));
    newline_between && !is_continuation(prev)
}

/// Index just past the statement starting at `from`.
///
/// A statement ends after a top-level `;`, or at a line break when neither
/// side of the break continues the expression.
fn statement_end(tokens: &[Token<'_>], from: usize) -> usize {
    let mut depth = 0usize;
    let mut i = from;
    while i < tokens.len() {
        let tok = &tokens[i];
        match tok.kind {
            TokenKind::Punct if matches!(tok.text, "(" | "[") => depth += 1,
            TokenKind::Punct if matches!(tok.text, ")" | "]") => depth = depth.saturating_sub(1),
            TokenKind::Punct if tok.text == ";" && depth == 0 => return i + 1,
            TokenKind::Space if depth == 0 && tok.text.contains('\n') => {
                let prev_continues = prev_significant(tokens, i).is_some_and(|p| {
                    // `=>` ends with `>`, which also continues
                    is_continuation(&tokens[p])
                });
                let next_continues = next_significant(tokens, i).is_some_and(|n| {
                    let t = &tokens[n];
                    t.kind == TokenKind::Punct
                        && matches!(t.text, "." | "|" | "&" | "?" | ":" | "=" | "+" | "-" | "*")
                });
                if !prev_continues && !next_continues {
                    return i;
                }
            }
            _ => {}
        }
        i += 1;
    }
    tokens.len()
}

fn byte_end(tokens: &[Token<'_>], idx: usize, src_len: usize) -> usize {
    if idx == 0 {
        0
    } else if idx >= tokens.len() {
        src_len
    } else {
        tokens[idx].start
    }
}

fn remove_statement(tokens: &[Token<'_>], from: usize, src_len: usize, edits: &mut Vec<Edit>) -> usize {
    let end = statement_end(tokens, from);
    edits.push(Edit {
        start: tokens[from].start,
        end: byte_end(tokens, end, src_len),
        replacement: String::new(),
    });
    end.max(from + 1)
}

fn note_declared(module: &mut RewrittenModule, name: &str) {
    if !name.is_empty() && !module.declared.iter().any(|d| d == name) {
        module.declared.push(name.to_string());
    }
}

/// Name declared by the declaration keyword at `kw`, if any.
fn declared_name<'a>(tokens: &[Token<'a>], kw: usize) -> Option<&'a str> {
    let mut k = next_significant(tokens, kw + 1)?;
    if tokens[kw].is_word("async") {
        if !tokens[k].is_word("function") {
            return None;
        }
        k = next_significant(tokens, k + 1)?;
    }
    if tokens[k].is_punct('*') {
        k = next_significant(tokens, k + 1)?;
    }
    let tok = &tokens[k];
    (tok.kind == TokenKind::Ident && !tok.is_word("extends")).then_some(tok.text)
}

fn rewrite_statement(
    src: &str,
    tokens: &[Token<'_>],
    i: usize,
    options: &RewriteOptions,
    module: &mut RewrittenModule,
    edits: &mut Vec<Edit>,
) -> usize {
    let tok = &tokens[i];
    let next = next_significant(tokens, i + 1);
    let next_tok = next.map(|n| &tokens[n]);

    match tok.kind {
        TokenKind::Str => {
            let inner = tok.text.trim_matches(['"', '\'']);
            if DIRECTIVES.contains(&inner) {
                return remove_statement(tokens, i, src.len(), edits);
            }
            i + 1
        }
        TokenKind::Ident => match tok.text {
            "import" => match next_tok {
                Some(n) if n.is_punct('(') || n.is_punct('.') => i + 1,
                _ => match parse_import(tokens, i) {
                    Some((decl, end)) => {
                        module.imports.push(decl);
                        edits.push(Edit {
                            start: tok.start,
                            end: byte_end(tokens, end, src.len()),
                            replacement: String::new(),
                        });
                        end
                    }
                    None => i + 1,
                },
            },
            "export" => match next {
                Some(n) => rewrite_export(src, tokens, i, n, options, module, edits),
                None => i + 1,
            },
            "type" => {
                let is_alias = next_tok.is_some_and(|n| n.kind == TokenKind::Ident)
                    && next
                        .and_then(|n| next_significant(tokens, n + 1))
                        .is_some_and(|a| tokens[a].is_punct('=') || tokens[a].is_punct('<'));
                if is_alias {
                    remove_statement(tokens, i, src.len(), edits)
                } else {
                    i + 1
                }
            }
            "interface" if next_tok.is_some_and(|n| n.kind == TokenKind::Ident) => {
                remove_interface(tokens, i, src.len(), edits)
            }
            "declare" if next_tok.is_some_and(|n| n.kind == TokenKind::Ident) => {
                remove_statement(tokens, i, src.len(), edits)
            }
            "const" | "let" | "var" => {
                if is_react_require(tokens, i) {
                    return remove_statement(tokens, i, src.len(), edits);
                }
                if let Some(name) = declared_name(tokens, i) {
                    note_declared(module, name);
                }
                i + 1
            }
            "function" | "class" | "async" => {
                if let Some(name) = declared_name(tokens, i) {
                    note_declared(module, name);
                }
                i + 1
            }
            _ => i + 1,
        },
        _ => i + 1,
    }
}

fn rewrite_export(
    src: &str,
    tokens: &[Token<'_>],
    i: usize,
    n: usize,
    options: &RewriteOptions,
    module: &mut RewrittenModule,
    edits: &mut Vec<Edit>,
) -> usize {
    let export = &tokens[i];
    let next = &tokens[n];

    if next.is_word("default") {
        return rewrite_default_export(src, tokens, i, n, options, module, edits);
    }
    if next.kind == TokenKind::Block || next.is_punct('*') || next.is_punct('=') {
        return remove_statement(tokens, i, src.len(), edits);
    }
    if next.is_word("type") {
        return remove_statement(tokens, i, src.len(), edits);
    }
    if next.is_word("interface") {
        return remove_interface(tokens, i, src.len(), edits);
    }
    if next.is_word("declare") {
        return remove_statement(tokens, i, src.len(), edits);
    }
    if next.kind == TokenKind::Ident && DECLARATION_KEYWORDS.contains(&next.text) {
        if let Some(name) = declared_name(tokens, n) {
            note_declared(module, name);
        }
        edits.push(Edit {
            start: export.start,
            end: next.start,
            replacement: String::new(),
        });
        return n;
    }
    i + 1
}

fn rewrite_default_export(
    src: &str,
    tokens: &[Token<'_>],
    i: usize,
    default_idx: usize,
    options: &RewriteOptions,
    module: &mut RewrittenModule,
    edits: &mut Vec<Edit>,
) -> usize {
    let export = &tokens[i];
    let Some(k) = next_significant(tokens, default_idx + 1) else {
        return remove_statement(tokens, i, src.len(), edits);
    };
    let target = &tokens[k];

    let is_function = target.is_word("function")
        || (target.is_word("async")
            && next_significant(tokens, k + 1).is_some_and(|f| tokens[f].is_word("function")));
    if is_function || target.is_word("class") {
        match declared_name(tokens, k) {
            Some(name) => {
                edits.push(Edit {
                    start: export.start,
                    end: target.start,
                    replacement: String::new(),
                });
                note_declared(module, name);
                module.default_binding = Some(name.to_string());
            }
            None => {
                // anonymous: name it after the keyword (`function`, `function*` or `class`)
                let keyword_idx = if target.is_word("async") {
                    next_significant(tokens, k + 1).unwrap_or(k)
                } else {
                    k
                };
                let mut name_at = keyword_idx + 1;
                if let Some(star) = next_significant(tokens, keyword_idx + 1) {
                    if tokens[star].is_punct('*') {
                        name_at = star + 1;
                    }
                }
                let head = &src[target.start..byte_end(tokens, name_at, src.len())];
                edits.push(Edit {
                    start: export.start,
                    end: byte_end(tokens, name_at, src.len()),
                    replacement: format!("{} {}", head.trim_end(), options.fallback_name),
                });
                note_declared(module, &options.fallback_name);
                module.default_binding = Some(options.fallback_name.clone());
            }
        }
        return k;
    }

    if target.kind == TokenKind::Ident {
        let after = next_significant(tokens, k + 1);
        let ends_here = match after {
            None => true,
            Some(a) => {
                tokens[a].is_punct(';') || tokens[k + 1..a].iter().any(|t| t.text.contains('\n'))
            }
        };
        if ends_here {
            module.default_binding = Some(target.text.to_string());
            return remove_statement(tokens, i, src.len(), edits);
        }
    }

    edits.push(Edit {
        start: export.start,
        end: target.start,
        replacement: format!("const {} = ", options.fallback_name),
    });
    note_declared(module, &options.fallback_name);
    module.default_binding = Some(options.fallback_name.clone());
    k
}

fn remove_interface(tokens: &[Token<'_>], from: usize, src_len: usize, edits: &mut Vec<Edit>) -> usize {
    let Some(body) = (from..tokens.len()).find(|&k| tokens[k].kind == TokenKind::Block) else {
        return remove_statement(tokens, from, src_len, edits);
    };
    let mut end = body + 1;
    if let Some(semi) = next_significant(tokens, end) {
        if tokens[semi].is_punct(';') && !tokens[end..semi].iter().any(|t| t.text.contains('\n')) {
            end = semi + 1;
        }
    }
    edits.push(Edit {
        start: tokens[from].start,
        end: byte_end(tokens, end, src_len),
        replacement: String::new(),
    });
    end
}

fn is_react_require(tokens: &[Token<'_>], kw: usize) -> bool {
    let mut seq = Vec::with_capacity(6);
    let mut k = kw;
    while seq.len() < 6 {
        match next_significant(tokens, k + 1) {
            Some(n) => {
                seq.push(&tokens[n]);
                k = n;
            }
            None => break,
        }
    }
    matches!(
        seq.as_slice(),
        [name, eq, req, open, spec, close]
            if name.kind == TokenKind::Ident
                && eq.is_punct('=')
                && req.is_word("require")
                && open.is_punct('(')
                && spec.kind == TokenKind::Str
                && spec.text.trim_matches(['"', '\'']) == "react"
                && close.is_punct(')')
    )
}

/// Parse the import statement at `i` into a declaration and the index just
/// past it. `None` when no module specifier can be found.
fn parse_import(tokens: &[Token<'_>], i: usize) -> Option<(ImportDecl, usize)> {
    let mut decl = ImportDecl::default();
    let mut k = next_significant(tokens, i + 1)?;
    let mut expect_namespace = false;

    loop {
        let tok = &tokens[k];
        match tok.kind {
            TokenKind::Str => {
                decl.specifier = tok.text.trim_matches(['"', '\'']).to_string();
                let mut end = k + 1;
                if let Some(semi) = next_significant(tokens, end) {
                    if tokens[semi].is_punct(';') {
                        end = semi + 1;
                    }
                }
                return Some((decl, end));
            }
            TokenKind::Block => decl.named = parse_named_imports(tok.block_inner()),
            TokenKind::Ident => match tok.text {
                "type" if decl.default.is_none() && decl.named.is_empty() => {
                    // `import type X` vs. a default import named `type`
                    let after = next_significant(tokens, k + 1).map(|a| &tokens[a]);
                    if after.is_some_and(|a| !a.is_word("from") && !a.is_punct(',')) {
                        decl.type_only = true;
                    } else {
                        decl.default = Some(tok.text.to_string());
                    }
                }
                "from" | "as" => {}
                name if expect_namespace => {
                    decl.namespace = Some(name.to_string());
                    expect_namespace = false;
                }
                name => decl.default = Some(name.to_string()),
            },
            TokenKind::Punct if tok.text == "*" => expect_namespace = true,
            TokenKind::Punct if tok.text == "," => {}
            _ => return None,
        }
        k = next_significant(tokens, k + 1)?;
    }
}

fn parse_named_imports(inner: &str) -> Vec<NamedImport> {
    inner
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() || part.starts_with("type ") {
                return None;
            }
            let mut words = part.split_whitespace();
            let name = words.next()?.to_string();
            let alias = match (words.next(), words.next()) {
                (Some("as"), Some(alias)) => Some(alias.to_string()),
                _ => None,
            };
            Some(NamedImport { name, alias })
        })
        .collect()
}

/// End index (exclusive) of a `<...>` type argument list starting at `open`.
fn generic_args_end(tokens: &[Token<'_>], open: usize) -> Option<usize> {
    if !tokens.get(open)?.is_punct('<') {
        return None;
    }
    let mut depth = 0usize;
    for k in open..tokens.len() {
        let tok = &tokens[k];
        match tok.kind {
            TokenKind::Punct => match tok.text {
                "<" => depth += 1,
                ">" if k > 0 && tokens[k - 1].is_punct('=') => {}
                ">" => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(k + 1);
                    }
                }
                "," | "." | "[" | "]" | "|" | "&" | "(" | ")" | "?" | ":" | "=" => {}
                _ => return None,
            },
            TokenKind::Ident | TokenKind::Space | TokenKind::Block | TokenKind::Str => {}
            TokenKind::Comment | TokenKind::Template => return None,
        }
    }
    None
}

/// `: React.FC<P>` or `: FC<P>` ahead of an `=`; returns the index past it.
fn fc_annotation_end(tokens: &[Token<'_>], colon: usize) -> Option<usize> {
    let k = next_significant(tokens, colon + 1)?;
    let mut end = if tokens[k].is_word("React") {
        let dot = tokens.get(k + 1)?;
        let fc = tokens.get(k + 2)?;
        if !dot.is_punct('.') || !(fc.is_word("FC") || fc.is_word("FunctionComponent")) {
            return None;
        }
        k + 3
    } else if tokens[k].is_word("FC") || tokens[k].is_word("FunctionComponent") {
        k + 1
    } else {
        return None;
    };
    if let Some(g) = generic_args_end(tokens, end) {
        end = g;
    }
    let after = next_significant(tokens, end)?;
    tokens[after].is_punct('=').then_some(end)
}

/// Whether `idx` sits in JSX text: the nearest tag-closing `>` behind it
/// comes before any `<`, `;` or `=`, and a `<` follows before the next `;`.
fn in_jsx_text(tokens: &[Token<'_>], idx: usize) -> bool {
    let after_tag = tokens[..idx]
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, t)| t.kind == TokenKind::Punct)
        .find(|(_, t)| matches!(t.text, ">" | "<" | ";" | "="))
        .is_some_and(|(k, t)| t.text == ">" && !(k > 0 && tokens[k - 1].is_punct('=')));
    after_tag
        && tokens[idx + 1..]
            .iter()
            .find(|t| t.is_punct('<') || t.is_punct(';'))
            .is_some_and(|t| t.is_punct('<'))
}

/// `as Type` cast at `as_idx`; returns the index past the type. Only
/// expression context counts, never JSX text.
fn cast_end(tokens: &[Token<'_>], as_idx: usize) -> Option<usize> {
    if in_jsx_text(tokens, as_idx) {
        return None;
    }
    let prev = &tokens[prev_significant(tokens, as_idx)?];
    let casts_value = matches!(prev.kind, TokenKind::Ident | TokenKind::Str | TokenKind::Template)
        || prev.is_punct(')')
        || prev.is_punct(']');
    if !casts_value || prev.is_word("import") || prev.is_word("export") || prev.is_punct('*') {
        return None;
    }

    let k = next_significant(tokens, as_idx + 1)?;
    let ty = &tokens[k];
    let is_type = ty.kind == TokenKind::Ident
        && (CAST_PRIMITIVES.contains(&ty.text) || ty.text.starts_with(|c: char| c.is_ascii_uppercase()));
    if !is_type {
        return None;
    }

    let mut end = k + 1;
    loop {
        match tokens.get(end) {
            Some(t) if t.is_punct('.') && tokens.get(end + 1).is_some_and(|n| n.kind == TokenKind::Ident) => {
                end += 2;
            }
            Some(t) if t.is_punct('[') && tokens.get(end + 1).is_some_and(|n| n.is_punct(']')) => {
                end += 2;
            }
            Some(t) if t.is_punct('<') => end = generic_args_end(tokens, end)?,
            _ => break,
        }
    }

    match tokens.get(end) {
        None => Some(end),
        Some(t) if t.kind == TokenKind::Space && t.text.contains('\n') => Some(end),
        Some(_) => {
            let Some(n) = next_significant(tokens, end) else {
                return Some(end);
            };
            let follower = &tokens[n];
            (follower.kind == TokenKind::Punct && matches!(follower.text, ")" | ";" | "," | "]" | "}"))
                .then_some(end)
        }
    }
}

/// Remove inline type syntax: generic arguments on hook wrappers,
/// `FC` annotations and narrow `as` casts. Recurses into braced blocks.
fn strip_inline_types(src: &str) -> String {
    let tokens = tokenize(src);
    let mut out = String::with_capacity(src.len());
    let mut i = 0;
    while i < tokens.len() {
        let tok = &tokens[i];
        match tok.kind {
            TokenKind::Block => {
                out.push('{');
                out.push_str(&strip_inline_types(tok.block_inner()));
                if is_closed_group(tok.text) {
                    out.push('}');
                }
                i += 1;
            }
            TokenKind::Ident if GENERIC_WRAPPERS.contains(&tok.text) => {
                out.push_str(tok.text);
                match generic_args_end(&tokens, i + 1) {
                    Some(end) if tokens.get(end).is_some_and(|t| t.is_punct('(')) => i = end,
                    _ => i += 1,
                }
            }
            TokenKind::Punct if tok.text == ":" => match fc_annotation_end(&tokens, i) {
                Some(end) => i = end,
                None => {
                    out.push(':');
                    i += 1;
                }
            },
            TokenKind::Ident if tok.text == "as" => match cast_end(&tokens, i) {
                Some(end) => {
                    while out.ends_with([' ', '\t']) {
                        out.pop();
                    }
                    i = end;
                }
                None => {
                    out.push_str(tok.text);
                    i += 1;
                }
            },
            _ => {
                out.push_str(tok.text);
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_module(src: &str) -> RewrittenModule {
        rewrite_module(src, &RewriteOptions::main())
    }

    #[test]
    fn test_strips_directives_and_imports() {
        let src = "\"use client\";\nimport React, { useState as useS, type FC } from 'react';\nimport * as Icons from \"lucide-react\";\nimport './globals.css'\nimport type { Props } from '@/types';\nconst a = 1;";
        let m = rewrite_module(src, &RewriteOptions::supporting("lib/a.ts"));
        assert_eq!(m.code.trim(), "const a = 1;");
        assert_eq!(m.imports.len(), 4);

        let react = &m.imports[0];
        assert_eq!(react.specifier, "react");
        assert_eq!(react.default.as_deref(), Some("React"));
        assert_eq!(react.named, vec![NamedImport { name: "useState".into(), alias: Some("useS".into()) }]);

        assert_eq!(m.imports[1].namespace.as_deref(), Some("Icons"));
        assert!(m.imports[2].is_side_effect());
        assert!(m.imports[3].type_only);
        assert!(m.imports[3].is_local());
    }

    #[test]
    fn test_dynamic_import_is_kept() {
        let src = "const mod = import('./x');";
        assert_eq!(main_module(src).code.lines().next(), Some(src));
    }

    #[test]
    fn test_named_default_function() {
        let m = main_module("export default function Home() {\n  return <div>hi</div>;\n}");
        assert!(m.code.starts_with("function Home() {"));
        assert!(m.code.ends_with("const PreviewRoot = Home;\n"));
        assert_eq!(m.default_binding.as_deref(), Some("Home"));
    }

    #[test]
    fn test_anonymous_default_function_gets_fallback_name() {
        let m = rewrite_module(
            "export default function () { return null; }",
            &RewriteOptions::supporting("components/nav-bar.tsx"),
        );
        assert_eq!(m.code, "function NavBar () { return null; }");
        assert_eq!(m.default_binding.as_deref(), Some("NavBar"));
    }

    #[test]
    fn test_default_arrow_becomes_root_binding() {
        let m = main_module("const x = 1;\nexport default () => <main>{x}</main>;");
        assert_eq!(m.code, "const x = 1;\nconst PreviewRoot = () => <main>{x}</main>;");
        assert_eq!(m.default_binding.as_deref(), Some("PreviewRoot"));
    }

    #[test]
    fn test_default_identifier_is_removed() {
        let m = rewrite_module(
            "const Card = () => <div/>;\nexport default Card;\n",
            &RewriteOptions::supporting("components/Card.tsx"),
        );
        assert_eq!(m.code, "const Card = () => <div/>;\n\n");
        assert_eq!(m.default_binding.as_deref(), Some("Card"));
    }

    #[test]
    fn test_named_exports_lose_qualifier_and_reexports_go() {
        let src = "export const a = 1;\nexport async function load() {}\nexport { a as b };\nexport * from './other';\n";
        let m = rewrite_module(src, &RewriteOptions::supporting("lib/x.ts"));
        assert_eq!(m.code, "const a = 1;\nasync function load() {}\n\n\n");
        assert_eq!(m.declared, vec!["a".to_string(), "load".to_string()]);
    }

    #[test]
    fn test_type_constructs_are_removed() {
        let src = "interface Props {\n  title: string;\n}\nexport type Mode =\n  | 'a'\n  | 'b';\ntype Fn = (x: number) => void\nconst type = 'kept';";
        let m = rewrite_module(src, &RewriteOptions::supporting("types/index.ts"));
        assert_eq!(m.code.trim(), "const type = 'kept';");
    }

    #[test]
    fn test_inline_types_are_stripped() {
        let src = "function A() {\n  const [v, setV] = useState<string | null>(null);\n  const ref = React.useRef<HTMLDivElement>(null);\n  const n = (value as number) + 1;\n  return <p>Save as PDF</p>;\n}\nconst B: React.FC<Props> = () => null;";
        let m = rewrite_module(src, &RewriteOptions::supporting("x.tsx"));
        assert!(m.code.contains("useState(null)"));
        assert!(m.code.contains("React.useRef(null)"));
        assert!(m.code.contains("(value) + 1"));
        assert!(m.code.contains("Save as PDF"));
        assert!(m.code.contains("const B = () => null;"));
    }

    #[test]
    fn test_as_in_jsx_text_is_kept() {
        let src = "const Banner = () => <p>(logged in as Guest)</p>;\nconst Row = () => (\n  <li>Sign in as Admin</li>\n);\nconst n = (value as number) + 1;\nconst pick = (i) => i as Item;";
        let m = rewrite_module(src, &RewriteOptions::supporting("x.tsx"));
        assert!(m.code.contains("<p>(logged in as Guest)</p>"));
        assert!(m.code.contains("Sign in as Admin"));
        assert!(m.code.contains("const n = (value) + 1;"));
        assert!(m.code.contains("const pick = (i) => i;"));
    }

    #[test]
    fn test_strings_are_never_rewritten() {
        let src = "const s = \"import x from 'y'; export default z\";\nconst t = `as const ${1}`;";
        let m = rewrite_module(src, &RewriteOptions::supporting("x.ts"));
        assert_eq!(m.code, src);
        assert!(m.imports.is_empty());
    }

    #[test]
    fn test_react_require_is_removed() {
        let m = rewrite_module(
            "const React = require('react');\nconst x = require('lodash');",
            &RewriteOptions::supporting("x.js"),
        );
        assert_eq!(m.code, "\nconst x = require('lodash');");
    }

    #[test]
    fn test_missing_default_uses_conventional_name() {
        let m = main_module("function App() { return <p/>; }");
        assert!(m.code.ends_with("const PreviewRoot = App;\n"));
        assert_eq!(m.default_binding.as_deref(), Some("PreviewRoot"));
    }

    #[test]
    fn test_missing_default_synthesizes_wrapper() {
        let m = main_module("const Widget = () => {\n  return (<section className=\"w\">Hi {name}</section>);\n};");
        assert!(m.code.contains("function PreviewRoot() {"));
        assert!(m.code.contains(r#"__html: "<section class=\"w\">Hi </section>""#));
        assert_eq!(m.default_binding.as_deref(), Some("PreviewRoot"));
    }

    #[test]
    fn test_no_default_and_nothing_to_project() {
        let m = main_module("const x = 1;");
        assert_eq!(m.default_binding, None);
        assert_eq!(m.code, "const x = 1;");
    }

    #[test]
    fn test_component_name_for_path() {
        assert_eq!(component_name_for_path("components/nav-bar.tsx"), "NavBar");
        assert_eq!(component_name_for_path("app/page.tsx"), "Page");
        assert_eq!(component_name_for_path("lib/404.tsx"), "Module404");
    }

    #[test]
    fn test_package_name() {
        let decl = |s: &str| ImportDecl { specifier: s.to_string(), ..Default::default() };
        assert_eq!(decl("lucide-react").package_name().as_deref(), Some("lucide-react"));
        assert_eq!(decl("@radix-ui/react-dialog/dist").package_name().as_deref(), Some("@radix-ui/react-dialog"));
        assert_eq!(decl("./x").package_name(), None);
        assert_eq!(decl("@/components/Button").stem(), "Button");
    }
}
