//! Textual repairs applied to every generated file before it is stored.
//!
//! Each rule is idempotent on its own and the sequence as a whole is too:
//! `sanitize_code(sanitize_code(x)) == sanitize_code(x)`.

use std::sync::LazyLock;

use regex::Regex;

use super::blocks::{has_delimiters, join_files, split_files};
use super::lexer::{TokenKind, is_closed_group, scan_group, tokenize};

static DELIMITER_LINE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^---\s*FILE:.*---\s*$").unwrap());

static FENCE_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^```\w*$").unwrap());

static DOLLAR_RUN_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\${2,}").unwrap());

static SIMPLE_EXPR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w$.\[\]()]+$").unwrap());

/// Apply every repair rule, in order, to one file's content.
pub fn sanitize_code(src: &str) -> String {
    let text = drop_lines(src, |line| DELIMITER_LINE_REGEX.is_match(line.trim_end()));
    let text = drop_lines(&text, |line| FENCE_LINE_REGEX.is_match(line.trim()));
    let text = rewrite_blocks(&text, &|inner, _| {
        single_interpolation_concat(inner).map(|expr| format!("{{{}}}", expr))
    });
    let text = DOLLAR_RUN_REGEX.replace_all(&text, "$$").into_owned();
    rewrite_blocks(&text, &|inner, attr| {
        attr?;
        plain_template_body(inner).map(|body| format!("\"{}\"", body))
    })
}

/// Sanitize a multi-file blob block by block, keeping its delimiters.
///
/// Text without any delimiter is treated as a single file and comes back
/// without one.
pub fn sanitize_files(text: &str) -> String {
    if !has_delimiters(text) {
        return sanitize_code(text);
    }
    let mut files = split_files(text);
    for file in &mut files {
        file.content = sanitize_code(&file.content).trim().to_string();
    }
    join_files(&files)
}

fn drop_lines(src: &str, is_junk: impl Fn(&str) -> bool) -> String {
    src.split_inclusive('\n')
        .filter(|line| !is_junk(line.trim_end_matches(['\n', '\r'])))
        .collect()
}

/// Walk every `{...}` container (nested ones included) and let `rewrite`
/// replace it. The second argument is the attribute name when the block
/// directly follows `name=`.
fn rewrite_blocks<F>(src: &str, rewrite: &F) -> String
where
    F: Fn(&str, Option<&str>) -> Option<String>,
{
    let tokens = tokenize(src);
    let mut out = String::with_capacity(src.len());
    for (i, tok) in tokens.iter().enumerate() {
        if tok.kind != TokenKind::Block {
            out.push_str(tok.text);
            continue;
        }
        let attr = match (i.checked_sub(2).map(|j| &tokens[j]), i.checked_sub(1).map(|j| &tokens[j])) {
            (Some(name), Some(eq)) if name.kind == TokenKind::Ident && eq.is_punct('=') => {
                Some(name.text)
            }
            _ => None,
        };
        let inner = tok.block_inner();
        match rewrite(inner, attr) {
            Some(replacement) => out.push_str(&replacement),
            None => {
                out.push('{');
                out.push_str(&rewrite_blocks(inner, rewrite));
                if is_closed_group(tok.text) {
                    out.push('}');
                }
            }
        }
    }
    out
}

/// Template body (between the backticks) if `inner` is exactly one
/// terminated template literal.
fn sole_template_body(inner: &str) -> Option<&str> {
    let tokens = tokenize(inner);
    match tokens.as_slice() {
        [tok] if tok.kind == TokenKind::Template
            && tok.text.len() >= 2
            && tok.text.ends_with('`') =>
        {
            Some(&tok.text[1..tok.text.len() - 1])
        }
        _ => None,
    }
}

/// `` `pre${expr}post` `` with exactly one interpolation becomes
/// `'pre' + expr + 'post'`; without literal text it is just `expr`.
fn single_interpolation_concat(inner: &str) -> Option<String> {
    let body = sole_template_body(inner.trim())?;
    let bytes = body.as_bytes();

    let mut interpolation: Option<(usize, usize)> = None;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                if interpolation.is_some() {
                    return None;
                }
                let end = scan_group(bytes, i + 1)?;
                interpolation = Some((i, end));
                i = end;
            }
            _ => i += 1,
        }
    }

    let (start, end) = interpolation?;
    let pre = &body[..start];
    let expr = body[start + 2..end - 1].trim();
    let post = &body[end..];
    if expr.is_empty() || expr.contains(['{', '}', '`']) || pre.contains('\n') || post.contains('\n') {
        return None;
    }

    if pre.is_empty() && post.is_empty() {
        return Some(expr.to_string());
    }
    let mut parts = Vec::with_capacity(3);
    if !pre.is_empty() {
        parts.push(quote_single(pre));
    }
    if SIMPLE_EXPR_REGEX.is_match(expr) {
        parts.push(expr.to_string());
    } else {
        parts.push(format!("({})", expr));
    }
    if !post.is_empty() {
        parts.push(quote_single(post));
    }
    Some(parts.join(" + "))
}

/// Template literal text as a single-quoted string literal. Escapes carry
/// over unchanged; bare quotes get escaped.
fn quote_single(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '\'' => out.push_str("\\'"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Body of a template literal that can live in a plain `"..."` attribute.
fn plain_template_body(inner: &str) -> Option<&str> {
    let body = sole_template_body(inner)?;
    if body.contains("${") || body.contains(['"', '\n', '\\']) {
        return None;
    }
    Some(body)
}
