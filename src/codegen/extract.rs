//! Locating a component's primary return expression.

use super::lexer::{TokenKind, group_end, tokenize};

/// Find the first usable `return` expression in `src`.
///
/// Three shapes are tried in order, each over every `return` in source
/// order: a parenthesized expression starting with markup, a braced block,
/// and a bare expression (markup-first). Returns the trimmed expression
/// without its surrounding brackets.
pub fn extract_return_block(src: &str) -> Option<String> {
    let mut returns = Vec::new();
    collect_returns(src, 0, &mut returns);

    let starts: Vec<usize> = returns
        .iter()
        .filter_map(|&after| skip_trivia(src, after))
        .collect();

    starts
        .iter()
        .find_map(|&q| parenthesized_markup(src, q))
        .or_else(|| starts.iter().find_map(|&q| braced(src, q)))
        .or_else(|| starts.iter().find_map(|&q| bare(src, q, true)))
        .or_else(|| starts.iter().find_map(|&q| bare(src, q, false)))
}

/// Byte offsets just past every `return` keyword that sits in code.
fn collect_returns(src: &str, base: usize, out: &mut Vec<usize>) {
    for tok in tokenize(&src[base..]) {
        let start = base + tok.start;
        match tok.kind {
            TokenKind::Ident if tok.text == "return" => out.push(start + tok.text.len()),
            TokenKind::Block => {
                let inner_start = start + 1;
                if inner_start < src.len() {
                    let inner = tok.block_inner();
                    collect_returns(&src[..inner_start + inner.len()], inner_start, out);
                }
            }
            _ => {}
        }
    }
}

/// First offset at or after `from` that is not whitespace or a comment.
fn skip_trivia(src: &str, from: usize) -> Option<usize> {
    tokenize(&src[from..])
        .into_iter()
        .find(|t| !t.is_trivia())
        .map(|t| from + t.start)
}

fn parenthesized_markup(src: &str, q: usize) -> Option<String> {
    if src.as_bytes()[q] != b'(' {
        return None;
    }
    let end = group_end(src, q)?;
    let inner = src[q + 1..end - 1].trim();
    inner.starts_with('<').then(|| inner.to_string())
}

fn braced(src: &str, q: usize) -> Option<String> {
    if src.as_bytes()[q] != b'{' {
        return None;
    }
    let end = group_end(src, q)?;
    let inner = src[q + 1..end - 1].trim();
    (!inner.is_empty()).then(|| inner.to_string())
}

/// Expression after `return` up to `;`, the end of the enclosing block or
/// (for non-markup expressions) the end of the line.
fn bare(src: &str, q: usize, markup_only: bool) -> Option<String> {
    let rest = &src[q..];
    let is_markup = rest.starts_with('<');
    if markup_only && !is_markup {
        return None;
    }
    if rest.starts_with([';', '}', ')']) {
        return None;
    }

    let mut depth = 0usize;
    let mut end = rest.len();
    for tok in tokenize(rest) {
        match tok.kind {
            TokenKind::Punct => match tok.text {
                "(" | "[" => depth += 1,
                ")" | "]" | "}" if depth == 0 => {
                    end = tok.start;
                    break;
                }
                ")" | "]" => depth -= 1,
                ";" if depth == 0 => {
                    end = tok.start;
                    break;
                }
                _ => {}
            },
            TokenKind::Space if depth == 0 && !is_markup && tok.text.contains('\n') => {
                end = tok.start;
                break;
            }
            _ => {}
        }
    }

    let expr = rest[..end].trim();
    (!expr.is_empty()).then(|| expr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parenthesized_markup() {
        let src = "export default function Home(){ return (<div>hi</div>) }";
        assert_eq!(extract_return_block(src).as_deref(), Some("<div>hi</div>"));
    }

    #[test]
    fn test_skips_non_markup_parenthesized_returns() {
        let src = r#"
function helper() { return (a + b); }
export default function Page() {
  const x = 1;
  return (
    <main className="p-4">
      <h1>{title}</h1>
    </main>
  );
}"#;
        let block = extract_return_block(src).unwrap();
        assert!(block.starts_with("<main"));
        assert!(block.ends_with("</main>"));
    }

    #[test]
    fn test_return_inside_string_is_ignored() {
        let src = "const s = 'return (<b>no</b>)';\nfunction A() { return (<i>yes</i>); }";
        assert_eq!(extract_return_block(src).as_deref(), Some("<i>yes</i>"));
    }

    #[test]
    fn test_braced_return() {
        let src = "function cfg() { return { a: 1 }; }";
        assert_eq!(extract_return_block(src).as_deref(), Some("a: 1"));
    }

    #[test]
    fn test_bare_markup_return_spans_lines() {
        let src = "function A() {\n  return <section>\n    <p>x</p>\n  </section>;\n}";
        assert_eq!(
            extract_return_block(src).as_deref(),
            Some("<section>\n    <p>x</p>\n  </section>")
        );
    }

    #[test]
    fn test_bare_expression_stops_at_line_end() {
        let src = "function A() {\n  return value\n}";
        assert_eq!(extract_return_block(src).as_deref(), Some("value"));
    }

    #[test]
    fn test_no_return() {
        assert_eq!(extract_return_block("const a = 1;"), None);
        assert_eq!(extract_return_block("function f() { return; }"), None);
    }
}
