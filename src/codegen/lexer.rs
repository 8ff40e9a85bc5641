//! Lossless token stream over generated TypeScript/JSX source.
//!
//! This is not a parser. It knows just enough to tell string, template and
//! comment regions apart from code, and to group balanced `{...}` blocks so
//! rewrites can address a whole expression container at once. Every token
//! borrows a slice of the input: concatenating the token texts reproduces
//! the source byte for byte.
//!
//! Token boundaries only ever fall on ASCII bytes (non-ASCII bytes are
//! treated as identifier characters), so slicing is always char-aligned.

/// Words after which a quote character starts a string literal.
const STRING_PRECEDING_KEYWORDS: &[&str] = &[
    "return", "case", "typeof", "in", "of", "else", "throw", "yield", "await", "export",
    "default", "from", "import", "void", "delete",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Run of whitespace, including newlines.
    Space,
    /// `// ...` up to (not including) the newline, or `/* ... */`.
    Comment,
    /// Single- or double-quoted string. Unterminated strings stop before the newline.
    Str,
    /// Backtick template literal, interpolations included.
    Template,
    /// Balanced `{ ... }` group. Runs to end of input when never closed.
    Block,
    /// Identifier, keyword or number.
    Ident,
    /// Any other single byte.
    Punct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: usize,
}

impl<'a> Token<'a> {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }

    /// Whitespace and comments.
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Space | TokenKind::Comment)
    }

    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct && self.text.len() == 1 && self.text.starts_with(c)
    }

    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == word
    }

    /// Contents of a `Block` token without its braces.
    pub fn block_inner(&self) -> &'a str {
        block_inner(self.text)
    }
}

/// Strip the outer braces of a block's text. Unterminated blocks keep their tail.
pub fn block_inner(text: &str) -> &str {
    let Some(body) = text.strip_prefix('{') else {
        return text;
    };
    if is_closed_group(text) {
        &body[..body.len() - 1]
    } else {
        body
    }
}

/// Whether `text` is one complete bracket group, closer included.
pub fn is_closed_group(text: &str) -> bool {
    group_end(text, 0) == Some(text.len())
}

/// What the scanner saw last, ignoring whitespace and comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Prev {
    Start,
    Punct(u8),
    Word(usize, usize),
    Value,
}

impl Prev {
    /// Whether a quote at `pos` opens a string literal in this context.
    ///
    /// Quotes after a word (`Don't`) or directly after a closing `>` of a
    /// tag (`<p>'hi'</p>`) are JSX text, not string delimiters.
    pub(crate) fn opens_string(&self, bytes: &[u8], pos: usize) -> bool {
        if pos > 0 && bytes[pos - 1] == b'>' {
            return false;
        }
        match *self {
            Prev::Start | Prev::Punct(_) => true,
            Prev::Word(s, e) => std::str::from_utf8(&bytes[s..e])
                .map(|w| STRING_PRECEDING_KEYWORDS.contains(&w))
                .unwrap_or(false),
            Prev::Value => false,
        }
    }
}

pub fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c)
}

/// End (exclusive) of the quoted string starting at `start`.
pub(crate) fn scan_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// End (exclusive) of the template literal starting at `start`.
pub(crate) fn scan_template(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => return i + 1,
            b'$' if bytes.get(i + 1) == Some(&b'{') => match scan_group(bytes, i + 1) {
                Some(end) => i = end,
                None => return bytes.len(),
            },
            _ => i += 1,
        }
    }
    bytes.len()
}

fn scan_comment(bytes: &[u8], start: usize) -> Option<usize> {
    match bytes.get(start + 1) {
        Some(b'/') => Some(
            bytes[start..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|p| start + p)
                .unwrap_or(bytes.len()),
        ),
        Some(b'*') => {
            let mut i = start + 2;
            while i + 1 < bytes.len() {
                if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                    return Some(i + 2);
                }
                i += 1;
            }
            Some(bytes.len())
        }
        _ => None,
    }
}

/// End (exclusive) of the bracket group opened at `open` (`(`, `[` or `{`).
///
/// String, template and comment contents are skipped. Returns `None` when
/// the group is never closed.
pub(crate) fn scan_group(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    let mut prev = Prev::Start;
    while i < bytes.len() {
        match bytes[i] {
            b @ (b'(' | b'[' | b'{') => {
                depth += 1;
                prev = Prev::Punct(b);
                i += 1;
            }
            b')' | b']' | b'}' => {
                depth = depth.saturating_sub(1);
                i += 1;
                if depth == 0 {
                    return Some(i);
                }
                prev = Prev::Value;
            }
            _ => {
                let (kind, end) = next_token(bytes, i, prev);
                prev = advance_prev(prev, kind, bytes, i, end);
                i = end;
            }
        }
    }
    None
}

/// Public wrapper over [`scan_group`] for string slices.
pub fn group_end(src: &str, open: usize) -> Option<usize> {
    match src.as_bytes().get(open) {
        Some(b'(' | b'[' | b'{') => scan_group(src.as_bytes(), open),
        _ => None,
    }
}

fn advance_prev(prev: Prev, kind: TokenKind, bytes: &[u8], start: usize, end: usize) -> Prev {
    match kind {
        TokenKind::Space | TokenKind::Comment => prev,
        TokenKind::Ident => Prev::Word(start, end),
        TokenKind::Punct => Prev::Punct(bytes[start]),
        TokenKind::Str | TokenKind::Template | TokenKind::Block => Prev::Value,
    }
}

fn next_token(bytes: &[u8], i: usize, prev: Prev) -> (TokenKind, usize) {
    let b = bytes[i];
    if is_space(b) {
        let len = bytes[i..].iter().take_while(|&&c| is_space(c)).count();
        return (TokenKind::Space, i + len);
    }
    if b == b'/' {
        if let Some(end) = scan_comment(bytes, i) {
            return (TokenKind::Comment, end);
        }
    }
    if (b == b'\'' || b == b'"') && prev.opens_string(bytes, i) {
        return (TokenKind::Str, scan_string(bytes, i));
    }
    if b == b'`' {
        return (TokenKind::Template, scan_template(bytes, i));
    }
    if b == b'{' {
        return (TokenKind::Block, scan_group(bytes, i).unwrap_or(bytes.len()));
    }
    if is_ident_byte(b) {
        let len = bytes[i..].iter().take_while(|&&c| is_ident_byte(c)).count();
        return (TokenKind::Ident, i + len);
    }
    (TokenKind::Punct, i + 1)
}

/// Split `src` into a flat, lossless token stream. Braced groups are single
/// `Block` tokens; tokenize [`Token::block_inner`] to look inside one.
pub fn tokenize(src: &str) -> Vec<Token<'_>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut prev = Prev::Start;
    let mut i = 0;
    while i < bytes.len() {
        let (kind, end) = next_token(bytes, i, prev);
        prev = advance_prev(prev, kind, bytes, i, end);
        tokens.push(Token {
            kind,
            text: &src[i..end],
            start: i,
        });
        i = end;
    }
    tokens
}

/// Index of the next non-trivia token at or after `from`.
pub fn next_significant(tokens: &[Token<'_>], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&i| !tokens[i].is_trivia())
}
