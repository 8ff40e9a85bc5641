//! Repair of unterminated string and template delimiters.
//!
//! Truncated model output often ends mid-template (`` `hello ${name ``) or
//! leaves a template open across a line break. The balancer walks the text
//! with a small context stack and closes every region it opened, so the
//! backtick count of its output is always even.

use std::borrow::Cow;

use super::lexer::{Prev, is_ident_byte};

#[derive(Debug, Clone, Copy)]
enum Ctx {
    /// Plain code. `brace` counts `{` opened inside an interpolation.
    Code { brace: usize },
    Str(u8),
    Template,
}

/// Number of backtick characters in `src`.
pub fn backtick_count(src: &str) -> usize {
    src.bytes().filter(|&b| b == b'`').count()
}

/// Run [`balance_quotes`] only when the backtick count is odd.
///
/// Balanced input is returned untouched.
pub fn balance_template_delimiters(src: &str) -> Cow<'_, str> {
    if backtick_count(src) % 2 == 0 {
        Cow::Borrowed(src)
    } else {
        Cow::Owned(balance_quotes(src))
    }
}

struct Balancer {
    out: Vec<u8>,
    stack: Vec<Ctx>,
    prev: Prev,
}

impl Balancer {
    fn new(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity + 8),
            stack: vec![Ctx::Code { brace: 0 }],
            prev: Prev::Start,
        }
    }

    /// Pop the innermost context, emitting whatever closes it.
    fn close_top(&mut self) {
        match self.stack.pop() {
            Some(Ctx::Str(q)) => self.out.push(q),
            Some(Ctx::Template) => self.out.push(b'`'),
            Some(Ctx::Code { brace }) => {
                for _ in 0..=brace {
                    self.out.push(b'}');
                }
            }
            None => {}
        }
        self.prev = Prev::Value;
    }

    /// Close everything above the base code context.
    fn unwind(&mut self) {
        while self.stack.len() > 1 {
            self.close_top();
        }
    }

    fn finish(self) -> String {
        String::from_utf8(self.out)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
    }
}

/// Close every string, template and interpolation left open in `src`.
///
/// A line break inside a string or template force-closes the region (and
/// any interpolations nested in it) before the newline. Backticks that are
/// string content are rewritten to the `\x60` escape and backticks inside
/// comments become `'`, so every backtick left in the output is a real
/// delimiter.
pub fn balance_quotes(src: &str) -> String {
    let bytes = src.as_bytes();
    let mut b = Balancer::new(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if c == b'\n' && b.stack.len() > 1 {
            b.unwind();
            b.out.push(c);
            b.prev = Prev::Start;
            i += 1;
            continue;
        }

        let top = b.stack.last().copied().unwrap_or(Ctx::Code { brace: 0 });
        match top {
            Ctx::Str(q) => {
                match c {
                    b'\\' => match bytes.get(i + 1) {
                        Some(b'`') => {
                            b.out.extend_from_slice(b"\\x60");
                            i += 2;
                            continue;
                        }
                        Some(&next) => {
                            b.out.push(c);
                            b.out.push(next);
                            i += 2;
                            continue;
                        }
                        None => b.out.push(c),
                    },
                    b'`' => b.out.extend_from_slice(b"\\x60"),
                    _ if c == q => {
                        b.out.push(c);
                        b.stack.pop();
                        b.prev = Prev::Value;
                    }
                    _ => b.out.push(c),
                }
                i += 1;
            }
            Ctx::Template => {
                match c {
                    b'\\' => match bytes.get(i + 1) {
                        Some(b'`') => {
                            b.out.extend_from_slice(b"\\x60");
                            i += 2;
                            continue;
                        }
                        Some(&next) => {
                            b.out.push(c);
                            b.out.push(next);
                            i += 2;
                            continue;
                        }
                        None => b.out.push(c),
                    },
                    b'`' => {
                        b.out.push(c);
                        b.stack.pop();
                        b.prev = Prev::Value;
                    }
                    b'$' if bytes.get(i + 1) == Some(&b'{') => {
                        b.out.extend_from_slice(b"${");
                        b.stack.push(Ctx::Code { brace: 0 });
                        b.prev = Prev::Start;
                        i += 2;
                        continue;
                    }
                    _ => b.out.push(c),
                }
                i += 1;
            }
            Ctx::Code { brace } => {
                let in_interpolation = b.stack.len() > 1;
                match c {
                    b'/' if matches!(bytes.get(i + 1), Some(b'/') | Some(b'*')) => {
                        let end = comment_end(bytes, i);
                        b.out.extend(
                            bytes[i..end]
                                .iter()
                                .map(|&x| if x == b'`' { b'\'' } else { x }),
                        );
                        i = end;
                        continue;
                    }
                    b'\'' | b'"' if b.prev.opens_string(bytes, i) => {
                        b.out.push(c);
                        b.stack.push(Ctx::Str(c));
                    }
                    b'`' => {
                        b.out.push(c);
                        b.stack.push(Ctx::Template);
                    }
                    b'{' if in_interpolation => {
                        b.out.push(c);
                        set_brace(&mut b.stack, brace + 1);
                        b.prev = Prev::Punct(c);
                    }
                    b'}' if in_interpolation => {
                        b.out.push(c);
                        if brace == 0 {
                            b.stack.pop();
                            b.prev = Prev::Value;
                        } else {
                            set_brace(&mut b.stack, brace - 1);
                            b.prev = Prev::Value;
                        }
                    }
                    _ if is_ident_byte(c) => {
                        let len = bytes[i..].iter().take_while(|&&x| is_ident_byte(x)).count();
                        b.out.extend_from_slice(&bytes[i..i + len]);
                        b.prev = Prev::Word(i, i + len);
                        i += len;
                        continue;
                    }
                    _ => {
                        b.out.push(c);
                        if !c.is_ascii_whitespace() {
                            b.prev = Prev::Punct(c);
                        }
                    }
                }
                i += 1;
            }
        }
    }

    b.unwind();
    b.finish()
}

fn set_brace(stack: &mut [Ctx], value: usize) {
    if let Some(Ctx::Code { brace }) = stack.last_mut() {
        *brace = value;
    }
}

fn comment_end(bytes: &[u8], start: usize) -> usize {
    if bytes.get(start + 1) == Some(&b'/') {
        return bytes[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| start + p)
            .unwrap_or(bytes.len());
    }
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}
