//! Best-effort projection of JSX into inert static HTML.
//!
//! Every `{expression}` placeholder is dropped and event handlers never
//! survive, nor do raw-HTML injection attributes such as `srcDoc`.
//! `<script>` elements are removed with their content; embedding tags
//! (`iframe`, `object`, `embed`) lose the tag but keep their fallback
//! children. What remains is the static markup skeleton of the component,
//! good enough for a non-executing preview.

use super::lexer::{group_end, is_ident_byte};

/// Attributes that never make it into the projection.
const DROPPED_ATTRIBUTES: &[&str] = &["dangerouslySetInnerHTML", "srcdoc", "key", "ref"];

/// Attributes whose value is a URL that could carry a script scheme.
const URL_ATTRIBUTES: &[&str] = &[
    "href",
    "src",
    "data",
    "action",
    "formaction",
    "poster",
    "background",
    "xlink:href",
];

/// Elements that load another document; only their children are kept.
const EMBEDDING_ELEMENTS: &[&str] = &[
    "iframe", "frame", "frameset", "object", "embed", "applet", "base",
];

/// Project a JSX fragment to static HTML.
pub fn project_to_html(jsx: &str) -> String {
    let mut p = Projector {
        src: jsx,
        bytes: jsx.as_bytes(),
        i: 0,
        out: String::with_capacity(jsx.len()),
    };
    p.run();
    collapse_whitespace(&p.out)
}

struct Projector<'a> {
    src: &'a str,
    bytes: &'a [u8],
    i: usize,
    out: String,
}

enum AttrValue {
    Flag,
    Text(String),
    Dynamic,
}

impl<'a> Projector<'a> {
    fn run(&mut self) {
        while self.i < self.bytes.len() {
            match self.bytes[self.i] {
                b'{' => match group_end(self.src, self.i) {
                    Some(end) => self.i = end,
                    None => self.i += 1,
                },
                b'}' => self.i += 1,
                b'<' => self.tag(),
                _ => self.copy_char(),
            }
        }
    }

    fn copy_char(&mut self) {
        if let Some(ch) = self.src[self.i..].chars().next() {
            self.out.push(ch);
            self.i += ch.len_utf8();
        } else {
            self.i = self.bytes.len();
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.i + offset).copied()
    }

    fn skip_spaces(&mut self) {
        while self.peek(0).is_some_and(|b| b.is_ascii_whitespace()) {
            self.i += 1;
        }
    }

    fn read_name(&mut self) -> &'a str {
        let src = self.src;
        let start = self.i;
        while self
            .peek(0)
            .is_some_and(|b| is_ident_byte(b) || matches!(b, b'.' | b'-' | b':'))
        {
            self.i += 1;
        }
        &src[start..self.i]
    }

    fn tag(&mut self) {
        match self.peek(1) {
            Some(b'/') => {
                self.i += 2;
                self.skip_spaces();
                let name = self.read_name();
                self.skip_to_tag_end();
                if let Some(mapped) = element_name(name) {
                    self.out.push_str("</");
                    self.out.push_str(mapped);
                    self.out.push('>');
                }
            }
            Some(b'>') => self.i += 2,
            Some(b'!') if self.src[self.i..].starts_with("<!--") => {
                self.i = match self.src[self.i..].find("-->") {
                    Some(pos) => self.i + pos + 3,
                    None => self.bytes.len(),
                };
            }
            Some(b) if b.is_ascii_alphabetic() => self.open_tag(),
            _ => {
                self.out.push_str("&lt;");
                self.i += 1;
            }
        }
    }

    fn skip_to_tag_end(&mut self) {
        while let Some(b) = self.peek(0) {
            self.i += 1;
            if b == b'>' {
                return;
            }
        }
    }

    fn open_tag(&mut self) {
        self.i += 1;
        let name = self.read_name();
        let mut attrs = String::new();
        let mut self_closing = false;

        loop {
            self.skip_spaces();
            match self.peek(0) {
                None => break,
                Some(b'>') => {
                    self.i += 1;
                    break;
                }
                Some(b'/') if self.peek(1) == Some(b'>') => {
                    self.i += 2;
                    self_closing = true;
                    break;
                }
                Some(b'{') => match group_end(self.src, self.i) {
                    Some(end) => self.i = end,
                    None => self.i = self.bytes.len(),
                },
                Some(_) => {
                    let attr_name = self.read_name();
                    if attr_name.is_empty() {
                        self.i += 1;
                        continue;
                    }
                    let value = self.attr_value();
                    if let Some(rendered) = render_attribute(attr_name, value) {
                        attrs.push_str(&rendered);
                    }
                }
            }
        }

        if name.eq_ignore_ascii_case("script") {
            if !self_closing {
                self.skip_script_body();
            }
            return;
        }

        let Some(mapped) = element_name(name) else {
            return;
        };
        self.out.push('<');
        self.out.push_str(mapped);
        self.out.push_str(&attrs);
        self.out.push('>');
        if self_closing {
            self.out.push_str("</");
            self.out.push_str(mapped);
            self.out.push('>');
        }
    }

    fn attr_value(&mut self) -> AttrValue {
        let src = self.src;
        let save = self.i;
        self.skip_spaces();
        if self.peek(0) != Some(b'=') {
            self.i = save;
            return AttrValue::Flag;
        }
        self.i += 1;
        self.skip_spaces();
        match self.peek(0) {
            Some(q @ (b'"' | b'\'')) => {
                let start = self.i + 1;
                let end = src[start..]
                    .find(q as char)
                    .map(|p| start + p)
                    .unwrap_or(src.len());
                self.i = (end + 1).min(src.len());
                AttrValue::Text(src[start..end].to_string())
            }
            Some(b'{') => {
                let end = group_end(src, self.i).unwrap_or(src.len());
                let expr = &src[self.i..end];
                self.i = end;
                let inner = expr
                    .strip_prefix('{')
                    .and_then(|e| e.strip_suffix('}'))
                    .unwrap_or("")
                    .trim();
                match string_literal(inner) {
                    Some(text) => AttrValue::Text(text.to_string()),
                    None => AttrValue::Dynamic,
                }
            }
            Some(_) => {
                let start = self.i;
                while self
                    .peek(0)
                    .is_some_and(|b| !b.is_ascii_whitespace() && b != b'>' && b != b'/')
                {
                    self.i += 1;
                }
                AttrValue::Text(src[start..self.i].to_string())
            }
            None => AttrValue::Flag,
        }
    }

    fn skip_script_body(&mut self) {
        let rest = self.src[self.i..].to_ascii_lowercase();
        self.i = match rest.find("</script") {
            Some(pos) => {
                let close = self.i + pos;
                self.src[close..]
                    .find('>')
                    .map(|p| close + p + 1)
                    .unwrap_or(self.bytes.len())
            }
            None => self.bytes.len(),
        };
    }
}

/// HTML element name for a JSX element, `None` for fragments.
fn element_name(name: &str) -> Option<&str> {
    match name {
        "" | "Fragment" | "React.Fragment" => None,
        "Link" => Some("a"),
        "Image" => Some("img"),
        other if EMBEDDING_ELEMENTS.iter().any(|e| e.eq_ignore_ascii_case(other)) => None,
        other => Some(other),
    }
}

fn is_event_handler(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.len() > 2 && lower.starts_with("on") && lower.as_bytes()[2].is_ascii_alphabetic()
}

fn render_attribute(name: &str, value: AttrValue) -> Option<String> {
    let dropped = DROPPED_ATTRIBUTES.iter().any(|a| a.eq_ignore_ascii_case(name));
    if dropped || is_event_handler(name) {
        return None;
    }
    let html_name = match name {
        "className" => "class",
        "htmlFor" => "for",
        other => other,
    };
    match value {
        AttrValue::Flag => Some(format!(" {}", html_name)),
        AttrValue::Dynamic => None,
        AttrValue::Text(text) => {
            if URL_ATTRIBUTES.contains(&html_name.to_ascii_lowercase().as_str())
                && is_unsafe_url(&text)
            {
                return None;
            }
            Some(format!(" {}=\"{}\"", html_name, text.replace('"', "&quot;")))
        }
    }
}

/// Script schemes, and `data:` URLs other than raster images.
fn is_unsafe_url(value: &str) -> bool {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    if let Some(data) = compact.strip_prefix("data:") {
        return !data.starts_with("image/") || data.starts_with("image/svg");
    }
    compact.starts_with("javascript:") || compact.starts_with("vbscript:")
}

/// Contents of a plain string literal expression: `"x"`, `'x'` or a
/// template without interpolation.
fn string_literal(expr: &str) -> Option<&str> {
    let first = expr.chars().next()?;
    if !matches!(first, '"' | '\'' | '`') || expr.len() < 2 || !expr.ends_with(first) {
        return None;
    }
    let body = &expr[1..expr.len() - 1];
    if body.contains(first) || body.contains('\\') || (first == '`' && body.contains("${")) {
        return None;
    }
    Some(body)
}

fn collapse_whitespace(html: &str) -> String {
    html.split_whitespace().collect::<Vec<_>>().join(" ")
}
