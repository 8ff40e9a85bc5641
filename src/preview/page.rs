//! Inert HTML documents: the static projection and its placeholders.
//!
//! Nothing rendered here carries a script. The only external resource is
//! an optional stylesheet link.

pub(crate) const BASE_STYLE: &str = "html,body{margin:0;padding:0;background:#0b0b0b;font-family:system-ui,-apple-system,sans-serif}\
.preview-container{background:#fff;color:#111;border-radius:8px;padding:24px;min-height:400px;margin:16px}\
.preview-message{padding:12px;color:#6b7280;font-size:12px}\
.preview-message ul{margin:8px 0 0;padding-left:18px;font-family:ui-monospace,monospace}";

/// Escape text for use in element content and quoted attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub(crate) fn head(title: &str, stylesheet_url: Option<&str>, extra_style: &str) -> String {
    let link = stylesheet_url
        .map(|url| format!("\n  <link rel=\"stylesheet\" href=\"{}\" />", escape_html(url)))
        .unwrap_or_default();
    format!(
        "<head>\n  <meta charset=\"UTF-8\" />\n  <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\" />\n  <title>{}</title>{}\n  <style>{}{}</style>\n</head>",
        escape_html(title),
        link,
        BASE_STYLE,
        extra_style
    )
}

fn document(title: &str, body: &str, stylesheet_url: Option<&str>) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n{}\n<body>\n  <div id=\"root\" class=\"preview-container\">{}</div>\n</body>\n</html>\n",
        head(title, stylesheet_url, ""),
        body
    )
}

/// Document wrapping already-projected static markup.
pub fn static_document(title: &str, markup: &str, stylesheet_url: Option<&str>) -> String {
    document(title, markup, stylesheet_url)
}

/// Placeholder shown when no markup could be projected.
pub fn unavailable_document(title: &str, paths: &[String], stylesheet_url: Option<&str>) -> String {
    let mut body = String::from("<div class=\"preview-message\"><strong>Preview unavailable</strong>");
    if !paths.is_empty() {
        body.push_str("<ul>");
        for path in paths {
            body.push_str("<li>");
            body.push_str(&escape_html(path));
            body.push_str("</li>");
        }
        body.push_str("</ul>");
    }
    body.push_str("</div>");
    document(title, &body, stylesheet_url)
}

/// Placeholder for an artifact that has no stored code yet.
pub fn no_code_document(title: &str) -> String {
    document(
        title,
        "<div class=\"preview-message\">No code has been generated for this app yet.</div>",
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">Tom & 'Jerry'</a>"), "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;");
    }

    #[test]
    fn test_static_document_is_inert() {
        let html = static_document("My <App>", "<div>hi</div>", Some("https://cdn.example/app.css"));
        assert!(html.contains("<title>My &lt;App&gt;</title>"));
        assert!(html.contains("<div id=\"root\" class=\"preview-container\"><div>hi</div></div>"));
        assert!(html.contains("rel=\"stylesheet\" href=\"https://cdn.example/app.css\""));
        assert!(!html.contains("<script"));
    }

    #[test]
    fn test_unavailable_lists_files() {
        let html = unavailable_document("x", &["app/page.tsx".into(), "lib/<a>.ts".into()], None);
        assert!(html.contains("Preview unavailable"));
        assert!(html.contains("<li>app/page.tsx</li>"));
        assert!(html.contains("<li>lib/&lt;a&gt;.ts</li>"));
    }

    #[test]
    fn test_no_code_document() {
        assert!(no_code_document("Empty").contains("No code has been generated"));
    }
}
