//! Shared utility functions for the appfoundry crate.

/// Extract a JSON array from text that may contain other content.
/// Spans from the first `[` to the last `]`, so prose around the array and
/// nested arrays inside it are both tolerated.
pub fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

/// First `max_chars` characters of `text`, on a char boundary.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_array_simple() {
        assert_eq!(extract_json_array(r#"[{"a": 1}]"#), Some(r#"[{"a": 1}]"#));
    }

    #[test]
    fn test_extract_json_array_with_fences() {
        let text = "Here you go:\n```json\n[{\"tags\": [1, 2]}]\n```\nEnjoy";
        assert_eq!(extract_json_array(text), Some(r#"[{"tags": [1, 2]}]"#));
    }

    #[test]
    fn test_extract_json_array_none() {
        assert_eq!(extract_json_array("No JSON here"), None);
        assert_eq!(extract_json_array("] backwards ["), None);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 2), "he");
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("", 0), "");
    }
}
