//! Pulls a JSON object candidate out of free-form provider text.

/// Extracts the JSON object candidate from a provider reply.
///
/// Handles raw JSON, replies wrapped in a ```` ```json ```` or bare ```` ``` ````
/// fence, and prose surrounding the object. When no `{ ... }` span is found
/// the trimmed text is returned unchanged so that parsing reports the real
/// problem.
#[must_use]
pub fn extract_json(raw: &str) -> &str {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    let text = text.trim();

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OBJECT: &str = r#"{"name": "HabitFlow", "features": ["streaks"]}"#;

    #[test]
    fn test_raw_object_is_unchanged() {
        assert_eq!(extract_json(OBJECT), OBJECT);
    }

    #[test]
    fn test_strips_json_fence() {
        let fenced = format!("```json\n{OBJECT}\n```");
        assert_eq!(extract_json(&fenced), OBJECT);
    }

    #[test]
    fn test_strips_bare_fence() {
        let fenced = format!("  ```\n{OBJECT}\n```  \n");
        assert_eq!(extract_json(&fenced), OBJECT);
    }

    #[test]
    fn test_strips_surrounding_prose() {
        let prose = format!("Here is the result: {OBJECT} Done.");
        assert_eq!(extract_json(&prose), OBJECT);
    }

    #[test]
    fn test_keeps_nested_objects_whole() {
        let nested = r#"note {"a": {"b": 1}} end"#;
        assert_eq!(extract_json(nested), r#"{"a": {"b": 1}}"#);
    }

    #[test]
    fn test_text_without_object_is_returned_trimmed() {
        assert_eq!(extract_json("  not json at all "), "not json at all");
        assert_eq!(extract_json("} backwards {"), "} backwards {");
    }
}
