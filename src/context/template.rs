//! `${name}` placeholder substitution for script text.

use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::OnceLock;

static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();

fn placeholder_pattern() -> Option<&'static Regex> {
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
        .as_ref()
}

/// Replace each `${name}` that `lookup` resolves; unresolved placeholders stay verbatim
pub fn render<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let Some(pattern) = placeholder_pattern() else {
        return text.to_string();
    };

    pattern
        .replace_all(text, |caps: &Captures<'_>| match lookup(&caps[1]) {
            Some(value) => value,
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Names of every placeholder in `text`, in order of appearance
pub fn placeholders(text: &str) -> Vec<String> {
    placeholder_pattern()
        .map(|pattern| {
            pattern
                .captures_iter(text)
                .map(|caps| caps[1].to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Shell-facing text form of a value: strings as-is, scalar arrays space separated
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) if items.iter().all(|v| !v.is_array() && !v.is_object()) => items
            .iter()
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join(" "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_placeholders_substituted() {
        let rendered = render("docker pull ${image}:${tag}", |name| match name {
            "image" => Some("nginx".to_string()),
            "tag" => Some("1.27".to_string()),
            _ => None,
        });
        assert_eq!(rendered, "docker pull nginx:1.27");
    }

    #[test]
    fn test_unknown_placeholders_left_verbatim() {
        let rendered = render("echo ${missing} $HOME ${x", |_| None);
        assert_eq!(rendered, "echo ${missing} $HOME ${x");
    }

    #[test]
    fn test_placeholders_listed_in_order() {
        assert_eq!(
            placeholders("${a} and ${b} and ${a}"),
            vec!["a".to_string(), "b".to_string(), "a".to_string()]
        );
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&json!("v")), "v");
        assert_eq!(value_to_text(&json!(["alice", "bob"])), "alice bob");
        assert_eq!(value_to_text(&json!(42)), "42");
        assert_eq!(value_to_text(&json!({"k": 1})), r#"{"k":1}"#);
    }
}
