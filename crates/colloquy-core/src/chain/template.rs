//! `{field}` placeholder substitution for step prompts.
//!
//! A placeholder is `{name}` where `name` is made of ASCII letters, digits,
//! `_`, `-` and `.`; dots walk into nested objects (`{lookup.city}`). Any
//! other brace is copied through literally. Unresolved placeholders render
//! as an empty string and are logged; rendering never fails.

use colloquy_types::session::SessionData;
use serde_json::Value;

/// Substitute placeholders in `template` from `data`.
pub fn render_template(template: &str, data: &SessionData) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder(&after[..close]) => {
                let name = &after[..close];
                match lookup(data, name) {
                    Some(value) => out.push_str(&value_to_text(value)),
                    None => {
                        tracing::warn!(placeholder = name, "unresolved template placeholder");
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Names of all placeholders in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder(&after[..close]) => {
                found.push(&after[..close]);
                rest = &after[close + 1..];
            }
            _ => rest = after,
        }
    }
    found
}

fn is_placeholder(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn lookup<'a>(data: &'a SessionData, path: &str) -> Option<&'a Value> {
    // Exact keys win so ids containing dots still resolve.
    if let Some(value) = data.get(path) {
        return Some(value);
    }
    let mut parts = path.split('.');
    let mut current = data.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> SessionData {
        match value {
            Value::Object(map) => map,
            _ => panic!("test data must be an object"),
        }
    }

    #[test]
    fn test_substitutes_fields() {
        let d = data(json!({"ask_name": "Alice", "age": 30}));
        assert_eq!(render_template("Hi {ask_name}, you are {age}", &d), "Hi Alice, you are 30");
    }

    #[test]
    fn test_unresolved_renders_empty() {
        let d = SessionData::new();
        assert_eq!(render_template("Hi {ask_name}!", &d), "Hi !");
    }

    #[test]
    fn test_nested_lookup() {
        let d = data(json!({"lookup": {"city": "Oslo", "tags": ["a", "b"]}}));
        assert_eq!(render_template("{lookup.city}/{lookup.tags.1}", &d), "Oslo/b");
    }

    #[test]
    fn test_literal_braces_pass_through() {
        let d = data(json!({"x": 1}));
        assert_eq!(render_template("{ not a field } {x} {", &d), "{ not a field } 1 {");
        assert_eq!(render_template("{}", &d), "{}");
    }

    #[test]
    fn test_null_renders_empty() {
        let d = data(json!({"x": null}));
        assert_eq!(render_template("[{x}]", &d), "[]");
    }

    #[test]
    fn test_placeholders_lists_tokens() {
        assert_eq!(placeholders("Hi {name}, {a.b} {bad token}"), vec!["name", "a.b"]);
    }
}
