//! Front matter parsing.
//!
//! Documents may open with a `---`-bounded header carrying test
//! configuration. The payload is tried as JSON, then TOML, then YAML.
//! Absent or unparseable front matter degrades to the defaults with a
//! warning; it never fails a file.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, warn};

fn front_matter_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\A\s*---\n(.*?)\n---(?:\n|\z)").ok())
        .as_ref()
}

/// Parse a document's front matter into a JSON mapping.
///
/// Returns an empty mapping when no front matter is present or when the
/// payload is not a mapping in any supported syntax.
#[must_use]
pub fn parse_front_matter(content: &str, filename: &str) -> Value {
    let Some(block) = front_matter_block(content) else {
        debug!(filename, "no front matter");
        return Value::Object(serde_json::Map::new());
    };
    let parsed = parse_json(block)
        .or_else(|| parse_toml(block))
        .or_else(|| parse_yaml(block));
    match parsed {
        Some(Value::Object(map)) => Value::Object(map),
        Some(other) => {
            warn!(
                filename,
                "invalid front matter: expected mapping, got {}",
                value_kind(&other)
            );
            Value::Object(serde_json::Map::new())
        }
        None => {
            warn!(filename, "unable to parse front matter - verify valid JSON, TOML, or YAML");
            Value::Object(serde_json::Map::new())
        }
    }
}

/// The raw front matter payload, if the document opens with one.
#[must_use]
pub fn front_matter_block(content: &str) -> Option<&str> {
    let re = front_matter_pattern()?;
    re.captures(content).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Read just enough of a document to expose its front matter block.
///
/// Used where only the header is of interest (for example the per-file
/// retry budget), so large documents are not re-read in full.
#[must_use]
pub fn front_matter_head(content: &str) -> &str {
    let mut seen_open = false;
    let mut end = 0;
    for line in content.split_inclusive('\n') {
        end += line.len();
        let trimmed = line.trim();
        if trimmed.is_empty() && !seen_open {
            continue;
        }
        if trimmed == "---" {
            if seen_open {
                return &content[..end];
            }
            seen_open = true;
        } else if !seen_open {
            break;
        }
    }
    if seen_open { content } else { "" }
}

fn parse_json(s: &str) -> Option<Value> {
    serde_json::from_str(s).ok()
}

fn parse_toml(s: &str) -> Option<Value> {
    toml::from_str(s).ok()
}

fn parse_yaml(s: &str) -> Option<Value> {
    serde_yml::from_str(s).ok()
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_front_matter() {
        let content = "---\ntest-options: +wildcard\n---\n>>> 1\n1\n";
        let fm = parse_front_matter(content, "t.md");
        assert_eq!(fm.get("test-options"), Some(&Value::String("+wildcard".into())));
    }

    #[test]
    fn test_json_front_matter() {
        let content = "---\n{\"test-type\": \"python\"}\n---\n";
        let fm = parse_front_matter(content, "t.md");
        assert_eq!(fm.get("test-type"), Some(&Value::String("python".into())));
    }

    #[test]
    fn test_toml_front_matter() {
        let content = "---\ntest-type = \"nushell\"\n---\n";
        let fm = parse_front_matter(content, "t.md");
        assert_eq!(fm.get("test-type"), Some(&Value::String("nushell".into())));
    }

    #[test]
    fn test_missing_front_matter() {
        let fm = parse_front_matter(">>> 1\n1\n", "t.md");
        assert_eq!(fm, Value::Object(serde_json::Map::new()));
    }

    #[test]
    fn test_non_mapping_front_matter_ignored() {
        let fm = parse_front_matter("---\n- a\n- b\n---\n", "t.md");
        assert_eq!(fm, Value::Object(serde_json::Map::new()));
    }

    #[test]
    fn test_leading_blank_lines_allowed() {
        let content = "\n\n---\ntest-type: python\n---\nbody\n";
        let fm = parse_front_matter(content, "t.md");
        assert_eq!(fm.get("test-type"), Some(&Value::String("python".into())));
    }

    #[test]
    fn test_front_matter_head() {
        let content = "---\na: 1\n---\n>>> big rest of file\n";
        assert_eq!(front_matter_head(content), "---\na: 1\n---\n");
        assert_eq!(front_matter_head(">>> no header\n"), "");
    }
}
