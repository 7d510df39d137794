//! Test option decoding and precedence.
//!
//! Options are annotated inline in test expressions (`+name`, `+name=value`,
//! `-name`) or declared as strings in config. Inline annotations take
//! precedence over config strings; config strings are applied in reverse
//! declaration order so the first-declared string wins among them.

use crate::spec::DocumentSpec;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// A decoded option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl OptionValue {
    /// Truthiness used when an option gates behavior.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl Serialize for OptionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Str(s) => serializer.serialize_str(s),
        }
    }
}

/// Effective option map for a test.
pub type TestOptions = BTreeMap<String, OptionValue>;

/// Option keys consumed by the engine.
pub mod keys {
    pub const SKIP: &str = "skip";
    pub const SKIPREST: &str = "skiprest";
    pub const SOLO: &str = "solo";
    pub const FAILS: &str = "fails";
    pub const CASE: &str = "case";
    pub const SPACE: &str = "space";
    pub const PATHS: &str = "paths";
    pub const WILDCARD: &str = "wildcard";
    pub const PARSE: &str = "parse";
    pub const DIFF: &str = "diff";
    pub const SEP: &str = "sep";
    pub const BLANKLINE: &str = "blankline";
    pub const ERROR_DETAIL: &str = "error-detail";
    pub const PPRINT: &str = "pprint";
    pub const RETRY_ON_FAIL: &str = "retry-on-fail";
}

fn options_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"[+]([\w\-]+)(?:\s*=\s*((?:'.*?')|(?:".*?")|(?:[^\s]+)))?|[-]([\w\-]+)"#).ok()
    })
    .as_ref()
}

/// Decode an option string into a map.
///
/// Tokens apply left to right; a later occurrence of a name wins.
#[must_use]
pub fn decode_options(s: &str) -> TestOptions {
    let Some(re) = options_pattern() else {
        return TestOptions::new();
    };
    let mut options = TestOptions::new();
    for cap in re.captures_iter(s) {
        if let Some(neg) = cap.get(3) {
            options.insert(neg.as_str().to_string(), OptionValue::Bool(false));
        } else if let Some(name) = cap.get(1) {
            let value = cap
                .get(2)
                .map_or(OptionValue::Bool(true), |v| parse_option_value(v.as_str()));
            options.insert(name.as_str().to_string(), value);
        }
    }
    options
}

/// Parse a bare option value using simplified YAML-style coercion.
fn parse_option_value(s: &str) -> OptionValue {
    if s.len() >= 2 {
        let quoted = (s.starts_with('\'') && s.ends_with('\''))
            || (s.starts_with('"') && s.ends_with('"'));
        if quoted {
            return OptionValue::Str(s[1..s.len() - 1].to_string());
        }
    }
    match s.to_lowercase().as_str() {
        "true" | "yes" | "on" => return OptionValue::Bool(true),
        "false" | "no" | "off" => return OptionValue::Bool(false),
        _ => {}
    }
    if let Ok(n) = s.parse::<i64>() {
        return OptionValue::Int(n);
    }
    if let Ok(f) = s.parse::<f64>() {
        return OptionValue::Float(f);
    }
    OptionValue::Str(s.to_string())
}

/// Compute the effective option map for a test.
///
/// Config-level option strings are decoded in reverse declaration order
/// (the first-declared wins among them), then per-test inline annotations
/// are laid on top. A `wildcard=true` value is resolved to the spec's
/// wildcard token.
#[must_use]
pub fn effective_options(
    config_options: &[String],
    inline: &TestOptions,
    spec: &DocumentSpec,
) -> TestOptions {
    let mut options = TestOptions::new();
    for s in config_options.iter().rev() {
        options.extend(decode_options(s));
    }
    for (k, v) in inline {
        options.insert(k.clone(), v.clone());
    }
    if options.get(keys::WILDCARD) == Some(&OptionValue::Bool(true)) {
        options.insert(
            keys::WILDCARD.to_string(),
            OptionValue::Str(spec.wildcard.clone()),
        );
    }
    options
}

/// Look up an option, treating a missing key as `default`.
#[must_use]
pub fn option_truthy(options: &TestOptions, name: &str, default: bool) -> bool {
    options.get(name).map_or(default, OptionValue::is_truthy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{SpecError, python_spec};

    #[test]
    fn test_decode_bare_flags() {
        let options = decode_options("+skip -case +parse");
        assert_eq!(options.get("skip"), Some(&OptionValue::Bool(true)));
        assert_eq!(options.get("case"), Some(&OptionValue::Bool(false)));
        assert_eq!(options.get("parse"), Some(&OptionValue::Bool(true)));
    }

    #[test]
    fn test_decode_values() {
        let options = decode_options("+retry-on-fail=2 +sep='---' +rate=0.5 +mode=fast");
        assert_eq!(options.get("retry-on-fail"), Some(&OptionValue::Int(2)));
        assert_eq!(options.get("sep"), Some(&OptionValue::Str("---".into())));
        assert_eq!(options.get("rate"), Some(&OptionValue::Float(0.5)));
        assert_eq!(options.get("mode"), Some(&OptionValue::Str("fast".into())));
    }

    #[test]
    fn test_decode_yaml_style_bools() {
        let options = decode_options("+a=yes +b=off +c=True +d=NO");
        assert_eq!(options.get("a"), Some(&OptionValue::Bool(true)));
        assert_eq!(options.get("b"), Some(&OptionValue::Bool(false)));
        assert_eq!(options.get("c"), Some(&OptionValue::Bool(true)));
        assert_eq!(options.get("d"), Some(&OptionValue::Bool(false)));
    }

    #[test]
    fn test_decode_quoted_value_is_literal() {
        let options = decode_options("+skip='CI' +name=\"two words\"");
        assert_eq!(options.get("skip"), Some(&OptionValue::Str("CI".into())));
        assert_eq!(options.get("name"), Some(&OptionValue::Str("two words".into())));
    }

    #[test]
    fn test_decode_later_token_wins() {
        let options = decode_options("+skip -skip");
        assert_eq!(options.get("skip"), Some(&OptionValue::Bool(false)));
    }

    #[test]
    fn test_decode_empty_is_noop() {
        assert!(decode_options("").is_empty());
        assert!(decode_options("no annotations here").is_empty());
    }

    #[test]
    fn test_effective_first_config_string_wins() -> Result<(), SpecError> {
        let config = vec!["+wildcard -case".to_string(), "+case +diff".to_string()];
        let options = effective_options(&config, &TestOptions::new(), &python_spec()?);
        // First-declared string wins among config strings.
        assert_eq!(options.get("case"), Some(&OptionValue::Bool(false)));
        assert_eq!(options.get("diff"), Some(&OptionValue::Bool(true)));
        Ok(())
    }

    #[test]
    fn test_effective_inline_overrides_config() -> Result<(), SpecError> {
        let config = vec!["-case".to_string()];
        let mut inline = TestOptions::new();
        inline.insert("case".into(), OptionValue::Bool(true));
        let options = effective_options(&config, &inline, &python_spec()?);
        assert_eq!(options.get("case"), Some(&OptionValue::Bool(true)));
        Ok(())
    }

    #[test]
    fn test_effective_resolves_spec_wildcard() -> Result<(), SpecError> {
        let config = vec!["+wildcard".to_string()];
        let options = effective_options(&config, &TestOptions::new(), &python_spec()?);
        assert_eq!(options.get("wildcard"), Some(&OptionValue::Str("...".into())));
        Ok(())
    }

    #[test]
    fn test_effective_explicit_wildcard_kept() -> Result<(), SpecError> {
        let config = vec!["+wildcard=??".to_string()];
        let options = effective_options(&config, &TestOptions::new(), &python_spec()?);
        assert_eq!(options.get("wildcard"), Some(&OptionValue::Str("??".into())));
        Ok(())
    }

    #[test]
    fn test_effective_idempotent_for_empty_config() -> Result<(), SpecError> {
        let mut inline = TestOptions::new();
        inline.insert("parse".into(), OptionValue::Bool(true));
        let first = effective_options(&[], &inline, &python_spec()?);
        let second = effective_options(&[], &first, &python_spec()?);
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_option_truthy_defaults() {
        let options = decode_options("+space=0");
        assert!(!option_truthy(&options, "space", true));
        assert!(option_truthy(&options, "case", true));
        assert!(!option_truthy(&options, "paths", false));
    }
}
