//! Output matching: literal/wildcard comparison and structural templates.
//!
//! The literal matcher follows the doctest wildcard algorithm: anchor the
//! first and last segments, then bind interior segments to the leftmost
//! non-overlapping occurrences in order. The structural matcher compiles a
//! `{name:type}` template into a single regex from a type registry and
//! decodes named captures into typed values.

use crate::options::{TestOptions, keys, option_truthy};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Captured variables from a structural match.
pub type MatchVars = BTreeMap<String, Value>;

/// Why a match failed, when there is more to say than "no".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchReason {
    /// The template referenced a type the registry does not know.
    UnknownType {
        name: String,
        /// 1-based line within the expected block, when locatable.
        line: Option<usize>,
    },
    /// The template could not be compiled into a pattern.
    Template(String),
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownType { name, line } => {
                write!(f, "Unsupported parse type '{name}'")?;
                if let Some(line) = line {
                    write!(f, " on line {line}")?;
                }
                Ok(())
            }
            Self::Template(msg) => write!(f, "{msg}"),
        }
    }
}

/// The outcome of matching expected text against actual output.
#[derive(Debug, Clone, PartialEq)]
pub struct TestMatch {
    pub matched: bool,
    pub vars: Option<MatchVars>,
    pub reason: Option<MatchReason>,
}

impl TestMatch {
    #[must_use]
    pub const fn passed() -> Self {
        Self { matched: true, vars: None, reason: None }
    }

    #[must_use]
    pub fn passed_with(vars: MatchVars) -> Self {
        Self { matched: true, vars: Some(vars), reason: None }
    }

    #[must_use]
    pub const fn failed() -> Self {
        Self { matched: false, vars: None, reason: None }
    }

    #[must_use]
    pub fn failed_with(reason: MatchReason) -> Self {
        Self { matched: false, vars: None, reason: Some(reason) }
    }
}

/// How a placeholder capture is decoded into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decode {
    Int,
    Float,
    Raw,
}

#[derive(Debug, Clone)]
struct TypeEntry {
    pattern: String,
    decode: Decode,
}

/// Named placeholder types available to structural templates.
///
/// Builtins cover the common scalar shapes; config may register further
/// name → regex entries, which capture raw strings.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    entries: BTreeMap<String, TypeEntry>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        for name in ["int", "d"] {
            entries.insert(
                name.to_string(),
                TypeEntry { pattern: r"[-+]?\d+".to_string(), decode: Decode::Int },
            );
        }
        for name in ["float", "f"] {
            entries.insert(
                name.to_string(),
                TypeEntry { pattern: r"[-+]?\d*\.\d+".to_string(), decode: Decode::Float },
            );
        }
        for name in ["word", "w"] {
            entries.insert(
                name.to_string(),
                TypeEntry { pattern: r"\w+".to_string(), decode: Decode::Raw },
            );
        }
        Self { entries }
    }
}

impl TypeRegistry {
    /// Registry of builtins plus config-declared `name -> regex` types.
    #[must_use]
    pub fn with_config_types(types: &BTreeMap<String, String>) -> Self {
        let mut registry = Self::default();
        for (name, pattern) in types {
            registry.entries.insert(
                name.clone(),
                TypeEntry { pattern: pattern.clone(), decode: Decode::Raw },
            );
        }
        registry
    }

    fn get(&self, name: &str) -> Option<&TypeEntry> {
        self.entries.get(name)
    }
}

/// Match expected output against actual output under the given options.
///
/// Selects the structural matcher when `parse` is set, the literal matcher
/// otherwise.
#[must_use]
pub fn match_expected(
    expected: &str,
    actual: &str,
    options: &TestOptions,
    types: &TypeRegistry,
) -> TestMatch {
    if option_truthy(options, keys::PARSE, false) {
        structural_match(expected, actual, options, types)
    } else {
        literal_match(expected, actual, options)
    }
}

/// Literal comparison with optional case folding and wildcard segments.
#[must_use]
pub fn literal_match(expected: &str, actual: &str, options: &TestOptions) -> TestMatch {
    let case_sensitive = option_truthy(options, keys::CASE, true);
    let (expected, actual) = if case_sensitive {
        (expected.to_string(), actual.to_string())
    } else {
        (expected.to_lowercase(), actual.to_lowercase())
    };
    let wildcard = options
        .get(keys::WILDCARD)
        .filter(|v| v.is_truthy())
        .and_then(|v| v.as_str());
    let matched = match wildcard {
        Some(token) => wildcard_match(&expected, &actual, token),
        None => expected == actual,
    };
    if matched { TestMatch::passed() } else { TestMatch::failed() }
}

fn wildcard_match(expected: &str, actual: &str, token: &str) -> bool {
    let parts: Vec<&str> = expected.split(token).collect();
    if parts.len() == 1 {
        return expected == actual;
    }

    let mut startpos = 0;
    let mut endpos = actual.len();
    let mut first = 0;
    let mut last = parts.len();

    // Anchor text before the first wildcard.
    if !parts[0].is_empty() {
        if !actual.starts_with(parts[0]) {
            return false;
        }
        startpos = parts[0].len();
        first = 1;
    }

    // Anchor text after the last wildcard.
    if last > first && !parts[last - 1].is_empty() {
        if !actual.ends_with(parts[last - 1]) {
            return false;
        }
        endpos -= parts[last - 1].len();
        last -= 1;
    }

    if startpos > endpos {
        // The anchors need more characters than the output has, as in
        // matching "aa...aa" against "aaa".
        return false;
    }

    // Bind each interior segment to its leftmost non-overlapping match.
    for part in &parts[first..last] {
        let Some(found) = actual.get(startpos..endpos).and_then(|s| s.find(part)) else {
            return false;
        };
        startpos += found + part.len();
    }
    true
}

/// A parsed template segment.
enum Segment {
    Literal(String),
    Placeholder { name: Option<String>, type_name: Option<String> },
}

/// Structural match: compile the template and decode named captures.
#[must_use]
pub fn structural_match(
    template: &str,
    actual: &str,
    options: &TestOptions,
    types: &TypeRegistry,
) -> TestMatch {
    let segments = match parse_template(template) {
        Ok(segments) => segments,
        Err(reason) => return TestMatch::failed_with(reason),
    };

    let mut pattern = String::from(r"\A");
    if !option_truthy(options, keys::CASE, true) {
        pattern.insert_str(0, "(?i)");
    }
    let mut captures: Vec<(String, Decode)> = Vec::new();
    for segment in &segments {
        match segment {
            Segment::Literal(text) => pattern.push_str(&regex::escape(text)),
            Segment::Placeholder { name, type_name } => {
                let (type_pattern, decode) = match type_name.as_deref() {
                    None => (r"(?s).+?".to_string(), Decode::Raw),
                    Some(type_name) => match types.get(type_name) {
                        Some(entry) => (entry.pattern.clone(), entry.decode),
                        None => {
                            return TestMatch::failed_with(MatchReason::UnknownType {
                                name: type_name.to_string(),
                                line: find_type_line(type_name, template),
                            });
                        }
                    },
                };
                match name {
                    Some(name) => {
                        pattern.push_str(&format!("(?P<{name}>{type_pattern})"));
                        captures.push((name.clone(), decode));
                    }
                    None => pattern.push_str(&format!("(?:{type_pattern})")),
                }
            }
        }
    }
    pattern.push_str(r"\z");

    let Ok(re) = Regex::new(&pattern) else {
        return TestMatch::failed_with(MatchReason::Template(format!(
            "invalid match pattern '{pattern}'"
        )));
    };
    let Some(caps) = re.captures(actual) else {
        return TestMatch::failed();
    };

    let mut vars = MatchVars::new();
    for (name, decode) in captures {
        if let Some(m) = caps.name(&name) {
            vars.insert(name, decode_capture(m.as_str(), decode));
        }
    }
    TestMatch::passed_with(vars)
}

fn decode_capture(s: &str, decode: Decode) -> Value {
    match decode {
        Decode::Int => s.parse::<i64>().map_or_else(|_| Value::String(s.to_string()), Value::from),
        Decode::Float => s
            .parse::<f64>()
            .map_or_else(|_| Value::String(s.to_string()), Value::from),
        Decode::Raw => Value::String(s.to_string()),
    }
}

fn parse_template(template: &str) -> Result<Vec<Segment>, MatchReason> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut body = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    body.push(c);
                }
                if !closed {
                    return Err(MatchReason::Template("unclosed '{' in expected text".into()));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(parse_placeholder(&body));
            }
            _ => literal.push(ch),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn parse_placeholder(body: &str) -> Segment {
    let (name, type_name) = body
        .split_once(':')
        .map_or((body, None), |(n, t)| (n, Some(t.trim().to_string())));
    let name = name.trim();
    let name = if name.is_empty() { None } else { Some(name.to_string()) };
    Segment::Placeholder { name, type_name }
}

/// Locate the 1-based line of the first `{...:type}` reference in the
/// template, by counting newlines before it.
fn find_type_line(type_name: &str, template: &str) -> Option<usize> {
    let pattern = format!(
        r"\{{\s*(?:[^\s:{{}}]+)?\s*:\s*{}\s*\}}",
        regex::escape(type_name)
    );
    let re = Regex::new(&pattern).ok()?;
    let m = re.find(template)?;
    Some(template[..m.start()].bytes().filter(|b| *b == b'\n').count() + 1)
}
