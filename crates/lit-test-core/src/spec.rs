//! Document specs: the prompt grammar for each supported document flavor.

use regex::Regex;
use thiserror::Error;

/// Errors selecting a spec or runtime by name.
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("test type '{0}' is not supported")]
    UnsupportedTestType(String),
    #[error("runtime '{0}' is not supported")]
    UnsupportedRuntime(String),
    #[error("invalid prompt pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// How option candidates are extracted from a test expression.
#[derive(Debug, Clone)]
pub enum OptionCandidates {
    /// Comments lexed from source, honoring quoted strings.
    SourceComments,
    /// The spec defines no option source.
    None,
}

impl OptionCandidates {
    /// Produce candidate option strings in positional order.
    #[must_use]
    pub fn candidates(&self, expr: &str) -> Vec<String> {
        match self {
            Self::SourceComments => source_comments(expr),
            Self::None => Vec::new(),
        }
    }
}

/// Scan for `#` comments outside single- or double-quoted strings.
fn source_comments(expr: &str) -> Vec<String> {
    let mut comments = Vec::new();
    for line in expr.lines() {
        let mut quote: Option<char> = None;
        let mut escaped = false;
        for (i, ch) in line.char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            match (quote, ch) {
                (Some(_), '\\') => escaped = true,
                (Some(q), c) if c == q => quote = None,
                (None, '\'' | '"') => quote = Some(ch),
                (None, '#') => {
                    comments.push(line[i..].to_string());
                    break;
                }
                _ => {}
            }
        }
    }
    comments
}

/// One supported document flavor: prompts, markers, and the compiled
/// expression pattern. Immutable once built.
#[derive(Debug, Clone)]
pub struct DocumentSpec {
    /// Runtime identifier resolved through the runtime registry.
    pub runtime: String,
    pub ps1: String,
    pub ps2: String,
    /// Matches a full expression block: a PS1 line plus PS2 continuations.
    pub expr_pattern: Regex,
    /// Stand-in marker printed for blank output lines.
    pub blankline: String,
    /// Default wildcard token for `+wildcard`.
    pub wildcard: String,
    pub option_candidates: OptionCandidates,
}

impl DocumentSpec {
    /// Build a spec, compiling the expression pattern from its prompts.
    ///
    /// # Errors
    /// Returns `SpecError::Pattern` if the prompts produce an invalid pattern.
    pub fn new(
        runtime: &str,
        ps1: &str,
        ps2: &str,
        blankline: &str,
        wildcard: &str,
        option_candidates: OptionCandidates,
    ) -> Result<Self, SpecError> {
        let pattern = format!(
            r"(?m)^(?P<indent>[ ]*){ps1}.*(?:\n[ ]*{ps2}.*)*",
            ps1 = regex::escape(ps1),
            ps2 = regex::escape(ps2),
        );
        Ok(Self {
            runtime: runtime.to_string(),
            ps1: ps1.to_string(),
            ps2: ps2.to_string(),
            expr_pattern: Regex::new(&pattern)?,
            blankline: blankline.to_string(),
            wildcard: wildcard.to_string(),
            option_candidates,
        })
    }
}

/// The default (Python-flavored) document spec.
///
/// # Errors
/// Returns `SpecError::Pattern` if the expression pattern fails to compile.
pub fn python_spec() -> Result<DocumentSpec, SpecError> {
    DocumentSpec::new("python", ">>>", "...", "⤶", "...", OptionCandidates::SourceComments)
}

/// Look up a document spec by declared test type.
///
/// Only types with a live runtime behind them are registered, so an
/// unsupported document is rejected before any session starts.
///
/// # Errors
/// Returns `SpecError::UnsupportedTestType` for unknown names.
pub fn spec_for_type(test_type: &str) -> Result<DocumentSpec, SpecError> {
    match test_type {
        "python" => python_spec(),
        other => Err(SpecError::UnsupportedTestType(other.to_string())),
    }
}

/// A locator for a runtime implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeLocator {
    Python,
}

/// Look up a runtime implementation by identifier.
///
/// # Errors
/// Returns `SpecError::UnsupportedRuntime` for unknown identifiers.
pub fn runtime_for_name(name: &str) -> Result<RuntimeLocator, SpecError> {
    match name {
        "python" => Ok(RuntimeLocator::Python),
        other => Err(SpecError::UnsupportedRuntime(other.to_string())),
    }
}
