//! Test configuration: front matter mapped to typed config, project
//! config discovery, and the merge between the two.

use crate::frontmatter::{front_matter_head, parse_front_matter};
use crate::options::{decode_options, keys};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors loading project configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("error decoding {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// The merged configuration a file's tests run under.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestConfig {
    /// Declared test type, when front matter names one.
    pub test_type: Option<String>,
    /// Config-level option strings, in declaration order.
    pub options: Vec<String>,
    /// Init script lines replayed when a session is initialized.
    pub python_init: Vec<String>,
    /// Structural match types declared as name -> regex.
    pub parse_types: BTreeMap<String, String>,
    pub fail_fast: bool,
    pub show_skipped: bool,
}

impl TestConfig {
    /// Per-file retry budget, decoded from config-level option strings.
    /// Fixed once at scheduling start; inline test options never affect it.
    #[must_use]
    pub fn retry_on_fail(&self) -> u32 {
        for s in &self.options {
            if let Some(val) = decode_options(s).get(keys::RETRY_ON_FAIL) {
                return val.as_int().and_then(|n| u32::try_from(n).ok()).unwrap_or(0);
            }
        }
        0
    }

    /// The full init script, or `None` when config declares none.
    #[must_use]
    pub fn init_expr(&self) -> Option<String> {
        if self.python_init.is_empty() {
            None
        } else {
            Some(self.python_init.join("\n"))
        }
    }
}

/// A value that may be written as a scalar or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(vs) => vs,
        }
    }
}

/// Project-level configuration, loaded from `lit-test.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProjectConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub default_type: Option<String>,
    pub(crate) options: Option<OneOrMany<String>>,
    pub(crate) python_init: Option<OneOrMany<String>>,
    pub parse_types: BTreeMap<String, String>,
    pub fail_fast: Option<bool>,
    pub show_skipped: Option<bool>,
    pub concurrency: Option<usize>,
    /// Directory the config was loaded from; set by the loader.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl ProjectConfig {
    #[must_use]
    pub fn options(&self) -> Vec<String> {
        self.options.clone().map(OneOrMany::into_vec).unwrap_or_default()
    }

    #[must_use]
    pub fn python_init(&self) -> Vec<String> {
        self.python_init.clone().map(OneOrMany::into_vec).unwrap_or_default()
    }
}

/// Project config filename searched for beside and above test files.
pub const PROJECT_CONFIG_FILENAME: &str = "lit-test.toml";

/// Load project configuration from a TOML file.
///
/// # Errors
/// Returns an error if the file cannot be read or decoded.
pub fn load_project_config(path: &Path) -> Result<ProjectConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config: ProjectConfig =
        toml::from_str(&content).map_err(|source| ConfigError::Decode {
            path: path.display().to_string(),
            source,
        })?;
    config.base_dir = path.parent().map(Path::to_path_buf);
    Ok(config)
}

/// Find and load the nearest project config above `start`, if any.
/// Decode errors are downgraded to a warning.
#[must_use]
pub fn discover_project_config(start: &Path) -> Option<ProjectConfig> {
    let mut dir = if start.is_dir() { start } else { start.parent()? };
    loop {
        let candidate = dir.join(PROJECT_CONFIG_FILENAME);
        if candidate.is_file() {
            match load_project_config(&candidate) {
                Ok(config) => return Some(config),
                Err(e) => {
                    warn!("error loading project config from {}: {e}", candidate.display());
                    return None;
                }
            }
        }
        dir = dir.parent()?;
    }
}

/// Map a front matter value onto a typed config.
#[must_use]
pub fn config_from_front_matter(fm: &Value, filename: &str) -> TestConfig {
    let mut config = TestConfig {
        test_type: fm.get("test-type").and_then(Value::as_str).map(str::to_string),
        options: string_list(fm.get("test-options"), "test-options", filename),
        python_init: string_list(fm.get("python-init"), "python-init", filename),
        ..TestConfig::default()
    };
    if let Some(types) = fm.get("parse-types") {
        match types.as_object() {
            Some(map) => {
                for (name, pattern) in map {
                    match pattern.as_str() {
                        Some(p) => {
                            config.parse_types.insert(name.clone(), p.to_string());
                        }
                        None => warn!(filename, "invalid parse type '{name}': expected string"),
                    }
                }
            }
            None => warn!(filename, "invalid parse-types: expected mapping"),
        }
    }
    config.fail_fast = fm.get("fail-fast").and_then(Value::as_bool).unwrap_or(false);
    config
}

fn string_list(value: Option<&Value>, key: &str, filename: &str) -> Vec<String> {
    match value {
        None => Vec::new(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                other => {
                    warn!(filename, "invalid entry in {key}: expected string, got {other}");
                    None
                }
            })
            .collect(),
        Some(other) => {
            warn!(filename, "invalid {key}: expected string or list, got {other}");
            Vec::new()
        }
    }
}

/// Merge front matter config with project config.
///
/// Scalar settings from the project take precedence; list-valued settings
/// append, front matter first, so a file's own option strings outrank the
/// project's under reverse-order application. Parse types merge with the
/// file's entries winning.
#[must_use]
pub fn merge_config(fm: TestConfig, project: Option<&ProjectConfig>) -> TestConfig {
    let Some(project) = project else { return fm };
    let mut options = fm.options;
    options.extend(project.options());
    let mut python_init = fm.python_init;
    python_init.extend(project.python_init());
    let mut parse_types = project.parse_types.clone();
    parse_types.extend(fm.parse_types);
    TestConfig {
        test_type: fm.test_type.or_else(|| project.default_type.clone()),
        options,
        python_init,
        parse_types,
        fail_fast: project.fail_fast.unwrap_or(fm.fail_fast),
        show_skipped: project.show_skipped.unwrap_or(fm.show_skipped),
    }
}

/// Read a file's merged config without extracting its tests.
///
/// Only the front matter head is parsed; used by scheduling to fix the
/// retry budget before a file runs.
#[must_use]
pub fn file_config(content: &str, filename: &str, project: Option<&ProjectConfig>) -> TestConfig {
    let head = front_matter_head(content);
    let fm = parse_front_matter(head, filename);
    merge_config(config_from_front_matter(&fm, filename), project)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fm(content: &str) -> TestConfig {
        let value = parse_front_matter(content, "t.md");
        config_from_front_matter(&value, "t.md")
    }

    #[test]
    fn test_front_matter_options_string() {
        let config = fm("---\ntest-options: +wildcard -case\n---\n");
        assert_eq!(config.options, vec!["+wildcard -case".to_string()]);
    }

    #[test]
    fn test_front_matter_options_list() {
        let config = fm("---\ntest-options:\n  - +wildcard\n  - -case\n---\n");
        assert_eq!(config.options, vec!["+wildcard".to_string(), "-case".to_string()]);
    }

    #[test]
    fn test_front_matter_test_type() {
        let config = fm("---\ntest-type: nushell\n---\n");
        assert_eq!(config.test_type.as_deref(), Some("nushell"));
    }

    #[test]
    fn test_front_matter_parse_types() {
        let config = fm("---\nparse-types:\n  ver: '\\d+\\.\\d+'\n---\n");
        assert_eq!(config.parse_types.get("ver").map(String::as_str), Some(r"\d+\.\d+"));
    }

    #[test]
    fn test_retry_on_fail_from_options() {
        let config = fm("---\ntest-options: +retry-on-fail=2\n---\n");
        assert_eq!(config.retry_on_fail(), 2);
    }

    #[test]
    fn test_retry_on_fail_default() {
        assert_eq!(TestConfig::default().retry_on_fail(), 0);
    }

    #[test]
    fn test_merge_project_scalar_wins() {
        let file = fm("---\nfail-fast: false\n---\n");
        let project = ProjectConfig { fail_fast: Some(true), ..ProjectConfig::default() };
        let merged = merge_config(file, Some(&project));
        assert!(merged.fail_fast);
    }

    #[test]
    fn test_merge_options_front_matter_first() -> Result<(), toml::de::Error> {
        let file = fm("---\ntest-options: +a\n---\n");
        let project: ProjectConfig = toml::from_str("options = \"+b\"")?;
        let merged = merge_config(file, Some(&project));
        assert_eq!(merged.options, vec!["+a".to_string(), "+b".to_string()]);
        Ok(())
    }

    #[test]
    fn test_merge_default_type_applies_when_unset() {
        let file = fm("---\n{}\n---\n");
        let project = ProjectConfig {
            default_type: Some("python".into()),
            ..ProjectConfig::default()
        };
        let merged = merge_config(file, Some(&project));
        assert_eq!(merged.test_type.as_deref(), Some("python"));
    }

    #[test]
    fn test_project_config_decode() -> Result<(), toml::de::Error> {
        let toml_src = r#"
include = ["docs/**/*.md"]
exclude = ["docs/skip.md"]
default-type = "python"
options = ["+wildcard"]
python-init = "import os"
fail-fast = true

[parse-types]
ver = '\d+\.\d+\.\d+'
"#;
        let config: ProjectConfig = toml::from_str(toml_src)?;
        assert_eq!(config.include, vec!["docs/**/*.md".to_string()]);
        assert_eq!(config.options(), vec!["+wildcard".to_string()]);
        assert_eq!(config.python_init(), vec!["import os".to_string()]);
        assert_eq!(config.fail_fast, Some(true));
        assert!(config.parse_types.contains_key("ver"));
        Ok(())
    }
}
