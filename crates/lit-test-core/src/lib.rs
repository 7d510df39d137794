//! Core library for the lit-test CLI.
//!
//! This crate provides the engine for running tests embedded in
//! documents:
//! - Test extraction from prompt-marked example blocks
//! - Inline and front matter option decoding
//! - Literal, wildcard, and structural output matching
//! - Persistent runtime sessions over a line-delimited JSON protocol
//! - Per-file scheduling with skip, solo, and fail-fast policy
//! - Concurrent multi-file runs with retry and ordered reporting

pub mod concurrency;
pub mod config;
pub mod discover;
pub mod extract;
pub mod frontmatter;
pub mod matching;
pub mod options;
pub mod report;
pub mod runner;
pub mod session;
pub mod spec;

pub use concurrency::{
    DEFAULT_CONCURRENCY, FileOutcome, aggregate_outcomes, front_matter_retry_budget, run_files,
    run_test_files,
};
pub use config::{
    ConfigError, ProjectConfig, TestConfig, config_from_front_matter, discover_project_config,
    file_config, load_project_config, merge_config,
};
pub use discover::test_files;
pub use extract::{MalformedDocument, Test, parse_tests};
pub use frontmatter::parse_front_matter;
pub use matching::{
    MatchReason, MatchVars, TestMatch, TypeRegistry, literal_match, match_expected,
    structural_match,
};
pub use options::{OptionValue, TestOptions, decode_options, effective_options};
pub use report::{RunSummary, format_summary, relative_to_cwd, unified_diff};
pub use runner::{
    DEFAULT_TEST_TYPE, FilePlan, FileSummary, RunnerError, TestRef, plan_file, run_tests,
    test_file,
};
pub use session::{Runtime, RuntimeSession, SessionError, TestResult};
pub use spec::{DocumentSpec, RuntimeLocator, SpecError, runtime_for_name, spec_for_type};
