//! Per-file test scheduling: extraction, skip policy, execution, and
//! match classification for one document.

use crate::config::{ProjectConfig, TestConfig, file_config};
use crate::extract::{MalformedDocument, Test, parse_tests};
use crate::matching::{MatchVars, TestMatch, TypeRegistry, match_expected};
use crate::options::{OptionValue, TestOptions, effective_options, keys, option_truthy};
use crate::report::{
    blankline_marker, print_failed_test, print_failed_test_sep, print_unexpected_pass,
    remove_blankline_markers, truncate_empty_line_spaces,
};
use crate::session::{Runtime, RuntimeSession, SessionError, TestResult};
use crate::spec::{DocumentSpec, SpecError, runtime_for_name, spec_for_type};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Default test type for documents that declare none.
pub const DEFAULT_TEST_TYPE: &str = "python";

/// How long a session gets to exit cleanly before it is killed.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that abort a file's test run.
#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Malformed(#[from] MalformedDocument),
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Location of one test within the run, for summary reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRef {
    pub filename: String,
    pub line: usize,
}

impl TestRef {
    fn of(test: &Test) -> Self {
        Self { filename: test.filename.clone(), line: test.line }
    }
}

/// Outcome of one file's run: ordered failed, tested, and skipped lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSummary {
    pub failed: Vec<TestRef>,
    pub tested: Vec<TestRef>,
    pub skipped: Vec<TestRef>,
}

impl FileSummary {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Run a file's extracted tests against a live runtime, appending any
/// failure reports to `out`.
///
/// # Errors
/// Returns an error if the runtime session fails; match failures are
/// recorded in the summary, not raised.
pub async fn run_tests<R: Runtime>(
    tests: &[Test],
    spec: &DocumentSpec,
    config: &TestConfig,
    types: &TypeRegistry,
    runtime: &mut R,
    out: &mut String,
) -> Result<FileSummary, RunnerError> {
    if !runtime.is_available() {
        return Err(SessionError::NotRunning.into());
    }
    runtime.init(config.init_expr().as_deref()).await?;
    let solo_skip = solo_skip_flags(tests);
    let mut summary = FileSummary::default();
    let mut skip_rest = false;
    let mut fail_fast_triggered = false;
    for (test, forced_skip) in tests.iter().zip(&solo_skip) {
        if fail_fast_triggered {
            summary.skipped.push(TestRef::of(test));
            continue;
        }
        let options = effective_options(&config.options, &test.options, spec);
        // A test's own skiprest only affects the tests after it.
        let skip = skip_test(&options, *forced_skip, skip_rest);
        if let Some(val) = options.get(keys::SKIPREST) {
            skip_rest = val.is_truthy();
        }
        if skip {
            summary.skipped.push(TestRef::of(test));
            continue;
        }
        let result = runtime
            .exec_test(&test.expr, &test.filename, test.line, &options)
            .await?;
        let outcome = classify_result(&result, test, &options, spec, types);
        debug!(
            filename = %test.filename,
            line = test.line,
            matched = outcome.test_match.matched,
            code = result.code,
            "test result"
        );
        summary.tested.push(TestRef::of(test));
        match outcome.kind {
            OutcomeKind::Passed => {
                if let Some(vars) = bound_vars(&outcome.test_match) {
                    runtime.update_vars(&vars).await?;
                }
            }
            OutcomeKind::UnexpectedPass => {
                print_failed_test_sep(out, &options);
                print_unexpected_pass(out, test);
                summary.failed.push(TestRef::of(test));
                fail_fast_triggered = config.fail_fast;
            }
            OutcomeKind::Failed => {
                print_failed_test_sep(out, &options);
                print_failed_test(out, test, &outcome.test_match, &result, &options, spec);
                summary.failed.push(TestRef::of(test));
                fail_fast_triggered = config.fail_fast;
            }
        }
    }
    Ok(summary)
}

enum OutcomeKind {
    Passed,
    Failed,
    UnexpectedPass,
}

struct TestOutcome {
    kind: OutcomeKind,
    test_match: TestMatch,
}

fn classify_result(
    result: &TestResult,
    test: &Test,
    options: &TestOptions,
    spec: &DocumentSpec,
    types: &TypeRegistry,
) -> TestOutcome {
    let expected = format_match_expected(&test.expected, options, spec);
    let error_detail = option_truthy(options, keys::ERROR_DETAIL, false);
    let mut test_match = TestMatch::failed();
    for candidate in result.output_candidates(error_detail) {
        let output = format_match_output(candidate, options);
        test_match = match_expected(&expected, &output, options, types);
        if test_match.matched {
            break;
        }
    }
    let kind = match (option_truthy(options, keys::FAILS, false), test_match.matched) {
        (false, true) => OutcomeKind::Passed,
        (false, false) => OutcomeKind::Failed,
        (true, true) => OutcomeKind::UnexpectedPass,
        // An expected failure counts as tested, not failed.
        (true, false) => OutcomeKind::Passed,
    };
    TestOutcome { kind, test_match }
}

/// Expected text as used for matching: terminated with a newline when
/// non-empty, blankline markers removed, normalizations applied.
fn format_match_expected(expected: &str, options: &TestOptions, spec: &DocumentSpec) -> String {
    let mut s = if expected.is_empty() {
        String::new()
    } else {
        format!("{expected}\n")
    };
    if let Some(marker) = blankline_marker(options, spec) {
        s = remove_blankline_markers(&s, marker);
    }
    apply_normalize_options(&s, options)
}

/// Actual output as used for matching: whitespace-only lines emptied,
/// normalizations applied.
fn format_match_output(output: &str, options: &TestOptions) -> String {
    apply_normalize_options(&truncate_empty_line_spaces(output), options)
}

fn apply_normalize_options(s: &str, options: &TestOptions) -> String {
    let mut s = s.to_string();
    if !option_truthy(options, keys::SPACE, true) {
        s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    if option_truthy(options, keys::PATHS, false) {
        s = s.replace("\\\\", "\\").replace('\\', "/");
    }
    s
}

/// Forced-skip flags from solo marks. When any test is solo, every
/// non-solo test is skipped and solo tests always run.
fn solo_skip_flags(tests: &[Test]) -> Vec<Option<bool>> {
    let any_solo = tests
        .iter()
        .any(|t| option_truthy(&t.options, keys::SOLO, false));
    if !any_solo {
        return vec![None; tests.len()];
    }
    tests
        .iter()
        .map(|t| Some(!option_truthy(&t.options, keys::SOLO, false)))
        .collect()
}

fn skip_test(options: &TestOptions, forced_skip: Option<bool>, skip_rest: bool) -> bool {
    if let Some(forced) = forced_skip {
        return forced;
    }
    match options.get(keys::SKIP) {
        Some(OptionValue::Str(name)) => match name.strip_prefix('!') {
            Some(var) => std::env::var_os(var).is_none(),
            None => std::env::var_os(name).is_some(),
        },
        Some(val) => val.is_truthy(),
        None => skip_rest,
    }
}

fn bound_vars(test_match: &TestMatch) -> Option<serde_json::Map<String, serde_json::Value>> {
    let vars = test_match.vars.as_ref()?;
    if vars.is_empty() {
        return None;
    }
    Some(vars_to_map(vars))
}

fn vars_to_map(vars: &MatchVars) -> serde_json::Map<String, serde_json::Value> {
    vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Per-file state assembled ahead of execution.
pub struct FilePlan {
    pub tests: Vec<Test>,
    pub spec: DocumentSpec,
    pub config: TestConfig,
    pub types: TypeRegistry,
}

/// Read and extract a file's tests along with its merged config.
///
/// When no project config is given, the file's parent directories are
/// searched for one. `fail_fast` forces fail-fast on top of whatever the
/// file and project configs say.
///
/// # Errors
/// Returns an error for unreadable files, unsupported test types, and
/// malformed documents.
pub fn plan_file(
    path: &Path,
    project: Option<&ProjectConfig>,
    fail_fast: bool,
) -> Result<FilePlan, RunnerError> {
    let filename = path.display().to_string();
    let raw = std::fs::read_to_string(path)?;
    let content = normalize_line_endings(&raw);
    let discovered = if project.is_none() {
        crate::config::discover_project_config(path)
    } else {
        None
    };
    let mut config = file_config(&content, &filename, project.or(discovered.as_ref()));
    config.fail_fast = config.fail_fast || fail_fast;
    let test_type = config.test_type.as_deref().unwrap_or(DEFAULT_TEST_TYPE);
    let spec = spec_for_type(test_type)?;
    let tests = parse_tests(&content, &spec, &filename)?;
    let types = TypeRegistry::with_config_types(&config.parse_types);
    Ok(FilePlan { tests, spec, config, types })
}

/// Run one file end to end: plan, start a runtime session, execute, and
/// stop the session.
///
/// # Errors
/// Returns an error when the file cannot be planned or its runtime
/// session fails.
pub async fn test_file(
    path: &Path,
    project: Option<&ProjectConfig>,
    fail_fast: bool,
    out: &mut String,
) -> Result<FileSummary, RunnerError> {
    let plan = plan_file(path, project, fail_fast)?;
    if plan.tests.is_empty() {
        return Ok(FileSummary::default());
    }
    let locator = runtime_for_name(&plan.spec.runtime)?;
    let mut runtime = RuntimeSession::start(locator)?;
    let outcome = run_tests(
        &plan.tests,
        &plan.spec,
        &plan.config,
        &plan.types,
        &mut runtime,
        out,
    )
    .await;
    if let Err(e) = runtime.stop(STOP_TIMEOUT).await {
        warn!("error stopping runtime for {}: {e}", path.display());
    }
    outcome
}

fn normalize_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}
