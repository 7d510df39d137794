//! Concurrent multi-file execution with per-file retry.
//!
//! Files run on a bounded pool of tokio tasks. Results are reported in
//! input enumeration order regardless of completion order, which keeps
//! output deterministic under concurrency.

use crate::config::{ProjectConfig, config_from_front_matter};
use crate::extract::MalformedDocument;
use crate::frontmatter::{front_matter_head, parse_front_matter};
use crate::report::{RunSummary, relative_to_cwd};
use crate::runner::{FileSummary, RunnerError, test_file};
use crate::session::SessionError;
use crate::spec::SpecError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, warn};

/// Default bound on concurrently running files.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// One file's final outcome after any retries.
#[derive(Debug)]
pub struct FileOutcome {
    pub filename: String,
    /// Buffered report output: retry notices plus the final attempt's
    /// failure blocks. Earlier failing attempts are discarded.
    pub output: String,
    pub result: Result<FileSummary, RunnerError>,
    pub attempts: u32,
}

/// Run files through `run_attempt` on a pool bounded by `concurrency`,
/// retrying failed files up to their individual budget. Outcomes come
/// back in input order.
pub async fn run_files<F, Fut>(
    files: Vec<PathBuf>,
    concurrency: usize,
    retry_budget: impl Fn(&Path) -> u32 + Send + Sync + 'static,
    run_attempt: F,
) -> Vec<FileOutcome>
where
    F: Fn(PathBuf) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (String, Result<FileSummary, RunnerError>)> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let retry_budget = Arc::new(retry_budget);
    let run_attempt = Arc::new(run_attempt);
    let mut handles = Vec::with_capacity(files.len());
    for path in files {
        let semaphore = Arc::clone(&semaphore);
        let retry_budget = Arc::clone(&retry_budget);
        let run_attempt = Arc::clone(&run_attempt);
        handles.push(tokio::spawn(async move {
            // A closed semaphore is impossible here; treat it as no permit.
            let _permit = semaphore.acquire_owned().await;
            run_with_retry(&path, retry_budget(&path), run_attempt.as_ref()).await
        }));
    }
    let mut outcomes = Vec::with_capacity(handles.len());
    for joined in futures::future::join_all(handles).await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!("test task failed: {e}"),
        }
    }
    outcomes
}

async fn run_with_retry<F, Fut>(path: &Path, budget: u32, run_attempt: &F) -> FileOutcome
where
    F: Fn(PathBuf) -> Fut,
    Fut: Future<Output = (String, Result<FileSummary, RunnerError>)>,
{
    let filename = path.display().to_string();
    let mut notices = String::new();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let (output, result) = run_attempt(path.to_path_buf()).await;
        let failed = matches!(&result, Ok(summary) if summary.has_failures());
        if failed && attempts <= budget {
            notices.push_str(&format!(
                "Retrying {} ({attempts} of {budget})\n",
                relative_to_cwd(&filename)
            ));
            continue;
        }
        return FileOutcome {
            filename,
            output: format!("{notices}{output}"),
            result,
            attempts,
        };
    }
}

/// Per-file retry budget from the document's front matter.
///
/// The budget is fixed before the file runs and is read from the
/// `test-options` front matter key alone; inline options never change it.
#[must_use]
pub fn front_matter_retry_budget(path: &Path) -> u32 {
    let Ok(content) = std::fs::read_to_string(path) else {
        return 0;
    };
    let filename = path.display().to_string();
    let fm = parse_front_matter(front_matter_head(&content), &filename);
    config_from_front_matter(&fm, &filename).retry_on_fail()
}

/// Run the given files with real runtime sessions. `fail_fast` forces
/// fail-fast for every file on top of its own config.
pub async fn run_test_files(
    files: Vec<PathBuf>,
    project: Option<ProjectConfig>,
    concurrency: usize,
    fail_fast: bool,
) -> Vec<FileOutcome> {
    let project = Arc::new(project);
    run_files(files, concurrency, front_matter_retry_budget, move |path| {
        let project = Arc::clone(&project);
        async move {
            let mut out = String::new();
            let result = test_file(&path, project.as_ref().as_ref(), fail_fast, &mut out).await;
            (out, result)
        }
    })
    .await
}

/// Fold file outcomes into a run summary, downgrading file-level errors
/// to warnings so one bad file never aborts the run.
#[must_use]
pub fn aggregate_outcomes(outcomes: &[FileOutcome]) -> RunSummary {
    let mut summary = RunSummary::default();
    for outcome in outcomes {
        match &outcome.result {
            Ok(file) => {
                extend_refs(&mut summary.failed, &file.failed);
                extend_refs(&mut summary.tested, &file.tested);
                extend_refs(&mut summary.skipped, &file.skipped);
            }
            Err(e) => warn_file_error(&outcome.filename, e),
        }
    }
    summary
}

fn extend_refs(dest: &mut Vec<(String, usize)>, refs: &[crate::runner::TestRef]) {
    dest.extend(refs.iter().map(|r| (r.filename.clone(), r.line)));
}

fn warn_file_error(filename: &str, e: &RunnerError) {
    match e {
        RunnerError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            warn!("{filename} does not exist, skipping");
        }
        RunnerError::Spec(SpecError::UnsupportedTestType(t)) => {
            warn!("Test type '{t}' for {filename} is not supported, skipping");
        }
        RunnerError::Spec(SpecError::UnsupportedRuntime(r)) => {
            warn!("Runtime '{r}' for {filename} is not supported, skipping");
        }
        RunnerError::Malformed(m @ MalformedDocument::Indent { .. })
        | RunnerError::Malformed(m @ MalformedDocument::PromptSeparator { .. }) => {
            warn!("Malformed document {filename}: {m}, skipping");
        }
        RunnerError::Session(SessionError::Spawn(io)) => {
            warn!("Runtime unavailable for {filename}: {io}, skipping");
        }
        other => warn!("Error testing {filename}: {other}, skipping"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::TestRef;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn passing() -> FileSummary {
        FileSummary {
            tested: vec![TestRef { filename: "x".to_string(), line: 1 }],
            ..FileSummary::default()
        }
    }

    fn failing() -> FileSummary {
        let r = TestRef { filename: "x".to_string(), line: 1 };
        FileSummary {
            failed: vec![r.clone()],
            tested: vec![r],
            ..FileSummary::default()
        }
    }

    fn files(n: usize) -> Vec<PathBuf> {
        (1..=n).map(|i| PathBuf::from(format!("f{i}.md"))).collect()
    }

    #[tokio::test]
    async fn test_outcomes_in_enumeration_order() {
        // Later files finish first; reporting order must not change.
        let outcomes = run_files(files(5), 5, |_| 0, |path| async move {
            let n: u64 = path
                .to_string_lossy()
                .trim_start_matches('f')
                .trim_end_matches(".md")
                .parse()
                .unwrap_or(0);
            tokio::time::sleep(std::time::Duration::from_millis(60 - n * 10)).await;
            (format!("ran {}", path.display()), Ok(passing()))
        })
        .await;
        let names: Vec<_> = outcomes.iter().map(|o| o.filename.as_str()).collect();
        assert_eq!(names, vec!["f1.md", "f2.md", "f3.md", "f4.md", "f5.md"]);
        assert_eq!(outcomes[2].output, "ran f3.md");
    }

    #[tokio::test]
    async fn test_retry_until_budget_exhausted() {
        // File 3 fails twice, then passes on the third attempt.
        let f3_attempts = Arc::new(AtomicUsize::new(0));
        let run_attempts = Arc::clone(&f3_attempts);
        let outcomes = run_files(
            files(5),
            2,
            |path| if path.ends_with("f3.md") { 2 } else { 0 },
            move |path| {
                let f3_attempts = Arc::clone(&run_attempts);
                async move {
                    if path.ends_with("f3.md") {
                        let attempt = f3_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                        if attempt < 3 {
                            return (
                                format!("failure output attempt {attempt}\n"),
                                Ok(failing()),
                            );
                        }
                    }
                    (String::new(), Ok(passing()))
                }
            },
        )
        .await;
        let f3 = &outcomes[2];
        assert_eq!(f3.attempts, 3);
        assert!(f3.result.as_ref().is_ok_and(|s| !s.has_failures()));
        // Discarded attempt output is replaced by retry notices.
        assert!(!f3.output.contains("failure output"));
        assert!(f3.output.contains("Retrying f3.md (1 of 2)"));
        assert!(f3.output.contains("Retrying f3.md (2 of 2)"));
        let summary = aggregate_outcomes(&outcomes);
        assert!(summary.failed.is_empty());
        assert_eq!(summary.tested.len(), 5);
    }

    #[tokio::test]
    async fn test_final_failing_attempt_keeps_output() {
        let outcomes = run_files(files(1), 1, |_| 1, |_path| async move {
            ("boom\n".to_string(), Ok(failing()))
        })
        .await;
        assert_eq!(outcomes[0].attempts, 2);
        assert!(outcomes[0].output.contains("Retrying f1.md (1 of 1)"));
        assert!(outcomes[0].output.ends_with("boom\n"));
    }

    #[tokio::test]
    async fn test_concurrency_bound_respected() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (active2, peak2) = (Arc::clone(&active), Arc::clone(&peak));
        run_files(files(8), 2, |_| 0, move |_path| {
            let active = Arc::clone(&active2);
            let peak = Arc::clone(&peak2);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                (String::new(), Ok(passing()))
            }
        })
        .await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_file_error_downgraded_in_aggregate() {
        let outcomes = run_files(files(2), 2, |_| 0, |path| async move {
            if path.ends_with("f1.md") {
                let e = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
                (String::new(), Err(RunnerError::Io(e)))
            } else {
                (String::new(), Ok(passing()))
            }
        })
        .await;
        let summary = aggregate_outcomes(&outcomes);
        assert_eq!(summary.tested.len(), 1);
        assert!(summary.failed.is_empty());
    }

    #[tokio::test]
    async fn test_run_test_files_reports_missing_file() {
        let outcomes = run_test_files(
            vec![PathBuf::from("no-such-dir/no-such-file.md")],
            Some(ProjectConfig::default()),
            2,
            false,
        )
        .await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            &outcomes[0].result,
            Err(RunnerError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound
        ));
        let summary = aggregate_outcomes(&outcomes);
        assert!(summary.tested.is_empty());
    }

    #[test]
    fn test_front_matter_retry_budget() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.md");
        std::fs::write(&path, "---\ntest-options: +retry-on-fail=2\n---\n\n    >>> 1\n    1\n")?;
        assert_eq!(front_matter_retry_budget(&path), 2);
        let plain = dir.path().join("p.md");
        std::fs::write(&plain, "no front matter\n")?;
        assert_eq!(front_matter_retry_budget(&plain), 0);
        Ok(())
    }
}
