//! lit-test CLI - runs tests embedded in documents.

use clap::Parser;
use lit_test_core::config::PROJECT_CONFIG_FILENAME;
use lit_test_core::{
    DEFAULT_CONCURRENCY, ProjectConfig, aggregate_outcomes, format_summary, load_project_config,
    relative_to_cwd, run_test_files, test_files,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "lit-test")]
#[command(about = "Run tests embedded in documents")]
#[command(version)]
struct Cli {
    /// Project config (a TOML file or a directory containing
    /// lit-test.toml) or files to test
    #[arg(value_name = "[PROJECT] | [FILE...]")]
    paths: Vec<PathBuf>,

    /// Show tests without running them
    #[arg(long)]
    preview: bool,

    /// Stop on the first error for a file
    #[arg(short = 'f', long)]
    fail_fast: bool,

    /// Max number of concurrent test files
    #[arg(short = 'C', long, value_name = "N")]
    concurrency: Option<usize>,

    /// Show skipped tests in output
    #[arg(long)]
    show_skipped: bool,

    /// Show debug info
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);
    run(cli).await
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> ExitCode {
    let (project, paths) = match resolve_project(&cli) {
        Ok(resolved) => resolved,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };
    let files = test_files(&paths, project.as_ref());
    if cli.preview {
        for file in &files {
            println!("Testing {} (preview)", relative_to_cwd(&file.display().to_string()));
        }
        return ExitCode::SUCCESS;
    }
    let concurrency = effective_concurrency(cli.concurrency, project.as_ref());
    let show_skipped = cli.show_skipped
        || project
            .as_ref()
            .is_some_and(|p| p.show_skipped.unwrap_or(false));
    let outcomes = run_test_files(files, project, concurrency, cli.fail_fast).await;
    for outcome in &outcomes {
        println!("Testing {}", relative_to_cwd(&outcome.filename));
        if !outcome.output.is_empty() {
            print!("{}", outcome.output);
        }
    }
    let summary = aggregate_outcomes(&outcomes);
    print!("{}", format_summary(&summary, show_skipped));
    ExitCode::from(summary.exit_code())
}

/// CLI value, then project config, then the built-in default.
fn effective_concurrency(cli_value: Option<usize>, project: Option<&ProjectConfig>) -> usize {
    cli_value
        .or_else(|| project.and_then(|p| p.concurrency))
        .unwrap_or(DEFAULT_CONCURRENCY)
}

/// Resolve a leading project-config argument. CLI flags stay out of the
/// project config so per-file discovery still applies when none is given.
fn resolve_project(cli: &Cli) -> Result<(Option<ProjectConfig>, Vec<PathBuf>), String> {
    let mut project = None;
    let mut paths = cli.paths.clone();
    if let Some(first) = cli.paths.first()
        && let Some(config_path) = project_candidate(first)
    {
        if cli.paths.len() > 1 {
            let extra: Vec<String> = cli.paths[1..]
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            return Err(format!(
                "extra arguments '{}' to project path not currently supported",
                extra.join(" ")
            ));
        }
        project = Some(load_project_config(&config_path).map_err(|e| e.to_string())?);
        paths = Vec::new();
    }
    Ok((project, paths))
}

/// A leading path names a project when it is a TOML file or a directory
/// holding one.
fn project_candidate(path: &Path) -> Option<PathBuf> {
    let candidates = [path.to_path_buf(), path.join(PROJECT_CONFIG_FILENAME)];
    candidates.into_iter().find(|candidate| {
        candidate
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
            && candidate.is_file()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_concurrency_precedence() {
        let mut project = ProjectConfig::default();
        project.concurrency = Some(3);
        assert_eq!(effective_concurrency(Some(5), Some(&project)), 5);
        assert_eq!(effective_concurrency(None, Some(&project)), 3);
        assert_eq!(effective_concurrency(None, None), DEFAULT_CONCURRENCY);
    }
}
