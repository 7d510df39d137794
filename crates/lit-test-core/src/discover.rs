//! Test file discovery from project include/exclude patterns.

use crate::config::ProjectConfig;
use glob::glob;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Resolve the files to test from explicit paths or, when a project
/// config declares include patterns, from those patterns relative to
/// the config's directory. Results are sorted and deduplicated.
#[must_use]
pub fn test_files(paths: &[PathBuf], project: Option<&ProjectConfig>) -> Vec<PathBuf> {
    let from_project = project.and_then(|p| {
        if p.include.is_empty() {
            None
        } else {
            Some(project_files(p))
        }
    });
    match from_project {
        Some(files) => files,
        None => {
            let mut files: Vec<PathBuf> = paths.to_vec();
            files.sort();
            files.dedup();
            files
        }
    }
}

fn project_files(project: &ProjectConfig) -> Vec<PathBuf> {
    let base = project.base_dir.clone().unwrap_or_default();
    let excluded: BTreeSet<PathBuf> =
        apply_patterns(&project.exclude, &base, "exclude").into_iter().collect();
    let included: BTreeSet<PathBuf> = apply_patterns(&project.include, &base, "include")
        .into_iter()
        .filter(|path| !excluded.contains(path))
        .collect();
    included.into_iter().collect()
}

fn apply_patterns(patterns: &[String], base: &Path, desc: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for pattern in patterns {
        let full = base.join(pattern);
        let full = full.to_string_lossy();
        match glob(&full) {
            Ok(matches) => {
                for entry in matches {
                    match entry {
                        Ok(path) => files.push(path),
                        Err(e) => warn!("error expanding {desc} pattern '{pattern}': {e}"),
                    }
                }
            }
            Err(e) => warn!("invalid {desc} pattern '{pattern}': {e}"),
        }
    }
    debug!("files for {desc} patterns {patterns:?}: {files:?}");
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) -> std::io::Result<()> {
        fs::write(path, "")
    }

    #[test]
    fn test_explicit_paths_sorted_deduped() {
        let paths = vec![
            PathBuf::from("b.md"),
            PathBuf::from("a.md"),
            PathBuf::from("b.md"),
        ];
        let files = test_files(&paths, None);
        assert_eq!(files, vec![PathBuf::from("a.md"), PathBuf::from("b.md")]);
    }

    #[test]
    fn test_project_include_exclude() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let docs = dir.path().join("docs");
        fs::create_dir(&docs)?;
        touch(&docs.join("a.md"))?;
        touch(&docs.join("b.md"))?;
        touch(&docs.join("notes.txt"))?;
        let project = ProjectConfig {
            include: vec!["docs/*.md".to_string()],
            exclude: vec!["docs/b.md".to_string()],
            base_dir: Some(dir.path().to_path_buf()),
            ..ProjectConfig::default()
        };
        let files = test_files(&[], Some(&project));
        assert_eq!(files, vec![docs.join("a.md")]);
        Ok(())
    }

    #[test]
    fn test_project_without_include_uses_paths() {
        let project = ProjectConfig::default();
        let paths = vec![PathBuf::from("x.md")];
        assert_eq!(test_files(&paths, Some(&project)), paths);
    }
}
