//! Git source file enumerator.
//!
//! Lists the paths tracked in a repository's index (`git ls-files`), in the
//! order git stores them, and drops any path containing a denylisted
//! substring. Nothing is written to the repository.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;

use crate::error::RepoKbError;

/// Scan a repository and return its eligible tracked files.
///
/// The returned iterator yields repository-relative paths with `/`
/// separators. Filtering is applied lazily as the iterator is consumed.
///
/// # Errors
///
/// - [`RepoKbError::InvalidInput`] if `repo_dir` is not a directory.
/// - [`RepoKbError::NotARepository`] if git does not recognize it.
/// - Any failure to spawn `git`.
pub fn scan_repository<'a>(
    repo_dir: &Path,
    denylist: &'a [String],
) -> Result<impl Iterator<Item = String> + 'a> {
    if !repo_dir.is_dir() {
        return Err(RepoKbError::InvalidInput(format!(
            "Please provide a path to a directory: {}",
            repo_dir.display()
        ))
        .into());
    }

    let tracked = git_ls_files(repo_dir)?;
    Ok(tracked
        .into_iter()
        .filter(move |path| !is_denied(path, denylist)))
}

/// True when `path` contains any of the denylisted substrings.
pub fn is_denied(path: &str, denylist: &[String]) -> bool {
    denylist.iter().any(|pattern| path.contains(pattern.as_str()))
}

fn git_ls_files(repo_dir: &Path) -> Result<Vec<String>> {
    // -z keeps paths with spaces or non-ASCII bytes unquoted.
    let output = Command::new("git")
        .args(["ls-files", "--cached", "-z"])
        .current_dir(repo_dir)
        .output()
        .with_context(|| "Failed to execute 'git ls-files'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RepoKbError::NotARepository {
            path: repo_dir.to_path_buf(),
            message: stderr.trim().to_string(),
        }
        .into());
    }

    Ok(parse_ls_files(&output.stdout))
}

fn parse_ls_files(stdout: &[u8]) -> Vec<String> {
    stdout
        .split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .map(|entry| String::from_utf8_lossy(entry).to_string())
        .collect()
}
