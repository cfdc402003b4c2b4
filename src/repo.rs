//! Repository materialization.
//!
//! Checks out the exact commit a benchmark entry targets, into a
//! deterministic path under the workspace. Re-entry is idempotent: an
//! existing clone is reused, but refs are fetched and the commit is checked
//! out again on every invocation so the tree is commit-exact regardless of
//! what earlier runs left behind.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::VcsError;

/// A checked-out copy of a repository at a specific commit.
///
/// At most one working copy per `repo_id` exists under a given base
/// directory; the path is derived deterministically from the id.
#[derive(Debug, Clone)]
pub struct WorkingRepository {
    pub repo_id: String,
    pub commit: String,
    pub path: PathBuf,
}

/// Directory name for a repository key: `owner/name` becomes `owner_name`.
pub fn repo_dir_name(repo_id: &str) -> String {
    repo_id.replace('/', "_")
}

/// Materialize `repo_id` at `commit` under `base_dir`, cloning from the
/// public remote host.
pub async fn materialize(
    repo_id: &str,
    commit: &str,
    base_dir: &Path,
) -> Result<WorkingRepository, VcsError> {
    let url = format!("https://github.com/{repo_id}.git");
    materialize_from(&url, repo_id, commit, base_dir).await
}

/// Materialize from an explicit clone URL. Split out from [`materialize`]
/// so local fixtures can stand in for the remote host.
pub async fn materialize_from(
    url: &str,
    repo_id: &str,
    commit: &str,
    base_dir: &Path,
) -> Result<WorkingRepository, VcsError> {
    std::fs::create_dir_all(base_dir).map_err(|e| VcsError::Io {
        repo: repo_id.to_string(),
        source: e,
    })?;

    let path = base_dir.join(repo_dir_name(repo_id));

    if !path.exists() {
        tracing::info!(repo = repo_id, url, "cloning repository");
        run_git(
            repo_id,
            "clone",
            &["clone", url, &path.to_string_lossy()],
            None,
        )
        .await?;
    }

    // Fetch + checkout every invocation, even on a pre-existing clone.
    run_git(repo_id, "fetch", &["fetch"], Some(&path)).await?;
    run_git(repo_id, "checkout", &["checkout", commit], Some(&path)).await?;

    tracing::debug!(repo = repo_id, commit, path = %path.display(), "repository materialized");

    Ok(WorkingRepository {
        repo_id: repo_id.to_string(),
        commit: commit.to_string(),
        path,
    })
}

/// Run a git command, treating any non-zero exit as a [`VcsError`].
async fn run_git(
    repo_id: &str,
    op: &str,
    args: &[&str],
    cwd: Option<&Path>,
) -> Result<(), VcsError> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = cmd.output().await.map_err(|e| VcsError::SpawnFailed {
        repo: repo_id.to_string(),
        source: e,
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VcsError::CommandFailed {
            op: op.to_string(),
            repo: repo_id.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: stderr.trim().chars().take(500).collect(),
        });
    }

    Ok(())
}
