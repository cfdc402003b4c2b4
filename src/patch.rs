//! Unified-diff patch application.
//!
//! Two-phase apply: `git apply --check` validates the patch against the
//! working tree first, and only a clean dry run is followed by the real
//! apply. A patch that fails validation never touches the tree.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::PatchError;

/// Scratch patch file, removed when the guard goes out of scope regardless
/// of the apply outcome.
struct ScratchPatch {
    path: PathBuf,
}

impl ScratchPatch {
    fn write(repo_path: &Path, patch_text: &str) -> Result<Self, PatchError> {
        let path = repo_path.join(".repairbench.patch");
        std::fs::write(&path, patch_text).map_err(PatchError::Scratch)?;
        Ok(Self { path })
    }
}

impl Drop for ScratchPatch {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove scratch patch file");
            }
        }
    }
}

/// Apply a unified-diff patch to the working tree at `repo_path`.
///
/// Returns `Ok(false)` when the dry-run check rejects the patch (tree left
/// untouched) or when the real apply fails after a clean check, e.g. due to
/// concurrent mutation of the tree. `Err` only for I/O-level failures.
pub async fn apply_patch(repo_path: &Path, patch_text: &str) -> Result<bool, PatchError> {
    let scratch = ScratchPatch::write(repo_path, patch_text)?;

    let check = run_git_apply(repo_path, &scratch.path, true).await?;
    if !check {
        tracing::debug!(repo = %repo_path.display(), "patch failed dry-run check, tree untouched");
        return Ok(false);
    }

    let applied = run_git_apply(repo_path, &scratch.path, false).await?;
    if !applied {
        tracing::warn!(repo = %repo_path.display(), "patch passed dry run but real apply failed");
    }
    Ok(applied)
}

async fn run_git_apply(
    repo_path: &Path,
    patch_file: &Path,
    check_only: bool,
) -> Result<bool, PatchError> {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(repo_path).arg("apply");
    if check_only {
        cmd.arg("--check");
    }
    cmd.arg(patch_file);

    let output = cmd.output().await.map_err(PatchError::Git)?;
    Ok(output.status.success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_patch_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path;
        {
            let scratch = ScratchPatch::write(dir.path(), "diff --git a/x b/x\n").unwrap();
            path = scratch.path.clone();
            assert!(path.exists());
        }
        assert!(!path.exists(), "scratch file must be removed on drop");
    }
}
