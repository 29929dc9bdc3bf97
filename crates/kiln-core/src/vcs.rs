//! Default [`Vcs`] implementation (§4.9): shells out to `git` for worktree
//! creation and commits, grounded in [`crate::worktree::WorktreeManager`]'s
//! subprocess idiom, and to the configured test command for `run_tests`.
//! `rebase` and `open_pr` are unimplemented -- real rebase/forge
//! integration is out of scope.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;

use crate::collaborators::{CommitOutcome, RunOutcome, Vcs, Workspace};
use crate::worktree::WorktreeManager;

/// One [`WorktreeManager`] per repo, created on first use. Worktree paths
/// are remembered by branch name so that `commit`, which the trait does not
/// pass a repo for, can find its way back to the right working directory.
#[derive(Default)]
pub struct GitVcs {
    managers: Mutex<HashMap<String, WorktreeManager>>,
    worktrees: Mutex<HashMap<String, PathBuf>>,
}

impl GitVcs {
    pub fn new() -> Self {
        Self::default()
    }

    fn manager_for(&self, repo: &str) -> anyhow::Result<WorktreeManager> {
        let mut managers = self.managers.lock().unwrap();
        if let Some(existing) = managers.get(repo) {
            return Ok(existing.clone());
        }
        let manager = WorktreeManager::new(repo, None)?;
        managers.insert(repo.to_string(), manager.clone());
        Ok(manager)
    }
}

#[async_trait]
impl Vcs for GitVcs {
    async fn create_worktree(&self, repo: &str, task_id: i64) -> anyhow::Result<Workspace> {
        let manager = self.manager_for(repo)?;
        let branch = WorktreeManager::branch_name("kiln", &format!("task-{task_id}"));
        let branch_for_blocking = branch.clone();
        let info =
            tokio::task::spawn_blocking(move || manager.create_worktree(&branch_for_blocking))
                .await??;
        self.worktrees.lock().unwrap().insert(branch.clone(), info.path.clone());
        Ok(Workspace {
            branch,
            path: info.path,
        })
    }

    async fn workspace_path(&self, branch: &str) -> anyhow::Result<PathBuf> {
        self.worktrees
            .lock()
            .unwrap()
            .get(branch)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no worktree registered for branch {branch}"))
    }

    async fn commit(&self, branch: &str, message: &str) -> anyhow::Result<CommitOutcome> {
        let path = self.workspace_path(branch).await?;

        let add_path = path.clone();
        let add = tokio::task::spawn_blocking(move || {
            std::process::Command::new("git")
                .args(["add", "-A"])
                .current_dir(&add_path)
                .output()
        })
        .await??;
        if !add.status.success() {
            anyhow::bail!("git add failed: {}", String::from_utf8_lossy(&add.stderr));
        }

        let message = message.to_string();
        let commit = tokio::task::spawn_blocking(move || {
            std::process::Command::new("git")
                .args(["commit", "-m", &message])
                .current_dir(&path)
                .output()
        })
        .await??;

        if commit.status.success() {
            Ok(CommitOutcome {
                ok: true,
                no_changes: false,
            })
        } else {
            let stderr = String::from_utf8_lossy(&commit.stderr);
            if stderr.contains("nothing to commit") {
                Ok(CommitOutcome {
                    ok: true,
                    no_changes: true,
                })
            } else {
                anyhow::bail!("git commit failed: {stderr}")
            }
        }
    }

    async fn run_tests(&self, repo: &str, cmd: &str) -> anyhow::Result<RunOutcome> {
        let output = Command::new("sh").arg("-c").arg(cmd).current_dir(repo).output().await?;

        Ok(RunOutcome {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(1),
        })
    }

    async fn rebase(&self, _branch: &str, _base: &str) -> anyhow::Result<()> {
        anyhow::bail!("rebase is not supported by the default git-backed Vcs")
    }

    async fn open_pr(&self, _branch: &str, _title: &str) -> anyhow::Result<()> {
        anyhow::bail!("open_pr is not supported by the default git-backed Vcs; no forge integration is configured")
    }

    async fn list_tracked_files(&self, repo: &str) -> anyhow::Result<Vec<String>> {
        let repo = repo.to_string();
        let output = tokio::task::spawn_blocking(move || {
            std::process::Command::new("git")
                .args(["ls-files"])
                .current_dir(&repo)
                .output()
        })
        .await??;

        if !output.status.success() {
            anyhow::bail!(
                "git ls-files failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}
