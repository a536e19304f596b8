//! Version control and pull request collaborator.
//!
//! The worker only talks to [`PullRequestHost`]. [`GitCli`] is the adapter
//! the binary uses: `git` for the working tree, `gh` for pull requests.

use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::GitError;

/// A pull request opened for a session branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}

/// Snapshot returned by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrStatus {
    pub number: u64,
    pub state: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub mergeable: Option<String>,
}

#[async_trait]
pub trait PullRequestHost: Send + Sync {
    /// Switch the working tree to `branch`, creating it from the current
    /// head when missing. Uncommitted changes carry over.
    async fn checkout_branch(&self, workdir: &Path, branch: &str) -> Result<(), GitError>;

    /// Whether `branch` has commits the base branch lacks.
    async fn has_commits(&self, workdir: &Path, branch: &str) -> Result<bool, GitError>;

    /// Commit all working tree changes to `branch` and push it. Returns
    /// whether a new commit was made.
    async fn commit_and_push(
        &self,
        workdir: &Path,
        branch: &str,
        message: &str,
    ) -> Result<bool, GitError>;

    async fn create_pr(
        &self,
        workdir: &Path,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, GitError>;

    async fn comment(&self, workdir: &Path, pr: u64, body: &str) -> Result<(), GitError>;

    async fn merge(&self, workdir: &Path, pr: u64) -> Result<(), GitError>;

    async fn close(&self, workdir: &Path, pr: u64) -> Result<(), GitError>;

    async fn status(&self, workdir: &Path, pr: u64) -> Result<PrStatus, GitError>;
}

/// `git` + `gh` command line adapter.
pub struct GitCli {
    base_branch: String,
    remote: String,
}

impl GitCli {
    pub fn new(base_branch: impl Into<String>) -> Self {
        Self {
            base_branch: base_branch.into(),
            remote: "origin".to_string(),
        }
    }

    async fn output(&self, workdir: &Path, program: &str, args: &[&str]) -> Result<Output, GitError> {
        debug!(program, ?args, "Running");
        Ok(Command::new(program)
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .output()
            .await?)
    }

    /// Run and return trimmed stdout, failing on a non-zero exit.
    async fn run(&self, workdir: &Path, program: &str, args: &[&str]) -> Result<String, GitError> {
        let output = self.output(workdir, program, args).await?;
        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: format!("{program} {}", args.first().copied().unwrap_or_default()),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl PullRequestHost for GitCli {
    async fn checkout_branch(&self, workdir: &Path, branch: &str) -> Result<(), GitError> {
        let exists = self
            .output(
                workdir,
                "git",
                &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")],
            )
            .await?
            .status
            .success();
        if exists {
            self.run(workdir, "git", &["switch", branch]).await?;
        } else {
            self.run(workdir, "git", &["switch", "-c", branch]).await?;
            info!(branch, "Branch created");
        }
        Ok(())
    }

    async fn has_commits(&self, workdir: &Path, branch: &str) -> Result<bool, GitError> {
        let range = format!("{}..{branch}", self.base_branch);
        let count = self.run(workdir, "git", &["rev-list", "--count", &range]).await?;
        count.parse::<u64>().map(|n| n > 0).map_err(|e| GitError::Parse {
            command: "git rev-list".into(),
            reason: e.to_string(),
        })
    }

    async fn commit_and_push(
        &self,
        workdir: &Path,
        branch: &str,
        message: &str,
    ) -> Result<bool, GitError> {
        self.run(workdir, "git", &["add", "-A"]).await?;
        let dirty = !self
            .run(workdir, "git", &["status", "--porcelain"])
            .await?
            .is_empty();
        if dirty {
            self.run(workdir, "git", &["commit", "-m", message]).await?;
        }

        if self.has_commits(workdir, branch).await? {
            self.run(workdir, "git", &["push", "-u", &self.remote, branch])
                .await?;
        }
        Ok(dirty)
    }

    async fn create_pr(
        &self,
        workdir: &Path,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, GitError> {
        let url = self
            .run(
                workdir,
                "gh",
                &[
                    "pr",
                    "create",
                    "--head",
                    branch,
                    "--base",
                    &self.base_branch,
                    "--title",
                    title,
                    "--body",
                    body,
                ],
            )
            .await?;
        let url = url.lines().last().unwrap_or_default().trim().to_string();
        let number = parse_pr_number(&url)?;
        info!(pr = number, branch, "Pull request created");
        Ok(PullRequest { number, url })
    }

    async fn comment(&self, workdir: &Path, pr: u64, body: &str) -> Result<(), GitError> {
        let pr = pr.to_string();
        self.run(workdir, "gh", &["pr", "comment", &pr, "--body", body])
            .await?;
        Ok(())
    }

    async fn merge(&self, workdir: &Path, pr: u64) -> Result<(), GitError> {
        let pr = pr.to_string();
        self.run(workdir, "gh", &["pr", "merge", &pr, "--merge"]).await?;
        Ok(())
    }

    async fn close(&self, workdir: &Path, pr: u64) -> Result<(), GitError> {
        let pr = pr.to_string();
        self.run(workdir, "gh", &["pr", "close", &pr]).await?;
        Ok(())
    }

    async fn status(&self, workdir: &Path, pr: u64) -> Result<PrStatus, GitError> {
        let pr = pr.to_string();
        let json = self
            .run(
                workdir,
                "gh",
                &["pr", "view", &pr, "--json", "number,state,title,url,mergeable"],
            )
            .await?;
        parse_status(&json)
    }
}

/// `https://github.com/o/r/pull/42` → 42
fn parse_pr_number(url: &str) -> Result<u64, GitError> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|tail| tail.parse().ok())
        .ok_or_else(|| GitError::Parse {
            command: "gh pr create".into(),
            reason: format!("no pull request number in {url:?}"),
        })
}

fn parse_status(json: &str) -> Result<PrStatus, GitError> {
    serde_json::from_str(json).map_err(|e| GitError::Parse {
        command: "gh pr view".into(),
        reason: e.to_string(),
    })
}
