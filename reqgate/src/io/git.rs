//! Git adapter and the git-backed divergence oracle.
//!
//! Divergence is decided against the remote-tracking ref of the target
//! branch: the change request is current when that ref is an ancestor of
//! `HEAD`. Fetch timeouts live here, never in the validator.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::requirements::DivergenceOracle;
use crate::io::config::DivergenceConfig;
use crate::io::process::run_command_with_timeout;

const FETCH_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Resolve a revision to its full object id.
    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--verify", "--quiet", rev])?;
        Ok(out.trim().to_string())
    }

    /// Fetch `branch` from `remote`, updating its remote-tracking ref.
    #[instrument(skip_all, fields(remote = %remote, branch = %branch, timeout_secs = timeout.as_secs()))]
    pub fn fetch(&self, remote: &str, branch: &str, timeout: Duration) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.args(["fetch", "--quiet", remote, branch])
            .current_dir(&self.workdir);
        let output = run_command_with_timeout(cmd, timeout, FETCH_OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("git fetch {remote} {branch}"))?;
        if output.timed_out {
            warn!(remote, branch, "fetch timed out");
            return Err(anyhow!(
                "git fetch {remote} {branch} timed out after {}s",
                timeout.as_secs()
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "git fetch {remote} {branch} failed: {}",
                output.stderr_lossy()
            ));
        }
        debug!(remote, branch, "fetched");
        Ok(())
    }

    /// True if `ancestor` is reachable from `descendant`.
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let args = ["merge-base", "--is-ancestor", ancestor, descendant];
        let output = self.run(&args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()))
            }
        }
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// Divergence oracle that asks git whether the target branch moved on.
#[derive(Debug, Clone)]
pub struct GitDivergenceOracle {
    remote: String,
    target_branch: String,
    fetch: bool,
    fetch_timeout: Duration,
}

impl GitDivergenceOracle {
    pub fn new(remote: impl Into<String>, target_branch: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            target_branch: target_branch.into(),
            fetch: true,
            fetch_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(cfg: &DivergenceConfig) -> Self {
        Self {
            remote: cfg.remote.clone(),
            target_branch: cfg.target_branch.clone(),
            fetch: cfg.fetch,
            fetch_timeout: Duration::from_secs(cfg.fetch_timeout_secs),
        }
    }

    /// Skip the fetch and compare against the existing remote-tracking ref.
    pub fn without_fetch(mut self) -> Self {
        self.fetch = false;
        self
    }

    fn tracking_ref(&self) -> String {
        format!("{}/{}", self.remote, self.target_branch)
    }
}

impl DivergenceOracle for GitDivergenceOracle {
    #[instrument(skip_all, fields(repo_dir = %repo_dir.display(), target = %self.tracking_ref()))]
    fn has_diverged(&self, repo_dir: &Path) -> Result<bool> {
        let git = Git::new(repo_dir);
        if self.fetch {
            git.fetch(&self.remote, &self.target_branch, self.fetch_timeout)?;
        }
        let target = self.tracking_ref();
        git.rev_parse(&target)
            .with_context(|| format!("resolve {target}"))?;
        let diverged = !git.is_ancestor(&target, "HEAD")?;
        debug!(diverged, "divergence checked");
        Ok(diverged)
    }
}
