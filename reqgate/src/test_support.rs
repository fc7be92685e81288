//! Test-only helpers: context builders, a scripted divergence oracle, and a
//! throwaway git repository with an upstream remote.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::context::ProjectContext;
use crate::core::requirements::DivergenceOracle;
use crate::core::types::{ProjectPlanStatus, ProjectStatus};

/// Context for project `app` with nothing approved, nothing mergeable, and
/// no requirements configured.
pub fn context() -> ProjectContext {
    ProjectContext {
        project_name: "app".to_string(),
        ..ProjectContext::default()
    }
}

pub fn project_status(name: &str, status: ProjectPlanStatus) -> ProjectStatus {
    ProjectStatus {
        project_name: name.to_string(),
        status,
    }
}

/// Oracle with a fixed answer that records how often it was consulted.
#[derive(Debug)]
pub struct ScriptedOracle {
    answer: std::result::Result<bool, String>,
    calls: Cell<usize>,
    last_repo_dir: RefCell<Option<PathBuf>>,
}

impl ScriptedOracle {
    pub fn diverged() -> Self {
        Self::with_answer(Ok(true))
    }

    pub fn undiverged() -> Self {
        Self::with_answer(Ok(false))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_answer(Err(message.to_string()))
    }

    fn with_answer(answer: std::result::Result<bool, String>) -> Self {
        Self {
            answer,
            calls: Cell::new(0),
            last_repo_dir: RefCell::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub fn last_repo_dir(&self) -> Option<PathBuf> {
        self.last_repo_dir.borrow().clone()
    }
}

impl DivergenceOracle for ScriptedOracle {
    fn has_diverged(&self, repo_dir: &Path) -> Result<bool> {
        self.calls.set(self.calls.get() + 1);
        *self.last_repo_dir.borrow_mut() = Some(repo_dir.to_path_buf());
        self.answer.clone().map_err(|message| anyhow!(message))
    }
}

/// Temporary `upstream` repository on `main` plus a `work` clone of it.
///
/// The clone's `origin` remote points at the upstream checkout, so tests can
/// advance `main` upstream and observe divergence from the clone.
pub struct TestRepo {
    _temp: TempDir,
    upstream: PathBuf,
    work: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let upstream = temp.path().join("upstream");
        let work = temp.path().join("work");
        std::fs::create_dir_all(&upstream).context("create upstream dir")?;

        git(&upstream, &["init", "--quiet"])?;
        git(&upstream, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
        commit_file(&upstream, "README.md", "init\n", "initial commit")?;

        let upstream_str = upstream
            .to_str()
            .ok_or_else(|| anyhow!("non-utf8 tempdir"))?;
        let work_str = work.to_str().ok_or_else(|| anyhow!("non-utf8 tempdir"))?;
        git(temp.path(), &["clone", "--quiet", upstream_str, work_str])?;

        Ok(Self {
            _temp: temp,
            upstream,
            work,
        })
    }

    /// Working clone (the change request's checkout).
    pub fn root(&self) -> &Path {
        &self.work
    }

    /// Advance upstream `main` with a new commit.
    pub fn commit_upstream(&self, file: &str, contents: &str) -> Result<()> {
        commit_file(&self.upstream, file, contents, &format!("upstream {file}"))
    }

    /// Add a commit to the working clone's current branch.
    pub fn commit_local(&self, file: &str, contents: &str) -> Result<()> {
        commit_file(&self.work, file, contents, &format!("local {file}"))
    }

    /// Run git in the working clone and return trimmed stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        git(&self.work, args)
    }
}

fn commit_file(dir: &Path, file: &str, contents: &str, message: &str) -> Result<()> {
    std::fs::write(dir.join(file), contents).with_context(|| format!("write {file}"))?;
    git(dir, &["add", "-A"])?;
    git(dir, &["commit", "--quiet", "-m", message])?;
    Ok(())
}

fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=reqgate-test",
            "-c",
            "user.email=reqgate-test@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
