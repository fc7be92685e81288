//! Orchestration for `reqgate check` and `reqgate deps`.
//!
//! Loads config and snapshot, builds the project context, and runs the
//! validator. Apply additionally requires dependencies once its own
//! requirements pass.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument};

use crate::core::context::ProjectContext;
use crate::core::requirements::{DivergenceOracle, RequirementValidator};
use crate::core::types::{CommandName, Verdict};
use crate::io::config::load_config;
use crate::io::git::GitDivergenceOracle;
use crate::io::snapshot::load_snapshot;

/// Which validation stage produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Requirements,
    Dependencies,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub project: String,
    pub command: CommandName,
    pub stage: Stage,
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Inputs for a file-backed check.
#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub repo_dir: PathBuf,
    pub config_path: PathBuf,
    pub snapshot_path: PathBuf,
}

/// Decide `command` for `ctx`, consulting dependencies for apply.
pub fn check_command<O: DivergenceOracle>(
    validator: &RequirementValidator<O>,
    command: CommandName,
    repo_dir: &Path,
    ctx: &ProjectContext,
) -> Result<CheckOutcome> {
    let verdict = validator.validate(command, repo_dir, ctx)?;
    if !verdict.is_allowed() || command != CommandName::Apply {
        return Ok(outcome(ctx, command, Stage::Requirements, verdict));
    }
    Ok(check_dependencies(validator, ctx))
}

pub fn check_dependencies<O: DivergenceOracle>(
    validator: &RequirementValidator<O>,
    ctx: &ProjectContext,
) -> CheckOutcome {
    let verdict = validator.validate_dependencies(ctx);
    outcome(ctx, CommandName::Apply, Stage::Dependencies, verdict)
}

fn outcome(
    ctx: &ProjectContext,
    command: CommandName,
    stage: Stage,
    verdict: Verdict,
) -> CheckOutcome {
    CheckOutcome {
        project: ctx.project_name.clone(),
        command,
        stage,
        verdict,
    }
}

/// Load context for a file-backed check and build the git-backed validator.
fn prepare(
    opts: &CheckOptions,
) -> Result<(RequirementValidator<GitDivergenceOracle>, ProjectContext)> {
    let cfg = load_config(&opts.config_path).context("load config")?;
    let snapshot = load_snapshot(&opts.snapshot_path)?;
    let validator = RequirementValidator::new(GitDivergenceOracle::from_config(&cfg.divergence))
        .with_dependency_policy(cfg.dependency_policy());
    Ok((validator, snapshot.into_context(&cfg)))
}

#[instrument(skip_all, fields(command = %command, repo_dir = %opts.repo_dir.display()))]
pub fn run_check(opts: &CheckOptions, command: CommandName) -> Result<CheckOutcome> {
    let (validator, ctx) = prepare(opts)?;
    let result = check_command(&validator, command, &opts.repo_dir, &ctx)?;
    info!(project = %result.project, allowed = result.verdict.is_allowed(), "check finished");
    Ok(result)
}

#[instrument(skip_all)]
pub fn run_dependencies(opts: &CheckOptions) -> Result<CheckOutcome> {
    let (validator, ctx) = prepare(opts)?;
    let result = check_dependencies(&validator, &ctx);
    info!(
        project = %result.project,
        allowed = result.verdict.is_allowed(),
        "dependency check finished"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ProjectPlanStatus, Requirement};
    use crate::test_support::{ScriptedOracle, context, project_status};

    fn blocked_on_db(ctx: &mut ProjectContext) {
        ctx.depends_on = vec!["db".to_string()];
        ctx.pull_status.projects = vec![project_status("db", ProjectPlanStatus::Planned)];
    }

    #[test]
    fn apply_checks_dependencies_after_requirements() {
        let validator = RequirementValidator::new(ScriptedOracle::undiverged());
        let mut ctx = context();
        blocked_on_db(&mut ctx);

        let result =
            check_command(&validator, CommandName::Apply, Path::new("."), &ctx).expect("check");
        assert_eq!(result.stage, Stage::Dependencies);
        assert_eq!(
            result.verdict.reason(),
            "Can't apply your project unless you apply its dependencies: [db]"
        );
    }

    #[test]
    fn apply_requirement_failure_wins_over_dependencies() {
        let validator = RequirementValidator::new(ScriptedOracle::undiverged());
        let mut ctx = context();
        blocked_on_db(&mut ctx);
        ctx.apply_requirements = vec![Requirement::Approved];

        let result =
            check_command(&validator, CommandName::Apply, Path::new("."), &ctx).expect("check");
        assert_eq!(result.stage, Stage::Requirements);
        assert!(result.verdict.reason().contains("must be approved"));
    }

    #[test]
    fn plan_ignores_dependencies() {
        let validator = RequirementValidator::new(ScriptedOracle::undiverged());
        let mut ctx = context();
        blocked_on_db(&mut ctx);

        let result =
            check_command(&validator, CommandName::Plan, Path::new("."), &ctx).expect("check");
        assert_eq!(result.stage, Stage::Requirements);
        assert!(result.verdict.is_allowed());
    }

    #[test]
    fn outcome_serializes_flat() {
        let result = CheckOutcome {
            project: "app".to_string(),
            command: CommandName::Import,
            stage: Stage::Requirements,
            verdict: Verdict::Denied("no".to_string()),
        };
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "project": "app",
                "command": "import",
                "stage": "requirements",
                "decision": "denied",
                "reason": "no"
            })
        );
    }

    #[test]
    fn run_check_reads_config_and_snapshot() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("reqgate.toml");
        let snapshot_path = temp.path().join("snapshot.json");
        std::fs::write(
            &config_path,
            "[plan]\nrequirements = [\"approved\", \"mergeable\"]\n",
        )
        .expect("write config");
        std::fs::write(
            &snapshot_path,
            r#"{"project_name":"app","pull_req_status":{"approval_status":{"is_approved":true},"mergeable":false}}"#,
        )
        .expect("write snapshot");

        let opts = CheckOptions {
            repo_dir: temp.path().to_path_buf(),
            config_path,
            snapshot_path,
        };
        let result = run_check(&opts, CommandName::Plan).expect("check");
        assert_eq!(
            result.verdict.reason(),
            "Pull request must be mergeable before running plan."
        );
    }
}
