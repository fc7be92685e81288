//! Command requirement validation.
//!
//! Each command walks its configured requirement list in order and stops at
//! the first violation. The order is caller-owned: only the first violated
//! requirement is reported, so the list doubles as message priority.
//!
//! Branch divergence is the only check that needs outside knowledge; it is
//! answered by an injected [`DivergenceOracle`] so everything else stays pure.

use std::path::Path;

use anyhow::Result;
use tracing::debug;

use crate::core::context::ProjectContext;
use crate::core::types::{CommandName, Requirement, Verdict};

/// Answers whether a change request's branch has fallen behind its target.
///
/// Implementations may perform I/O. Errors are infrastructure failures and
/// are propagated to the caller unchanged.
pub trait DivergenceOracle {
    fn has_diverged(&self, repo_dir: &Path) -> Result<bool>;
}

impl<O: DivergenceOracle + ?Sized> DivergenceOracle for &O {
    fn has_diverged(&self, repo_dir: &Path) -> Result<bool> {
        (**self).has_diverged(repo_dir)
    }
}

/// How to treat a dependency with no recorded outcome in the change request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DependencyPolicy {
    /// Unknown dependencies pass (not yet evaluated).
    #[default]
    Lenient,
    /// Unknown dependencies block like unsatisfied ones.
    Strict,
}

/// Stateless validator for plan/apply/import admission.
#[derive(Debug, Clone)]
pub struct RequirementValidator<O> {
    oracle: O,
    dependency_policy: DependencyPolicy,
}

impl<O: DivergenceOracle> RequirementValidator<O> {
    pub fn new(oracle: O) -> Self {
        Self {
            oracle,
            dependency_policy: DependencyPolicy::default(),
        }
    }

    pub fn with_dependency_policy(mut self, policy: DependencyPolicy) -> Self {
        self.dependency_policy = policy;
        self
    }

    pub fn dependency_policy(&self) -> DependencyPolicy {
        self.dependency_policy
    }

    pub fn validate_plan(&self, repo_dir: &Path, ctx: &ProjectContext) -> Result<Verdict> {
        self.validate(CommandName::Plan, repo_dir, ctx)
    }

    pub fn validate_apply(&self, repo_dir: &Path, ctx: &ProjectContext) -> Result<Verdict> {
        self.validate(CommandName::Apply, repo_dir, ctx)
    }

    pub fn validate_import(&self, repo_dir: &Path, ctx: &ProjectContext) -> Result<Verdict> {
        self.validate(CommandName::Import, repo_dir, ctx)
    }

    /// Evaluate `command`'s requirements in configured order.
    ///
    /// Returns `Denied` for the first violated requirement. An `Err` only
    /// comes from the divergence oracle.
    pub fn validate(
        &self,
        command: CommandName,
        repo_dir: &Path,
        ctx: &ProjectContext,
    ) -> Result<Verdict> {
        for &req in ctx.requirements_for(command) {
            if let Some(reason) = self.check(command, req, repo_dir, ctx)? {
                debug!(
                    project = %ctx.project_name,
                    command = %command,
                    requirement = %req,
                    "requirement not met"
                );
                return Ok(Verdict::Denied(reason));
            }
        }
        debug!(project = %ctx.project_name, command = %command, "all requirements met");
        Ok(Verdict::Allowed)
    }

    /// Check one requirement; `Some(reason)` when violated.
    fn check(
        &self,
        command: CommandName,
        req: Requirement,
        repo_dir: &Path,
        ctx: &ProjectContext,
    ) -> Result<Option<String>> {
        let violated = match req {
            Requirement::Approved => !ctx.pull_req_status.approval_status.is_approved,
            Requirement::Mergeable => !ctx.pull_req_status.mergeable,
            Requirement::UnDiverged => self.oracle.has_diverged(repo_dir)?,
            Requirement::PoliciesPassed => match command {
                CommandName::Apply => !ctx.policy_cleared(),
                CommandName::Plan | CommandName::Import => {
                    debug!(command = %command, "policies_passed only applies to apply, skipping");
                    false
                }
            },
        };
        Ok(violated.then(|| rejection_message(command, req)))
    }

    /// Check that every dependency of the project has been applied (or had
    /// nothing to apply).
    ///
    /// Every recorded outcome for a dependency name must satisfy it; an
    /// errored rerun is not hidden by an earlier success.
    pub fn validate_dependencies(&self, ctx: &ProjectContext) -> Verdict {
        for dependency in &ctx.depends_on {
            let mut recorded = ctx
                .pull_status
                .projects
                .iter()
                .filter(|project| &project.project_name == dependency)
                .peekable();
            if recorded.peek().is_none() {
                if self.dependency_policy == DependencyPolicy::Strict {
                    debug!(
                        project = %ctx.project_name,
                        dependency = %dependency,
                        "dependency has no recorded outcome"
                    );
                    return Verdict::Denied(dependency_message(dependency));
                }
                continue;
            }
            if let Some(project) =
                recorded.find(|project| !project.status.satisfies_dependency())
            {
                debug!(
                    project = %ctx.project_name,
                    dependency = %dependency,
                    status = ?project.status,
                    "dependency not satisfied"
                );
                return Verdict::Denied(dependency_message(dependency));
            }
        }
        Verdict::Allowed
    }
}

/// Fixed user-facing message for a violated requirement.
pub fn rejection_message(command: CommandName, req: Requirement) -> String {
    match req {
        Requirement::Approved => format!(
            "Pull request must be approved according to the project's approval rules before running {command}."
        ),
        Requirement::Mergeable => {
            format!("Pull request must be mergeable before running {command}.")
        }
        Requirement::UnDiverged => {
            format!("Default branch must be rebased onto pull request before running {command}.")
        }
        Requirement::PoliciesPassed => {
            format!("All policies must pass for project before running {command}.")
        }
    }
}

pub fn dependency_message(dependency: &str) -> String {
    format!("Can't apply your project unless you apply its dependencies: [{dependency}]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PolicySet, PolicySetStatus, ProjectPlanStatus};
    use crate::test_support::{ScriptedOracle, context, project_status};
    use anyhow::anyhow;

    const APPROVE_PLAN: &str = "Pull request must be approved according to the project's approval rules before running plan.";
    const MERGE_APPLY: &str = "Pull request must be mergeable before running apply.";
    const POLICY_APPLY: &str = "All policies must pass for project before running apply.";

    fn repo() -> &'static Path {
        Path::new("/repo")
    }

    fn failing_policy(ctx: &mut ProjectContext) {
        ctx.policy_sets = vec![PolicySet {
            name: "security".to_string(),
            approve_count: 1,
        }];
        ctx.project_policy_status = vec![PolicySetStatus {
            policy_set_name: "security".to_string(),
            passed: false,
            approvals: 0,
        }];
    }

    #[test]
    fn empty_requirements_allow_every_command() {
        let oracle = ScriptedOracle::diverged();
        let validator = RequirementValidator::new(&oracle);
        let ctx = ProjectContext::default();
        assert_eq!(
            validator.validate_plan(repo(), &ctx).expect("plan"),
            Verdict::Allowed
        );
        assert_eq!(
            validator.validate_apply(repo(), &ctx).expect("apply"),
            Verdict::Allowed
        );
        assert_eq!(
            validator.validate_import(repo(), &ctx).expect("import"),
            Verdict::Allowed
        );
        assert_eq!(oracle.calls(), 0);
    }

    /// Approval is checked first, so divergence is never consulted.
    #[test]
    fn plan_unapproved_short_circuits_before_divergence() {
        let oracle = ScriptedOracle::failing("git unavailable");
        let validator = RequirementValidator::new(&oracle);
        let mut ctx = context();
        ctx.plan_requirements = vec![Requirement::Approved, Requirement::UnDiverged];

        let verdict = validator.validate_plan(repo(), &ctx).expect("plan");
        assert_eq!(verdict, Verdict::Denied(APPROVE_PLAN.to_string()));
        assert_eq!(oracle.calls(), 0);
    }

    #[test]
    fn first_violated_requirement_wins() {
        let oracle = ScriptedOracle::diverged();
        let validator = RequirementValidator::new(&oracle);
        let mut ctx = context();
        ctx.import_requirements = vec![
            Requirement::Mergeable,
            Requirement::Approved,
            Requirement::UnDiverged,
        ];

        let verdict = validator.validate_import(repo(), &ctx).expect("import");
        assert_eq!(
            verdict.reason(),
            "Pull request must be mergeable before running import."
        );
    }

    #[test]
    fn diverged_branch_is_denied() {
        let oracle = ScriptedOracle::diverged();
        let validator = RequirementValidator::new(&oracle);
        let mut ctx = context();
        ctx.pull_req_status.approval_status.is_approved = true;
        ctx.plan_requirements = vec![Requirement::Approved, Requirement::UnDiverged];

        let verdict = validator.validate_plan(repo(), &ctx).expect("plan");
        assert_eq!(
            verdict.reason(),
            "Default branch must be rebased onto pull request before running plan."
        );
        assert_eq!(oracle.calls(), 1);
        assert_eq!(oracle.last_repo_dir().as_deref(), Some(repo()));
    }

    #[test]
    fn undiverged_branch_is_allowed() {
        let oracle = ScriptedOracle::undiverged();
        let validator = RequirementValidator::new(&oracle);
        let mut ctx = context();
        ctx.apply_requirements = vec![Requirement::UnDiverged];

        assert_eq!(
            validator.validate_apply(repo(), &ctx).expect("apply"),
            Verdict::Allowed
        );
    }

    #[test]
    fn oracle_error_propagates_unchanged() {
        let oracle = ScriptedOracle::failing("fetch timed out");
        let validator = RequirementValidator::new(&oracle);
        let mut ctx = context();
        ctx.plan_requirements = vec![Requirement::UnDiverged];

        let err = validator
            .validate_plan(repo(), &ctx)
            .expect_err("oracle error");
        assert_eq!(err.to_string(), "fetch timed out");
    }

    #[test]
    fn apply_policy_before_mergeable_reports_policy() {
        let validator = RequirementValidator::new(ScriptedOracle::undiverged());
        let mut ctx = context();
        failing_policy(&mut ctx);
        ctx.apply_requirements = vec![Requirement::PoliciesPassed, Requirement::Mergeable];

        let verdict = validator.validate_apply(repo(), &ctx).expect("apply");
        assert_eq!(verdict, Verdict::Denied(POLICY_APPLY.to_string()));
    }

    #[test]
    fn apply_policy_cleared_falls_through_to_mergeable() {
        let validator = RequirementValidator::new(ScriptedOracle::undiverged());
        let mut ctx = context();
        ctx.apply_requirements = vec![
            Requirement::PoliciesPassed,
            Requirement::Mergeable,
            Requirement::Approved,
        ];

        let verdict = validator.validate_apply(repo(), &ctx).expect("apply");
        assert_eq!(verdict, Verdict::Denied(MERGE_APPLY.to_string()));
    }

    #[test]
    fn policies_passed_ignored_outside_apply() {
        let validator = RequirementValidator::new(ScriptedOracle::undiverged());
        let mut ctx = context();
        failing_policy(&mut ctx);
        ctx.plan_requirements = vec![Requirement::PoliciesPassed];
        ctx.import_requirements = vec![Requirement::PoliciesPassed];

        assert!(
            validator
                .validate_plan(repo(), &ctx)
                .expect("plan")
                .is_allowed()
        );
        assert!(
            validator
                .validate_import(repo(), &ctx)
                .expect("import")
                .is_allowed()
        );
    }

    #[test]
    fn messages_name_the_command() {
        for command in [CommandName::Plan, CommandName::Apply, CommandName::Import] {
            for req in [
                Requirement::Approved,
                Requirement::Mergeable,
                Requirement::UnDiverged,
            ] {
                let message = rejection_message(command, req);
                assert!(
                    message.ends_with(&format!("before running {command}.")),
                    "{message}"
                );
            }
        }
    }

    #[test]
    fn repeated_validation_is_identical() {
        let oracle = ScriptedOracle::diverged();
        let validator = RequirementValidator::new(&oracle);
        let mut ctx = context();
        ctx.pull_req_status.mergeable = true;
        ctx.apply_requirements = vec![Requirement::Mergeable, Requirement::UnDiverged];
        let before = ctx.clone();

        let first = validator.validate_apply(repo(), &ctx).expect("first");
        let second = validator.validate_apply(repo(), &ctx).expect("second");
        assert_eq!(first, second);
        assert_eq!(ctx, before);
    }

    #[test]
    fn dependencies_report_first_unsatisfied() {
        let validator = RequirementValidator::new(ScriptedOracle::undiverged());
        let mut ctx = context();
        ctx.depends_on = vec!["net".to_string(), "db".to_string()];
        ctx.pull_status.projects = vec![
            project_status("net", ProjectPlanStatus::Applied),
            project_status("db", ProjectPlanStatus::Errored),
        ];

        let verdict = validator.validate_dependencies(&ctx);
        assert_eq!(
            verdict,
            Verdict::Denied(
                "Can't apply your project unless you apply its dependencies: [db]".to_string()
            )
        );
    }

    #[test]
    fn dependencies_with_no_changes_are_satisfied() {
        let validator = RequirementValidator::new(ScriptedOracle::undiverged());
        let mut ctx = context();
        ctx.depends_on = vec!["net".to_string(), "db".to_string()];
        ctx.pull_status.projects = vec![
            project_status("db", ProjectPlanStatus::PlannedNoChanges),
            project_status("net", ProjectPlanStatus::Applied),
        ];

        assert_eq!(validator.validate_dependencies(&ctx), Verdict::Allowed);
    }

    /// An errored rerun blocks even when an earlier run of the same project applied.
    #[test]
    fn dependencies_check_every_matching_entry() {
        let validator = RequirementValidator::new(ScriptedOracle::undiverged());
        let mut ctx = context();
        ctx.depends_on = vec!["db".to_string()];
        ctx.pull_status.projects = vec![
            project_status("db", ProjectPlanStatus::Applied),
            project_status("db", ProjectPlanStatus::Errored),
        ];

        assert_eq!(
            validator.validate_dependencies(&ctx),
            Verdict::Denied(
                "Can't apply your project unless you apply its dependencies: [db]".to_string()
            )
        );
    }

    #[test]
    fn dependencies_allow_repeated_satisfying_entries() {
        let validator = RequirementValidator::new(ScriptedOracle::undiverged());
        let mut ctx = context();
        ctx.depends_on = vec!["db".to_string()];
        ctx.pull_status.projects = vec![
            project_status("db", ProjectPlanStatus::PlannedNoChanges),
            project_status("db", ProjectPlanStatus::Applied),
        ];

        assert_eq!(validator.validate_dependencies(&ctx), Verdict::Allowed);
    }

    #[test]
    fn unknown_dependency_passes_when_lenient() {
        let validator = RequirementValidator::new(ScriptedOracle::undiverged());
        let mut ctx = context();
        ctx.depends_on = vec!["missing".to_string()];

        assert_eq!(validator.validate_dependencies(&ctx), Verdict::Allowed);
    }

    #[test]
    fn unknown_dependency_blocks_when_strict() {
        let validator = RequirementValidator::new(ScriptedOracle::undiverged())
            .with_dependency_policy(DependencyPolicy::Strict);
        let mut ctx = context();
        ctx.depends_on = vec!["missing".to_string()];

        assert_eq!(
            validator.validate_dependencies(&ctx).reason(),
            "Can't apply your project unless you apply its dependencies: [missing]"
        );
    }

    #[test]
    fn oracle_error_surfaces_through_trait_object() {
        struct Broken;
        impl DivergenceOracle for Broken {
            fn has_diverged(&self, _repo_dir: &Path) -> Result<bool> {
                Err(anyhow!("boom"))
            }
        }
        let oracle: &dyn DivergenceOracle = &Broken;
        let validator = RequirementValidator::new(oracle);
        let mut ctx = context();
        ctx.import_requirements = vec![Requirement::UnDiverged];
        assert!(validator.validate_import(repo(), &ctx).is_err());
    }
}
