//! Per-invocation project context consumed by the requirement validator.

use serde::{Deserialize, Serialize};

use crate::core::types::{
    CommandName, PolicySet, PolicySetStatus, PullReqStatus, PullStatus, Requirement,
};

/// Everything the validator needs to decide one command for one project.
///
/// Built fresh for each invocation and never mutated by validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub project_name: String,
    pub plan_requirements: Vec<Requirement>,
    pub apply_requirements: Vec<Requirement>,
    pub import_requirements: Vec<Requirement>,
    pub pull_req_status: PullReqStatus,
    /// Sibling projects that must succeed before this one, in order.
    pub depends_on: Vec<String>,
    pub pull_status: PullStatus,
    pub policy_sets: Vec<PolicySet>,
    pub project_policy_status: Vec<PolicySetStatus>,
}

impl ProjectContext {
    /// Configured requirement sequence for `command`, in evaluation order.
    pub fn requirements_for(&self, command: CommandName) -> &[Requirement] {
        match command {
            CommandName::Plan => &self.plan_requirements,
            CommandName::Apply => &self.apply_requirements,
            CommandName::Import => &self.import_requirements,
        }
    }

    /// True unless a failed policy set still lacks its required approvals.
    ///
    /// Reads the dedicated policy outcome only. Plan status is not consulted:
    /// a failed apply overwrites it and loses the earlier policy failure.
    pub fn policy_cleared(&self) -> bool {
        self.project_policy_status
            .iter()
            .filter(|status| !status.passed)
            .all(|status| {
                self.policy_sets
                    .iter()
                    .find(|set| set.name == status.policy_set_name)
                    .is_none_or(|set| status.approvals >= set.approve_count)
            })
    }
}
