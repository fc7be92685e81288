//! Shared deterministic types for requirement validation.
//!
//! These types mirror the observed state of a change request. They carry no
//! I/O and are safe to construct freely in tests.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named precondition that must hold before a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    Approved,
    Mergeable,
    #[serde(rename = "undiverged")]
    UnDiverged,
    /// Only meaningful for apply.
    PoliciesPassed,
}

impl Requirement {
    pub fn as_str(self) -> &'static str {
        match self {
            Requirement::Approved => "approved",
            Requirement::Mergeable => "mergeable",
            Requirement::UnDiverged => "undiverged",
            Requirement::PoliciesPassed => "policies_passed",
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow command whose admission is being decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandName {
    Plan,
    Apply,
    Import,
}

impl CommandName {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::Plan => "plan",
            CommandName::Apply => "apply",
            CommandName::Import => "import",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a prior operation on a project in the same change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPlanStatus {
    Errored,
    Planned,
    PlannedNoChanges,
    ErroredApply,
    Applied,
    Discarded,
    ErroredPolicyCheck,
    PassedPolicyCheck,
}

impl ProjectPlanStatus {
    /// True if a project in this state no longer blocks its dependents.
    pub fn satisfies_dependency(self) -> bool {
        matches!(
            self,
            ProjectPlanStatus::Applied | ProjectPlanStatus::PlannedNoChanges
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStatus {
    pub is_approved: bool,
}

/// Snapshot of the change request as reported by the VCS host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullReqStatus {
    pub approval_status: ApprovalStatus,
    pub mergeable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStatus {
    pub project_name: String,
    pub status: ProjectPlanStatus,
}

/// Prior outcomes for every project touched by the change request.
///
/// Entries are kept in recorded order; names may repeat across reruns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullStatus {
    pub projects: Vec<ProjectStatus>,
}

/// Configured policy set and the approvals needed to override a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    pub name: String,
    pub approve_count: u32,
}

/// Observed policy check outcome for one policy set of this project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySetStatus {
    pub policy_set_name: String,
    pub passed: bool,
    #[serde(default)]
    pub approvals: u32,
}

/// Admission decision for a single command.
///
/// `Denied` is a policy outcome, not an error: infrastructure failures travel
/// separately in `anyhow::Result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "lowercase")]
pub enum Verdict {
    Allowed,
    Denied(String),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }

    /// Rejection reason, or an empty string when allowed.
    pub fn reason(&self) -> &str {
        match self {
            Verdict::Allowed => "",
            Verdict::Denied(reason) => reason,
        }
    }
}
