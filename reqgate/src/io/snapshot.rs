//! Change request status snapshots handed over by the orchestrator.
//!
//! A snapshot is the observed state (approval, mergeability, sibling
//! outcomes, policy results) for one project. It is combined with the
//! configured requirement lists to build a [`ProjectContext`].

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::context::ProjectContext;
use crate::core::types::{CommandName, PolicySetStatus, PullReqStatus, PullStatus};
use crate::io::config::GateConfig;

pub const SNAPSHOT_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/snapshot/v1.schema.json"
));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub project_name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub pull_req_status: PullReqStatus,
    #[serde(default)]
    pub pull_status: PullStatus,
    #[serde(default)]
    pub project_policy_status: Vec<PolicySetStatus>,
}

impl Snapshot {
    /// Combine observed state with configured requirements.
    pub fn into_context(self, cfg: &GateConfig) -> ProjectContext {
        ProjectContext {
            project_name: self.project_name,
            plan_requirements: cfg.requirements_for(CommandName::Plan),
            apply_requirements: cfg.requirements_for(CommandName::Apply),
            import_requirements: cfg.requirements_for(CommandName::Import),
            pull_req_status: self.pull_req_status,
            depends_on: self.depends_on,
            pull_status: self.pull_status,
            policy_sets: cfg.policies.sets.clone(),
            project_policy_status: self.project_policy_status,
        }
    }
}

/// Load a snapshot from disk, validating it against the v1 schema.
pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    debug!(path = %path.display(), "loading snapshot");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
    parse_snapshot(&contents).with_context(|| format!("load snapshot {}", path.display()))
}

/// Parse and schema-check snapshot JSON.
pub fn parse_snapshot(contents: &str) -> Result<Snapshot> {
    let value: Value = serde_json::from_str(contents).context("parse snapshot json")?;
    validate_schema(&value)?;
    let snapshot: Snapshot = serde_json::from_value(value).context("deserialize snapshot")?;
    debug!(
        project = %snapshot.project_name,
        depends_on = snapshot.depends_on.len(),
        recorded = snapshot.pull_status.projects.len(),
        "snapshot loaded"
    );
    Ok(snapshot)
}

fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(SNAPSHOT_SCHEMA).context("parse snapshot schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(instance) {
        let messages = compiled
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "snapshot schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
