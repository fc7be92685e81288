//! Requirement configuration stored in `reqgate.toml`.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::requirements::DependencyPolicy;
use crate::core::types::{CommandName, PolicySet, Requirement};

pub const DEFAULT_CONFIG_FILE: &str = "reqgate.toml";

/// Gate configuration (TOML).
///
/// Intended to be edited by humans. Missing sections fall back to defaults:
/// no requirements, policy checks off, lenient dependencies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GateConfig {
    pub plan: CommandConfig,
    pub apply: CommandConfig,
    pub import: CommandConfig,
    pub policies: PoliciesConfig,
    pub dependencies: DependenciesConfig,
    pub divergence: DivergenceConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandConfig {
    /// Requirements in evaluation order; the first failure is reported.
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoliciesConfig {
    /// When enabled, apply always checks `policies_passed` ahead of `mergeable`.
    pub enabled: bool,
    pub sets: Vec<PolicySet>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DependenciesConfig {
    /// Block on dependencies that have no recorded outcome yet.
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DivergenceConfig {
    pub remote: String,
    pub target_branch: String,
    /// Fetch the target branch before comparing.
    pub fetch: bool,
    pub fetch_timeout_secs: u64,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            target_branch: "main".to_string(),
            fetch: true,
            fetch_timeout_secs: 60,
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<()> {
        for (command, section) in [
            (CommandName::Plan, &self.plan),
            (CommandName::Apply, &self.apply),
            (CommandName::Import, &self.import),
        ] {
            validate_requirements(command, &section.requirements)?;
        }

        let mut names = HashSet::new();
        for set in &self.policies.sets {
            if set.name.trim().is_empty() {
                return Err(anyhow!("policies.sets: name must be non-empty"));
            }
            if !names.insert(set.name.as_str()) {
                return Err(anyhow!("policies.sets: duplicate name '{}'", set.name));
            }
            if set.approve_count == 0 {
                return Err(anyhow!(
                    "policies.sets '{}': approve_count must be > 0",
                    set.name
                ));
            }
        }

        if self.divergence.remote.trim().is_empty() {
            return Err(anyhow!("divergence.remote must be non-empty"));
        }
        if self.divergence.target_branch.trim().is_empty() {
            return Err(anyhow!("divergence.target_branch must be non-empty"));
        }
        if self.divergence.fetch_timeout_secs == 0 {
            return Err(anyhow!("divergence.fetch_timeout_secs must be > 0"));
        }
        Ok(())
    }

    /// Requirement sequence actually evaluated for `command`.
    pub fn requirements_for(&self, command: CommandName) -> Vec<Requirement> {
        match command {
            CommandName::Plan => self.plan.requirements.clone(),
            CommandName::Apply => self.effective_apply_requirements(),
            CommandName::Import => self.import.requirements.clone(),
        }
    }

    /// Apply requirements with `policies_passed` placed ahead of `mergeable`
    /// when policy checks are enabled.
    ///
    /// Mergeability usually implies passing policies, so checking policy
    /// first gives the more specific message.
    pub fn effective_apply_requirements(&self) -> Vec<Requirement> {
        let mut reqs = self.apply.requirements.clone();
        if !self.policies.enabled || reqs.contains(&Requirement::PoliciesPassed) {
            return reqs;
        }
        let at = reqs
            .iter()
            .position(|req| *req == Requirement::Mergeable)
            .unwrap_or(reqs.len());
        reqs.insert(at, Requirement::PoliciesPassed);
        reqs
    }

    pub fn dependency_policy(&self) -> DependencyPolicy {
        if self.dependencies.strict {
            DependencyPolicy::Strict
        } else {
            DependencyPolicy::Lenient
        }
    }
}

fn validate_requirements(command: CommandName, reqs: &[Requirement]) -> Result<()> {
    let mut seen = HashSet::new();
    for req in reqs {
        if *req == Requirement::PoliciesPassed && command != CommandName::Apply {
            return Err(anyhow!(
                "{command}.requirements: '{req}' is only supported for apply"
            ));
        }
        if !seen.insert(*req) {
            return Err(anyhow!("{command}.requirements: duplicate '{req}'"));
        }
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GateConfig::default()`.
pub fn load_config(path: &Path) -> Result<GateConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = GateConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GateConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GateConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
