//! Command requirement gate.
//!
//! Decides whether plan, apply, or import may run for a project, given
//! `reqgate.toml` and a status snapshot of the change request. Rejection
//! reasons go to stdout; the exit code carries the decision.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use reqgate::check::{CheckOptions, CheckOutcome, run_check, run_dependencies};
use reqgate::core::types::CommandName;
use reqgate::exit_codes;
use reqgate::io::config::{DEFAULT_CONFIG_FILE, GateConfig, write_config};
use reqgate::logging;

#[derive(Parser)]
#[command(
    name = "reqgate",
    version,
    about = "Requirement gate for plan/apply/import commands"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `reqgate.toml` if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Decide whether a command may run for the snapshot's project.
    Check {
        #[arg(value_enum)]
        command: CommandArg,
        #[command(flatten)]
        inputs: Inputs,
        /// Checkout of the change request, used for divergence checks.
        #[arg(long, default_value = ".")]
        repo_dir: PathBuf,
    },
    /// Check only that the project's dependencies have been applied.
    Deps {
        #[command(flatten)]
        inputs: Inputs,
    },
}

#[derive(clap::Args)]
struct Inputs {
    /// Change request status snapshot (JSON).
    #[arg(long)]
    snapshot: PathBuf,
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Print the outcome as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CommandArg {
    Plan,
    Apply,
    Import,
}

impl From<CommandArg> for CommandName {
    fn from(arg: CommandArg) -> Self {
        match arg {
            CommandArg::Plan => CommandName::Plan,
            CommandArg::Apply => CommandName::Apply,
            CommandArg::Import => CommandName::Import,
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Check {
            command,
            inputs,
            repo_dir,
        } => {
            let opts = options(&inputs, repo_dir);
            let outcome = run_check(&opts, command.into())?;
            report(&outcome, inputs.json)
        }
        Command::Deps { inputs } => {
            let opts = options(&inputs, PathBuf::from("."));
            let outcome = run_dependencies(&opts)?;
            report(&outcome, inputs.json)
        }
    }
}

fn options(inputs: &Inputs, repo_dir: PathBuf) -> CheckOptions {
    CheckOptions {
        repo_dir,
        config_path: inputs.config.clone(),
        snapshot_path: inputs.snapshot.clone(),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &GateConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    Ok(exit_codes::OK)
}

fn report(outcome: &CheckOutcome, json: bool) -> Result<i32> {
    if json {
        println!(
            "{}",
            serde_json::to_string(outcome).context("serialize outcome")?
        );
    } else if !outcome.verdict.is_allowed() {
        println!("{}", outcome.verdict.reason());
    }
    Ok(if outcome.verdict.is_allowed() {
        exit_codes::OK
    } else {
        exit_codes::DENIED
    })
}
