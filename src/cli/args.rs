//! CLI argument parsing
//!
//! ```text
//! ghostrun [--config <file>] [--json] <command>
//!
//! COMMANDS:
//!   simulate --plan <file>   Run a preflight simulation and print the report
//!   validate --plan <file>   Print validation issues only
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ghostrun_core::{ExecutablePlan, GhostRunRequest, SimulationMode};

/// Preflight simulator for compiled execution plans
#[derive(Debug, Parser)]
#[command(name = "ghostrun", version, about = "Dry-run execution plans against mock connectors")]
pub struct Cli {
    /// TOML configuration file (defaults plus GHOSTRUN_* overrides when absent)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of a summary
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Simulate a plan and print its preflight report
    Simulate {
        #[command(flatten)]
        plan: PlanArgs,

        /// Pin mock connector outcomes with this seed
        #[arg(long)]
        seed: Option<u64>,

        /// Keep reports as JSON files in this directory
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Give up waiting for the run after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },

    /// Validate a plan without simulating it
    Validate {
        #[command(flatten)]
        plan: PlanArgs,
    },
}

/// Options shared by every plan-consuming command
#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    /// Path to the executable plan (JSON)
    #[arg(long)]
    pub plan: PathBuf,

    /// Tenant owning the run (defaults to the plan's tenant)
    #[arg(long)]
    pub tenant: Option<String>,

    /// Simulation mode: full, fast, or security
    #[arg(long, default_value = "full")]
    pub mode: String,

    /// Skip mock connector calls
    #[arg(long)]
    pub no_mock: bool,

    /// Treat validation warnings as errors
    #[arg(long)]
    pub strict: bool,
}

impl PlanArgs {
    /// Request options for `plan` derived from the flags
    pub fn request_for(&self, plan: &ExecutablePlan) -> GhostRunRequest {
        let mode = SimulationMode::from(self.mode.to_lowercase());
        let mut request = GhostRunRequest::for_plan(plan)
            .with_mode(mode)
            .with_mock_calls(!self.no_mock);
        request.strict_validation = self.strict;
        request
    }

    /// Explicit tenant, else the plan's, else "default"
    pub fn tenant_for(&self, plan: &ExecutablePlan) -> String {
        self.tenant
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| Some(plan.tenant_id.clone()).filter(|t| !t.is_empty()))
            .unwrap_or_else(|| "default".to_string())
    }
}
