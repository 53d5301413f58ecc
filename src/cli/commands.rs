//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// llmdeploy - Deploy, verify and operate a self-hosted LLM service stack.
#[derive(Parser, Debug)]
#[command(name = "llmdeploy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the settings file.
    #[arg(short, long, global = true, env = "LLMDEPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Environment and region a command targets.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Target environment (dev, staging, prod).
    #[arg(short, long)]
    pub env: String,

    /// Cloud region.
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub region: String,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy or update the stack, then verify its health.
    Deploy {
        /// Target environment and region.
        #[command(flatten)]
        target: TargetArgs,

        /// Number of service instances.
        #[arg(long, default_value = "2", allow_negative_numbers = true)]
        instances: i64,

        /// Provision the off-hours auto-stop schedule.
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        auto_stop: bool,

        /// Validate the template and parameters without deploying.
        #[arg(long)]
        dry_run: bool,

        /// Deployment type (ecs-fargate, ec2-gpu, lambda).
        #[arg(long, default_value = "ecs-fargate")]
        deployment_type: String,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        force: bool,
    },

    /// Bring a stopped service back to its default instance count.
    Start {
        /// Target environment and region.
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Scale the service to zero.
    Stop {
        /// Target environment and region.
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Stop the service and start it again at its previous count.
    Restart {
        /// Target environment and region.
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Set the service's instance count.
    Scale {
        /// Target environment and region.
        #[command(flatten)]
        target: TargetArgs,

        /// Desired instance count (0 drains the service).
        #[arg(long, allow_negative_numbers = true)]
        count: i64,
    },

    /// Show stack, service, endpoint and queue status.
    Status {
        /// Target environment and region.
        #[command(flatten)]
        target: TargetArgs,

        /// Include health check results.
        #[arg(long)]
        health: bool,
    },

    /// Show recent service logs.
    Logs {
        /// Target environment and region.
        #[command(flatten)]
        target: TargetArgs,

        /// How far back to read, in minutes.
        #[arg(long, default_value = "30")]
        since: u32,

        /// Maximum number of events.
        #[arg(short, long, default_value = "100")]
        limit: u32,
    },

    /// Show month-to-date spend.
    Cost {
        /// Target environment and region.
        #[command(flatten)]
        target: TargetArgs,
    },
}

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
}

impl Commands {
    /// Target of the command.
    #[must_use]
    pub const fn target(&self) -> &TargetArgs {
        match self {
            Self::Deploy { target, .. }
            | Self::Start { target }
            | Self::Stop { target }
            | Self::Restart { target }
            | Self::Scale { target, .. }
            | Self::Status { target, .. }
            | Self::Logs { target, .. }
            | Self::Cost { target } => target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_defaults() {
        let cli = Cli::try_parse_from(["llmdeploy", "deploy", "--env", "dev", "--region", "us-east-1"]).unwrap();
        match cli.command {
            Commands::Deploy {
                target,
                instances,
                auto_stop,
                dry_run,
                deployment_type,
                force,
            } => {
                assert_eq!(target.env, "dev");
                assert_eq!(instances, 2);
                assert!(auto_stop);
                assert!(!dry_run);
                assert_eq!(deployment_type, "ecs-fargate");
                assert!(!force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_auto_stop_can_be_disabled() {
        let cli = Cli::try_parse_from([
            "llmdeploy", "deploy", "--env", "prod", "--region", "eu-west-1", "--auto-stop", "false",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Deploy { auto_stop: false, .. }));
        assert_eq!(cli.command.target().region, "eu-west-1");
    }

    #[test]
    fn test_negative_count_reaches_validation() {
        let cli = Cli::try_parse_from(["llmdeploy", "scale", "--env", "dev", "--count", "-1"]).unwrap();
        assert!(matches!(cli.command, Commands::Scale { count: -1, .. }));
    }

    #[test]
    fn test_env_is_required() {
        assert!(Cli::try_parse_from(["llmdeploy", "status"]).is_err());
    }
}
