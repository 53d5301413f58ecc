//! llmdeploy CLI entrypoint.
//!
//! This is the main entrypoint for the llmdeploy command-line tool.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use llmdeploy::cli::{Cli, Commands, OutputFormatter, TargetArgs};
use llmdeploy::cloud::CloudClients;
use llmdeploy::config::{
    ConfigParser, ConfigValidator, DeploymentRequest, Environment, OrchestratorSettings,
    parse_environment, validate_region,
};
use llmdeploy::error::{DeploymentError, Result, Stage};
use llmdeploy::lifecycle::LifecycleOperation;
use llmdeploy::orchestrator::Orchestrator;

use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    let stage = command_stage(&cli.command);

    match runtime.block_on(run(cli, formatter)) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e, stage));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` takes precedence.
fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Stage reported for errors that do not carry their own.
const fn command_stage(command: &Commands) -> Stage {
    match command {
        Commands::Deploy { .. } => Stage::Deploy,
        Commands::Start { .. }
        | Commands::Stop { .. }
        | Commands::Restart { .. }
        | Commands::Scale { .. }
        | Commands::Logs { .. } => Stage::Lifecycle,
        Commands::Status { .. } => Stage::Resolve,
        Commands::Cost { .. } => Stage::Cost,
    }
}

/// Main async entry point. Returns the process exit code.
async fn run(cli: Cli, formatter: OutputFormatter) -> Result<i32> {
    let settings = load_settings(cli.config.as_deref())?;
    let (environment, region) = resolve_target(cli.command.target())?;

    let clouds = CloudClients::aws(&region).await;
    let orchestrator = Orchestrator::new(settings, clouds, &region);

    match cli.command {
        Commands::Deploy {
            target,
            instances,
            auto_stop,
            dry_run,
            deployment_type,
            force,
        } => {
            let request = DeploymentRequest {
                environment: target.env,
                deployment_type,
                region,
                instance_count: instances,
                auto_stop,
                dry_run,
            };
            cmd_deploy(&orchestrator, &request, force, formatter).await
        }
        Commands::Start { .. } => {
            cmd_lifecycle(&orchestrator, environment, LifecycleOperation::Start, None, formatter).await
        }
        Commands::Stop { .. } => {
            cmd_lifecycle(&orchestrator, environment, LifecycleOperation::Stop, None, formatter).await
        }
        Commands::Restart { .. } => {
            cmd_lifecycle(&orchestrator, environment, LifecycleOperation::Restart, None, formatter).await
        }
        Commands::Scale { count, .. } => {
            cmd_lifecycle(&orchestrator, environment, LifecycleOperation::Scale, Some(count), formatter)
                .await
        }
        Commands::Status { health, .. } => {
            let snapshot = orchestrator.status(environment, health).await?;
            emit(&formatter.format_status(&snapshot))?;
            Ok(snapshot.exit_code())
        }
        Commands::Logs { since, limit, .. } => {
            let events = orchestrator.logs(environment, since, limit).await?;
            emit(&formatter.format_logs(&events))?;
            Ok(0)
        }
        Commands::Cost { .. } => {
            let report = orchestrator.cost(environment).await?;
            emit(&formatter.format_cost(&report))?;
            Ok(0)
        }
    }
}

/// Deploy, with a confirmation prompt unless forced or dry-run.
async fn cmd_deploy(
    orchestrator: &Orchestrator,
    request: &DeploymentRequest,
    force: bool,
    formatter: OutputFormatter,
) -> Result<i32> {
    let validated = orchestrator.validate(request)?;

    if !validated.dry_run() && !force {
        let diff = orchestrator.plan(&validated).await?;
        eprintln!("{}", formatter.format_diff(&diff));
        if !confirm("Do you want to deploy? [y/N]: ")? {
            eprintln!("Deploy cancelled.");
            return Err(DeploymentError::NotConfirmed {
                stack: diff.stack_name,
            }
            .into());
        }
    }

    let report = orchestrator.deploy(&validated).await?;
    emit(&formatter.format_deploy(&report))?;
    Ok(report.exit_code())
}

/// Start, stop, restart or scale.
async fn cmd_lifecycle(
    orchestrator: &Orchestrator,
    environment: Environment,
    operation: LifecycleOperation,
    count: Option<i64>,
    formatter: OutputFormatter,
) -> Result<i32> {
    let controller = orchestrator.lifecycle(environment, operation).await?;
    debug!("{operation} on {}", controller.identity());

    let outcome = match operation {
        LifecycleOperation::Start => controller.start().await?,
        LifecycleOperation::Stop => controller.stop().await?,
        LifecycleOperation::Restart => controller.restart().await?,
        LifecycleOperation::Scale => controller.scale(count.unwrap_or_default()).await?,
    };

    emit(&formatter.format_lifecycle(&outcome))?;
    Ok(0)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads settings, applies `.env` and environment overrides, and validates.
fn load_settings(config_path: Option<&Path>) -> Result<OrchestratorSettings> {
    let settings = ConfigParser::new().load(config_path, ".")?;

    let result = ConfigValidator::new().validate_settings(&settings)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    Ok(settings)
}

/// Validates `--env` and `--region` before any cloud client is built.
fn resolve_target(target: &TargetArgs) -> Result<(Environment, String)> {
    let environment = parse_environment(&target.env)?;
    let region = validate_region(&target.region)?;
    Ok((environment, region))
}

/// Writes a report to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{output}")?;
    stdout.flush()?;
    Ok(())
}

/// Asks a yes/no question on stderr.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y"))
}
