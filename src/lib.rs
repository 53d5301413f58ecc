// ============================================================================
// Linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

#![warn(unused_imports)]              // Unused imports
#![warn(unused_variables)]            // Unused variables
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # llmdeploy
//!
//! Deployment lifecycle orchestration and multi-stage health verification
//! for a containerized LLM-serving stack.
//!
//! ## Overview
//!
//! A deploy runs as a fixed pipeline:
//!
//! 1. **Validate**: the request is checked before any cloud call
//! 2. **Deploy**: the infrastructure stack is created or updated and polled
//!    to a terminal state
//! 3. **Resolve**: service endpoints are discovered from stack outputs and
//!    running tasks
//! 4. **Probe**: liveness, capability, inference, queue and policy checks run
//!    against every endpoint
//! 5. **Aggregate**: results become a success rate and a
//!    HEALTHY / DEGRADED / UNHEALTHY verdict with diagnostics
//!
//! Lifecycle operations (start, stop, scale, restart) and month-to-date
//! cost reporting work against the same stack.
//!
//! ## Modules
//!
//! - [`config`]: Requests, settings, validation and fingerprints
//! - [`cloud`]: Platform capability traits and the AWS binding
//! - [`stack`]: Stack deployment, diffs and endpoint resolution
//! - [`health`]: Probe client, probe engine and report aggregation
//! - [`lifecycle`]: Service start/stop/scale/restart
//! - [`cost`]: Spend reporting
//! - [`orchestrator`]: The pipeline tying the stages together
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: llm-testgen
//!
//! template:
//!   path: infrastructure/stack.yaml
//!
//! probes:
//!   model: codellama:7b-code
//!   liveness_timeout_secs: 300
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod cloud;
pub mod config;
pub mod cost;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod orchestrator;
pub mod poll;
pub mod stack;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, DeploymentRequest, OrchestratorSettings, ValidatedRequest};
pub use cost::{CostReport, CostReporter};
pub use error::{OrchestratorError, Result, Stage};
pub use health::{HealthProbeEngine, HealthReport, HealthReportAggregator, Verdict};
pub use lifecycle::{LifecycleController, LifecycleOperation, LifecycleOutcome};
pub use orchestrator::{DeployReport, Orchestrator, StatusSnapshot};
pub use stack::{EndpointResolver, StackDeployer, StackHandle};
