// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
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
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Cairn
//!
//! A declarative installer and upgrader for multi-node Kubernetes clusters.
//!
//! ## Overview
//!
//! Cairn reads a plan describing the cluster topology and drives a host
//! automation backend through a fixed sequence of provisioning phases:
//!
//! - Validate the plan and the environment before touching any node
//! - Issue the identity material every node and client needs
//! - Roll each phase out across its node group in batches
//! - Enable optional subsystems and verify the result with a smoke test
//!
//! ## Architecture
//!
//! Every phase follows a **check-then-act** discipline:
//!
//! 1. **Desired State**: Defined in `cairn-cluster.yaml`
//! 2. **Observed State**: The managed service unit on each host
//! 3. **Executor**: Acts only on the hosts whose state differs
//!
//! Re-running `cairn apply` after a partial failure resumes the work that
//! was left incomplete and leaves converged hosts untouched.
//!
//! ## Modules
//!
//! - [`plan`]: Plan schema, loading, and validation
//! - [`preflight`]: Environment checks run before any mutation
//! - [`pki`]: Identity issuance bookkeeping
//! - [`backend`]: Automation backend interface and its Ansible implementation
//! - [`engine`]: Phase sequencing, rolling batches, and reconciliation
//! - [`kubeconfig`]: Administrator kubeconfig generation
//! - [`backup`]: Client configuration backups
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! cluster:
//!   name: lab
//!   ssh:
//!     user: ops
//!     ssh_key: ~/.ssh/cluster.pem
//! features:
//!   package_manager:
//!     enabled: true
//! etcd:
//!   nodes:
//!     - host: etcd-1
//!       ip: 10.0.0.10
//! master:
//!   nodes:
//!     - host: master-1
//!       ip: 10.0.0.20
//! worker:
//!   nodes:
//!     - host: worker-1
//!       ip: 10.0.0.30
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod backend;
pub mod backup;
pub mod cli;
pub mod engine;
pub mod error;
pub mod kubeconfig;
pub mod pki;
pub mod plan;
pub mod preflight;

// ============================================================================
// Re-exports
// ============================================================================

pub use backend::{AnsibleRunner, PlayRunner};
pub use cli::{ApplyCommand, Cli, Commands, Reporter};
pub use engine::{ClusterExecutor, Executor, ExecutorOptions, RunReport};
pub use error::{CairnError, Result};
pub use pki::CertificateAuthority;
pub use plan::{FilePlanner, Plan, PlanValidator, Planner};
pub use preflight::{ValidationReport, Validator};
