//! Error types for the Cairn installer.
//!
//! This module provides the error hierarchy for every stage of a run:
//! reading the plan, preflight validation, certificate issuance, and
//! phase execution against the automation backend.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Cairn installer.
#[derive(Debug, Error)]
pub enum CairnError {
    /// Plan-related errors.
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// Preflight validation errors.
    #[error("Preflight error: {0}")]
    Preflight(#[from] PreflightError),

    /// Certificate issuance errors.
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    /// Phase execution errors.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// An error annotated with the stage of the run that produced it.
    #[error("{stage}: {source}")]
    Stage {
        /// Stage description, e.g. `error installing`.
        stage: String,
        /// Underlying error.
        #[source]
        source: Box<CairnError>,
    },
}

/// Plan-related errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The plan file was not found.
    #[error("Plan file not found: {path}")]
    NotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The plan file could not be read or deserialized.
    #[error("Plan file is malformed: {message}")]
    Malformed {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// The plan deserialized but failed schema validation.
    #[error("Plan is invalid: {message}")]
    Invalid {
        /// Description of the first validation failure.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
        /// Total number of validation failures found.
        error_count: usize,
    },
}

/// Preflight validation errors.
#[derive(Debug, Error)]
pub enum PreflightError {
    /// A fatal preflight check failed.
    #[error("Preflight check '{check}' failed: {message}")]
    Failed {
        /// Name of the failing check.
        check: String,
        /// Description of the failure.
        message: String,
        /// Non-fatal warnings gathered before the failure.
        warnings: Vec<String>,
    },
}

/// Certificate issuance errors.
#[derive(Debug, Error)]
pub enum CertificateError {
    /// Identity material could not be generated.
    #[error("Certificate generation failed: {message}")]
    GenerationFailed {
        /// Description of the failure.
        message: String,
    },

    /// The issued-identity manifest is unreadable.
    #[error("Identity manifest is corrupted: {message}")]
    ManifestCorrupted {
        /// Description of the corruption.
        message: String,
    },
}

/// Phase execution errors.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A phase failed on one or more hosts.
    #[error("Phase '{phase}' failed on host(s): {}", hosts.join(", "))]
    PhaseExecutionFailed {
        /// Name of the failing phase.
        phase: String,
        /// Hosts that reported a failure.
        hosts: Vec<String>,
    },

    /// The post-install smoke test failed.
    #[error("Smoke test failed: {message}")]
    SmokeTestFailed {
        /// Description of the failure.
        message: String,
    },

    /// A play was requested that the engine does not know.
    #[error("Unknown play: {name}")]
    UnknownPlay {
        /// Requested play name.
        name: String,
    },

    /// A service state query returned a state outside the expected set.
    #[error("Unexpected state '{state}' for service {unit} on host {host}")]
    UnexpectedServiceState {
        /// Host that was queried.
        host: String,
        /// Service unit that was queried.
        unit: String,
        /// Raw answer.
        state: String,
    },

    /// The automation backend could not be driven at all.
    #[error("Automation backend error: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },
}

/// Result type alias for Cairn operations.
pub type Result<T> = std::result::Result<T, CairnError>;

impl CairnError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wraps this error with the stage of the run that produced it.
    #[must_use]
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping stage annotations.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns true if re-running with `--skip-preflight` can get past this error.
    #[must_use]
    pub fn is_preflight(&self) -> bool {
        matches!(self.root(), Self::Preflight(_))
    }

    /// Returns the hosts implicated by this error, if any.
    #[must_use]
    pub fn failed_hosts(&self) -> &[String] {
        match self.root() {
            Self::Execution(ExecutionError::PhaseExecutionFailed { hosts, .. }) => hosts,
            _ => &[],
        }
    }

    /// Returns the preflight warnings carried by this error, if any.
    #[must_use]
    pub fn preflight_warnings(&self) -> &[String] {
        match self.root() {
            Self::Preflight(PreflightError::Failed { warnings, .. }) => warnings,
            _ => &[],
        }
    }
}

/// Extension trait for annotating results with the stage of the run.
pub trait StageContext<T> {
    /// Prefixes the error, if any, with `stage`.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped in [`CairnError::Stage`].
    fn stage(self, stage: &str) -> Result<T>;
}

impl<T, E: Into<CairnError>> StageContext<T> for std::result::Result<T, E> {
    fn stage(self, stage: &str) -> Result<T> {
        self.map_err(|e| e.into().in_stage(stage))
    }
}

impl PlanError {
    /// Creates a malformed-plan error without a source location.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
            location: None,
        }
    }
}

impl CertificateError {
    /// Creates a generation error with the given message.
    #[must_use]
    pub fn generation(message: impl Into<String>) -> Self {
        Self::GenerationFailed {
            message: message.into(),
        }
    }
}

impl ExecutionError {
    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a phase failure for the given hosts.
    #[must_use]
    pub fn phase_failed(phase: impl Into<String>, hosts: Vec<String>) -> Self {
        Self::PhaseExecutionFailed {
            phase: phase.into(),
            hosts,
        }
    }
}
