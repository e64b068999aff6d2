//! The automation backend seam.
//!
//! The engine decides *what* must happen on which hosts; a [`PlayRunner`]
//! carries it out. Every call blocks until the backend has finished with
//! all the hosts it was given.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[cfg(test)]
use mockall::automock;

use crate::error::Result;
use crate::pki::IdentityRequest;
use crate::plan::{Node, SshConfig};

/// Directory on each host where plays record the version they installed.
pub const VERSION_MARKER_DIR: &str = "/etc/cairn/versions";

/// A request to run one play against a set of hosts.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRequest {
    /// Play file, relative to the playbook directory.
    pub play: String,
    /// Inventory file describing every node of the plan.
    pub inventory: PathBuf,
    /// Host identifiers the play is limited to.
    pub hosts: Vec<String>,
    /// Extra variables passed to the play.
    pub extra_vars: BTreeMap<String, Value>,
}

/// Outcome of a play on a single host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    /// The host was already in the desired state.
    Ok,
    /// The play changed the host.
    Changed,
    /// A task failed on the host.
    Failed,
    /// The host could not be reached.
    Unreachable,
}

/// Per-host result of a play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOutcome {
    /// Host identifier.
    pub host: String,
    /// Final status.
    pub status: HostStatus,
    /// Optional detail, mostly for failures.
    pub message: Option<String>,
}

/// Result of one blocking play invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// One outcome per requested host.
    pub outcomes: Vec<HostOutcome>,
}

/// A host as the backend addresses it for direct service calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    /// Host identifier.
    pub host: String,
    /// Address used to reach the host.
    pub address: String,
    /// SSH settings.
    pub ssh: SshConfig,
}

/// Direct actions on a service unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    /// Stop the unit.
    Stop,
    /// Disable the unit and delete its definition.
    RemoveUnit,
    /// Restart the unit.
    Restart,
}

/// Read-only facts gathered from a host before any change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostFacts {
    /// Total memory in MiB.
    pub memory_mb: u64,
    /// Free space on the root filesystem in MiB.
    pub disk_free_mb: u64,
    /// A Python interpreter is available for the backend.
    pub python: bool,
}

/// Identity material to issue in one backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceBatch {
    /// Identities to (re)issue.
    pub identities: Vec<IdentityRequest>,
    /// Directory that receives the material.
    pub keys_dir: PathBuf,
    /// Certificate validity in hours.
    pub validity_hours: u32,
}

/// Drives the remote hosts.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PlayRunner: Send + Sync {
    /// Runs a play and waits for every targeted host to finish.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backend could not be driven at all.
    /// Host-level failures are reported in the [`BatchReport`].
    async fn run_play(&self, request: &PlayRequest) -> Result<BatchReport>;

    /// Returns the raw state string of a service unit on a host.
    ///
    /// # Errors
    ///
    /// Returns an error if the host could not be queried.
    async fn service_state(&self, target: &HostTarget, unit: &str) -> Result<String>;

    /// Returns the version recorded by the last successful play for a unit,
    /// or `None` if no play recorded one.
    ///
    /// # Errors
    ///
    /// Returns an error if the host could not be queried.
    async fn installed_version(&self, target: &HostTarget, unit: &str) -> Result<Option<String>>;

    /// Gathers read-only facts about a host.
    ///
    /// # Errors
    ///
    /// Returns an error if the host could not be queried or the answer
    /// could not be read.
    async fn host_facts(&self, target: &HostTarget) -> Result<HostFacts>;

    /// Applies a direct action to a service unit on a host.
    ///
    /// # Errors
    ///
    /// Returns an error if the action failed on the host.
    async fn service_action(
        &self,
        target: &HostTarget,
        unit: &str,
        action: ServiceAction,
    ) -> Result<()>;

    /// Issues identity material into a local directory.
    ///
    /// # Errors
    ///
    /// Returns an error if any identity could not be issued.
    async fn issue_identities(&self, batch: &IssuanceBatch) -> Result<()>;
}

impl PlayRequest {
    /// Creates a request for `play` limited to `hosts`.
    #[must_use]
    pub fn new(play: impl Into<String>, inventory: impl Into<PathBuf>, hosts: Vec<String>) -> Self {
        Self {
            play: play.into(),
            inventory: inventory.into(),
            hosts,
            extra_vars: BTreeMap::new(),
        }
    }

    /// Adds an extra variable.
    #[must_use]
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_vars.insert(key.into(), value.into());
        self
    }
}

impl HostStatus {
    /// Returns true if the host did not complete the play.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Unreachable)
    }
}

impl BatchReport {
    /// Returns the hosts that failed or were unreachable, in report order.
    #[must_use]
    pub fn failed_hosts(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| o.status.is_failure())
            .map(|o| o.host.clone())
            .collect()
    }

    /// Returns the outcome for a host, if reported.
    #[must_use]
    pub fn outcome(&self, host: &str) -> Option<&HostOutcome> {
        self.outcomes.iter().find(|o| o.host == host)
    }

    /// Returns true if every host completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| !o.status.is_failure())
    }
}

impl HostTarget {
    /// Builds the target for a plan node.
    #[must_use]
    pub fn for_node(node: &Node, ssh: &SshConfig) -> Self {
        Self {
            host: node.host.clone(),
            address: node.ip.clone(),
            ssh: ssh.clone(),
        }
    }
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Changed => write!(f, "changed"),
            Self::Failed => write!(f, "failed"),
            Self::Unreachable => write!(f, "unreachable"),
        }
    }
}

impl std::fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::RemoveUnit => write!(f, "remove"),
            Self::Restart => write!(f, "restart"),
        }
    }
}
