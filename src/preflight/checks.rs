//! Built-in preflight checks.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::debug;

use crate::backend::{ANSIBLE_PLAYBOOK, CERTIFICATES_PLAY, HostTarget, PlayRunner, SSH_PROGRAM};
use crate::engine::{
    CORE_PHASES, DesiredState, ExecutorOptions, ModeFlags, SMOKE_TEST_PLAY,
    selected_feature_plays,
};
use crate::plan::{Plan, Role};

use super::{CheckOutcome, PreflightCheck};

/// Default TCP connect timeout for the connectivity check.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Free space every node needs on its root filesystem, in MiB.
pub const MIN_DISK_FREE_MB: u64 = 10 * 1024;

/// The generated assets directory must be writable.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssetsDirectoryCheck;

/// The SSH private key must exist locally.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshKeyCheck;

/// Topology findings that are worth a warning but never block a run.
#[derive(Debug, Default, Clone, Copy)]
pub struct TopologyCheck;

/// Local programs and play files the run depends on must be present.
#[derive(Debug, Clone)]
pub struct PrerequisiteCheck {
    /// Programs that must resolve on `PATH`.
    programs: Vec<&'static str>,
}

/// Every node must run python and should have the memory and disk its
/// roles need. Reads host facts through the automation backend.
#[derive(Debug, Clone)]
pub struct RemoteResourceCheck<R> {
    /// Automation backend.
    runner: R,
}

/// Every node must accept TCP connections on the SSH port.
#[derive(Debug, Clone, Copy)]
pub struct ConnectivityCheck {
    /// Per-node connect timeout.
    timeout: Duration,
}

impl ConnectivityCheck {
    /// Creates the check with a connect timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ConnectivityCheck {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Default for PrerequisiteCheck {
    fn default() -> Self {
        Self {
            programs: vec![ANSIBLE_PLAYBOOK, SSH_PROGRAM],
        }
    }
}

impl<R: PlayRunner> RemoteResourceCheck<R> {
    /// Creates the check over a backend.
    #[must_use]
    pub const fn new(runner: R) -> Self {
        Self { runner }
    }
}

/// Minimum memory for a node holding `role`, in MiB.
const fn min_memory_mb(role: Role) -> u64 {
    match role {
        Role::Etcd | Role::Storage => 1024,
        Role::Master | Role::Worker => 2048,
    }
}

/// Returns every play file a run of this plan may execute.
fn required_plays(plan: &Plan, options: &ExecutorOptions) -> Vec<&'static str> {
    let flags = ModeFlags::snapshot(plan, options);
    let mut plays = vec![CERTIFICATES_PLAY];
    plays.extend(
        CORE_PHASES
            .iter()
            .filter(|phase| phase.applies(&plan.features, &flags))
            .filter(|phase| !phase.target.resolve(plan).is_empty())
            .filter_map(|phase| match phase.desired {
                DesiredState::Running { play } => Some(play),
                DesiredState::Retired => None,
            }),
    );
    plays.extend(
        selected_feature_plays(&plan.features, &flags)
            .into_iter()
            .map(|feature| feature.play),
    );
    plays.push(SMOKE_TEST_PLAY);
    plays
}

/// Returns the closest existing ancestor of a path that may not exist yet.
fn existing_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors()
        .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
        .find(|p| p.exists())
}

#[async_trait]
impl PreflightCheck for AssetsDirectoryCheck {
    fn name(&self) -> &'static str {
        "assets-directory"
    }

    async fn run(&self, _plan: &Plan, options: &ExecutorOptions) -> CheckOutcome {
        let dir = options.assets_dir();

        if dir.exists() && !dir.is_dir() {
            return CheckOutcome::fatal(format!("{} exists and is not a directory", dir.display()));
        }

        let Some(existing) = existing_ancestor(dir) else {
            return CheckOutcome::fatal(format!("cannot resolve {}", dir.display()));
        };

        match std::fs::metadata(existing) {
            Ok(meta) if meta.permissions().readonly() => {
                CheckOutcome::fatal(format!("{} is not writable", existing.display()))
            }
            Ok(_) => CheckOutcome::Passed,
            Err(e) => CheckOutcome::fatal(format!("cannot inspect {}: {e}", existing.display())),
        }
    }
}

#[async_trait]
impl PreflightCheck for SshKeyCheck {
    fn name(&self) -> &'static str {
        "ssh-key"
    }

    async fn run(&self, plan: &Plan, _options: &ExecutorOptions) -> CheckOutcome {
        let key = &plan.cluster.ssh.ssh_key;
        if key.is_file() {
            CheckOutcome::Passed
        } else {
            CheckOutcome::fatal(format!("SSH key not found: {}", key.display()))
        }
    }
}

#[async_trait]
impl PreflightCheck for TopologyCheck {
    fn name(&self) -> &'static str {
        "topology"
    }

    async fn run(&self, plan: &Plan, _options: &ExecutorOptions) -> CheckOutcome {
        let mut warnings = Vec::new();

        let etcd = plan.group(Role::Etcd).len();
        if etcd > 0 && etcd % 2 == 0 {
            warnings.push(format!(
                "{etcd} etcd nodes tolerate no more failures than {}; use an odd count",
                etcd - 1
            ));
        }

        if plan.group(Role::Master).len() == 1 {
            warnings.push(String::from(
                "a single master node leaves the control plane without redundancy",
            ));
        }

        if plan.group(Role::Storage).len() == 1 {
            warnings.push(String::from(
                "a single storage node cannot replicate volumes",
            ));
        }

        if warnings.is_empty() {
            CheckOutcome::Passed
        } else {
            CheckOutcome::Warnings(warnings)
        }
    }
}

#[async_trait]
impl PreflightCheck for PrerequisiteCheck {
    fn name(&self) -> &'static str {
        "prerequisites"
    }

    async fn run(&self, plan: &Plan, options: &ExecutorOptions) -> CheckOutcome {
        let mut missing = Vec::new();

        for program in &self.programs {
            match which::which(program) {
                Ok(path) => debug!("{program} found at {}", path.display()),
                Err(_) => missing.push(format!("{program} not found on PATH")),
            }
        }

        for play in required_plays(plan, options) {
            let path = options.playbook_dir.join(play);
            if !path.is_file() {
                missing.push(format!("play file not found: {}", path.display()));
            }
        }

        if missing.is_empty() {
            CheckOutcome::Passed
        } else {
            CheckOutcome::fatal(missing.join("; "))
        }
    }
}

#[async_trait]
impl<R: PlayRunner> PreflightCheck for RemoteResourceCheck<R> {
    fn name(&self) -> &'static str {
        "host-resources"
    }

    async fn run(&self, plan: &Plan, _options: &ExecutorOptions) -> CheckOutcome {
        let mut warnings = Vec::new();
        let mut fatal = Vec::new();

        for node in plan.all_nodes() {
            let target = HostTarget::for_node(node, &plan.cluster.ssh);
            let facts = match self.runner.host_facts(&target).await {
                Ok(facts) => facts,
                Err(e) => {
                    fatal.push(format!("{}: {e}", node.host));
                    continue;
                }
            };

            if !facts.python {
                fatal.push(format!("{}: python is not installed", node.host));
            }

            let roles = plan.roles_of(&node.host);
            let needed = roles.iter().map(|r| min_memory_mb(*r)).max().unwrap_or(0);
            if facts.memory_mb < needed {
                let roles: Vec<String> = roles.iter().map(ToString::to_string).collect();
                warnings.push(format!(
                    "{} has {} MiB of memory, {} needs {needed} MiB",
                    node.host,
                    facts.memory_mb,
                    roles.join("+")
                ));
            }
            if facts.disk_free_mb < MIN_DISK_FREE_MB {
                warnings.push(format!(
                    "{} has {} MiB free on /, at least {MIN_DISK_FREE_MB} MiB recommended",
                    node.host, facts.disk_free_mb
                ));
            }
        }

        match (fatal.is_empty(), warnings.is_empty()) {
            (true, true) => CheckOutcome::Passed,
            (true, false) => CheckOutcome::Warnings(warnings),
            (false, _) => CheckOutcome::Fatal {
                message: fatal.join("; "),
                warnings,
            },
        }
    }
}

#[async_trait]
impl PreflightCheck for ConnectivityCheck {
    fn name(&self) -> &'static str {
        "ssh-connectivity"
    }

    async fn run(&self, plan: &Plan, _options: &ExecutorOptions) -> CheckOutcome {
        let port = plan.cluster.ssh.ssh_port;
        let timeout = self.timeout;

        let mut dials = JoinSet::new();
        for (index, node) in plan.all_nodes().into_iter().enumerate() {
            let host = node.host.clone();
            let ip = node.ip.clone();
            dials.spawn(async move {
                let outcome = tokio::time::timeout(timeout, TcpStream::connect((ip.as_str(), port)))
                    .await;
                let error = match outcome {
                    Ok(Ok(_)) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some(format!("timed out after {}s", timeout.as_secs())),
                };
                (index, host, ip, error)
            });
        }

        let mut unreachable = Vec::new();
        while let Some(joined) = dials.join_next().await {
            match joined {
                Ok((index, host, ip, Some(error))) => {
                    unreachable.push((index, format!("{host} ({ip}:{port}): {error}")));
                }
                Ok((_, host, _, None)) => debug!("{host} is reachable"),
                Err(e) => unreachable.push((usize::MAX, format!("connectivity task failed: {e}"))),
            }
        }

        if unreachable.is_empty() {
            return CheckOutcome::Passed;
        }

        unreachable.sort();
        let hosts: Vec<String> = unreachable.into_iter().map(|(_, line)| line).collect();
        CheckOutcome::fatal(format!("unreachable: {}", hosts.join("; ")))
    }
}
