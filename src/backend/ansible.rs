//! `ansible-playbook` implementation of [`PlayRunner`].
//!
//! Plays run with the JSON stdout callback so per-host results can be read
//! from the `stats` section. Service state queries and service actions go
//! over plain `ssh`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::cli::Reporter;
use crate::error::{CairnError, CertificateError, ExecutionError, Result};

use super::runner::{
    BatchReport, HostFacts, HostOutcome, HostStatus, HostTarget, IssuanceBatch, PlayRequest,
    PlayRunner, ServiceAction, VERSION_MARKER_DIR,
};

/// Play that issues identity material on the operator's machine.
pub const CERTIFICATES_PLAY: &str = "_certificates.yaml";

/// Backend executable.
pub const ANSIBLE_PLAYBOOK: &str = "ansible-playbook";

/// Remote shell executable.
pub const SSH_PROGRAM: &str = "ssh";

/// Remote script printing total memory, free root disk and Python presence.
const FACTS_SCRIPT: &str = "awk '/^MemTotal:/ {print int($2/1024)}' /proc/meminfo; \
     df -Pm / | awk 'NR==2 {print $4}'; \
     if command -v python3 >/dev/null 2>&1 || command -v python >/dev/null 2>&1; \
     then echo python; else echo no-python; fi";

/// Exit status `ssh` uses for its own failures.
const SSH_FAILURE_STATUS: i32 = 255;

/// Runs plays with `ansible-playbook`.
#[derive(Debug, Clone)]
pub struct AnsibleRunner {
    /// Directory holding the play files.
    playbook_dir: PathBuf,
    /// Pass `-v` to the backend.
    verbose: bool,
    /// Receives raw backend output.
    reporter: Arc<Reporter>,
}

/// Subset of the JSON callback output.
#[derive(Debug, Deserialize)]
struct PlaybookOutput {
    #[serde(default)]
    plays: Vec<Value>,
    #[serde(default)]
    stats: BTreeMap<String, HostStats>,
}

/// Per-host counters from the JSON callback.
#[derive(Debug, Deserialize)]
struct HostStats {
    #[serde(default)]
    changed: u32,
    #[serde(default)]
    failures: u32,
    #[serde(default)]
    unreachable: u32,
}

impl AnsibleRunner {
    /// Creates a runner for the plays in `playbook_dir`.
    #[must_use]
    pub fn new(playbook_dir: impl Into<PathBuf>, reporter: Arc<Reporter>) -> Self {
        Self {
            playbook_dir: playbook_dir.into(),
            verbose: false,
            reporter,
        }
    }

    /// Enables verbose backend output.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn playbook(&self, play: &str) -> Result<PathBuf> {
        let path = self.playbook_dir.join(play);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ExecutionError::backend(format!("play file not found: {}", path.display())).into())
        }
    }

    fn playbook_command(&self, playbook: &Path, inventory: &str) -> Command {
        let mut cmd = Command::new(ANSIBLE_PLAYBOOK);
        cmd.arg("-i")
            .arg(inventory)
            .env("ANSIBLE_STDOUT_CALLBACK", "json")
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .kill_on_drop(true);
        if self.verbose {
            cmd.arg("-v");
        }
        cmd.arg(playbook);
        cmd
    }

    async fn ssh(&self, target: &HostTarget, remote: &str) -> Result<Output> {
        debug!("ssh {}: {}", target.host, remote);

        Command::new(SSH_PROGRAM)
            .args(["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=no"])
            .args(["-o", "ConnectTimeout=10"])
            .arg("-p")
            .arg(target.ssh.ssh_port.to_string())
            .arg("-i")
            .arg(&target.ssh.ssh_key)
            .arg(format!("{}@{}", target.ssh.user, target.address))
            .arg(remote)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecutionError::backend(format!("failed to start {SSH_PROGRAM}: {e}")).into())
    }

    /// Runs a read-only remote command and returns its standard output.
    ///
    /// Only failures of `ssh` itself are errors; the remote command's own
    /// exit status is part of the answer.
    async fn query(&self, target: &HostTarget, remote: &str) -> Result<String> {
        let output = self.ssh(target, remote).await?;

        if output.status.code() == Some(SSH_FAILURE_STATUS) {
            return Err(ExecutionError::backend(format!(
                "could not reach {}: {}",
                target.host,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl PlayRunner for AnsibleRunner {
    async fn run_play(&self, request: &PlayRequest) -> Result<BatchReport> {
        let playbook = self.playbook(&request.play)?;
        info!(
            "Running {} on {} host(s)",
            request.play,
            request.hosts.len()
        );

        let inventory = request.inventory.display().to_string();
        let mut cmd = self.playbook_command(&playbook, &inventory);
        cmd.arg("--limit").arg(request.hosts.join(","));
        if !request.extra_vars.is_empty() {
            cmd.arg("--extra-vars").arg(encode_vars(&request.extra_vars)?);
        }

        let output = cmd.output().await.map_err(|e| {
            ExecutionError::backend(format!("failed to start {ANSIBLE_PLAYBOOK}: {e}"))
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        self.reporter.backend_output(&stdout);

        match parse_play_output(&stdout, &request.hosts) {
            Ok(report) => Ok(report),
            Err(e) if output.status.success() => Err(e),
            Err(_) => Err(ExecutionError::backend(format!(
                "{} exited with {}: {}",
                request.play,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into()),
        }
    }

    async fn service_state(&self, target: &HostTarget, unit: &str) -> Result<String> {
        let stdout = self
            .query(target, &format!("systemctl is-active {unit}"))
            .await?;

        let state = stdout.lines().next().unwrap_or_default().trim().to_string();
        debug!("{} on {} is {}", unit, target.host, state);
        Ok(state)
    }

    async fn installed_version(&self, target: &HostTarget, unit: &str) -> Result<Option<String>> {
        let stdout = self
            .query(target, &format!("cat {VERSION_MARKER_DIR}/{unit} 2>/dev/null"))
            .await?;

        let version = stdout.lines().next().map(str::trim).filter(|v| !v.is_empty());
        debug!("{} on {} records version {:?}", unit, target.host, version);
        Ok(version.map(str::to_string))
    }

    async fn host_facts(&self, target: &HostTarget) -> Result<HostFacts> {
        let stdout = self.query(target, FACTS_SCRIPT).await?;
        parse_host_facts(&stdout).ok_or_else(|| {
            ExecutionError::backend(format!(
                "unreadable host facts from {}: {}",
                target.host,
                stdout.trim()
            ))
            .into()
        })
    }

    async fn service_action(
        &self,
        target: &HostTarget,
        unit: &str,
        action: ServiceAction,
    ) -> Result<()> {
        info!("{} {} on {}", action, unit, target.host);

        let remote = match action {
            ServiceAction::Stop => format!("sudo systemctl stop {unit}"),
            ServiceAction::Restart => format!("sudo systemctl restart {unit}"),
            ServiceAction::RemoveUnit => format!(
                "sudo systemctl disable {unit}; \
                 sudo rm -f /etc/systemd/system/{unit}.service && sudo systemctl daemon-reload"
            ),
        };

        let output = self.ssh(target, &remote).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ExecutionError::backend(format!(
                "{action} {unit} failed on {}: {}",
                target.host,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into())
        }
    }

    async fn issue_identities(&self, batch: &IssuanceBatch) -> Result<()> {
        let playbook = self.playbook(CERTIFICATES_PLAY)?;
        info!(
            "Issuing {} identities into {}",
            batch.identities.len(),
            batch.keys_dir.display()
        );

        let mut vars = BTreeMap::new();
        vars.insert(
            String::from("keys_dir"),
            Value::String(batch.keys_dir.display().to_string()),
        );
        vars.insert(String::from("validity_hours"), Value::from(batch.validity_hours));
        vars.insert(
            String::from("identities"),
            serde_json::to_value(&batch.identities)
                .map_err(|e| CertificateError::generation(e.to_string()))?,
        );

        let output = self
            .playbook_command(&playbook, "localhost,")
            .args(["-c", "local"])
            .arg("--extra-vars")
            .arg(encode_vars(&vars)?)
            .output()
            .await
            .map_err(|e| CertificateError::generation(format!("failed to start backend: {e}")))?;
        self.reporter
            .backend_output(&String::from_utf8_lossy(&output.stdout));

        if output.status.success() {
            Ok(())
        } else {
            warn!("Identity issuance exited with {}", output.status);
            Err(CertificateError::generation(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )
            .into())
        }
    }
}

fn encode_vars(vars: &BTreeMap<String, Value>) -> Result<String> {
    serde_json::to_string(vars)
        .map_err(|e| CairnError::internal(format!("failed to encode play variables: {e}")))
}

/// Builds a [`BatchReport`] from JSON callback output.
///
/// Hosts that were requested but are missing from the stats are reported
/// as failed.
///
/// # Errors
///
/// Returns an error if the output is not a JSON callback document.
pub fn parse_play_output(stdout: &str, hosts: &[String]) -> Result<BatchReport> {
    let start = stdout
        .find('{')
        .ok_or_else(|| ExecutionError::backend("backend produced no JSON output"))?;
    let parsed: PlaybookOutput = serde_json::from_str(&stdout[start..])
        .map_err(|e| ExecutionError::backend(format!("unreadable backend output: {e}")))?;

    let outcomes = hosts
        .iter()
        .map(|host| match parsed.stats.get(host) {
            Some(stats) if stats.unreachable > 0 => HostOutcome {
                host: host.clone(),
                status: HostStatus::Unreachable,
                message: failure_message(&parsed.plays, host),
            },
            Some(stats) if stats.failures > 0 => HostOutcome {
                host: host.clone(),
                status: HostStatus::Failed,
                message: failure_message(&parsed.plays, host),
            },
            Some(stats) => HostOutcome {
                host: host.clone(),
                status: if stats.changed > 0 {
                    HostStatus::Changed
                } else {
                    HostStatus::Ok
                },
                message: None,
            },
            None => HostOutcome {
                host: host.clone(),
                status: HostStatus::Failed,
                message: Some(String::from("no result reported by backend")),
            },
        })
        .collect();

    Ok(BatchReport { outcomes })
}

/// Reads the answer of the host facts script.
///
/// Returns `None` unless all three lines are present and well formed.
#[must_use]
pub fn parse_host_facts(stdout: &str) -> Option<HostFacts> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let memory_mb = lines.next()?.parse().ok()?;
    let disk_free_mb = lines.next()?.parse().ok()?;
    let python = match lines.next()? {
        "python" => true,
        "no-python" => false,
        _ => return None,
    };

    Some(HostFacts {
        memory_mb,
        disk_free_mb,
        python,
    })
}

/// Returns the message of the first failed task on a host.
fn failure_message(plays: &[Value], host: &str) -> Option<String> {
    plays
        .iter()
        .filter_map(|play| play.get("tasks").and_then(Value::as_array))
        .flatten()
        .filter_map(|task| task.get("hosts").and_then(|h| h.get(host)))
        .find(|result| {
            result.get("failed").and_then(Value::as_bool) == Some(true)
                || result.get("unreachable").and_then(Value::as_bool) == Some(true)
        })
        .and_then(|result| result.get("msg").and_then(Value::as_str))
        .map(str::to_string)
}
