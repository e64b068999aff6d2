//! Phase execution against a [`PlayRunner`].
//!
//! The executor walks the phase catalog in order. For each included phase
//! it splits the target hosts into rolling batches, reads the managed unit's
//! state on every host of a batch, and only touches the hosts that still
//! have work to do. A failure under an any-errors-fatal phase stops the
//! phase before its next batch and aborts the run.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backend::{
    BatchReport, HostStatus, HostTarget, PlayRequest, PlayRunner, ServiceAction,
    VERSION_MARKER_DIR, write_inventory,
};
use crate::cli::Reporter;
use crate::error::{ExecutionError, Result};
use crate::pki::CertificateAuthority;
use crate::plan::{Node, Plan, PlanHasher};

use super::batch::rollout_batches;
use super::options::{ExecutorOptions, ModeFlags};
use super::phase::{CORE_PHASES, DesiredState, FeaturePlay, Phase, SMOKE_TEST_PLAY, Target};
use super::reconcile::{ServiceState, Step, UnitStatus, reconcile};
use super::result::{PhaseResult, RunReport};

/// The operations the apply flow drives.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Makes sure every identity the plan needs has been issued.
    ///
    /// # Errors
    ///
    /// Returns an error if identity material could not be issued.
    async fn generate_certificates(&self, plan: &Plan) -> Result<()>;

    /// Runs the core install phases.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::PhaseExecutionFailed`] naming the first
    /// failed phase and its hosts.
    async fn install(&self, plan: &Plan) -> Result<()>;

    /// Runs an optional play by name.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::UnknownPlay`] for a name outside the
    /// catalog and [`ExecutionError::PhaseExecutionFailed`] if the play fails.
    async fn run_play(&self, name: &str, plan: &Plan) -> Result<()>;

    /// Runs the post-install smoke test.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::SmokeTestFailed`] if the test fails.
    async fn run_smoke_test(&self, plan: &Plan) -> Result<()>;
}

/// Executor that provisions a cluster through a [`PlayRunner`].
#[derive(Debug)]
pub struct ClusterExecutor<R> {
    /// Automation backend.
    runner: R,
    /// Run options.
    options: ExecutorOptions,
    /// Operator output.
    reporter: Arc<Reporter>,
    /// Identity bookkeeping.
    authority: CertificateAuthority,
}

impl<R: PlayRunner> ClusterExecutor<R> {
    /// Creates an executor.
    #[must_use]
    pub fn new(runner: R, options: ExecutorOptions, reporter: Arc<Reporter>) -> Self {
        let authority = CertificateAuthority::new(options.keys_dir());
        Self {
            runner,
            options,
            reporter,
            authority,
        }
    }

    /// Returns the automation backend.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs the core phases and returns the run report.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::PhaseExecutionFailed`] for the first phase
    /// that fails, or an error writing the inventory.
    pub async fn install_phases(&self, plan: &Plan) -> Result<RunReport> {
        let flags = ModeFlags::snapshot(plan, &self.options);
        let inventory = write_inventory(plan, self.options.assets_dir())?;
        let hasher = PlanHasher::new();
        let fingerprint = hasher.short_hash(&hasher.hash_topology(plan));
        let mut run = RunReport::scheduled(CORE_PHASES.iter().map(|p| p.name), fingerprint);

        info!(
            "Starting run {} ({} mode, plan {}, restart services: {})",
            run.run_id, plan.mode, run.plan_fingerprint, flags.restart_services
        );
        self.reporter.header("Installing Cluster");

        let schedule: Vec<(&Phase, bool)> = CORE_PHASES
            .iter()
            .map(|phase| (phase, phase.applies(&plan.features, &flags)))
            .collect();

        for (phase, included) in schedule {
            let hosts = phase.target.resolve(plan);
            if !included || hosts.is_empty() {
                debug!("Skipping phase {}", phase.name);
                run.record(PhaseResult::skipped(phase.name));
                continue;
            }

            let result = self.run_phase(phase, plan, &hosts, flags, &inventory).await;
            self.reporter.phase_result(&result);

            let failed = result.is_failed().then(|| result.failed_hosts());
            run.record(result);

            if let Some(hosts) = failed {
                error!("Phase {} failed on {}", phase.name, hosts.join(", "));
                let never_started: Vec<&str> = run.pending().map(|p| p.name.as_str()).collect();
                if !never_started.is_empty() {
                    warn!("Phases not started: {}", never_started.join(", "));
                }
                self.reporter.summary(&run);
                return Err(ExecutionError::phase_failed(phase.name, hosts).into());
            }
        }

        run.finish();
        info!(
            "Run {} {}: {} phase(s) executed, {} host(s) changed",
            run.run_id,
            run.state,
            run.executed().count(),
            run.total_changed()
        );
        self.reporter.summary(&run);
        Ok(run)
    }

    async fn run_phase(
        &self,
        phase: &Phase,
        plan: &Plan,
        hosts: &[&Node],
        flags: ModeFlags,
        inventory: &Path,
    ) -> PhaseResult {
        let batches = rollout_batches(hosts, phase.target.serial_percentage(plan));
        let mut result = PhaseResult::new(phase.name, batches.len());

        info!(
            "Phase {}: {} host(s) in {} batch(es)",
            phase.name,
            hosts.len(),
            batches.len()
        );

        for (index, batch) in batches.iter().enumerate() {
            debug!("Phase {} batch {}/{}", phase.name, index + 1, batches.len());
            result.batches_run += 1;

            let failures_before = result.failed.len();
            self.run_batch(phase, plan, batch, flags, inventory, &mut result)
                .await;

            if phase.any_errors_fatal && result.failed.len() > failures_before {
                warn!(
                    "Phase {} failed in batch {}, not starting the remaining {}",
                    phase.name,
                    index + 1,
                    batches.len() - index - 1
                );
                break;
            }
        }

        result.complete();
        result
    }

    async fn run_batch(
        &self,
        phase: &Phase,
        plan: &Plan,
        batch: &[&Node],
        flags: ModeFlags,
        inventory: &Path,
        result: &mut PhaseResult,
    ) {
        let mut provision = Vec::new();
        let mut actions = Vec::new();

        for node in batch {
            let target = HostTarget::for_node(node, &plan.cluster.ssh);
            let steps = match self.observe(&target, phase, flags).await {
                Ok(status) => reconcile(&status, phase.desired, flags, &plan.cluster.version),
                Err(e) => {
                    result.failed.push((node.host.clone(), e.to_string()));
                    continue;
                }
            };

            if steps.is_empty() {
                result.unchanged.push(node.host.clone());
                continue;
            }

            let mut service = Vec::new();
            for step in steps {
                match step {
                    Step::RunPlay => provision.push(node.host.clone()),
                    Step::Service(action) => service.push(action),
                }
            }
            if !service.is_empty() {
                actions.push((target, service));
            }
        }

        if let (DesiredState::Running { play }, false) = (phase.desired, provision.is_empty()) {
            let request = play_request(play, inventory, provision.clone(), plan, flags);
            match self.runner.run_play(&request).await {
                Ok(report) => record_play(&report, provision, result),
                Err(e) => {
                    warn!("Play {play} could not be run: {e}");
                    let message = e.to_string();
                    result
                        .failed
                        .extend(provision.into_iter().map(|host| (host, message.clone())));
                }
            }
        }

        for (target, steps) in actions {
            match self.apply_actions(&target, phase.unit, &steps).await {
                Ok(()) => result.changed.push(target.host),
                Err(e) => result.failed.push((target.host, e.to_string())),
            }
        }
    }

    /// Reads what a phase needs to know about its unit on one host.
    ///
    /// The recorded version is only fetched where it can change the outcome:
    /// a running unit during an upgrade.
    async fn observe(
        &self,
        target: &HostTarget,
        phase: &Phase,
        flags: ModeFlags,
    ) -> Result<UnitStatus> {
        let raw = self.runner.service_state(target, phase.unit).await?;
        let state =
            ServiceState::parse(&raw).ok_or_else(|| ExecutionError::UnexpectedServiceState {
                host: target.host.clone(),
                unit: phase.unit.to_string(),
                state: raw,
            })?;

        let status = UnitStatus::new(state);
        let running = matches!(phase.desired, DesiredState::Running { .. });
        if flags.upgrading && running && state == ServiceState::Active {
            let version = self.runner.installed_version(target, phase.unit).await?;
            debug!(
                "{} on {}: recorded version {}",
                phase.unit,
                target.host,
                version.as_deref().unwrap_or("none")
            );
            return Ok(status.with_version(version));
        }
        Ok(status)
    }

    async fn apply_actions(
        &self,
        target: &HostTarget,
        unit: &str,
        actions: &[ServiceAction],
    ) -> Result<()> {
        for action in actions {
            self.runner.service_action(target, unit, *action).await?;
        }
        Ok(())
    }

    /// Runs a play against the first master.
    async fn run_cluster_play(&self, play: &str, plan: &Plan) -> Result<BatchReport> {
        let hosts: Vec<String> = Target::FirstMaster
            .resolve(plan)
            .iter()
            .map(|n| n.host.clone())
            .collect();
        if hosts.is_empty() {
            return Err(ExecutionError::backend(format!("no master node to run {play} on")).into());
        }

        let flags = ModeFlags::snapshot(plan, &self.options);
        let inventory = write_inventory(plan, self.options.assets_dir())?;
        let request = play_request(play, inventory, hosts, plan, flags);
        self.runner.run_play(&request).await
    }
}

/// Builds a play request carrying the run's mode flags and the version the
/// play records on each host it converges.
fn play_request(
    play: &str,
    inventory: impl Into<PathBuf>,
    hosts: Vec<String>,
    plan: &Plan,
    flags: ModeFlags,
) -> PlayRequest {
    PlayRequest::new(play, inventory, hosts)
        .with_var("upgrading", flags.upgrading)
        .with_var("restart_services", flags.restart_services)
        .with_var("cluster_version", plan.cluster.version.as_str())
        .with_var("version_marker_dir", VERSION_MARKER_DIR)
}

/// Folds a play report into a phase result.
fn record_play(report: &BatchReport, hosts: Vec<String>, result: &mut PhaseResult) {
    for host in hosts {
        match report.outcome(&host) {
            Some(outcome) if outcome.status == HostStatus::Ok => result.unchanged.push(host),
            Some(outcome) if !outcome.status.is_failure() => result.changed.push(host),
            Some(outcome) => {
                let message = outcome
                    .message
                    .clone()
                    .unwrap_or_else(|| outcome.status.to_string());
                result.failed.push((host, message));
            }
            None => result
                .failed
                .push((host, String::from("no result reported by backend"))),
        }
    }
}

/// Joins per-host failure messages of a report.
fn describe_failures(report: &BatchReport) -> String {
    report
        .outcomes
        .iter()
        .filter(|o| o.status.is_failure())
        .map(|o| format!("{}: {}", o.host, o.message.as_deref().unwrap_or("failed")))
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
impl<R: PlayRunner> Executor for ClusterExecutor<R> {
    async fn generate_certificates(&self, plan: &Plan) -> Result<()> {
        self.reporter.header("Generating Certificates");

        let summary = self
            .authority
            .ensure_identities(plan, &self.runner)
            .await?;

        for (name, generation) in &summary.reissued {
            self.reporter
                .warn(&format!("Re-issued {name} (generation {generation})"));
        }
        self.reporter.ok(&format!(
            "{} issued, {} re-issued, {} unchanged in {}",
            summary.issued.len(),
            summary.reissued.len(),
            summary.unchanged,
            self.authority.keys_dir().display()
        ));
        Ok(())
    }

    async fn install(&self, plan: &Plan) -> Result<()> {
        self.install_phases(plan).await.map(|_| ())
    }

    async fn run_play(&self, name: &str, plan: &Plan) -> Result<()> {
        let feature = FeaturePlay::find(name).ok_or_else(|| ExecutionError::UnknownPlay {
            name: name.to_string(),
        })?;

        info!("Running optional play {} ({})", feature.name, feature.play);
        let report = self.run_cluster_play(feature.play, plan).await?;

        if report.is_success() {
            self.reporter.ok(&format!("{} completed", feature.name));
            Ok(())
        } else {
            self.reporter
                .fail(&format!("{}: {}", feature.name, describe_failures(&report)));
            Err(ExecutionError::phase_failed(feature.name, report.failed_hosts()).into())
        }
    }

    async fn run_smoke_test(&self, plan: &Plan) -> Result<()> {
        self.reporter.header("Running Smoke Test");

        let report = self
            .run_cluster_play(SMOKE_TEST_PLAY, plan)
            .await
            .map_err(|e| ExecutionError::SmokeTestFailed {
                message: e.to_string(),
            })?;

        if report.is_success() {
            self.reporter.ok("Smoke test passed");
            Ok(())
        } else {
            let message = describe_failures(&report);
            self.reporter.fail(&format!("Smoke test failed: {message}"));
            Err(ExecutionError::SmokeTestFailed { message }.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HostFacts, HostOutcome, IssuanceBatch, MockPlayRunner};
    use crate::cli::SharedBuffer;
    use crate::engine::OutputFormat;
    use crate::error::CairnError;
    use crate::plan::fixtures::{node, plan_with_workers};
    use crate::plan::{InstallMode, Role};
    use mockall::Sequence;
    use serde_json::Value;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        State { host: String, unit: String },
        Version { host: String, unit: String },
        Play { play: String, hosts: Vec<String> },
        Action { host: String, unit: String, action: ServiceAction },
        Issue,
    }

    impl Call {
        const fn is_mutating(&self) -> bool {
            !matches!(self, Self::State { .. } | Self::Version { .. })
        }
    }

    /// Runner that simulates service state and records every call.
    #[derive(Default)]
    struct RecordingRunner {
        states: Mutex<HashMap<(String, String), String>>,
        versions: Mutex<HashMap<(String, String), String>>,
        failing_hosts: HashSet<String>,
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingRunner {
        fn failing(hosts: &[&str]) -> Self {
            Self {
                failing_hosts: hosts.iter().map(|h| (*h).to_string()).collect(),
                ..Self::default()
            }
        }

        fn set_state(&self, host: &str, unit: &str, state: &str) {
            self.states
                .lock()
                .unwrap()
                .insert((host.to_string(), unit.to_string()), state.to_string());
        }

        fn set_version(&self, host: &str, unit: &str, version: &str) {
            self.versions
                .lock()
                .unwrap()
                .insert((host.to_string(), unit.to_string()), version.to_string());
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }

        fn plays(&self) -> Vec<(String, Vec<String>)> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Play { play, hosts } => Some((play, hosts)),
                    _ => None,
                })
                .collect()
        }

        fn inspected_hosts(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::State { host, .. } => Some(host),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl PlayRunner for RecordingRunner {
        async fn run_play(&self, request: &PlayRequest) -> Result<BatchReport> {
            self.calls.lock().unwrap().push(Call::Play {
                play: request.play.clone(),
                hosts: request.hosts.clone(),
            });

            let unit = CORE_PHASES.iter().find_map(|p| match p.desired {
                DesiredState::Running { play } if play == request.play => Some(p.unit),
                _ => None,
            });

            let version = request.extra_vars.get("cluster_version").and_then(Value::as_str);

            let outcomes = request
                .hosts
                .iter()
                .map(|host| {
                    let failed = self.failing_hosts.contains(host);
                    if let (false, Some(unit)) = (failed, unit) {
                        self.set_state(host, unit, "active");
                        if let Some(version) = version {
                            self.set_version(host, unit, version);
                        }
                    }
                    HostOutcome {
                        host: host.clone(),
                        status: if failed {
                            HostStatus::Failed
                        } else {
                            HostStatus::Changed
                        },
                        message: failed.then(|| String::from("task failed")),
                    }
                })
                .collect();
            Ok(BatchReport { outcomes })
        }

        async fn service_state(&self, target: &HostTarget, unit: &str) -> Result<String> {
            self.calls.lock().unwrap().push(Call::State {
                host: target.host.clone(),
                unit: unit.to_string(),
            });
            Ok(self
                .states
                .lock()
                .unwrap()
                .get(&(target.host.clone(), unit.to_string()))
                .cloned()
                .unwrap_or_else(|| String::from("inactive")))
        }

        async fn installed_version(
            &self,
            target: &HostTarget,
            unit: &str,
        ) -> Result<Option<String>> {
            self.calls.lock().unwrap().push(Call::Version {
                host: target.host.clone(),
                unit: unit.to_string(),
            });
            Ok(self
                .versions
                .lock()
                .unwrap()
                .get(&(target.host.clone(), unit.to_string()))
                .cloned())
        }

        async fn host_facts(&self, _target: &HostTarget) -> Result<HostFacts> {
            Ok(HostFacts {
                memory_mb: 8192,
                disk_free_mb: 65536,
                python: true,
            })
        }

        async fn service_action(
            &self,
            target: &HostTarget,
            unit: &str,
            action: ServiceAction,
        ) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Action {
                host: target.host.clone(),
                unit: unit.to_string(),
                action,
            });
            let state = match action {
                ServiceAction::Stop => "inactive",
                ServiceAction::RemoveUnit => "unknown",
                ServiceAction::Restart => "active",
            };
            self.set_state(&target.host, unit, state);
            Ok(())
        }

        async fn issue_identities(&self, _batch: &IssuanceBatch) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Issue);
            Ok(())
        }
    }

    fn options(temp: &TempDir) -> ExecutorOptions {
        ExecutorOptions {
            generated_assets_dir: temp.path().join("generated"),
            skip_preflight: true,
            ..ExecutorOptions::default()
        }
    }

    fn executor<R: PlayRunner>(runner: R, options: ExecutorOptions) -> (ClusterExecutor<R>, SharedBuffer) {
        let (reporter, buffer) = SharedBuffer::reporter(OutputFormat::Raw);
        (ClusterExecutor::new(runner, options, Arc::new(reporter)), buffer)
    }

    fn changed_all(request: &PlayRequest) -> Result<BatchReport> {
        Ok(BatchReport {
            outcomes: request
                .hosts
                .iter()
                .map(|h| HostOutcome {
                    host: h.clone(),
                    status: HostStatus::Changed,
                    message: None,
                })
                .collect(),
        })
    }

    #[tokio::test]
    async fn test_fresh_install_runs_every_core_phase() {
        let temp = TempDir::new().unwrap();
        let (executor, buffer) = executor(RecordingRunner::default(), options(&temp));
        let plan = plan_with_workers(2);

        let report = executor.install_phases(&plan).await.unwrap();

        let plays: Vec<String> = executor.runner().plays().into_iter().map(|(p, _)| p).collect();
        assert_eq!(plays, vec!["_etcd.yaml", "_master.yaml", "_worker.yaml"]);
        assert_eq!(report.executed().count(), 3);
        assert!(report.phase("storage").is_some_and(|p| !p.was_executed()));
        assert!(temp.path().join("generated").join("inventory.ini").exists());

        let output = buffer.contents();
        assert!(output.contains("[OK] worker: 2 changed, 0 unchanged"));
        assert!(!output.contains("retire-calico-node"));
    }

    #[tokio::test]
    async fn test_second_install_is_noop() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(RecordingRunner::default(), options(&temp));
        let plan = plan_with_workers(3);

        executor.install_phases(&plan).await.unwrap();
        executor.runner().clear();

        let report = executor.install_phases(&plan).await.unwrap();
        let calls = executor.runner().calls();

        assert!(!calls.is_empty());
        assert!(calls.iter().all(|c| !c.is_mutating()));
        assert_eq!(report.total_changed(), 0);
        assert_eq!(report.phase("worker").unwrap().unchanged.len(), 3);
    }

    #[tokio::test]
    async fn test_partial_failure_rerun_only_touches_unfinished_hosts() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(RecordingRunner::default(), options(&temp));
        let plan = plan_with_workers(3);

        executor.runner().set_state("etcd-1", "etcd", "active");
        executor.runner().set_state("master-1", "kube-apiserver", "active");
        executor.runner().set_state("worker-1", "kubelet", "active");

        executor.install_phases(&plan).await.unwrap();

        assert_eq!(
            executor.runner().plays(),
            vec![(
                String::from("_worker.yaml"),
                vec![String::from("worker-2"), String::from("worker-3")]
            )]
        );
    }

    #[tokio::test]
    async fn test_rolling_batches_follow_plan_order() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(RecordingRunner::default(), options(&temp));
        let mut plan = plan_with_workers(5);
        plan.rollout.serial_percentage.insert(Role::Worker, 40);

        let report = executor.install_phases(&plan).await.unwrap();

        let worker_batches: Vec<Vec<String>> = executor
            .runner()
            .plays()
            .into_iter()
            .filter(|(play, _)| play == "_worker.yaml")
            .map(|(_, hosts)| hosts)
            .collect();
        assert_eq!(
            worker_batches,
            vec![
                vec![String::from("worker-1"), String::from("worker-2")],
                vec![String::from("worker-3"), String::from("worker-4")],
                vec![String::from("worker-5")],
            ]
        );
        assert_eq!(report.phase("worker").unwrap().batches_run, 3);
    }

    #[tokio::test]
    async fn test_fatal_failure_stops_later_batches() {
        let temp = TempDir::new().unwrap();
        let (executor, buffer) = executor(RecordingRunner::failing(&["etcd-1"]), options(&temp));
        let mut plan = plan_with_workers(1);
        plan.etcd.nodes = vec![node("etcd-1", 10), node("etcd-2", 11), node("etcd-3", 12)];
        plan.etcd.expected_count = Some(3);
        plan.rollout.serial_percentage.insert(Role::Etcd, 34);

        let err = executor.install_phases(&plan).await.unwrap_err();

        assert!(matches!(
            err,
            CairnError::Execution(ExecutionError::PhaseExecutionFailed { ref phase, .. })
                if phase == "etcd"
        ));
        assert_eq!(err.failed_hosts(), ["etcd-1"]);
        assert_eq!(executor.runner().inspected_hosts(), vec!["etcd-1"]);
        assert!(buffer.contents().contains("2 of 3 batches not started"));
    }

    #[tokio::test]
    async fn test_non_fatal_failure_finishes_phase_then_aborts() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(RecordingRunner::failing(&["worker-2"]), options(&temp));
        let mut plan = plan_with_workers(4);
        plan.rollout.serial_percentage.insert(Role::Worker, 25);
        plan.storage.nodes.push(node("storage-1", 40));

        let err = executor.install_phases(&plan).await.unwrap_err();

        assert_eq!(err.failed_hosts(), ["worker-2"]);
        let worker_plays = executor
            .runner()
            .plays()
            .iter()
            .filter(|(play, _)| play == "_worker.yaml")
            .count();
        assert_eq!(worker_plays, 4);
        assert!(!executor.runner().inspected_hosts().contains(&String::from("storage-1")));
    }

    #[tokio::test]
    async fn test_unexpected_service_state_fails_host() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(RecordingRunner::default(), options(&temp));
        executor.runner().set_state("etcd-1", "etcd", "failed");

        let err = executor
            .install_phases(&plan_with_workers(1))
            .await
            .unwrap_err();

        assert_eq!(err.failed_hosts(), ["etcd-1"]);
        assert!(executor.runner().plays().is_empty());
    }

    #[tokio::test]
    async fn test_restart_services_restarts_running_units() {
        let temp = TempDir::new().unwrap();
        let mut opts = options(&temp);
        opts.restart_services = true;
        let (executor, _) = executor(RecordingRunner::default(), opts);
        let plan = plan_with_workers(1);
        for (host, unit) in [
            ("etcd-1", "etcd"),
            ("master-1", "kube-apiserver"),
            ("worker-1", "kubelet"),
        ] {
            executor.runner().set_state(host, unit, "active");
        }

        executor.install_phases(&plan).await.unwrap();

        let restarts = executor
            .runner()
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Action { action: ServiceAction::Restart, .. }))
            .count();
        assert_eq!(restarts, 3);
        assert!(executor.runner().plays().is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_retires_only_active_legacy_units() {
        let temp = TempDir::new().unwrap();
        let mut plan = plan_with_workers(2);
        plan.mode = InstallMode::Upgrade;

        let mut runner = MockPlayRunner::new();
        runner.expect_service_state().returning(|target, unit| {
            let state = match (target.host.as_str(), unit) {
                ("worker-1", "calico-node") => "active",
                (_, "calico-node" | "kube-proxy") => "inactive",
                _ => "active",
            };
            Ok(state.to_string())
        });
        runner.expect_installed_version().returning(|_, _| Ok(None));

        let mut sequence = Sequence::new();
        runner
            .expect_service_action()
            .withf(|t, unit, action| {
                t.host == "worker-1" && unit == "calico-node" && *action == ServiceAction::Stop
            })
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _, _| Ok(()));
        runner
            .expect_service_action()
            .withf(|t, unit, action| {
                t.host == "worker-1"
                    && unit == "calico-node"
                    && *action == ServiceAction::RemoveUnit
            })
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _, _| Ok(()));
        runner.expect_run_play().returning(changed_all);

        let (executor, _) = executor(runner, options(&temp));
        let report = executor.install_phases(&plan).await.unwrap();

        let calico = report.phase("retire-calico-node").unwrap();
        assert_eq!(calico.changed, vec!["worker-1"]);
        assert_eq!(calico.unchanged.len(), 3);
        assert!(report.phase("retire-kube-proxy").unwrap().changed.is_empty());
    }

    #[tokio::test]
    async fn test_second_upgrade_is_noop() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(RecordingRunner::default(), options(&temp));
        let mut plan = plan_with_workers(2);
        plan.mode = InstallMode::Upgrade;

        let first = executor.install_phases(&plan).await.unwrap();
        assert!(first.total_changed() > 0);
        executor.runner().clear();

        let second = executor.install_phases(&plan).await.unwrap();
        let calls = executor.runner().calls();

        assert!(calls.iter().any(|c| matches!(c, Call::Version { .. })));
        assert!(calls.iter().all(|c| !c.is_mutating()));
        assert_eq!(second.total_changed(), 0);
    }

    #[tokio::test]
    async fn test_upgrade_reruns_only_stale_hosts() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(RecordingRunner::default(), options(&temp));
        let mut plan = plan_with_workers(2);
        plan.mode = InstallMode::Upgrade;
        for (host, unit) in [
            ("etcd-1", "etcd"),
            ("master-1", "kube-apiserver"),
            ("worker-1", "kubelet"),
            ("worker-2", "kubelet"),
        ] {
            executor.runner().set_state(host, unit, "active");
            executor.runner().set_version(host, unit, &plan.cluster.version);
        }
        executor.runner().set_version("worker-2", "kubelet", "v1.9.0");

        executor.install_phases(&plan).await.unwrap();

        assert_eq!(
            executor.runner().plays(),
            vec![(String::from("_worker.yaml"), vec![String::from("worker-2")])]
        );
    }

    #[tokio::test]
    async fn test_backend_error_fails_batch_hosts() {
        let temp = TempDir::new().unwrap();
        let mut runner = MockPlayRunner::new();
        runner
            .expect_service_state()
            .returning(|_, _| Ok(String::from("inactive")));
        runner
            .expect_run_play()
            .times(1)
            .returning(|_| Err(ExecutionError::backend("ansible-playbook exited by signal").into()));

        let (executor, buffer) = executor(runner, options(&temp));
        let err = executor
            .install_phases(&plan_with_workers(1))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CairnError::Execution(ExecutionError::PhaseExecutionFailed { ref phase, .. })
                if phase == "etcd"
        ));
        assert_eq!(err.failed_hosts(), ["etcd-1"]);
        let output = buffer.contents();
        assert!(output.contains("etcd-1: "));
        assert!(output.contains("exited by signal"));
        assert!(output.contains("aborted"));
    }

    #[tokio::test]
    async fn test_ok_outcome_counts_as_unchanged() {
        let temp = TempDir::new().unwrap();
        let mut runner = MockPlayRunner::new();
        runner
            .expect_service_state()
            .returning(|_, _| Ok(String::from("inactive")));
        runner.expect_run_play().returning(|request| {
            Ok(BatchReport {
                outcomes: request
                    .hosts
                    .iter()
                    .map(|h| HostOutcome {
                        host: h.clone(),
                        status: HostStatus::Ok,
                        message: None,
                    })
                    .collect(),
            })
        });

        let (executor, _) = executor(runner, options(&temp));
        let report = executor.install_phases(&plan_with_workers(1)).await.unwrap();

        let etcd = report.phase("etcd").unwrap();
        assert_eq!(etcd.unchanged, vec!["etcd-1"]);
        assert!(etcd.changed.is_empty());
        assert_eq!(report.total_changed(), 0);
    }

    #[tokio::test]
    async fn test_run_play_targets_first_master() {
        let temp = TempDir::new().unwrap();
        let mut runner = MockPlayRunner::new();
        runner
            .expect_run_play()
            .withf(|request| request.play == "_helm.yaml" && request.hosts == ["master-1"])
            .times(1)
            .returning(changed_all);

        let (executor, buffer) = executor(runner, options(&temp));
        executor
            .run_play("package-manager", &plan_with_workers(1))
            .await
            .unwrap();

        assert!(buffer.contents().contains("[OK] package-manager completed"));
    }

    #[tokio::test]
    async fn test_run_play_unknown_name() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(MockPlayRunner::new(), options(&temp));

        let err = executor
            .run_play("_nonexistent.yaml", &plan_with_workers(1))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CairnError::Execution(ExecutionError::UnknownPlay { .. })
        ));
    }

    #[tokio::test]
    async fn test_smoke_test_failure() {
        let temp = TempDir::new().unwrap();
        let (executor, _) = executor(RecordingRunner::failing(&["master-1"]), options(&temp));

        let err = executor
            .run_smoke_test(&plan_with_workers(1))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CairnError::Execution(ExecutionError::SmokeTestFailed { ref message })
                if message.contains("task failed")
        ));
    }

    #[tokio::test]
    async fn test_generate_certificates_reports_summary() {
        let temp = TempDir::new().unwrap();
        let (executor, buffer) = executor(RecordingRunner::default(), options(&temp));

        executor
            .generate_certificates(&plan_with_workers(1))
            .await
            .unwrap();

        assert_eq!(executor.runner().calls(), vec![Call::Issue]);
        assert!(buffer.contents().contains("7 issued, 0 re-issued, 0 unchanged"));
    }
}
