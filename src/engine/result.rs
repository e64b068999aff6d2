//! Phase and run results.
//!
//! A run report lists every scheduled phase up front as pending. Each phase
//! moves to running when its first batch starts and ends completed or
//! failed; phases left pending after an abort were never started.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// State of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    /// Scheduled but not started.
    Pending,
    /// Batches are being executed.
    Running,
    /// The predicate excluded the phase, or it had no hosts.
    Skipped,
    /// Every targeted host converged.
    Completed,
    /// At least one host failed.
    Failed,
}

/// Final state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Phases are still running.
    Running,
    /// Every phase completed or was skipped.
    Succeeded,
    /// A phase failed and the run stopped.
    Aborted,
}

/// Result of one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseResult {
    /// Phase name.
    pub name: String,
    /// Current state.
    pub state: PhaseState,
    /// Hosts that were changed.
    pub changed: Vec<String>,
    /// Hosts that already matched.
    pub unchanged: Vec<String>,
    /// Hosts that failed, with a message.
    pub failed: Vec<(String, String)>,
    /// Number of batches started.
    pub batches_run: usize,
    /// Number of batches planned.
    pub batches_planned: usize,
}

/// Report of a whole run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Run identifier, also used in logs.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Phase results in execution order.
    pub phases: Vec<PhaseResult>,
    /// Final state.
    pub state: RunState,
    /// Short topology fingerprint of the plan the run applied.
    pub plan_fingerprint: String,
}

impl PhaseResult {
    /// Creates an empty result for a phase about to run.
    #[must_use]
    pub fn new(name: impl Into<String>, batches_planned: usize) -> Self {
        Self {
            name: name.into(),
            state: PhaseState::Running,
            changed: Vec::new(),
            unchanged: Vec::new(),
            failed: Vec::new(),
            batches_run: 0,
            batches_planned,
        }
    }

    /// Creates the result of a skipped phase.
    #[must_use]
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            state: PhaseState::Skipped,
            ..Self::new(name, 0)
        }
    }

    /// Creates the placeholder of a scheduled phase.
    #[must_use]
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            state: PhaseState::Pending,
            ..Self::new(name, 0)
        }
    }

    /// Ends a running phase: failed if any host failed, else completed.
    pub fn complete(&mut self) {
        self.state = if self.failed.is_empty() {
            PhaseState::Completed
        } else {
            PhaseState::Failed
        };
    }

    /// Returns the names of the failed hosts.
    #[must_use]
    pub fn failed_hosts(&self) -> Vec<String> {
        self.failed.iter().map(|(host, _)| host.clone()).collect()
    }

    /// Returns true if the phase actually ran.
    #[must_use]
    pub const fn was_executed(&self) -> bool {
        !matches!(self.state, PhaseState::Skipped | PhaseState::Pending)
    }

    /// Returns true if the phase failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.state, PhaseState::Failed)
    }

    /// Returns true if batches were left unstarted.
    #[must_use]
    pub const fn was_cut_short(&self) -> bool {
        self.batches_run < self.batches_planned
    }
}

impl RunReport {
    /// Starts a new run report.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            phases: Vec::new(),
            state: RunState::Running,
            plan_fingerprint: String::new(),
        }
    }

    /// Starts a run report with every scheduled phase pending.
    #[must_use]
    pub fn scheduled<'a>(
        names: impl IntoIterator<Item = &'a str>,
        plan_fingerprint: String,
    ) -> Self {
        Self {
            phases: names.into_iter().map(PhaseResult::pending).collect(),
            plan_fingerprint,
            ..Self::new()
        }
    }

    /// Records a phase result, replacing its pending placeholder if any.
    pub fn record(&mut self, result: PhaseResult) {
        if result.is_failed() {
            self.state = RunState::Aborted;
        }
        match self.phases.iter_mut().find(|p| p.name == result.name) {
            Some(slot) => *slot = result,
            None => self.phases.push(result),
        }
    }

    /// Returns the phases that were scheduled but never started.
    pub fn pending(&self) -> impl Iterator<Item = &PhaseResult> {
        self.phases
            .iter()
            .filter(|p| p.state == PhaseState::Pending)
    }

    /// Marks the run finished if nothing failed.
    pub fn finish(&mut self) {
        if self.state == RunState::Running {
            self.state = RunState::Succeeded;
        }
    }

    /// Returns the phases that actually ran.
    pub fn executed(&self) -> impl Iterator<Item = &PhaseResult> {
        self.phases.iter().filter(|p| p.was_executed())
    }

    /// Returns a phase result by name.
    #[must_use]
    pub fn phase(&self, name: &str) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Total number of hosts changed across all phases.
    #[must_use]
    pub fn total_changed(&self) -> usize {
        self.phases.iter().map(|p| p.changed.len()).sum()
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Skipped => write!(f, "skipped"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_phase_aborts_run() {
        let mut report = RunReport::new();
        report.record(PhaseResult::skipped("retire-calico-node"));
        report.record(PhaseResult::new("etcd", 1));

        let mut worker = PhaseResult::new("worker", 3);
        worker.failed.push((String::from("worker-2"), String::from("boom")));
        worker.batches_run = 1;
        worker.complete();
        report.record(worker);
        report.finish();

        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(report.executed().count(), 2);
        let worker = report.phase("worker").unwrap();
        assert_eq!(worker.failed_hosts(), vec!["worker-2"]);
        assert!(worker.was_cut_short());
    }

    #[test]
    fn test_clean_run_succeeds() {
        let mut report = RunReport::new();
        let mut etcd = PhaseResult::new("etcd", 1);
        etcd.changed.push(String::from("etcd-1"));
        etcd.complete();
        report.record(etcd);
        report.finish();

        assert_eq!(report.state, RunState::Succeeded);
        assert_eq!(report.total_changed(), 1);
    }

    #[test]
    fn test_scheduled_phases_stay_pending_until_recorded() {
        let mut report =
            RunReport::scheduled(["etcd", "master", "worker"], String::from("0123abcd"));
        assert_eq!(report.pending().count(), 3);
        assert_eq!(report.executed().count(), 0);

        let mut etcd = PhaseResult::new("etcd", 1);
        assert_eq!(etcd.state, PhaseState::Running);
        etcd.failed.push((String::from("etcd-1"), String::from("boom")));
        etcd.complete();
        report.record(etcd);

        assert_eq!(report.phases.len(), 3);
        assert_eq!(report.phases[0].state, PhaseState::Failed);
        assert_eq!(report.state, RunState::Aborted);
        let pending: Vec<&str> = report.pending().map(|p| p.name.as_str()).collect();
        assert_eq!(pending, vec!["master", "worker"]);
    }
}
