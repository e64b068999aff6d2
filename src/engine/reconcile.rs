//! Check-then-act reconciliation of a single service unit.
//!
//! A phase reads its unit's state on every host before touching it and
//! derives the steps from what it found, so re-running a phase against a
//! host that already converged does nothing. On upgrade the version each
//! play records on the host tells upgraded hosts apart from stale ones.

use crate::backend::ServiceAction;

use super::options::ModeFlags;
use super::phase::DesiredState;

/// Observed state of a service unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// The unit is running.
    Active,
    /// The unit exists but is not running.
    Inactive,
    /// The unit is not installed.
    Absent,
}

/// What a phase found on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    /// Service state.
    pub state: ServiceState,
    /// Version recorded by the last successful play, if any.
    pub installed_version: Option<String>,
}

/// One corrective step on a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run the phase's play against the host.
    RunPlay,
    /// Apply a direct service action.
    Service(ServiceAction),
}

impl ServiceState {
    /// Parses a service state answer. Anything outside the expected set is `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "unknown" | "absent" => Some(Self::Absent),
            _ => None,
        }
    }
}

impl UnitStatus {
    /// Creates a status without a recorded version.
    #[must_use]
    pub const fn new(state: ServiceState) -> Self {
        Self {
            state,
            installed_version: None,
        }
    }

    /// Attaches the recorded version.
    #[must_use]
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.installed_version = version;
        self
    }

    /// Returns true if the recorded version is `target`.
    #[must_use]
    pub fn is_at(&self, target: &str) -> bool {
        self.installed_version.as_deref() == Some(target)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

/// Returns the steps that take a unit from `current` to `desired`.
///
/// `target_version` is the version the plan installs. On upgrade a running
/// unit is re-provisioned only if its recorded version differs.
/// An empty list means the host already matches.
#[must_use]
pub fn reconcile(
    current: &UnitStatus,
    desired: DesiredState,
    flags: ModeFlags,
    target_version: &str,
) -> Vec<Step> {
    match (desired, current.state) {
        (DesiredState::Running { .. }, ServiceState::Active) => {
            if flags.upgrading && !current.is_at(target_version) {
                vec![Step::RunPlay]
            } else if flags.restart_services {
                vec![Step::Service(ServiceAction::Restart)]
            } else {
                Vec::new()
            }
        }
        (DesiredState::Running { .. }, ServiceState::Inactive | ServiceState::Absent) => {
            vec![Step::RunPlay]
        }
        (DesiredState::Retired, ServiceState::Active) => vec![
            Step::Service(ServiceAction::Stop),
            Step::Service(ServiceAction::RemoveUnit),
        ],
        (DesiredState::Retired, ServiceState::Inactive | ServiceState::Absent) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNNING: DesiredState = DesiredState::Running { play: "_etcd.yaml" };

    const TARGET: &str = "v1.10.5";

    const UPGRADE: ModeFlags = ModeFlags {
        upgrading: true,
        restart_services: false,
    };

    fn status(state: ServiceState) -> UnitStatus {
        UnitStatus::new(state)
    }

    #[test]
    fn test_parse_state_answers() {
        assert_eq!(ServiceState::parse("active\n"), Some(ServiceState::Active));
        assert_eq!(ServiceState::parse("inactive"), Some(ServiceState::Inactive));
        assert_eq!(ServiceState::parse("unknown"), Some(ServiceState::Absent));
        assert_eq!(ServiceState::parse("failed"), None);
        assert_eq!(ServiceState::parse("activating"), None);
        assert_eq!(ServiceState::parse(""), None);
    }

    #[test]
    fn test_running_unit_is_left_alone() {
        let current = status(ServiceState::Active);
        assert!(reconcile(&current, RUNNING, ModeFlags::default(), TARGET).is_empty());
    }

    #[test]
    fn test_missing_unit_is_provisioned() {
        assert_eq!(
            reconcile(&status(ServiceState::Absent), RUNNING, ModeFlags::default(), TARGET),
            vec![Step::RunPlay]
        );
        assert_eq!(
            reconcile(&status(ServiceState::Inactive), RUNNING, ModeFlags::default(), TARGET),
            vec![Step::RunPlay]
        );
    }

    #[test]
    fn test_restart_flag_restarts_running_unit() {
        let flags = ModeFlags {
            upgrading: false,
            restart_services: true,
        };
        assert_eq!(
            reconcile(&status(ServiceState::Active), RUNNING, flags, TARGET),
            vec![Step::Service(ServiceAction::Restart)]
        );
    }

    #[test]
    fn test_upgrade_reruns_play_on_stale_unit() {
        let unversioned = status(ServiceState::Active);
        assert_eq!(reconcile(&unversioned, RUNNING, UPGRADE, TARGET), vec![Step::RunPlay]);

        let older = status(ServiceState::Active).with_version(Some(String::from("v1.9.8")));
        assert_eq!(reconcile(&older, RUNNING, UPGRADE, TARGET), vec![Step::RunPlay]);
    }

    #[test]
    fn test_upgrade_leaves_upgraded_unit_alone() {
        let current = status(ServiceState::Active).with_version(Some(String::from(TARGET)));
        assert!(reconcile(&current, RUNNING, UPGRADE, TARGET).is_empty());

        let restart = ModeFlags {
            upgrading: true,
            restart_services: true,
        };
        assert_eq!(
            reconcile(&current, RUNNING, restart, TARGET),
            vec![Step::Service(ServiceAction::Restart)]
        );
    }

    #[test]
    fn test_active_legacy_unit_is_stopped_then_removed() {
        assert_eq!(
            reconcile(&status(ServiceState::Active), DesiredState::Retired, UPGRADE, TARGET),
            vec![
                Step::Service(ServiceAction::Stop),
                Step::Service(ServiceAction::RemoveUnit)
            ]
        );
    }

    #[test]
    fn test_inactive_legacy_unit_is_noop() {
        for state in [ServiceState::Inactive, ServiceState::Absent] {
            assert!(reconcile(&status(state), DesiredState::Retired, UPGRADE, TARGET).is_empty());
        }
    }
}
