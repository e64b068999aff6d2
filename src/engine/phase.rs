//! The phase catalog.
//!
//! A phase is a named unit of work with an inclusion predicate, a set of
//! target hosts, and the service it converges or retires. The catalog
//! order is the execution order.

use crate::plan::{Features, Node, Plan, Role};

use super::options::ModeFlags;

/// Inclusion predicate over the feature toggles and the mode snapshot.
pub type Predicate = fn(&Features, &ModeFlags) -> bool;

/// Hosts a phase runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every node of one role group, in plan order.
    Role(Role),
    /// Every distinct node of the plan.
    AllNodes,
    /// The first master.
    FirstMaster,
}

/// The state a phase drives its service unit to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    /// Running, provisioned by the given play.
    Running {
        /// Play file that provisions the unit.
        play: &'static str,
    },
    /// Stopped with its definition removed.
    Retired,
}

/// A core phase.
#[derive(Debug, Clone, Copy)]
pub struct Phase {
    /// Phase name shown to the operator.
    pub name: &'static str,
    /// Hosts the phase runs against.
    pub target: Target,
    /// Service unit the phase manages.
    pub unit: &'static str,
    /// Desired state of the unit.
    pub desired: DesiredState,
    /// Whether the phase runs in this mode.
    pub include: Predicate,
    /// A failure on any host stops all later batches.
    pub any_errors_fatal: bool,
}

/// An optional cluster-level play.
#[derive(Debug, Clone, Copy)]
pub struct FeaturePlay {
    /// Play name used to request it.
    pub name: &'static str,
    /// Play file.
    pub play: &'static str,
    /// Header shown before the play runs.
    pub title: &'static str,
    /// Error prefix when the play fails.
    pub failure_context: &'static str,
    /// Client directory under the operator's home backed up first, if any.
    pub client_dir: Option<&'static str>,
    /// Whether the play runs in this mode.
    pub include: Predicate,
}

const fn always(_: &Features, _: &ModeFlags) -> bool {
    true
}

const fn upgrading(_: &Features, flags: &ModeFlags) -> bool {
    flags.upgrading
}

const fn package_manager(features: &Features, _: &ModeFlags) -> bool {
    features.package_manager.enabled
}

const fn heapster(features: &Features, _: &ModeFlags) -> bool {
    features.heapster_monitoring.enabled
}

const fn internal_registry(features: &Features, flags: &ModeFlags) -> bool {
    features.internal_registry.enabled && !flags.upgrading
}

/// Core phases in execution order.
pub static CORE_PHASES: &[Phase] = &[
    Phase {
        name: "retire-calico-node",
        target: Target::AllNodes,
        unit: "calico-node",
        desired: DesiredState::Retired,
        include: upgrading,
        any_errors_fatal: true,
    },
    Phase {
        name: "retire-kube-proxy",
        target: Target::AllNodes,
        unit: "kube-proxy",
        desired: DesiredState::Retired,
        include: upgrading,
        any_errors_fatal: true,
    },
    Phase {
        name: "etcd",
        target: Target::Role(Role::Etcd),
        unit: "etcd",
        desired: DesiredState::Running { play: "_etcd.yaml" },
        include: always,
        any_errors_fatal: true,
    },
    Phase {
        name: "master",
        target: Target::Role(Role::Master),
        unit: "kube-apiserver",
        desired: DesiredState::Running {
            play: "_master.yaml",
        },
        include: always,
        any_errors_fatal: true,
    },
    Phase {
        name: "worker",
        target: Target::Role(Role::Worker),
        unit: "kubelet",
        desired: DesiredState::Running {
            play: "_worker.yaml",
        },
        include: always,
        any_errors_fatal: false,
    },
    Phase {
        name: "storage",
        target: Target::Role(Role::Storage),
        unit: "glusterd",
        desired: DesiredState::Running {
            play: "_storage.yaml",
        },
        include: always,
        any_errors_fatal: false,
    },
];

/// Optional plays in execution order.
pub static FEATURE_PLAYS: &[FeaturePlay] = &[
    FeaturePlay {
        name: "package-manager",
        play: "_helm.yaml",
        title: "Configuring Package Manager",
        failure_context: "error configuring package manager RBAC",
        client_dir: Some(".helm"),
        include: package_manager,
    },
    FeaturePlay {
        name: "heapster",
        play: "_heapster.yaml",
        title: "Installing Heapster Monitoring",
        failure_context: "error installing heapster monitoring",
        client_dir: None,
        include: heapster,
    },
    FeaturePlay {
        name: "internal-registry",
        play: "_docker-registry.yaml",
        title: "Installing Internal Registry",
        failure_context: "error installing internal registry",
        client_dir: None,
        include: internal_registry,
    },
];

/// Play run by the smoke test.
pub const SMOKE_TEST_PLAY: &str = "_smoke-test.yaml";

impl Target {
    /// Resolves the target hosts against a plan.
    #[must_use]
    pub fn resolve(self, plan: &Plan) -> Vec<&Node> {
        match self {
            Self::Role(role) => plan.group(role).iter().collect(),
            Self::AllNodes => plan.all_nodes(),
            Self::FirstMaster => plan.master.nodes.iter().take(1).collect(),
        }
    }

    /// Returns the serial percentage that applies to this target.
    #[must_use]
    pub fn serial_percentage(self, plan: &Plan) -> u8 {
        match self {
            Self::Role(role) => plan.serial_percentage(role),
            Self::AllNodes | Self::FirstMaster => crate::plan::DEFAULT_SERIAL_PERCENTAGE,
        }
    }
}

impl Phase {
    /// Returns true if the phase runs in this mode.
    #[must_use]
    pub fn applies(&self, features: &Features, flags: &ModeFlags) -> bool {
        (self.include)(features, flags)
    }
}

impl FeaturePlay {
    /// Returns true if the play runs in this mode.
    #[must_use]
    pub fn applies(&self, features: &Features, flags: &ModeFlags) -> bool {
        (self.include)(features, flags)
    }

    /// Looks up a play by name or play file.
    #[must_use]
    pub fn find(name: &str) -> Option<&'static Self> {
        FEATURE_PLAYS
            .iter()
            .find(|fp| fp.name == name || fp.play == name)
    }
}

/// Evaluates every predicate once and returns the plays that run.
#[must_use]
pub fn selected_feature_plays(features: &Features, flags: &ModeFlags) -> Vec<&'static FeaturePlay> {
    FEATURE_PLAYS
        .iter()
        .filter(|fp| fp.applies(features, flags))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::FeatureToggle;
    use crate::plan::fixtures::{node, plan_with_workers};

    const ON: FeatureToggle = FeatureToggle { enabled: true };

    fn names(plays: &[&FeaturePlay]) -> Vec<&'static str> {
        plays.iter().map(|fp| fp.name).collect()
    }

    #[test]
    fn test_core_phase_order() {
        let names: Vec<&str> = CORE_PHASES.iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec![
                "retire-calico-node",
                "retire-kube-proxy",
                "etcd",
                "master",
                "worker",
                "storage"
            ]
        );
    }

    #[test]
    fn test_retire_phases_only_on_upgrade() {
        let features = Features::default();
        let install = ModeFlags::default();
        let upgrade = ModeFlags {
            upgrading: true,
            restart_services: false,
        };

        let retire = &CORE_PHASES[0];
        assert!(!retire.applies(&features, &install));
        assert!(retire.applies(&features, &upgrade));
        assert!(CORE_PHASES[2].applies(&features, &install));
    }

    #[test]
    fn test_no_feature_plays_by_default() {
        let plays = selected_feature_plays(&Features::default(), &ModeFlags::default());
        assert!(plays.is_empty());
    }

    #[test]
    fn test_feature_plays_follow_toggles() {
        let features = Features {
            package_manager: ON,
            heapster_monitoring: FeatureToggle::default(),
            internal_registry: ON,
        };

        let install = selected_feature_plays(&features, &ModeFlags::default());
        assert_eq!(names(&install), vec!["package-manager", "internal-registry"]);

        let upgrade = selected_feature_plays(
            &features,
            &ModeFlags {
                upgrading: true,
                restart_services: false,
            },
        );
        assert_eq!(names(&upgrade), vec!["package-manager"]);
    }

    #[test]
    fn test_find_by_name_or_file() {
        assert_eq!(FeaturePlay::find("_helm.yaml").map(|fp| fp.name), Some("package-manager"));
        assert_eq!(FeaturePlay::find("heapster").map(|fp| fp.play), Some("_heapster.yaml"));
        assert!(FeaturePlay::find("_unknown.yaml").is_none());
    }

    #[test]
    fn test_target_resolution() {
        let mut plan = plan_with_workers(2);
        plan.master.nodes.push(node("master-2", 21));
        plan.rollout.serial_percentage.insert(Role::Worker, 50);

        assert_eq!(Target::Role(Role::Worker).resolve(&plan).len(), 2);
        assert_eq!(Target::AllNodes.resolve(&plan).len(), 5);
        assert_eq!(Target::FirstMaster.resolve(&plan)[0].host, "master-1");
        assert!(Target::Role(Role::Storage).resolve(&plan).is_empty());
        assert_eq!(Target::Role(Role::Worker).serial_percentage(&plan), 50);
        assert_eq!(Target::AllNodes.serial_percentage(&plan), 100);
    }
}
