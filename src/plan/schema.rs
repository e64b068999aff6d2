//! Schema-level validation of a plan.
//!
//! These checks only look at the plan itself. They never touch the
//! network, so they always run, even when preflight is skipped.

use crate::error::{CairnError, PlanError, Result};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use tracing::debug;

use super::spec::{Node, Plan, Role};

/// Validator for plan schemas.
#[derive(Debug, Default)]
pub struct PlanValidator;

/// Validation result containing every error and warning found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl PlanValidator {
    /// Creates a new plan validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a plan.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Invalid`] naming the first failure if any check fails.
    pub fn validate(&self, plan: &Plan) -> Result<ValidationResult> {
        let result = self.check(plan);

        if result.errors.is_empty() {
            debug!("Plan validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(CairnError::Plan(PlanError::Invalid {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
                error_count: result.errors.len(),
            }))
        }
    }

    /// Runs every check and returns all findings without failing.
    #[must_use]
    pub fn check(&self, plan: &Plan) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_cluster(plan, &mut result);
        Self::validate_groups(plan, &mut result);
        Self::validate_identities(plan, &mut result);
        Self::validate_rollout(plan, &mut result);
        Self::validate_features(plan, &mut result);

        result
    }

    /// Validates cluster-wide settings.
    fn validate_cluster(plan: &Plan, result: &mut ValidationResult) {
        let cluster = &plan.cluster;

        if cluster.name.is_empty() {
            result.error("cluster.name", "Cluster name cannot be empty");
        } else if !is_valid_name(&cluster.name) {
            result.error(
                "cluster.name",
                format!(
                    "Cluster name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    cluster.name
                ),
            );
        }

        if cluster.version.trim().is_empty() {
            result.error("cluster.version", "Cluster version cannot be empty");
        }

        if cluster.ssh.user.is_empty() {
            result.error("cluster.ssh.user", "SSH user cannot be empty");
        }

        if cluster.ssh.ssh_key.as_os_str().is_empty() {
            result.error("cluster.ssh.ssh_key", "SSH key path cannot be empty");
        }

        if cluster.ssh.ssh_port == 0 {
            result.error("cluster.ssh.ssh_port", "SSH port must be between 1 and 65535");
        }

        if parse_expiry_hours(&cluster.certificates.expiry).is_none() {
            result.error(
                "cluster.certificates.expiry",
                format!(
                    "Certificate expiry '{}' is invalid. Expected a whole number of hours, e.g. 17520h",
                    cluster.certificates.expiry
                ),
            );
        }

        for (field, cidr) in [
            ("cluster.networking.pod_cidr_block", &cluster.networking.pod_cidr_block),
            ("cluster.networking.service_cidr_block", &cluster.networking.service_cidr_block),
        ] {
            if !is_valid_cidr(cidr) {
                result.error(field, format!("'{cidr}' is not a valid CIDR block"));
            }
        }

        if plan
            .master
            .load_balanced_fqdn
            .as_ref()
            .is_some_and(String::is_empty)
        {
            result.error(
                "master.load_balanced_fqdn",
                "Load-balanced FQDN cannot be empty when set",
            );
        }
    }

    /// Validates role groups: required roles, expected counts, node fields.
    fn validate_groups(plan: &Plan, result: &mut ValidationResult) {
        for role in Role::ALL {
            let nodes = plan.group(role);

            if nodes.is_empty() && !role.is_optional() {
                result.error(
                    format!("{role}.nodes"),
                    format!("At least one {role} node is required"),
                );
            }

            if let Some(expected) = plan.expected_count(role)
                && expected != nodes.len()
            {
                result.error(
                    format!("{role}.expected_count"),
                    format!(
                        "Expected {expected} {role} node(s) but the plan lists {}",
                        nodes.len()
                    ),
                );
            }

            let mut seen_hosts = HashSet::new();
            for (i, node) in nodes.iter().enumerate() {
                let prefix = format!("{role}.nodes[{i}]");

                if !seen_hosts.insert(node.host.as_str()) {
                    result.error(
                        format!("{prefix}.host"),
                        format!("Duplicate host '{}' in the {role} group", node.host),
                    );
                }

                Self::validate_node(node, &prefix, result);
            }
        }
    }

    /// Validates a single node descriptor.
    fn validate_node(node: &Node, prefix: &str, result: &mut ValidationResult) {
        if node.host.is_empty() {
            result.error(format!("{prefix}.host"), "Host cannot be empty");
        } else if !is_valid_hostname(&node.host) {
            result.error(
                format!("{prefix}.host"),
                format!("Host '{}' is not a valid hostname", node.host),
            );
        }

        if node.ip.parse::<IpAddr>().is_err() {
            result.error(
                format!("{prefix}.ip"),
                format!("'{}' is not a valid IP address", node.ip),
            );
        }

        if let Some(internal) = &node.internal_ip
            && internal.parse::<IpAddr>().is_err()
        {
            result.error(
                format!("{prefix}.internal_ip"),
                format!("'{internal}' is not a valid IP address"),
            );
        }
    }

    /// Validates that each host identifier denotes exactly one node.
    fn validate_identities(plan: &Plan, result: &mut ValidationResult) {
        let mut by_host: HashMap<&str, (&Node, Role)> = HashMap::new();
        let mut by_ip: HashMap<&str, &str> = HashMap::new();

        for role in Role::ALL {
            for node in plan.group(role) {
                match by_host.get(node.host.as_str()) {
                    Some((first, first_role)) if first != &node => {
                        result.error(
                            format!("{role}.nodes"),
                            format!(
                                "Host '{}' is declared in {first_role} and {role} with different addresses",
                                node.host
                            ),
                        );
                    }
                    Some(_) => {}
                    None => {
                        by_host.insert(&node.host, (node, role));
                    }
                }

                match by_ip.get(node.ip.as_str()) {
                    Some(owner) if *owner != node.host => {
                        result.error(
                            format!("{role}.nodes"),
                            format!(
                                "IP {} is shared by hosts '{owner}' and '{}'",
                                node.ip, node.host
                            ),
                        );
                    }
                    Some(_) => {}
                    None => {
                        by_ip.insert(&node.ip, &node.host);
                    }
                }
            }
        }
    }

    /// Validates rolling rollout settings.
    fn validate_rollout(plan: &Plan, result: &mut ValidationResult) {
        for (role, percentage) in &plan.rollout.serial_percentage {
            if *percentage == 0 || *percentage > 100 {
                result.error(
                    format!("rollout.serial_percentage.{role}"),
                    format!("Serial percentage must be between 1 and 100, got {percentage}"),
                );
            }

            if plan.group(*role).is_empty() {
                result.warnings.push(format!(
                    "rollout.serial_percentage.{role}: no {role} nodes are defined, setting is ignored"
                ));
            }
        }
    }

    /// Validates feature toggles against the install mode.
    fn validate_features(plan: &Plan, result: &mut ValidationResult) {
        if plan.is_upgrade() && plan.features.internal_registry.enabled {
            result.warnings.push(String::from(
                "features.internal_registry: the internal registry is only provisioned on install and is left untouched during upgrade",
            ));
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-')
        && !name.contains("--")
}

/// Validates an RFC 1123 hostname.
fn is_valid_hostname(host: &str) -> bool {
    host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Validates an `address/prefix` CIDR block.
fn is_valid_cidr(cidr: &str) -> bool {
    let Some((address, prefix)) = cidr.split_once('/') else {
        return false;
    };

    let Ok(prefix) = prefix.parse::<u8>() else {
        return false;
    };

    match address.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => prefix <= 32,
        Ok(IpAddr::V6(_)) => prefix <= 128,
        Err(_) => false,
    }
}

/// Parses a certificate expiry such as `17520h` into hours.
#[must_use]
pub fn parse_expiry_hours(expiry: &str) -> Option<u32> {
    expiry
        .strip_suffix('h')
        .and_then(|hours| hours.parse::<u32>().ok())
        .filter(|hours| *hours > 0)
}

impl ValidationResult {
    /// Records an error for a field.
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
