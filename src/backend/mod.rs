//! Automation backend module.
//!
//! This module provides the seam between the execution engine and the
//! tooling that actually touches hosts:
//! - The [`PlayRunner`] trait and its request/report types
//! - The `ansible-playbook` implementation
//! - Inventory rendering

mod runner;
mod ansible;
mod inventory;

#[cfg(test)]
pub(crate) use runner::MockPlayRunner;

pub use runner::{
    BatchReport, HostFacts, HostOutcome, HostStatus, HostTarget, IssuanceBatch, PlayRequest,
    PlayRunner, ServiceAction, VERSION_MARKER_DIR,
};
pub use ansible::{
    ANSIBLE_PLAYBOOK, AnsibleRunner, CERTIFICATES_PLAY, SSH_PROGRAM, parse_host_facts,
    parse_play_output,
};
pub use inventory::{INVENTORY_FILE, render_inventory, write_inventory};
