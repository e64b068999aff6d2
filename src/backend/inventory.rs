//! Inventory file rendering.
//!
//! The backend addresses hosts through an INI inventory with one group per
//! role. A host declared in several roles appears in each of those groups
//! with identical variables.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::plan::{Node, Plan, Role};

/// Inventory file name inside the generated assets directory.
pub const INVENTORY_FILE: &str = "inventory.ini";

/// Renders the inventory for a plan.
#[must_use]
pub fn render_inventory(plan: &Plan) -> String {
    let ssh = &plan.cluster.ssh;
    let mut out = String::new();

    let _ = writeln!(out, "[all:vars]");
    let _ = writeln!(out, "ansible_user={}", ssh.user);
    let _ = writeln!(out, "ansible_port={}", ssh.ssh_port);
    let _ = writeln!(out, "ansible_ssh_private_key_file={}", ssh.ssh_key.display());
    let _ = writeln!(out, "cluster_name={}", plan.cluster.name);
    let _ = writeln!(out, "install_mode={}", plan.mode);

    for role in Role::ALL {
        let _ = writeln!(out);
        let _ = writeln!(out, "[{role}]");
        for node in plan.group(role) {
            let _ = writeln!(out, "{}", host_line(node));
        }
    }

    out
}

/// Writes the inventory into the assets directory and returns its path.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn write_inventory(plan: &Plan, assets_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(assets_dir)?;
    let path = assets_dir.join(INVENTORY_FILE);
    std::fs::write(&path, render_inventory(plan))?;

    debug!("Wrote inventory to: {}", path.display());
    Ok(path)
}

fn host_line(node: &Node) -> String {
    format!(
        "{} ansible_host={} internal_ipv4={}",
        node.host,
        node.ip,
        node.internal_address()
    )
}
