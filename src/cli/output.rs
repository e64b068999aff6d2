//! Operator-facing output.
//!
//! The [`Reporter`] owns the output stream of a run. It renders headers,
//! status markers, per-phase results, and the closing summary in either
//! the `simple` or the `raw` format.

use colored::Colorize;
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tabled::{Table, Tabled};

use crate::engine::{OutputFormat, PhaseResult, PhaseState, RunReport};
use crate::plan::{Plan, Role};

/// Renders run progress for the operator.
pub struct Reporter {
    /// Output format.
    format: OutputFormat,
    /// Destination stream.
    out: Mutex<Box<dyn Write + Send>>,
}

/// Phase row for the closing table.
#[derive(Tabled)]
struct PhaseRow {
    #[tabled(rename = "Phase")]
    name: String,
    #[tabled(rename = "Result")]
    state: String,
    #[tabled(rename = "Changed")]
    changed: usize,
    #[tabled(rename = "Unchanged")]
    unchanged: usize,
    #[tabled(rename = "Failed")]
    failed: usize,
}

impl Reporter {
    /// Creates a reporter writing to `out`.
    #[must_use]
    pub fn new(format: OutputFormat, out: Box<dyn Write + Send>) -> Self {
        Self {
            format,
            out: Mutex::new(out),
        }
    }

    /// Creates a reporter writing to standard output.
    #[must_use]
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(format, Box::new(std::io::stdout()))
    }

    fn emit(&self, text: &str) {
        if let Ok(mut out) = self.out.lock() {
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
    }

    fn line(&self, text: &str) {
        self.emit(&format!("{text}\n"));
    }

    /// Prints a section header.
    pub fn header(&self, title: &str) {
        let underline = "=".repeat(title.chars().count());
        match self.format {
            OutputFormat::Simple => {
                self.line(&format!("\n{}\n{underline}", title.bold()));
            }
            OutputFormat::Raw => self.line(&format!("\n{title}\n{underline}")),
        }
    }

    /// Prints a success marker.
    pub fn ok(&self, message: &str) {
        match self.format {
            OutputFormat::Simple => self.line(&format!("  {} {message}", "✓".green())),
            OutputFormat::Raw => self.line(&format!("[OK] {message}")),
        }
    }

    /// Prints a failure marker.
    pub fn fail(&self, message: &str) {
        match self.format {
            OutputFormat::Simple => self.line(&format!("  {} {message}", "✗".red())),
            OutputFormat::Raw => self.line(&format!("[FAIL] {message}")),
        }
    }

    /// Prints a warning marker.
    pub fn warn(&self, message: &str) {
        match self.format {
            OutputFormat::Simple => self.line(&format!("  {} {message}", "⚠".yellow())),
            OutputFormat::Raw => self.line(&format!("[WARN] {message}")),
        }
    }

    /// Passes backend output through in `raw` mode.
    pub fn backend_output(&self, text: &str) {
        if self.format == OutputFormat::Raw && !text.trim().is_empty() {
            if text.ends_with('\n') {
                self.emit(text);
            } else {
                self.line(text);
            }
        }
    }

    /// Prints the result of a finished phase. Other phases print nothing.
    pub fn phase_result(&self, result: &PhaseResult) {
        match result.state {
            PhaseState::Pending | PhaseState::Running | PhaseState::Skipped => {}
            PhaseState::Completed => self.ok(&format!(
                "{}: {} changed, {} unchanged",
                result.name,
                result.changed.len(),
                result.unchanged.len()
            )),
            PhaseState::Failed => {
                self.fail(&format!(
                    "{}: failed on {}",
                    result.name,
                    result.failed_hosts().join(", ")
                ));
                for (host, message) in &result.failed {
                    self.line(&format!("      {host}: {message}"));
                }
                if result.was_cut_short() {
                    self.warn(&format!(
                        "{}: {} of {} batches not started",
                        result.name,
                        result.batches_planned - result.batches_run,
                        result.batches_planned
                    ));
                }
            }
        }
    }

    /// Prints the table of scheduled phases, skipped ones left out.
    pub fn summary(&self, report: &RunReport) {
        let rows: Vec<PhaseRow> = report
            .phases
            .iter()
            .filter(|p| p.state != PhaseState::Skipped)
            .map(|p| PhaseRow {
                name: p.name.clone(),
                state: p.state.to_string(),
                changed: p.changed.len(),
                unchanged: p.unchanged.len(),
                failed: p.failed.len(),
            })
            .collect();

        if rows.is_empty() {
            return;
        }

        let mut output = String::new();
        let _ = write!(output, "\nRun {} {}", short_id(report), report.state);
        if !report.plan_fingerprint.is_empty() {
            let _ = write!(output, " (plan {})", report.plan_fingerprint);
        }
        output.push('\n');
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');
        self.emit(&output);
    }

    /// Prints next steps after a successful install.
    pub fn success_hints(&self, plan: &Plan, assets_dir: &Path) {
        let kubeconfig = assets_dir.join("kubeconfig");
        let kubeconfig = kubeconfig.display();
        let ssh = &plan.cluster.ssh;

        let mut output = String::new();
        let title = "The cluster was installed successfully!";
        match self.format {
            OutputFormat::Simple => {
                let _ = writeln!(output, "\n{}\n", title.green().bold());
            }
            OutputFormat::Raw => {
                let _ = writeln!(output, "\n{title}\n");
            }
        }

        let _ = writeln!(output, "- To use the generated kubeconfig file with kubectl:");
        let _ = writeln!(output, "    * use \"kubectl --kubeconfig {kubeconfig}\"");
        let _ = writeln!(
            output,
            "    * or copy the config file \"cp {kubeconfig} ~/.kube/config\""
        );
        let _ = writeln!(
            output,
            "- To view the Kubernetes dashboard: \"kubectl --kubeconfig {kubeconfig} proxy\", \
             then open http://localhost:8001/ui"
        );
        let _ = writeln!(
            output,
            "- To SSH into a cluster node: \"ssh -i {} -p {} {}@<node ip>\"",
            ssh.ssh_key.display(),
            ssh.ssh_port,
            ssh.user
        );
        for role in Role::ALL {
            let hosts: Vec<&str> = plan.group(role).iter().map(|n| n.host.as_str()).collect();
            if !hosts.is_empty() {
                let _ = writeln!(output, "    * {role}: {}", hosts.join(", "));
            }
        }

        self.emit(&output);
    }
}

fn short_id(report: &RunReport) -> String {
    report.run_id.to_string().chars().take(8).collect()
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// In-memory output sink for tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(std::sync::Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl SharedBuffer {
    /// Returns everything written so far.
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Creates a reporter writing into a fresh buffer.
    pub(crate) fn reporter(format: OutputFormat) -> (Reporter, Self) {
        let buffer = Self::default();
        (Reporter::new(format, Box::new(buffer.clone())), buffer)
    }
}

#[cfg(test)]
impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::fixtures::plan_with_workers;

    #[test]
    fn test_raw_markers() {
        let (reporter, buffer) = SharedBuffer::reporter(OutputFormat::Raw);
        reporter.header("Installing Cluster");
        reporter.ok("etcd ready");
        reporter.warn("single master");
        reporter.fail("worker failed");

        assert_eq!(
            buffer.contents(),
            "\nInstalling Cluster\n==================\n\
             [OK] etcd ready\n[WARN] single master\n[FAIL] worker failed\n"
        );
    }

    #[test]
    fn test_backend_output_only_in_raw_mode() {
        let (simple, simple_buffer) = SharedBuffer::reporter(OutputFormat::Simple);
        simple.backend_output("PLAY [etcd]");
        assert!(simple_buffer.contents().is_empty());

        let (raw, raw_buffer) = SharedBuffer::reporter(OutputFormat::Raw);
        raw.backend_output("PLAY [etcd]");
        assert_eq!(raw_buffer.contents(), "PLAY [etcd]\n");
    }

    #[test]
    fn test_skipped_phases_are_not_reported() {
        let (reporter, buffer) = SharedBuffer::reporter(OutputFormat::Raw);
        let mut report = RunReport::new();
        report.record(PhaseResult::skipped("retire-calico-node"));
        let mut etcd = PhaseResult::new("etcd", 1);
        etcd.changed.push(String::from("etcd-1"));
        etcd.complete();
        report.record(etcd);
        report.finish();

        for phase in &report.phases {
            reporter.phase_result(phase);
        }
        reporter.summary(&report);

        let output = buffer.contents();
        assert!(output.contains("[OK] etcd: 1 changed, 0 unchanged"));
        assert!(!output.contains("retire-calico-node"));
        assert!(output.contains("succeeded"));
    }

    #[test]
    fn test_failed_phase_lists_hosts() {
        let (reporter, buffer) = SharedBuffer::reporter(OutputFormat::Raw);
        let mut worker = PhaseResult::new("worker", 3);
        worker.batches_run = 1;
        worker
            .failed
            .push((String::from("worker-2"), String::from("kubelet did not start")));
        worker.complete();

        reporter.phase_result(&worker);

        let output = buffer.contents();
        assert!(output.contains("[FAIL] worker: failed on worker-2"));
        assert!(output.contains("worker-2: kubelet did not start"));
        assert!(output.contains("2 of 3 batches not started"));
    }

    #[test]
    fn test_aborted_summary_lists_phases_never_started() {
        let (reporter, buffer) = SharedBuffer::reporter(OutputFormat::Raw);
        let mut report = RunReport::scheduled(
            ["retire-calico-node", "etcd", "master"],
            String::from("0123abcd"),
        );
        report.record(PhaseResult::skipped("retire-calico-node"));
        let mut etcd = PhaseResult::new("etcd", 1);
        etcd.batches_run = 1;
        etcd.failed.push((String::from("etcd-1"), String::from("boom")));
        etcd.complete();
        report.record(etcd);
        report.finish();

        reporter.summary(&report);

        let output = buffer.contents();
        assert!(output.contains("aborted (plan 0123abcd)"));
        assert!(output.contains("pending"));
        assert!(output.contains("master"));
        assert!(!output.contains("retire-calico-node"));
    }

    #[test]
    fn test_success_hints() {
        let (reporter, buffer) = SharedBuffer::reporter(OutputFormat::Raw);
        reporter.success_hints(&plan_with_workers(2), Path::new("generated"));

        let output = buffer.contents();
        assert!(output.contains("kubectl --kubeconfig generated/kubeconfig"));
        assert!(output.contains("ssh -i /tmp/id_rsa -p 22 ops@<node ip>"));
        assert!(output.contains("* worker: worker-1, worker-2"));
    }
}
