//! Command output: console tables, or JSON wrapped as
//! `{"success": true, "data": ...}` / `{"success": false, "error": "..."}`.

use std::fmt::Write as _;

use console::{Alignment, pad_str, style};
use facet::Facet;

use crate::batch::BatchResult;
use crate::cli::OutputFormat;
use crate::directory::{Inventory, PartitionableGpu, Snapshot, Vm, VmState};
use crate::error::QuickVmError;
use crate::hyperv::sysinfo::{Capacity, CpuInfo, HyperVStatus, SystemInfo};
use crate::hyperv::transfer::ImportedVm;
use crate::workspace::Workspace;

/// Human-readable rendering of a report value.
pub trait Render {
    fn table(&self) -> String;
}

/// Render `data` in `format`.
pub fn render<T>(format: OutputFormat, data: &T) -> Result<String, QuickVmError>
where
    T: Render + for<'a> Facet<'a>,
{
    match format {
        OutputFormat::Table => Ok(data.table()),
        OutputFormat::Json => {
            let json = facet_json::to_string(data).map_err(|e| QuickVmError::Render {
                message: e.to_string(),
            })?;
            Ok(format!("{{\"success\":true,\"data\":{json}}}"))
        }
    }
}

/// Render and print to stdout.
pub fn emit<T>(format: OutputFormat, data: &T) -> Result<(), QuickVmError>
where
    T: Render + for<'a> Facet<'a>,
{
    let out = render(format, data)?;
    if out.ends_with('\n') {
        print!("{out}");
    } else {
        println!("{out}");
    }
    Ok(())
}

#[derive(Facet)]
struct ErrorEnvelope {
    success: bool,
    error: String,
}

/// JSON failure envelope. The error text includes any shell diagnostics.
pub fn error_json(err: &QuickVmError) -> String {
    let envelope = ErrorEnvelope {
        success: false,
        error: err.to_string(),
    };
    facet_json::to_string(&envelope)
        .unwrap_or_else(|_| r#"{"success":false,"error":"unrenderable error"}"#.to_string())
}

// ── table helper ─────────────────────────────────────────

struct Table {
    headers: Vec<&'static str>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn new(headers: &[&'static str]) -> Self {
        Self {
            headers: headers.to_vec(),
            rows: Vec::new(),
        }
    }

    fn row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }

    fn render(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.len()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(console::measure_text_width(cell));
            }
        }

        let mut out = String::new();
        let header: Vec<String> = self
            .headers
            .iter()
            .zip(&widths)
            .map(|(h, w)| style(pad_str(h, *w, Alignment::Left, None)).bold().to_string())
            .collect();
        let _ = writeln!(out, "{}", header.join("  ").trim_end());
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        let _ = writeln!(out, "{}", rule.join("  "));
        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(c, w)| pad_str(c, *w, Alignment::Left, None).into_owned())
                .collect();
            let _ = writeln!(out, "{}", cells.join("  ").trim_end());
        }
        out
    }
}

fn styled_state(state: &str) -> String {
    match VmState::from(state) {
        VmState::Running => style(state).green().to_string(),
        VmState::Off => style(state).dim().to_string(),
        VmState::Paused | VmState::Saved => style(state).yellow().to_string(),
        _ => state.to_string(),
    }
}

fn or_dash(s: &str) -> String {
    if s.is_empty() { "-".into() } else { s.to_string() }
}

// ── VMs ──────────────────────────────────────────────────

#[derive(Debug, Clone, Facet)]
pub struct VmRow {
    pub index: usize,
    pub name: String,
    pub state: String,
    pub cpu_usage: i64,
    pub memory_mb: i64,
    pub uptime: String,
    pub status: String,
    pub version: String,
    pub ip_addresses: Vec<String>,
}

impl From<&Vm> for VmRow {
    fn from(vm: &Vm) -> Self {
        Self {
            index: vm.index,
            name: vm.name.clone(),
            state: vm.state.to_string(),
            cpu_usage: vm.cpu_usage,
            memory_mb: vm.memory_mb,
            uptime: vm.uptime.clone(),
            status: vm.status.clone(),
            version: vm.version.clone(),
            ip_addresses: vm.ip_addresses.clone(),
        }
    }
}

pub fn vm_rows(inventory: &Inventory) -> Vec<VmRow> {
    inventory.vms().iter().map(VmRow::from).collect()
}

impl Render for Vec<VmRow> {
    fn table(&self) -> String {
        if self.is_empty() {
            return "No VMs found.".into();
        }
        let mut table = Table::new(&["#", "NAME", "STATE", "CPU", "MEMORY", "UPTIME", "IP"]);
        for vm in self {
            table.row(vec![
                vm.index.to_string(),
                vm.name.clone(),
                styled_state(&vm.state),
                format!("{}%", vm.cpu_usage),
                format!("{} MB", vm.memory_mb),
                or_dash(&vm.uptime),
                or_dash(&vm.ip_addresses.join(", ")),
            ]);
        }
        table.render()
    }
}

// ── snapshots ────────────────────────────────────────────

#[derive(Debug, Clone, Facet)]
pub struct SnapshotRow {
    pub index: usize,
    pub name: String,
    pub vm_name: String,
    pub creation_time: String,
    pub parent_name: String,
    pub snapshot_type: String,
}

impl From<&Snapshot> for SnapshotRow {
    fn from(s: &Snapshot) -> Self {
        Self {
            index: s.index,
            name: s.name.clone(),
            vm_name: s.vm_name.clone(),
            creation_time: s.creation_time.clone(),
            parent_name: s.parent_name.clone(),
            snapshot_type: s.snapshot_type.clone(),
        }
    }
}

impl Render for Vec<SnapshotRow> {
    fn table(&self) -> String {
        if self.is_empty() {
            return "No snapshots found.".into();
        }
        let mut table = Table::new(&["#", "NAME", "CREATED", "PARENT", "TYPE"]);
        for s in self {
            table.row(vec![
                s.index.to_string(),
                s.name.clone(),
                or_dash(&s.creation_time),
                or_dash(&s.parent_name),
                or_dash(&s.snapshot_type),
            ]);
        }
        table.render()
    }
}

// ── GPUs ─────────────────────────────────────────────────

impl Render for Vec<PartitionableGpu> {
    fn table(&self) -> String {
        if self.is_empty() {
            return "No partitionable GPUs found.".into();
        }
        let mut table = Table::new(&["#", "NAME", "PARTITIONS", "VRAM (min/opt/max)"]);
        for (i, gpu) in self.iter().enumerate() {
            table.row(vec![
                (i + 1).to_string(),
                gpu.name.clone(),
                gpu.partition_count.to_string(),
                format!(
                    "{}/{}/{}",
                    gpu.min_partition_vram, gpu.optimal_partition_vram, gpu.max_partition_vram
                ),
            ]);
        }
        table.render()
    }
}

#[derive(Debug, Clone, Facet)]
pub struct GpuAdapterStatus {
    pub vm: String,
    pub has_partition: bool,
}

impl Render for GpuAdapterStatus {
    fn table(&self) -> String {
        if self.has_partition {
            format!("VM '{}' has a GPU partition", self.vm)
        } else {
            format!("VM '{}' has no GPU partition", self.vm)
        }
    }
}

// ── system info ──────────────────────────────────────────

#[derive(Debug, Clone, Facet)]
pub struct CapacityRow {
    pub name: String,
    pub total_mb: i64,
    pub used_mb: i64,
    pub free_mb: i64,
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
}

impl From<&Capacity> for CapacityRow {
    fn from(c: &Capacity) -> Self {
        Self {
            name: c.name.clone(),
            total_mb: c.total_mb,
            used_mb: c.used_mb(),
            free_mb: c.free_mb,
            total_gb: c.total_gb(),
            used_gb: c.used_gb(),
            free_gb: c.free_gb(),
        }
    }
}

#[derive(Debug, Clone, Facet)]
pub struct SystemReport {
    pub cpu: CpuInfo,
    pub memory: CapacityRow,
    pub disks: Vec<CapacityRow>,
    pub hyperv: HyperVStatus,
}

impl From<&SystemInfo> for SystemReport {
    fn from(info: &SystemInfo) -> Self {
        Self {
            cpu: info.cpu.clone(),
            memory: CapacityRow::from(&info.memory),
            disks: info.disks.iter().map(CapacityRow::from).collect(),
            hyperv: info.hyperv.clone(),
        }
    }
}

impl Render for SystemReport {
    fn table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", style("CPU").bold());
        let _ = writeln!(
            out,
            "  {} ({} cores, {} logical)",
            self.cpu.name, self.cpu.cores, self.cpu.logical_processors
        );
        let _ = writeln!(out, "{}", style("Memory").bold());
        let _ = writeln!(
            out,
            "  {:.2} GB used of {:.2} GB ({:.2} GB free)",
            self.memory.used_gb, self.memory.total_gb, self.memory.free_gb
        );

        let _ = writeln!(out, "{}", style("Disks").bold());
        let mut disks = Table::new(&["DRIVE", "TOTAL", "USED", "FREE"]);
        for d in &self.disks {
            disks.row(vec![
                d.name.clone(),
                format!("{:.2} GB", d.total_gb),
                format!("{:.2} GB", d.used_gb),
                format!("{:.2} GB", d.free_gb),
            ]);
        }
        for line in disks.render().lines() {
            let _ = writeln!(out, "  {line}");
        }

        let _ = writeln!(out, "{}", style("Hyper-V").bold());
        let status = if self.hyperv.enabled {
            style(&self.hyperv.status).green().to_string()
        } else {
            style(&self.hyperv.status).red().to_string()
        };
        let _ = writeln!(out, "  {status}");
        out
    }
}

// ── batch results ────────────────────────────────────────

#[derive(Debug, Clone, Facet)]
pub struct OutcomeRow {
    pub index: usize,
    pub name: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Facet)]
pub struct BatchReport {
    pub operation: String,
    pub success_count: usize,
    pub fail_count: usize,
    pub skipped_count: usize,
    pub total_count: usize,
    pub cancelled: bool,
    pub outcomes: Vec<OutcomeRow>,
}

impl From<&BatchResult> for BatchReport {
    fn from(r: &BatchResult) -> Self {
        Self {
            operation: r.operation.to_string(),
            success_count: r.success_count,
            fail_count: r.fail_count,
            skipped_count: r.skipped_count(),
            total_count: r.total_count,
            cancelled: r.cancelled,
            outcomes: r
                .outcomes
                .iter()
                .map(|o| OutcomeRow {
                    index: o.index,
                    name: o.name.clone(),
                    success: o.success,
                    message: o.message.clone(),
                })
                .collect(),
        }
    }
}

impl Render for BatchReport {
    fn table(&self) -> String {
        let mut out = String::new();
        for o in &self.outcomes {
            let mark = if o.success {
                style("\u{2713}").green()
            } else {
                style("\u{2717}").red()
            };
            let name = if o.name.is_empty() { "?" } else { o.name.as_str() };
            // Index 0: the name never resolved to a listed VM.
            let index = if o.index == 0 {
                "-".to_string()
            } else {
                o.index.to_string()
            };
            let mut lines = o.message.lines();
            let _ = writeln!(
                out,
                "{mark} [{index}] {name}: {}",
                lines.next().unwrap_or_default()
            );
            for line in lines {
                let _ = writeln!(out, "      {line}");
            }
        }

        let _ = write!(
            out,
            "{}: {} succeeded, {} failed",
            self.operation, self.success_count, self.fail_count
        );
        if self.skipped_count > 0 {
            let _ = write!(out, ", {} skipped", self.skipped_count);
        }
        let _ = write!(out, " ({} total)", self.total_count);
        if self.cancelled {
            let _ = write!(out, " {}", style("[cancelled]").yellow());
        }
        out.push('\n');
        out
    }
}

// ── workspaces and messages ──────────────────────────────

impl Render for Workspace {
    fn table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Workspace: {}", style(&self.name).bold());
        let _ = writeln!(out, "Description: {}", or_dash(&self.description));
        let _ = writeln!(out, "VMs:");
        for vm in &self.vms {
            let _ = writeln!(out, "  - {vm}");
        }
        out
    }
}

impl Render for Vec<String> {
    fn table(&self) -> String {
        if self.is_empty() {
            return "No workspaces found. Create one with: quickvm ws create <name> --vms \"VM1,VM2\""
                .into();
        }
        let mut out = format!("Workspaces ({}):\n", self.len());
        for name in self {
            let _ = writeln!(out, "  - {name}");
        }
        out
    }
}

impl Render for ImportedVm {
    fn table(&self) -> String {
        format!("VM '{}' ready (id {})", self.name, self.id)
    }
}

/// Outcome of a single-target command.
#[derive(Debug, Clone, Facet)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Render for Message {
    fn table(&self) -> String {
        self.message.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::OperationOutcome;
    use crate::directory::tests::inventory;

    #[test]
    fn vm_table_lists_every_vm() {
        let out = vm_rows(&inventory(&["web", "db"])).table();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("NAME"));
        assert!(lines[2].starts_with("1  web"));
        assert!(lines[3].starts_with("2  db"));
    }

    #[test]
    fn empty_tables_say_so() {
        assert_eq!(Vec::<VmRow>::new().table(), "No VMs found.");
        assert_eq!(Vec::<SnapshotRow>::new().table(), "No snapshots found.");
    }

    #[test]
    fn json_wraps_data_in_envelope() {
        let out = render(OutputFormat::Json, &Message::new("VM started")).unwrap();
        assert_eq!(out, r#"{"success":true,"data":{"message":"VM started"}}"#);
    }

    #[test]
    fn json_vm_list_is_an_array() {
        let out = render(OutputFormat::Json, &vm_rows(&inventory(&["web"]))).unwrap();
        assert!(out.starts_with(r#"{"success":true,"data":[{"index":1,"name":"web""#));
    }

    #[test]
    fn error_envelope() {
        let err = QuickVmError::NoTargetsSpecified;
        assert_eq!(error_json(&err), r#"{"success":false,"error":"no VMs specified"}"#);
    }

    fn batch() -> BatchResult {
        BatchResult {
            operation: "stop",
            outcomes: vec![
                OperationOutcome {
                    index: 1,
                    name: "web".into(),
                    success: true,
                    message: "VM stopped successfully".into(),
                },
                OperationOutcome {
                    index: 3,
                    name: "db".into(),
                    success: false,
                    message: "`Stop-VM` failed (exit code: 1)\nStop-VM : busy".into(),
                },
            ],
            success_count: 1,
            fail_count: 1,
            total_count: 3,
            cancelled: true,
        }
    }

    #[test]
    fn batch_table_shows_diagnostics_and_counts() {
        let out = BatchReport::from(&batch()).table();
        assert!(out.contains("[1] web: VM stopped successfully"));
        assert!(out.contains("[3] db: `Stop-VM` failed (exit code: 1)"));
        assert!(out.contains("      Stop-VM : busy"));
        assert!(out.contains("stop: 1 succeeded, 1 failed, 1 skipped (3 total)"));
        assert!(out.contains("[cancelled]"));
    }

    #[test]
    fn batch_json_carries_counts() {
        let out = render(OutputFormat::Json, &BatchReport::from(&batch())).unwrap();
        assert!(out.contains(r#""success_count":1"#));
        assert!(out.contains(r#""skipped_count":1"#));
        assert!(out.contains("Stop-VM : busy"));
    }

    #[test]
    fn unresolved_outcomes_have_no_index() {
        let mut result = batch();
        result.record_unresolved("ghost");
        let out = BatchReport::from(&result).table();
        assert!(out.contains("[-] ghost: VM 'ghost' not found"));
        assert!(out.contains("stop: 1 succeeded, 2 failed, 1 skipped (4 total)"));
    }

    #[test]
    fn workspace_listing() {
        let names = vec!["alpha".to_string(), "lab".to_string()];
        assert_eq!(names.table(), "Workspaces (2):\n  - alpha\n  - lab\n");
        assert!(Vec::<String>::new().table().starts_with("No workspaces found"));
    }
}
