//! Entity directory: fresh listings of VMs, snapshots and partitionable GPUs.
//!
//! Indices are positions in one listing and mean nothing across two of them.
//! Every call re-queries the shell; nothing is cached.

use std::fmt;

use facet::Facet;

use crate::decode::decode;
use crate::error::QuickVmError;
use crate::exec::{ExecutionRequest, ShellExecutor, escape_wildcards};

const LIST_VMS: &str = r#"
Get-VM | Select-Object @{Name='name';Expression={$_.Name.ToString()}},
    @{Name='state';Expression={$_.State.ToString()}},
    @{Name='cpu_usage';Expression={[int64]$_.CPUUsage}},
    @{Name='memory_mb';Expression={[int64]($_.MemoryAssigned/1MB)}},
    @{Name='uptime';Expression={$_.Uptime.ToString()}},
    @{Name='status';Expression={[string]$_.Status}},
    @{Name='version';Expression={[string]$_.Version}},
    @{Name='ip_addresses';Expression={(@($_.NetworkAdapters.IPAddresses) | Where-Object { $_ -match '^\d+\.\d+\.\d+\.\d+$' }) -join ','}} | ConvertTo-Json
"#;

const LIST_SNAPSHOTS: &str = r#"
$snapshots = Get-VMSnapshot -VMName $VMName -ErrorAction SilentlyContinue
if ($snapshots) {
    $snapshots | Select-Object @{Name='name';Expression={$_.Name}},
        @{Name='vm_name';Expression={$_.VMName}},
        @{Name='creation_time';Expression={$_.CreationTime.ToString('yyyy-MM-dd HH:mm:ss')}},
        @{Name='parent_name';Expression={if ($_.ParentSnapshotName) { $_.ParentSnapshotName } else { '(None)' }}},
        @{Name='snapshot_type';Expression={$_.SnapshotType.ToString()}} | ConvertTo-Json
}
"#;

const LIST_GPUS: &str = r#"
$gpus = Get-VMPartitionableGpu -ErrorAction SilentlyContinue
if ($gpus) {
    $gpus | ForEach-Object {
        [pscustomobject]@{
            name = [string]$_.Name
            partition_count = [int64]$_.PartitionCount
            valid_partition_counts = @($_.ValidPartitionCounts | ForEach-Object { [int64]$_ })
            min_partition_vram = [int64]$_.MinPartitionVRAM
            max_partition_vram = [int64]$_.MaxPartitionVRAM
            optimal_partition_vram = [int64]$_.OptimalPartitionVRAM
            min_partition_encode = [int64]$_.MinPartitionEncode
            max_partition_encode = [int64]$_.MaxPartitionEncode
            optimal_partition_encode = [int64]$_.OptimalPartitionEncode
            min_partition_decode = [int64]$_.MinPartitionDecode
            max_partition_decode = [int64]$_.MaxPartitionDecode
            optimal_partition_decode = [int64]$_.OptimalPartitionDecode
            min_partition_compute = [int64]$_.MinPartitionCompute
            max_partition_compute = [int64]$_.MaxPartitionCompute
            optimal_partition_compute = [int64]$_.OptimalPartitionCompute
        }
    } | ConvertTo-Json -Depth 3
}
"#;

// ── VMs ──────────────────────────────────────────────────

/// Lifecycle state as reported by `Get-VM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmState {
    Running,
    Off,
    Paused,
    Saved,
    Starting,
    Stopping,
    Other(String),
}

impl VmState {
    pub fn as_str(&self) -> &str {
        match self {
            VmState::Running => "Running",
            VmState::Off => "Off",
            VmState::Paused => "Paused",
            VmState::Saved => "Saved",
            VmState::Starting => "Starting",
            VmState::Stopping => "Stopping",
            VmState::Other(s) => s,
        }
    }

    pub fn is_running(&self) -> bool {
        *self == VmState::Running
    }
}

impl From<&str> for VmState {
    fn from(s: &str) -> Self {
        match s.trim() {
            "Running" => VmState::Running,
            "Off" => VmState::Off,
            "Paused" => VmState::Paused,
            "Saved" => VmState::Saved,
            "Starting" => VmState::Starting,
            "Stopping" => VmState::Stopping,
            other => VmState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire shape of one `LIST_VMS` row.
#[derive(Debug, Default, Facet)]
#[facet(default)]
struct VmRecord {
    name: String,
    #[facet(default)]
    state: String,
    #[facet(default)]
    cpu_usage: i64,
    #[facet(default)]
    memory_mb: i64,
    #[facet(default)]
    uptime: String,
    #[facet(default)]
    status: String,
    #[facet(default)]
    version: String,
    #[facet(default)]
    ip_addresses: String,
}

/// One VM as seen by one listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vm {
    /// 1-based position in the listing that produced this value.
    pub index: usize,
    pub name: String,
    pub state: VmState,
    pub cpu_usage: i64,
    pub memory_mb: i64,
    pub uptime: String,
    pub status: String,
    pub version: String,
    pub ip_addresses: Vec<String>,
}

impl Vm {
    fn from_record(index: usize, record: VmRecord) -> Self {
        let ip_addresses = record
            .ip_addresses
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Self {
            index,
            state: VmState::from(record.state.as_str()),
            name: record.name,
            cpu_usage: record.cpu_usage,
            memory_mb: record.memory_mb,
            uptime: record.uptime,
            status: record.status,
            version: record.version,
            ip_addresses,
        }
    }
}

/// One snapshot of the host's VM list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    vms: Vec<Vm>,
}

impl Inventory {
    /// Index `vms` 1..=N in the order given.
    pub fn new(vms: impl IntoIterator<Item = Vm>) -> Self {
        let vms = vms
            .into_iter()
            .enumerate()
            .map(|(i, vm)| Vm { index: i + 1, ..vm })
            .collect();
        Self { vms }
    }

    pub fn vms(&self) -> &[Vm] {
        &self.vms
    }

    pub fn len(&self) -> usize {
        self.vms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vms.is_empty()
    }

    /// Upper bound for target resolution.
    pub fn bound(&self) -> usize {
        self.vms.len()
    }

    pub fn get(&self, index: usize) -> Option<&Vm> {
        index.checked_sub(1).and_then(|i| self.vms.get(i))
    }

    pub fn vm(&self, index: usize) -> Result<&Vm, QuickVmError> {
        self.get(index).ok_or(QuickVmError::IndexOutOfBounds {
            index: index as i64,
            bound: self.bound(),
        })
    }

    pub fn name_for_index(&self, index: usize) -> Result<&str, QuickVmError> {
        self.vm(index).map(|vm| vm.name.as_str())
    }

    /// Exact name lookup; Hyper-V compares VM names case-insensitively.
    pub fn find_by_name(&self, name: &str) -> Option<&Vm> {
        self.vms.iter().find(|vm| vm.name.eq_ignore_ascii_case(name))
    }
}

/// Query every VM on the host.
pub async fn list_vms<E: ShellExecutor>(shell: &E) -> Result<Inventory, QuickVmError> {
    let raw = shell.execute(&ExecutionRequest::script(LIST_VMS)).await?;
    let records = decode::<VmRecord>(&raw)?;
    tracing::debug!(count = records.len(), "listed VMs");
    Ok(Inventory {
        vms: records
            .into_iter()
            .enumerate()
            .map(|(i, r)| Vm::from_record(i + 1, r))
            .collect(),
    })
}

// ── Snapshots ────────────────────────────────────────────

#[derive(Debug, Default, Facet)]
#[facet(default)]
struct SnapshotRecord {
    name: String,
    #[facet(default)]
    vm_name: String,
    #[facet(default)]
    creation_time: String,
    #[facet(default)]
    parent_name: String,
    #[facet(default)]
    snapshot_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub index: usize,
    pub name: String,
    pub vm_name: String,
    pub creation_time: String,
    pub parent_name: String,
    pub snapshot_type: String,
}

/// Snapshots of `vm_name`. An unknown VM lists as empty.
pub async fn list_snapshots<E: ShellExecutor>(
    shell: &E,
    vm_name: &str,
) -> Result<Vec<Snapshot>, QuickVmError> {
    // -VMName takes wildcards.
    let request =
        ExecutionRequest::script(LIST_SNAPSHOTS).bind("VMName", escape_wildcards(vm_name));
    let raw = shell.execute(&request).await?;
    Ok(decode::<SnapshotRecord>(&raw)?
        .into_iter()
        .enumerate()
        .map(|(i, r)| Snapshot {
            index: i + 1,
            name: r.name,
            vm_name: r.vm_name,
            creation_time: r.creation_time,
            parent_name: r.parent_name,
            snapshot_type: r.snapshot_type,
        })
        .collect())
}

// ── GPUs ─────────────────────────────────────────────────

/// A host GPU that supports GPU-P partitioning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
#[facet(default)]
pub struct PartitionableGpu {
    pub name: String,
    #[facet(default)]
    pub partition_count: i64,
    #[facet(default)]
    pub valid_partition_counts: Vec<i64>,
    #[facet(default)]
    pub min_partition_vram: i64,
    #[facet(default)]
    pub max_partition_vram: i64,
    #[facet(default)]
    pub optimal_partition_vram: i64,
    #[facet(default)]
    pub min_partition_encode: i64,
    #[facet(default)]
    pub max_partition_encode: i64,
    #[facet(default)]
    pub optimal_partition_encode: i64,
    #[facet(default)]
    pub min_partition_decode: i64,
    #[facet(default)]
    pub max_partition_decode: i64,
    #[facet(default)]
    pub optimal_partition_decode: i64,
    #[facet(default)]
    pub min_partition_compute: i64,
    #[facet(default)]
    pub max_partition_compute: i64,
    #[facet(default)]
    pub optimal_partition_compute: i64,
}

pub async fn list_partitionable_gpus<E: ShellExecutor>(
    shell: &E,
) -> Result<Vec<PartitionableGpu>, QuickVmError> {
    let raw = shell.execute(&ExecutionRequest::script(LIST_GPUS)).await?;
    decode::<PartitionableGpu>(&raw)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::exec::fake::FakeShell;

    /// Inventory of running/off VMs named `names`, for other modules' tests.
    pub(crate) fn inventory(names: &[&str]) -> Inventory {
        Inventory::new(names.iter().map(|name| Vm {
            index: 0,
            name: name.to_string(),
            state: VmState::Off,
            cpu_usage: 0,
            memory_mb: 0,
            uptime: "00:00:00".into(),
            status: "Operating normally".into(),
            version: "11.0".into(),
            ip_addresses: Vec::new(),
        }))
    }

    const TWO_VMS: &str = r#"[
  {"name": "web-01", "state": "Running", "cpu_usage": 3, "memory_mb": 2048,
   "uptime": "01:02:03", "status": "Operating normally", "version": "11.0",
   "ip_addresses": "192.168.1.10,10.0.0.5"},
  {"name": "db-01", "state": "Off", "cpu_usage": 0, "memory_mb": 0,
   "uptime": "00:00:00", "status": "Operating normally", "version": "11.0",
   "ip_addresses": ""}
]"#;

    #[test]
    fn vm_state_parses_known_and_unknown() {
        assert_eq!(VmState::from("Running"), VmState::Running);
        assert_eq!(VmState::from(" Off \r\n"), VmState::Off);
        assert_eq!(
            VmState::from("RunningCritical"),
            VmState::Other("RunningCritical".into())
        );
        assert_eq!(VmState::Other("X".into()).to_string(), "X");
    }

    #[tokio::test]
    async fn list_vms_assigns_indices_in_response_order() {
        let shell = FakeShell::new().ok("script: Get-VM", TWO_VMS);
        let inv = list_vms(&shell).await.unwrap();

        assert_eq!(inv.len(), 2);
        let web = inv.get(1).unwrap();
        assert_eq!(web.name, "web-01");
        assert_eq!(web.state, VmState::Running);
        assert_eq!(web.memory_mb, 2048);
        assert_eq!(web.ip_addresses, vec!["192.168.1.10", "10.0.0.5"]);

        let db = inv.get(2).unwrap();
        assert_eq!(db.index, 2);
        assert!(db.ip_addresses.is_empty());
    }

    #[tokio::test]
    async fn list_vms_single_object() {
        let shell = FakeShell::new().ok(
            "script: Get-VM",
            r#"{"name": "solo", "state": "Paused", "ip_addresses": "172.16.0.2"}"#,
        );
        let inv = list_vms(&shell).await.unwrap();
        assert_eq!(inv.len(), 1);
        assert_eq!(inv.get(1).unwrap().state, VmState::Paused);
    }

    #[tokio::test]
    async fn list_vms_empty_output_is_empty_inventory() {
        let shell = FakeShell::new();
        let inv = list_vms(&shell).await.unwrap();
        assert!(inv.is_empty());
        assert_eq!(inv.bound(), 0);
    }

    #[tokio::test]
    async fn list_vms_propagates_shell_failure() {
        let shell = FakeShell::new().fail("script: Get-VM", "Hyper-V is not installed");
        let err = list_vms(&shell).await.unwrap_err();
        assert_eq!(err.diagnostic_output(), Some("Hyper-V is not installed"));
    }

    #[tokio::test]
    async fn every_listing_issues_a_fresh_query() {
        let shell = FakeShell::new()
            .ok("script: Get-VM", TWO_VMS)
            .ok("script: Get-VM", r#"{"name": "db-01", "state": "Off"}"#);
        let first = list_vms(&shell).await.unwrap();
        let second = list_vms(&shell).await.unwrap();
        assert_eq!(shell.requests().len(), 2);
        assert_eq!(first.name_for_index(2).unwrap(), "db-01");
        assert_eq!(second.name_for_index(1).unwrap(), "db-01");
    }

    #[test]
    fn lookups_are_bounded() {
        let inv = inventory(&["a", "b"]);
        assert!(inv.get(0).is_none());
        assert!(inv.get(3).is_none());
        assert!(matches!(
            inv.name_for_index(3),
            Err(QuickVmError::IndexOutOfBounds { index: 3, bound: 2 })
        ));
        assert_eq!(inv.find_by_name("B").map(|vm| vm.index), Some(2));
        assert!(inv.find_by_name("c").is_none());
    }

    #[tokio::test]
    async fn snapshots_bind_vm_name_as_parameter() {
        let shell = FakeShell::new().ok(
            "script: $snapshots",
            r#"{"name": "before-upgrade", "vm_name": "web'01", "creation_time": "2024-01-02 03:04:05",
                "parent_name": "(None)", "snapshot_type": "Standard"}"#,
        );
        let snaps = list_snapshots(&shell, "web'01").await.unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].index, 1);
        assert_eq!(snaps[0].name, "before-upgrade");

        let rendered = &shell.rendered()[0];
        assert!(rendered.contains("param($VMName)"));
        assert!(rendered.ends_with("-VMName 'web''01'"));
    }

    #[tokio::test]
    async fn snapshot_vm_name_matches_literally() {
        let shell = FakeShell::new();
        list_snapshots(&shell, "web[1]").await.unwrap();
        list_snapshots(&shell, "db*").await.unwrap();
        let rendered = shell.rendered();
        assert!(rendered[0].ends_with("-VMName 'web`[1`]'"));
        assert!(rendered[1].ends_with("-VMName 'db`*'"));
    }

    #[tokio::test]
    async fn no_snapshots_is_empty() {
        let shell = FakeShell::new();
        assert!(list_snapshots(&shell, "web").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn gpus_decode_nested_arrays() {
        let shell = FakeShell::new().ok(
            "script: $gpus",
            r#"{"name": "\\\\?\\PCI#VEN_10DE", "partition_count": 32,
                "valid_partition_counts": [32], "max_partition_vram": 1000000000}"#,
        );
        let gpus = list_partitionable_gpus(&shell).await.unwrap();
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].valid_partition_counts, vec![32]);
        assert_eq!(gpus[0].max_partition_vram, 1_000_000_000);
    }
}
