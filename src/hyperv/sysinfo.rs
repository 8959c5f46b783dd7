//! Host resources and the Hyper-V feature itself.

use facet::Facet;

use crate::decode::{decode, decode_one};
use crate::error::QuickVmError;
use crate::exec::{ExecutionRequest, Invocation, ShellExecutor};
use crate::util::mb_to_gb;

use super::{Manager, text};

const CPU_INFO: &str = r#"
Get-CimInstance -ClassName Win32_Processor | Select-Object -First 1 | ForEach-Object {
    [pscustomobject]@{
        name = ([string]$_.Name).Trim()
        cores = [int64]$_.NumberOfCores
        logical_processors = [int64]$_.NumberOfLogicalProcessors
    }
} | ConvertTo-Json
"#;

const MEMORY_INFO: &str = r#"
$os = Get-CimInstance -ClassName Win32_OperatingSystem
[pscustomobject]@{
    total_mb = [int64][math]::Round($os.TotalVisibleMemorySize / 1024)
    free_mb = [int64][math]::Round($os.FreePhysicalMemory / 1024)
} | ConvertTo-Json
"#;

const DISK_INFO: &str = r#"
Get-CimInstance -ClassName Win32_LogicalDisk -Filter 'DriveType=3' | ForEach-Object {
    [pscustomobject]@{
        name = [string]$_.DeviceID
        total_mb = [int64][math]::Round($_.Size / 1MB)
        free_mb = [int64][math]::Round($_.FreeSpace / 1MB)
    }
} | ConvertTo-Json
"#;

const HYPERV_FEATURE: &str = r#"
$feature = Get-WindowsOptionalFeature -Online -FeatureName Microsoft-Hyper-V
$status = if ($feature) {
    [pscustomobject]@{ enabled = ($feature.State -eq 'Enabled'); status = $feature.State.ToString() }
} else {
    [pscustomobject]@{ enabled = $false; status = 'Not Installed' }
}
$status | ConvertTo-Json
"#;

const HYPERV_SERVICE: &str = r#"
$vmms = Get-Service -Name vmms -ErrorAction SilentlyContinue
$status = if ($vmms) {
    [pscustomobject]@{ enabled = ($vmms.Status -eq 'Running'); status = $vmms.Status.ToString() }
} else {
    [pscustomobject]@{ enabled = $false; status = 'Not Installed' }
}
$status | ConvertTo-Json
"#;

const IS_ADMIN: &str = r#"
$identity = [Security.Principal.WindowsIdentity]::GetCurrent()
([Security.Principal.WindowsPrincipal]$identity).IsInRole([Security.Principal.WindowsBuiltInRole]::Administrator)
"#;

const SCHEDULE_RESTART: &str = "shutdown.exe /r /t $Seconds";

#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
#[facet(default)]
pub struct CpuInfo {
    pub name: String,
    #[facet(default)]
    pub cores: i64,
    #[facet(default)]
    pub logical_processors: i64,
}

#[derive(Debug, Default, Facet)]
#[facet(default)]
struct CapacityRecord {
    #[facet(default)]
    name: String,
    #[facet(default)]
    total_mb: i64,
    #[facet(default)]
    free_mb: i64,
}

/// Total/free/used space, in MB with GB conveniences.
#[derive(Debug, Clone, PartialEq)]
pub struct Capacity {
    pub name: String,
    pub total_mb: i64,
    pub free_mb: i64,
}

impl Capacity {
    fn from_record(record: CapacityRecord) -> Self {
        Self {
            name: record.name,
            total_mb: record.total_mb,
            free_mb: record.free_mb,
        }
    }

    pub fn used_mb(&self) -> i64 {
        self.total_mb - self.free_mb
    }

    pub fn total_gb(&self) -> f64 {
        mb_to_gb(self.total_mb)
    }

    pub fn free_gb(&self) -> f64 {
        mb_to_gb(self.free_mb)
    }

    pub fn used_gb(&self) -> f64 {
        mb_to_gb(self.used_mb())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
#[facet(default)]
pub struct HyperVStatus {
    #[facet(default)]
    pub enabled: bool,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemInfo {
    pub cpu: CpuInfo,
    pub memory: Capacity,
    pub disks: Vec<Capacity>,
    pub hyperv: HyperVStatus,
}

impl<E: ShellExecutor> Manager<E> {
    pub async fn system_info(&self) -> Result<SystemInfo, QuickVmError> {
        let cpu = decode_one::<CpuInfo>(&self.run(ExecutionRequest::script(CPU_INFO)).await?)?;
        let memory = Capacity::from_record(decode_one::<CapacityRecord>(
            &self.run(ExecutionRequest::script(MEMORY_INFO)).await?,
        )?);
        let disks = decode::<CapacityRecord>(&self.run(ExecutionRequest::script(DISK_INFO)).await?)?
            .into_iter()
            .map(Capacity::from_record)
            .collect();
        let hyperv = self.hyperv_status().await;
        Ok(SystemInfo {
            cpu,
            memory,
            disks,
            hyperv,
        })
    }

    /// Feature state, falling back to the `vmms` service, then to "Unknown".
    /// Never fails: the feature query needs elevation on some hosts.
    pub async fn hyperv_status(&self) -> HyperVStatus {
        for script in [HYPERV_FEATURE, HYPERV_SERVICE] {
            let status = match self.run(ExecutionRequest::script(script)).await {
                Ok(raw) => decode_one::<HyperVStatus>(&raw),
                Err(e) => Err(e),
            };
            match status {
                Ok(status) => return status,
                Err(e) => tracing::debug!(error = %e, "Hyper-V status query failed"),
            }
        }
        HyperVStatus {
            enabled: false,
            status: "Unknown".into(),
        }
    }

    pub async fn is_admin(&self) -> Result<bool, QuickVmError> {
        let raw = self.run(ExecutionRequest::script(IS_ADMIN)).await?;
        Ok(text(&raw).eq_ignore_ascii_case("true"))
    }

    /// Enable the Hyper-V feature. Returns whether a reboot is required.
    pub async fn enable_hyperv(&self) -> Result<bool, QuickVmError> {
        let raw = self
            .run(
                Invocation::new("Enable-WindowsOptionalFeature")
                    .switch("Online")
                    .param("FeatureName", "Microsoft-Hyper-V")
                    .switch("All")
                    .switch("NoRestart")
                    .pipe(Invocation::new("Select-Object").param("ExpandProperty", "RestartNeeded")),
            )
            .await?;
        let restart = text(&raw).eq_ignore_ascii_case("true");
        tracing::info!(restart, "Hyper-V enabled");
        Ok(restart)
    }

    /// Reboot the host after `seconds`.
    pub async fn schedule_restart(&self, seconds: u64) -> Result<(), QuickVmError> {
        self.run(ExecutionRequest::script(SCHEDULE_RESTART).bind("Seconds", seconds.to_string()))
            .await?;
        tracing::info!(seconds, "host restart scheduled");
        Ok(())
    }
}
