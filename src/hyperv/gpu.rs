//! GPU-P (GPU partitioning) adapters.

use crate::directory::{self, PartitionableGpu};
use crate::error::QuickVmError;
use crate::exec::{Invocation, ShellExecutor};

use super::{Manager, text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRange {
    pub min: u64,
    pub max: u64,
    pub optimal: u64,
}

/// Sizes applied when adding a partition adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuPartition {
    pub vram: PartitionRange,
    pub encode: PartitionRange,
    pub decode: PartitionRange,
    pub compute: PartitionRange,
    pub low_mmio_bytes: u64,
    pub high_mmio_bytes: u64,
}

impl<E: ShellExecutor> Manager<E> {
    pub async fn partitionable_gpus(&self) -> Result<Vec<PartitionableGpu>, QuickVmError> {
        directory::list_partitionable_gpus(self.shell()).await
    }

    /// Whether `vm_name` has a GPU partition adapter attached.
    pub async fn has_gpu_adapter(&self, vm_name: &str) -> Result<bool, QuickVmError> {
        let raw = self
            .run(
                Invocation::new("Get-VMGpuPartitionAdapter")
                    .param_exact("VMName", vm_name)
                    .param("ErrorAction", "SilentlyContinue")
                    .pipe(Invocation::new("Measure-Object"))
                    .pipe(Invocation::new("Select-Object").param("ExpandProperty", "Count")),
            )
            .await?;
        let count = text(&raw);
        count
            .parse::<u64>()
            .map(|n| n > 0)
            .map_err(|_| QuickVmError::DecodeFailure {
                message: "expected an adapter count".into(),
                output: count,
            })
    }

    pub async fn add_gpu_partition(
        &self,
        vm_name: &str,
        partition: &GpuPartition,
    ) -> Result<(), QuickVmError> {
        self.ensure_stopped(vm_name, "adding").await?;
        if self.has_gpu_adapter(vm_name).await? {
            return Err(QuickVmError::Validation {
                message: format!("VM '{vm_name}' already has a GPU partition"),
            });
        }

        self.run(Invocation::new("Add-VMGpuPartitionAdapter").param_exact("VMName", vm_name))
            .await?;
        let p = partition;
        self.run(
            Invocation::new("Set-VMGpuPartitionAdapter")
                .param_exact("VMName", vm_name)
                .number("MinPartitionVRAM", p.vram.min)
                .number("MaxPartitionVRAM", p.vram.max)
                .number("OptimalPartitionVRAM", p.vram.optimal)
                .number("MinPartitionEncode", p.encode.min)
                .number("MaxPartitionEncode", p.encode.max)
                .number("OptimalPartitionEncode", p.encode.optimal)
                .number("MinPartitionDecode", p.decode.min)
                .number("MaxPartitionDecode", p.decode.max)
                .number("OptimalPartitionDecode", p.decode.optimal)
                .number("MinPartitionCompute", p.compute.min)
                .number("MaxPartitionCompute", p.compute.max)
                .number("OptimalPartitionCompute", p.compute.optimal),
        )
        .await?;
        self.run(
            Invocation::new("Set-VM")
                .param_exact("VMName", vm_name)
                .flag("GuestControlledCacheTypes", true)
                .number("LowMemoryMappedIoSpace", p.low_mmio_bytes)
                .number("HighMemoryMappedIoSpace", p.high_mmio_bytes),
        )
        .await?;

        tracing::info!(vm = vm_name, "GPU partition added");
        Ok(())
    }

    pub async fn remove_gpu_partition(&self, vm_name: &str) -> Result<(), QuickVmError> {
        self.ensure_stopped(vm_name, "removing").await?;
        if !self.has_gpu_adapter(vm_name).await? {
            return Err(QuickVmError::Validation {
                message: format!("VM '{vm_name}' does not have a GPU partition"),
            });
        }
        self.run(Invocation::new("Remove-VMGpuPartitionAdapter").param_exact("VMName", vm_name))
            .await?;
        tracing::info!(vm = vm_name, "GPU partition removed");
        Ok(())
    }

    async fn ensure_stopped(&self, vm_name: &str, action: &str) -> Result<(), QuickVmError> {
        let state = self.vm_state(vm_name).await?;
        if state.is_running() {
            return Err(QuickVmError::Validation {
                message: format!("VM '{vm_name}' must be stopped before {action} a GPU partition"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GpuConfig;
    use crate::exec::fake::FakeShell;

    fn partition() -> GpuPartition {
        GpuConfig::default().partition().unwrap()
    }

    #[tokio::test]
    async fn add_runs_adapter_sizing_and_vm_settings() {
        let shell = FakeShell::new()
            .ok("Get-VM | Select-Object", "Off")
            .ok("Get-VMGpuPartitionAdapter", "0");
        let mgr = Manager::new(shell);
        mgr.add_gpu_partition("gamer", &partition()).await.unwrap();

        assert_eq!(
            mgr.shell().labels(),
            vec![
                "Get-VM | Select-Object",
                "Get-VMGpuPartitionAdapter | Measure-Object | Select-Object",
                "Add-VMGpuPartitionAdapter",
                "Set-VMGpuPartitionAdapter",
                "Set-VM",
            ]
        );
        let rendered = mgr.shell().rendered();
        assert!(rendered[3].contains("-MinPartitionVRAM 80000000 -MaxPartitionVRAM 100000000"));
        assert_eq!(
            rendered[4],
            "Set-VM -VMName 'gamer' -GuestControlledCacheTypes:$true \
             -LowMemoryMappedIoSpace 1073741824 -HighMemoryMappedIoSpace 34359738368"
        );
    }

    #[tokio::test]
    async fn add_refuses_running_vm() {
        let mgr = Manager::new(FakeShell::new().ok("Get-VM | Select-Object", "Running"));
        let err = mgr.add_gpu_partition("gamer", &partition()).await.unwrap_err();
        assert!(err.to_string().contains("must be stopped"));
        assert_eq!(mgr.shell().requests().len(), 1);
    }

    #[tokio::test]
    async fn add_refuses_existing_adapter() {
        let shell = FakeShell::new()
            .ok("Get-VM | Select-Object", "Off")
            .ok("Get-VMGpuPartitionAdapter", "1");
        let mgr = Manager::new(shell);
        let err = mgr.add_gpu_partition("gamer", &partition()).await.unwrap_err();
        assert!(err.to_string().contains("already has a GPU partition"));
    }

    #[tokio::test]
    async fn remove_requires_adapter() {
        let shell = FakeShell::new()
            .ok("Get-VM | Select-Object", "Off")
            .ok("Get-VMGpuPartitionAdapter", "0");
        let mgr = Manager::new(shell);
        let err = mgr.remove_gpu_partition("gamer").await.unwrap_err();
        assert!(err.to_string().contains("does not have a GPU partition"));
    }

    #[tokio::test]
    async fn remove_detaches_adapter() {
        let shell = FakeShell::new()
            .ok("Get-VM | Select-Object", "Saved")
            .ok("Get-VMGpuPartitionAdapter", "1");
        let mgr = Manager::new(shell);
        mgr.remove_gpu_partition("gamer").await.unwrap();
        assert_eq!(
            mgr.shell().rendered().last().unwrap(),
            "Remove-VMGpuPartitionAdapter -VMName 'gamer'"
        );
    }

    #[tokio::test]
    async fn adapter_count_must_be_numeric() {
        let mgr = Manager::new(FakeShell::new().ok("Get-VMGpuPartitionAdapter", "what"));
        assert!(matches!(
            mgr.has_gpu_adapter("gamer").await,
            Err(QuickVmError::DecodeFailure { .. })
        ));
    }
}
