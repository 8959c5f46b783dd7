use crate::directory::{self, Snapshot};
use crate::error::QuickVmError;
use crate::exec::{Invocation, ShellExecutor};

use super::Manager;

impl<E: ShellExecutor> Manager<E> {
    pub async fn snapshots(&self, vm_name: &str) -> Result<Vec<Snapshot>, QuickVmError> {
        directory::list_snapshots(self.shell(), vm_name).await
    }

    pub async fn create_snapshot(&self, vm_name: &str, snapshot: &str) -> Result<(), QuickVmError> {
        if snapshot.trim().is_empty() {
            return Err(QuickVmError::Validation {
                message: "snapshot name must not be empty".into(),
            });
        }
        self.run(
            Invocation::new("Checkpoint-VM")
                .param_exact("Name", vm_name)
                .param("SnapshotName", snapshot),
        )
        .await?;
        tracing::info!(vm = vm_name, snapshot, "snapshot created");
        Ok(())
    }

    pub async fn restore_snapshot(&self, vm_name: &str, snapshot: &str) -> Result<(), QuickVmError> {
        self.run(
            Invocation::new("Restore-VMSnapshot")
                .param_exact("VMName", vm_name)
                .param_exact("Name", snapshot)
                .flag("Confirm", false),
        )
        .await?;
        tracing::info!(vm = vm_name, snapshot, "snapshot restored");
        Ok(())
    }

    pub async fn delete_snapshot(&self, vm_name: &str, snapshot: &str) -> Result<(), QuickVmError> {
        self.run(
            Invocation::new("Remove-VMSnapshot")
                .param_exact("VMName", vm_name)
                .param_exact("Name", snapshot)
                .flag("Confirm", false),
        )
        .await?;
        tracing::info!(vm = vm_name, snapshot, "snapshot deleted");
        Ok(())
    }
}
