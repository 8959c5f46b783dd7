//! Hyper-V operations on top of the shell executor.
//!
//! Every method takes VM *names*. Index handling stays in the CLI layer,
//! which resolves indices against one inventory and passes names down.

pub mod gpu;
pub mod rdp;
pub mod snapshot;
pub mod sysinfo;
pub mod transfer;

use crate::batch::Operation;
use crate::directory::{self, Inventory, VmState};
use crate::error::QuickVmError;
use crate::exec::{ExecutionRequest, Invocation, ShellExecutor};

pub struct Manager<E> {
    shell: E,
}

impl<E: ShellExecutor> Manager<E> {
    pub fn new(shell: E) -> Self {
        Self { shell }
    }

    pub fn shell(&self) -> &E {
        &self.shell
    }

    /// Fresh listing of every VM.
    pub async fn vms(&self) -> Result<Inventory, QuickVmError> {
        directory::list_vms(&self.shell).await
    }

    pub async fn start_vm(&self, name: &str) -> Result<(), QuickVmError> {
        self.run(Invocation::new("Start-VM").param_exact("Name", name))
            .await
            .map(drop)
    }

    pub async fn stop_vm(&self, name: &str) -> Result<(), QuickVmError> {
        self.run(
            Invocation::new("Stop-VM")
                .param_exact("Name", name)
                .switch("Force"),
        )
        .await
        .map(drop)
    }

    pub async fn restart_vm(&self, name: &str) -> Result<(), QuickVmError> {
        self.run(
            Invocation::new("Restart-VM")
                .param_exact("Name", name)
                .switch("Force"),
        )
        .await
        .map(drop)
    }

    /// Run a batch lifecycle operation against one VM.
    pub async fn apply(&self, operation: Operation, name: &str) -> Result<(), QuickVmError> {
        match operation.name {
            "start" => self.start_vm(name).await,
            "stop" => self.stop_vm(name).await,
            "restart" => self.restart_vm(name).await,
            other => Err(QuickVmError::Validation {
                message: format!("'{other}' is not a lifecycle operation"),
            }),
        }
    }

    /// Current state of one VM, queried now rather than taken from a listing.
    pub async fn vm_state(&self, name: &str) -> Result<VmState, QuickVmError> {
        let raw = self
            .run(
                Invocation::new("Get-VM")
                    .param_exact("Name", name)
                    .pipe(Invocation::new("Select-Object").param("ExpandProperty", "State")),
            )
            .await?;
        let state = text(&raw);
        if state.is_empty() {
            return Err(QuickVmError::VmNotFound {
                name: name.to_string(),
            });
        }
        Ok(VmState::from(state.as_str()))
    }

    pub async fn rename_vm(&self, name: &str, new_name: &str) -> Result<(), QuickVmError> {
        self.run(
            Invocation::new("Rename-VM")
                .param_exact("Name", name)
                .param("NewName", new_name),
        )
        .await
        .map(drop)
    }

    pub async fn remove_vm(&self, name: &str) -> Result<(), QuickVmError> {
        self.run(
            Invocation::new("Remove-VM")
                .param_exact("Name", name)
                .switch("Force"),
        )
        .await
        .map(drop)
    }

    async fn run(&self, request: impl Into<ExecutionRequest>) -> Result<Vec<u8>, QuickVmError> {
        self.shell.execute(&request.into()).await
    }
}

/// Trimmed text output of a shell call.
fn text(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_start_matches('\u{feff}')
        .trim()
        .to_string()
}
