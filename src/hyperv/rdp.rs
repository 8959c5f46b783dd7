//! Remote Desktop into a running VM.

use std::process::Stdio;

use crate::error::QuickVmError;
use crate::exec::{ExecutionRequest, ShellExecutor, combined_output, escape_wildcards};

use super::{Manager, text};

const VM_IPV4: &str = r#"
$addresses = @(Get-VMNetworkAdapter -VMName $VMName | ForEach-Object { $_.IPAddresses })
$addresses | Where-Object { $_ -match '^\d+\.\d+\.\d+\.\d+$' } | Select-Object -First 1
"#;

/// `user` or `user@password`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl Credentials {
    /// The password is whatever follows the final `@`. A trailing `@`
    /// means the whole input is the username.
    pub fn parse(input: &str) -> Option<Self> {
        if input.is_empty() {
            return None;
        }
        match input.rsplit_once('@') {
            Some((user, pass)) if !pass.is_empty() => Some(Self {
                username: user.to_string(),
                password: Some(pass.to_string()),
            }),
            _ => Some(Self {
                username: input.to_string(),
                password: None,
            }),
        }
    }
}

/// Arguments for `cmdkey` storing a password for `TERMSRV/<ip>`.
pub fn cmdkey_args(ip: &str, username: &str, password: &str) -> Vec<String> {
    vec![
        format!("/generic:TERMSRV/{ip}"),
        format!("/user:{username}"),
        format!("/pass:{password}"),
    ]
}

impl<E: ShellExecutor> Manager<E> {
    /// First IPv4 address of a running VM.
    pub async fn vm_ipv4(&self, vm_name: &str) -> Result<String, QuickVmError> {
        let state = self.vm_state(vm_name).await?;
        if !state.is_running() {
            return Err(QuickVmError::Validation {
                message: format!("VM '{vm_name}' is not running (state: {state})"),
            });
        }

        let raw = self
            .run(ExecutionRequest::script(VM_IPV4).bind("VMName", escape_wildcards(vm_name)))
            .await?;
        let ip = text(&raw);
        if ip.is_empty() {
            return Err(QuickVmError::Validation {
                message: format!(
                    "VM '{vm_name}' has no IPv4 address; check integration services \
                     and that a network adapter is connected"
                ),
            });
        }
        Ok(ip)
    }

    /// Store credentials (when a password is given) and launch `mstsc`.
    pub async fn connect_rdp(
        &self,
        ip: &str,
        credentials: Option<&Credentials>,
    ) -> Result<(), QuickVmError> {
        if let Some(Credentials {
            username,
            password: Some(password),
        }) = credentials
        {
            let output = tokio::process::Command::new("cmdkey")
                .args(cmdkey_args(ip, username, password))
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|source| QuickVmError::Launch {
                    program: "cmdkey".into(),
                    source,
                })?;
            if !output.status.success() {
                return Err(QuickVmError::ExecutionFailure {
                    command: "cmdkey".into(),
                    status: output.status.to_string(),
                    output: combined_output(&output.stdout, &output.stderr),
                });
            }
            tracing::info!(ip, username, "stored RDP credentials");
        }

        tokio::process::Command::new("mstsc")
            .arg(format!("/v:{ip}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| QuickVmError::Launch {
                program: "mstsc".into(),
                source,
            })?;
        Ok(())
    }
}
