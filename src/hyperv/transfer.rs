//! Export, import and clone.

use std::path::{Path, PathBuf};

use facet::Facet;

use crate::decode::decode_one;
use crate::directory::Inventory;
use crate::error::QuickVmError;
use crate::exec::{ExecutionRequest, Invocation, ShellExecutor};

use super::Manager;

const IMPORT_VM: &str = r#"
$options = @{ Path = $Path }
if ($Copy -eq 'true') { $options.Copy = $true }
if ($GenerateNewId -eq 'true') { $options.GenerateNewId = $true }
if ($VhdDestinationPath) { $options.VhdDestinationPath = $VhdDestinationPath }
$vm = Import-VM @options
[pscustomobject]@{ name = $vm.Name; id = $vm.Id.ToString() } | ConvertTo-Json
"#;

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// A `.vmcx` file or an export directory.
    pub path: PathBuf,
    /// Copy files instead of registering the VM in place.
    pub copy: bool,
    pub generate_new_id: bool,
    pub vhd_destination: Option<PathBuf>,
}

/// The VM `Import-VM` produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
#[facet(default)]
pub struct ImportedVm {
    pub name: String,
    #[facet(default)]
    pub id: String,
}

impl<E: ShellExecutor> Manager<E> {
    /// `Export-VM`; the export lands in `<path>/<name>/`.
    pub async fn export_vm(&self, name: &str, path: &Path) -> Result<(), QuickVmError> {
        self.run(
            Invocation::new("Export-VM")
                .param_exact("Name", name)
                .param("Path", path.display().to_string()),
        )
        .await?;
        tracing::info!(vm = name, path = %path.display(), "exported");
        Ok(())
    }

    pub async fn import_vm(&self, options: &ImportOptions) -> Result<ImportedVm, QuickVmError> {
        let vmcx = find_vmcx(&options.path)?;
        tracing::debug!(vmcx = %vmcx.display(), "importing");

        let request = ExecutionRequest::script(IMPORT_VM)
            .bind("Path", vmcx.display().to_string())
            .bind("Copy", options.copy.to_string())
            .bind("GenerateNewId", options.generate_new_id.to_string())
            .bind(
                "VhdDestinationPath",
                options
                    .vhd_destination
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            );
        let raw = self.run(request).await?;
        let imported = decode_one::<ImportedVm>(&raw)?;
        tracing::info!(vm = %imported.name, id = %imported.id, "imported");
        Ok(imported)
    }

    /// Full copy of `source` named `new_name`: export to a scratch directory,
    /// import with copied files and a new id, then rename the copy.
    pub async fn clone_vm(
        &self,
        inventory: &Inventory,
        source: &str,
        new_name: &str,
    ) -> Result<ImportedVm, QuickVmError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(QuickVmError::Validation {
                message: "new VM name must not be empty".into(),
            });
        }
        if inventory.find_by_name(source).is_none() {
            return Err(QuickVmError::VmNotFound {
                name: source.to_string(),
            });
        }
        if inventory.find_by_name(new_name).is_some() {
            return Err(QuickVmError::Validation {
                message: format!("a VM named '{new_name}' already exists"),
            });
        }

        let staging = tempfile::Builder::new()
            .prefix("quickvm-clone-")
            .tempdir()
            .map_err(|e| QuickVmError::io("creating clone staging directory", e))?;

        self.export_vm(source, staging.path()).await?;
        let mut imported = self
            .import_vm(&ImportOptions {
                path: staging.path().join(source),
                copy: true,
                generate_new_id: true,
                vhd_destination: None,
            })
            .await?;

        // The copy shares the source's name until renamed, so address it by id.
        if imported.name != new_name {
            if let Err(e) = self.rename_vm_by_id(&imported.id, new_name).await {
                if let Err(cleanup) = self.remove_vm_by_id(&imported.id).await {
                    tracing::warn!(id = %imported.id, error = %cleanup, "failed to remove half-cloned VM");
                }
                return Err(e);
            }
            imported.name = new_name.to_string();
        }

        if let Err(e) = staging.close() {
            tracing::warn!(error = %e, "failed to remove clone staging directory");
        }
        Ok(imported)
    }

    async fn rename_vm_by_id(&self, id: &str, new_name: &str) -> Result<(), QuickVmError> {
        self.run(
            Invocation::new("Get-VM")
                .param("Id", id)
                .pipe(Invocation::new("Rename-VM").param("NewName", new_name)),
        )
        .await
        .map(drop)
    }

    async fn remove_vm_by_id(&self, id: &str) -> Result<(), QuickVmError> {
        self.run(
            Invocation::new("Get-VM")
                .param("Id", id)
                .pipe(Invocation::new("Remove-VM").switch("Force")),
        )
        .await
        .map(drop)
    }
}

/// Locate the `.vmcx` to import: `path` itself, else the first one under
/// `<path>/Virtual Machines/`, else the first one directly in `path`.
pub fn find_vmcx(path: &Path) -> Result<PathBuf, QuickVmError> {
    if has_vmcx_extension(path) {
        return Ok(path.to_path_buf());
    }

    let nested = path.join("Virtual Machines");
    for dir in [nested.as_path(), path] {
        if let Some(found) = first_vmcx(dir)? {
            return Ok(found);
        }
    }

    Err(QuickVmError::Validation {
        message: format!(
            "no .vmcx file found in '{}' or '{}'",
            path.display(),
            nested.display()
        ),
    })
}

fn first_vmcx(dir: &Path) -> Result<Option<PathBuf>, QuickVmError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(QuickVmError::io(format!("reading {}", dir.display()), e)),
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_vmcx_extension(p))
        .collect();
    found.sort();
    Ok(found.into_iter().next())
}

fn has_vmcx_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("vmcx"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::tests::inventory;
    use crate::exec::fake::FakeShell;

    fn export_tree(dir: &Path, vm: &str) -> PathBuf {
        let vms = dir.join(vm).join("Virtual Machines");
        std::fs::create_dir_all(&vms).unwrap();
        let vmcx = vms.join("0A1B2C3D.vmcx");
        std::fs::write(&vmcx, b"").unwrap();
        vmcx
    }

    #[test]
    fn find_vmcx_accepts_file_path() {
        let path = Path::new("C:/exports/web/x.VMCX");
        assert_eq!(find_vmcx(path).unwrap(), path);
    }

    #[test]
    fn find_vmcx_searches_virtual_machines_dir() {
        let dir = tempfile::tempdir().unwrap();
        let vmcx = export_tree(dir.path(), "web");
        assert_eq!(find_vmcx(&dir.path().join("web")).unwrap(), vmcx);
    }

    #[test]
    fn find_vmcx_falls_back_to_directory_itself() {
        let dir = tempfile::tempdir().unwrap();
        let vmcx = dir.path().join("vm.vmcx");
        std::fs::write(&vmcx, b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        assert_eq!(find_vmcx(dir.path()).unwrap(), vmcx);
    }

    #[test]
    fn find_vmcx_reports_both_locations() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_vmcx(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Virtual Machines"));
    }

    #[tokio::test]
    async fn export_renders_literal_path() {
        let mgr = Manager::new(FakeShell::new());
        mgr.export_vm("web", Path::new("D:\\exports\\it's")).await.unwrap();
        assert_eq!(
            mgr.shell().rendered(),
            vec!["Export-VM -Name 'web' -Path 'D:\\exports\\it''s'"]
        );
    }

    #[tokio::test]
    async fn import_binds_options_as_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let vmcx = export_tree(dir.path(), "web");
        let mgr = Manager::new(
            FakeShell::new().ok("script: $options", r#"{"name": "web", "id": "1111"}"#),
        );

        let imported = mgr
            .import_vm(&ImportOptions {
                path: dir.path().join("web"),
                copy: true,
                generate_new_id: false,
                vhd_destination: None,
            })
            .await
            .unwrap();

        assert_eq!(imported.name, "web");
        let rendered = &mgr.shell().rendered()[0];
        assert!(rendered.contains("param($Path, $Copy, $GenerateNewId, $VhdDestinationPath)"));
        assert!(rendered.contains(&format!("-Path '{}'", vmcx.display())));
        assert!(rendered.contains("-Copy 'true' -GenerateNewId 'false' -VhdDestinationPath ''"));
    }

    #[tokio::test]
    async fn clone_rejects_bad_names_before_shell() {
        let inv = inventory(&["web", "db"]);
        let mgr = Manager::new(FakeShell::new());

        let err = mgr.clone_vm(&inv, "web", " ").await.unwrap_err();
        assert!(matches!(err, QuickVmError::Validation { .. }));
        let err = mgr.clone_vm(&inv, "web", "DB").await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
        let err = mgr.clone_vm(&inv, "ghost", "new").await.unwrap_err();
        assert!(matches!(err, QuickVmError::VmNotFound { .. }));

        assert!(mgr.shell().requests().is_empty());
    }

    #[tokio::test]
    async fn clone_export_failure_stops_early() {
        let inv = inventory(&["web"]);
        let mgr = Manager::new(FakeShell::new().fail("Export-VM", "disk full"));
        let err = mgr.clone_vm(&inv, "web", "web-copy").await.unwrap_err();
        assert_eq!(err.diagnostic_output(), Some("disk full"));
        assert_eq!(mgr.shell().labels(), vec!["Export-VM"]);
    }
}
