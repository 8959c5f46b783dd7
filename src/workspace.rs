//! Workspaces: named groups of VMs stored as `<dir>/<name>.yaml`.

use std::path::{Path, PathBuf};

use facet::Facet;

use crate::directory::Inventory;
use crate::error::QuickVmError;
use crate::target::TargetSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
#[facet(default)]
pub struct Workspace {
    pub name: String,
    #[facet(default)]
    pub description: String,
    /// Member VM names.
    #[facet(default)]
    pub vms: Vec<String>,
}

impl Workspace {
    pub fn new(name: &str, description: &str, vms: Vec<String>) -> Result<Self, QuickVmError> {
        validate_name(name)?;
        if vms.is_empty() {
            return Err(QuickVmError::Validation {
                message: "a workspace needs at least one VM".into(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            description: description.to_string(),
            vms,
        })
    }

    /// Split members into inventory indices and names the inventory lacks.
    /// Names match case-insensitively.
    pub fn members(&self, inventory: &Inventory) -> Result<Members, QuickVmError> {
        if self.vms.is_empty() {
            return Err(QuickVmError::NoTargetsSpecified);
        }

        let mut indices = Vec::with_capacity(self.vms.len());
        let mut missing = Vec::new();
        for name in &self.vms {
            match inventory.find_by_name(name) {
                Some(vm) => indices.push(vm.index),
                None => missing.push(name.clone()),
            }
        }
        Ok(Members {
            targets: indices.into_iter().collect(),
            missing,
        })
    }
}

/// A workspace's members as seen by one inventory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Members {
    pub targets: TargetSet,
    pub missing: Vec<String>,
}

/// Split `"web, db ,cache"` into names, dropping blanks and repeats.
pub fn parse_vm_list(input: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            names.push(name.to_string());
        }
    }
    names
}

/// Workspace names become file names: `[A-Za-z0-9][A-Za-z0-9._-]*`.
pub fn validate_name(name: &str) -> Result<(), QuickVmError> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return Err(QuickVmError::Validation {
            message: format!(
                "invalid workspace name '{name}': use letters, digits, '.', '_' or '-', \
                 starting with a letter or digit"
            ),
        });
    }
    Ok(())
}

fn file_path(dir: &Path, name: &str) -> Result<PathBuf, QuickVmError> {
    validate_name(name)?;
    Ok(dir.join(format!("{name}.yaml")))
}

/// Sorted workspace names. A missing directory lists as empty.
pub fn list(dir: &Path) -> Result<Vec<String>, QuickVmError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(QuickVmError::io(
                format!("failed to read {}", dir.display()),
                e,
            ));
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "yaml"))
        .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
        .collect();
    names.sort();
    Ok(names)
}

pub fn load(dir: &Path, name: &str) -> Result<Workspace, QuickVmError> {
    let path = file_path(dir, name)?;
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(QuickVmError::WorkspaceNotFound {
                name: name.to_string(),
            });
        }
        Err(e) => {
            return Err(QuickVmError::io(
                format!("failed to read {}", path.display()),
                e,
            ));
        }
    };

    let mut workspace: Workspace =
        facet_yaml::from_str(&contents).map_err(|e| QuickVmError::Validation {
            message: format!("workspace file {} is invalid: {e}", path.display()),
        })?;
    if workspace.name.is_empty() {
        workspace.name = name.to_string();
    }
    Ok(workspace)
}

/// Write (or overwrite) `<dir>/<name>.yaml`, creating `dir` as needed.
pub fn save(dir: &Path, workspace: &Workspace) -> Result<PathBuf, QuickVmError> {
    let path = file_path(dir, &workspace.name)?;
    std::fs::create_dir_all(dir)
        .map_err(|e| QuickVmError::io(format!("failed to create {}", dir.display()), e))?;

    let yaml = facet_yaml::to_string(workspace).map_err(|e| QuickVmError::Validation {
        message: format!("failed to serialize workspace: {e}"),
    })?;
    std::fs::write(&path, yaml)
        .map_err(|e| QuickVmError::io(format!("failed to write {}", path.display()), e))?;
    tracing::debug!(path = %path.display(), "workspace saved");
    Ok(path)
}

pub fn delete(dir: &Path, name: &str) -> Result<(), QuickVmError> {
    let path = file_path(dir, name)?;
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(QuickVmError::WorkspaceNotFound {
            name: name.to_string(),
        }),
        Err(e) => Err(QuickVmError::io(
            format!("failed to delete {}", path.display()),
            e,
        )),
    }
}
