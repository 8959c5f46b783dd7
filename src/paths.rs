use std::path::PathBuf;

/// Default config file: `~/.config/quickvm/config.toml` (`%APPDATA%\quickvm\config.toml`).
pub fn config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("quickvm").join("config.toml"))
}

/// Log file appended to on every run.
pub fn log_file() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("quickvm")
        .join("quickvm.log")
}

/// Workspace definitions: `~/.quickvm/workspaces/<name>.yaml`.
pub fn workspaces_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".quickvm")
        .join("workspaces")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_namespaced() {
        assert!(log_file().ends_with("quickvm/quickvm.log"));
        assert!(workspaces_dir().ends_with(".quickvm/workspaces"));
        if let Some(config) = config_file() {
            assert!(config.ends_with("quickvm/config.toml"));
        }
    }
}
