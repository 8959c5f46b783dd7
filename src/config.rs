use std::path::Path;
use std::time::Duration;

use facet::Facet;

use crate::error::QuickVmError;
use crate::hyperv::gpu::{GpuPartition, PartitionRange};
use crate::paths;
use crate::util::parse_size;

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Config {
    #[facet(default)]
    pub shell: ShellConfig,
    #[facet(default)]
    pub gpu: GpuConfig,
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct ShellConfig {
    #[facet(default = "powershell.exe")]
    pub program: String,
    /// Per-invocation limit in seconds; 0 disables it.
    #[facet(default = 300)]
    pub timeout_s: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "powershell.exe".into(),
            timeout_s: 300,
        }
    }
}

impl ShellConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_s > 0).then(|| Duration::from_secs(self.timeout_s))
    }
}

/// GPU-P partition sizing applied by `gpu add`.
#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct GpuConfig {
    #[facet(default = 80000000)]
    pub min_vram: u64,
    #[facet(default = 100000000)]
    pub max_vram: u64,
    #[facet(default = 100000000)]
    pub optimal_vram: u64,
    #[facet(default = 80000000)]
    pub min_encode: u64,
    #[facet(default = 100000000)]
    pub max_encode: u64,
    #[facet(default = 100000000)]
    pub optimal_encode: u64,
    #[facet(default = 80000000)]
    pub min_decode: u64,
    #[facet(default = 100000000)]
    pub max_decode: u64,
    #[facet(default = 100000000)]
    pub optimal_decode: u64,
    #[facet(default = 80000000)]
    pub min_compute: u64,
    #[facet(default = 100000000)]
    pub max_compute: u64,
    #[facet(default = 100000000)]
    pub optimal_compute: u64,
    /// Low memory-mapped IO space, e.g. `"1G"`.
    #[facet(default = "1G")]
    pub low_mmio: String,
    /// High memory-mapped IO space, e.g. `"32G"`.
    #[facet(default = "32G")]
    pub high_mmio: String,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            min_vram: 80_000_000,
            max_vram: 100_000_000,
            optimal_vram: 100_000_000,
            min_encode: 80_000_000,
            max_encode: 100_000_000,
            optimal_encode: 100_000_000,
            min_decode: 80_000_000,
            max_decode: 100_000_000,
            optimal_decode: 100_000_000,
            min_compute: 80_000_000,
            max_compute: 100_000_000,
            optimal_compute: 100_000_000,
            low_mmio: "1G".into(),
            high_mmio: "32G".into(),
        }
    }
}

impl GpuConfig {
    /// Resolve into the sizes `gpu add` applies.
    pub fn partition(&self) -> Result<GpuPartition, QuickVmError> {
        Ok(GpuPartition {
            vram: range("vram", self.min_vram, self.max_vram, self.optimal_vram)?,
            encode: range("encode", self.min_encode, self.max_encode, self.optimal_encode)?,
            decode: range("decode", self.min_decode, self.max_decode, self.optimal_decode)?,
            compute: range("compute", self.min_compute, self.max_compute, self.optimal_compute)?,
            low_mmio_bytes: parse_size(&self.low_mmio)?,
            high_mmio_bytes: parse_size(&self.high_mmio)?,
        })
    }
}

fn range(what: &str, min: u64, max: u64, optimal: u64) -> Result<PartitionRange, QuickVmError> {
    if !(min <= optimal && optimal <= max) {
        return Err(QuickVmError::Validation {
            message: format!(
                "gpu {what}: expected min <= optimal <= max (got {min}, {optimal}, {max})"
            ),
        });
    }
    Ok(PartitionRange { min, max, optimal })
}

fn validate_config(config: &Config) -> Result<(), QuickVmError> {
    if config.shell.program.trim().is_empty() {
        return Err(QuickVmError::Validation {
            message: "shell.program must not be empty".into(),
        });
    }
    config.gpu.partition()?;
    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config, QuickVmError> {
    let contents = std::fs::read_to_string(path).map_err(|source| QuickVmError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;

    let config: Config = facet_toml::from_str(&contents).map_err(|e| QuickVmError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    validate_config(&config)?;
    Ok(config)
}

/// `--config` if given (must exist), else the default file when present,
/// else built-in defaults.
pub fn load(explicit: Option<&Path>) -> Result<Config, QuickVmError> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    match paths::config_file() {
        Some(path) if path.is_file() => {
            tracing::debug!(path = %path.display(), "loading config");
            load_config(&path)
        }
        _ => Ok(Config::default()),
    }
}
