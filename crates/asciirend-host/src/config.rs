//! Host configuration
//!
//! Resource limits, engine features and frame defaults for driving the guest
//! renderer. Configuration can be loaded from YAML, TOML or JSON files; `${VAR}`
//! and `$VAR` references are substituted from the environment, and
//! `ASCIIREND_*` variables override file values (nested keys separated by
//! `__`, e.g. `ASCIIREND_RESOURCE_LIMITS__MAX_MEMORY_PAGES=64`).

use config::{Config as Cfg, Environment, File, FileFormat};
use error_stack::{Report, ResultExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::error::{HostError, HostReport, HostResult};
use crate::pixels::Palette;
use crate::session::FrameParams;

const PAGE_SIZE: u64 = 65536;

/// Resource limits applied to every guest instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum memory pages (64KB each)
    pub max_memory_pages: u32,
    /// Maximum table elements
    pub max_table_elements: u32,
    /// Maximum instances per store
    pub max_instances: u32,
    /// Fuel refilled before every guest call (requires fuel metering)
    pub max_fuel_per_call: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_pages: 1024, // 64MB
            max_table_elements: 10000,
            max_instances: 1,
            max_fuel_per_call: Some(2_000_000_000),
        }
    }
}

impl ResourceLimits {
    pub fn unlimited() -> Self {
        Self {
            max_memory_pages: u32::MAX,
            max_table_elements: u32::MAX,
            max_instances: u32::MAX,
            max_fuel_per_call: None,
        }
    }

    pub fn restrictive() -> Self {
        Self {
            max_memory_pages: 64, // 4MB
            max_table_elements: 1000,
            max_instances: 1,
            max_fuel_per_call: Some(50_000_000),
        }
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_pages as u64 * PAGE_SIZE
    }
}

/// Cranelift optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    None,
    Speed,
    SpeedAndSize,
}

/// Engine features and compilation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Enable fuel metering
    pub fuel_metering: bool,
    /// Enable debug info
    pub debug_info: bool,
    /// Enable SIMD
    pub simd: bool,
    /// Enable bulk memory operations
    pub bulk_memory: bool,
    /// Enable multi-value returns
    pub multi_value: bool,
    /// Enable parallel compilation
    pub parallel_compilation: bool,
    pub optimization_level: OptimizationLevel,
    /// Link imports the host does not provide as trapping stubs
    pub trap_unknown_imports: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            fuel_metering: false,
            debug_info: false,
            simd: true,
            bulk_memory: true,
            multi_value: true,
            parallel_compilation: true,
            optimization_level: OptimizationLevel::Speed,
            trap_unknown_imports: true,
        }
    }
}

impl ExecutionConfig {
    pub(crate) fn to_wasmtime_config(&self) -> wasmtime::Config {
        let mut config = wasmtime::Config::new();

        config.consume_fuel(self.fuel_metering);
        config.debug_info(self.debug_info);

        config.wasm_simd(self.simd);
        config.wasm_bulk_memory(self.bulk_memory);
        config.wasm_multi_value(self.multi_value);

        config.cranelift_opt_level(match self.optimization_level {
            OptimizationLevel::None => wasmtime::OptLevel::None,
            OptimizationLevel::Speed => wasmtime::OptLevel::Speed,
            OptimizationLevel::SpeedAndSize => wasmtime::OptLevel::SpeedAndSize,
        });
        config.parallel_compilation(self.parallel_compilation);

        config
    }
}

/// Top-level host configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Path to the guest renderer module (`.wasm` or `.wat`)
    pub module_path: Option<PathBuf>,
    pub resource_limits: ResourceLimits,
    pub execution: ExecutionConfig,
    /// Frame parameters used by callers that do not supply their own
    pub frame: FrameParams,
    pub palette: Palette,
}

impl HostConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.module_path = Some(path.into());
        self
    }

    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    /// Load configuration from a file, then apply `ASCIIREND_*` overrides.
    pub fn load(path: impl AsRef<Path>) -> HostReport<Self> {
        let path = path.as_ref();
        let format = detect_format(path).map_err(Report::new)?;
        let content = std::fs::read_to_string(path)
            .map_err(HostError::from)
            .map_err(Report::new)
            .attach(format!("reading {}", path.display()))?;

        Self::from_str_with_format(&content, format)
            .map_err(Report::new)
            .attach(format!("parsing {}", path.display()))
    }

    /// Parse configuration text in the given format, then apply overrides.
    pub fn from_str_with_format(content: &str, format: FileFormat) -> HostResult<Self> {
        let content = substitute_env_vars(content);

        Cfg::builder()
            .add_source(File::from_str(&content, format))
            .add_source(
                Environment::with_prefix("ASCIIREND")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .map_err(|e| HostError::Config(e.to_string()))
    }
}

/// Detect configuration format from the file extension
pub fn detect_format(path: &Path) -> HostResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| HostError::Config(format!("no file extension on {}", path.display())))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        other => Err(HostError::Config(format!("unsupported format: {other}"))),
    }
}

static BRACED_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));
static BARE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("valid regex"));

/// Substitute `${VAR}` and `$VAR` references; unknown variables are left as is.
pub fn substitute_env_vars(content: &str) -> String {
    let lookup = |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    };

    let braced = BRACED_VAR.replace_all(content, lookup);
    BARE_VAR.replace_all(&braced, lookup).into_owned()
}
