//! Engine setup and module compilation
//!
//! A [`GuestRuntime`] owns the wasmtime engine built from [`ExecutionConfig`].
//! Compiling produces a [`CompiledGuest`] that can be instantiated any number
//! of times, which is how a multi-threaded host gets one instance per worker.

use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};
use wasmtime::{Engine, ExternType, Module};

use super::instance::GuestModule;
use crate::config::{ExecutionConfig, HostConfig, ResourceLimits};
use crate::error::{HostError, HostResult};

/// wasmtime engine plus the limits applied to every instance
#[derive(Clone)]
pub struct GuestRuntime {
    engine: Engine,
    limits: ResourceLimits,
    execution: ExecutionConfig,
}

impl GuestRuntime {
    pub fn new(limits: ResourceLimits, execution: ExecutionConfig) -> HostResult<Self> {
        let engine = Engine::new(&execution.to_wasmtime_config())
            .map_err(|e| HostError::Load(format!("engine setup failed: {e}")))?;

        Ok(Self {
            engine,
            limits,
            execution,
        })
    }

    pub fn from_config(config: &HostConfig) -> HostResult<Self> {
        Self::new(config.resource_limits.clone(), config.execution.clone())
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Compile module bytes. WAT text is accepted as well as binary wasm.
    pub fn compile(&self, bytes: &[u8]) -> HostResult<CompiledGuest> {
        let start = Instant::now();
        let module = Module::new(&self.engine, bytes)
            .map_err(|e| HostError::Load(format!("compilation failed: {e}")))?;
        let compile_time_ms = start.elapsed().as_millis() as u64;

        info!(
            "Compiled guest module ({} bytes) in {}ms",
            bytes.len(),
            compile_time_ms
        );

        Ok(CompiledGuest {
            runtime: self.clone(),
            module,
            size_bytes: bytes.len(),
            compile_time_ms,
        })
    }

    pub fn compile_file(&self, path: impl AsRef<Path>) -> HostResult<CompiledGuest> {
        let path = path.as_ref();
        debug!("Reading guest module from {}", path.display());
        let bytes = std::fs::read(path)?;
        self.compile(&bytes)
    }
}

/// A compiled guest module ready to be instantiated
#[derive(Clone)]
pub struct CompiledGuest {
    runtime: GuestRuntime,
    module: Module,
    /// Module size in bytes
    pub size_bytes: usize,
    /// Compilation time
    pub compile_time_ms: u64,
}

impl CompiledGuest {
    /// Create a fresh instance with its own store and linear memory.
    pub fn instantiate(&self) -> HostResult<GuestModule> {
        GuestModule::instantiate(
            &self.runtime.engine,
            &self.module,
            &self.runtime.limits,
            &self.runtime.execution,
        )
    }

    /// Names of all exported functions
    pub fn function_exports(&self) -> Vec<String> {
        self.module
            .exports()
            .filter(|export| matches!(export.ty(), ExternType::Func(_)))
            .map(|export| export.name().to_string())
            .collect()
    }

    pub fn module(&self) -> &Module {
        &self.module
    }
}
