//! Guest instance wrapping a wasmtime `Instance`

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};
use wasmtime::{
    Engine, ExternType, Instance, Linker, Memory, Module, ResourceLimiter, Store, Trap,
    UnknownImportError, Val,
};

use super::exports;
use super::runtime::GuestRuntime;
use crate::config::{ExecutionConfig, ResourceLimits};
use crate::error::{HostError, HostResult};

/// Guest call metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallMetrics {
    /// Total number of calls
    pub call_count: u64,
    /// Calls that ended in a guest trap
    pub trap_count: u64,
    /// Calls rejected before or by the call machinery
    pub error_count: u64,
    /// Total execution time in nanoseconds
    pub total_execution_time_ns: u64,
    /// Average execution time in nanoseconds
    pub avg_execution_time_ns: u64,
    /// Fuel consumed (if metering enabled)
    pub fuel_consumed: u64,
}

impl CallMetrics {
    fn record(&mut self, duration_ns: u64, fuel: Option<u64>, outcome: Option<&HostError>) {
        self.call_count += 1;
        match outcome {
            Some(err) if err.is_guest_fault() => self.trap_count += 1,
            Some(_) => self.error_count += 1,
            None => {}
        }
        self.total_execution_time_ns += duration_ns;
        self.avg_execution_time_ns = self.total_execution_time_ns / self.call_count;
        self.fuel_consumed += fuel.unwrap_or(0);
    }
}

/// Store data
struct GuestState {
    limiter: GuestLimiter,
}

/// Store limits for resource control
struct GuestLimiter {
    max_memory_bytes: u64,
    max_table_elements: u32,
    max_instances: u32,
}

impl From<&ResourceLimits> for GuestLimiter {
    fn from(limits: &ResourceLimits) -> Self {
        Self {
            max_memory_bytes: limits.max_memory_bytes(),
            max_table_elements: limits.max_table_elements,
            max_instances: limits.max_instances,
        }
    }
}

impl ResourceLimiter for GuestLimiter {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        let allowed = desired as u64 <= self.max_memory_bytes
            && maximum.is_none_or(|max| desired <= max);
        if !allowed {
            warn!(
                "Guest memory growth from {} to {} bytes denied (limit {})",
                current, desired, self.max_memory_bytes
            );
        }
        Ok(allowed)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(desired <= self.max_table_elements as usize && maximum.is_none_or(|max| desired <= max))
    }

    fn instances(&self) -> usize {
        self.max_instances as usize
    }
}

/// An instantiated guest module with its own store and linear memory.
///
/// Pointers into [`memory_read`](Self::memory_read) and
/// [`memory_write`](Self::memory_write) are meaningful only for the instance
/// that produced them.
pub struct GuestModule {
    store: Store<GuestState>,
    instance: Instance,
    module: Module,
    memory: Memory,
    fuel_per_call: Option<u64>,
    metrics: CallMetrics,
}

impl GuestModule {
    /// Compile and instantiate module bytes with default limits.
    ///
    /// Fails with [`HostError::Load`] on malformed or incompatible bytes.
    pub fn load(bytes: &[u8]) -> HostResult<Self> {
        GuestRuntime::new(ResourceLimits::default(), ExecutionConfig::default())?
            .compile(bytes)?
            .instantiate()
    }

    pub(crate) fn instantiate(
        engine: &Engine,
        module: &Module,
        limits: &ResourceLimits,
        execution: &ExecutionConfig,
    ) -> HostResult<Self> {
        let mut store = Store::new(
            engine,
            GuestState {
                limiter: GuestLimiter::from(limits),
            },
        );
        store.limiter(|state| &mut state.limiter);

        let fuel_per_call = execution
            .fuel_metering
            .then(|| limits.max_fuel_per_call.unwrap_or(u64::MAX));
        if let Some(fuel) = fuel_per_call {
            store
                .set_fuel(fuel)
                .map_err(|e| HostError::Load(format!("fuel setup failed: {e}")))?;
        }

        let mut linker = Linker::new(engine);
        if execution.trap_unknown_imports {
            linker
                .define_unknown_imports_as_traps(module)
                .map_err(|e| HostError::Load(format!("import stubbing failed: {e}")))?;
        }

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| HostError::Load(format!("instantiation failed: {e}")))?;

        let memory = instance
            .get_memory(&mut store, exports::MEMORY)
            .ok_or_else(|| {
                HostError::Load(format!(
                    "guest does not export linear memory `{}`",
                    exports::MEMORY
                ))
            })?;

        info!(
            "Guest instantiated with {} bytes of linear memory",
            memory.data_size(&store)
        );

        Ok(Self {
            store,
            instance,
            module: module.clone(),
            memory,
            fuel_per_call,
            metrics: CallMetrics::default(),
        })
    }

    pub fn metrics(&self) -> &CallMetrics {
        &self.metrics
    }

    pub fn has_export(&self, name: &str) -> bool {
        self.module.get_export(name).is_some()
    }

    /// Names of all exported functions
    pub fn export_names(&self) -> Vec<String> {
        self.module
            .exports()
            .filter(|export| matches!(export.ty(), ExternType::Func(_)))
            .map(|export| export.name().to_string())
            .collect()
    }

    /// Invoke an exported function and return all of its results.
    pub fn call(&mut self, export: &str, args: &[Val]) -> HostResult<Vec<Val>> {
        let func = self
            .instance
            .get_func(&mut self.store, export)
            .ok_or_else(|| HostError::ExportNotFound(export.to_string()))?;

        let ty = func.ty(&self.store);
        let mut results = vec![Val::I32(0); ty.results().len()];

        if let Some(fuel) = self.fuel_per_call {
            self.store.set_fuel(fuel).map_err(|e| HostError::InvalidCall {
                export: export.to_string(),
                reason: format!("fuel refill failed: {e}"),
            })?;
        }

        let start = Instant::now();
        let outcome = func
            .call(&mut self.store, args, &mut results)
            .map_err(|e| classify(export, e));
        let duration = start.elapsed();

        let fuel_used = self.fuel_per_call.and_then(|budget| {
            self.store
                .get_fuel()
                .ok()
                .map(|left| budget.saturating_sub(left))
        });
        self.metrics.record(
            duration.as_nanos() as u64,
            fuel_used,
            outcome.as_ref().err(),
        );

        match outcome {
            Ok(()) => {
                debug!("Guest call {}({:?}) -> {:?}", export, args, results);
                Ok(results)
            }
            Err(e) => {
                debug!("Guest call {} failed: {}", export, e);
                Err(e)
            }
        }
    }

    /// Call a function with i32 return value
    pub fn call_i32(&mut self, export: &str, args: &[Val]) -> HostResult<i32> {
        let results = self.call(export, args)?;
        match results.first() {
            Some(Val::I32(v)) => Ok(*v),
            _ => Err(HostError::InvalidCall {
                export: export.to_string(),
                reason: format!("expected an i32 result, got {results:?}"),
            }),
        }
    }

    /// Call a function, discarding any results
    pub fn call_void(&mut self, export: &str, args: &[Val]) -> HostResult<()> {
        self.call(export, args).map(|_| ())
    }

    /// Current linear memory size in bytes
    pub fn memory_size(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    /// Copy `len` bytes out of linear memory starting at `offset`.
    pub fn memory_read(&self, offset: u32, len: u32) -> HostResult<Vec<u8>> {
        let start = offset as usize;
        let bytes = start
            .checked_add(len as usize)
            .and_then(|end| self.memory.data(&self.store).get(start..end))
            .ok_or_else(|| self.out_of_bounds(offset, len))?;
        Ok(bytes.to_vec())
    }

    /// Copy `bytes` into linear memory starting at `offset`.
    pub fn memory_write(&mut self, offset: u32, bytes: &[u8]) -> HostResult<()> {
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        if self
            .memory
            .write(&mut self.store, offset as usize, bytes)
            .is_err()
        {
            return Err(self.out_of_bounds(offset, len));
        }
        Ok(())
    }

    fn out_of_bounds(&self, offset: u32, len: u32) -> HostError {
        HostError::OutOfBounds {
            offset,
            len,
            memory_size: self.memory_size(),
        }
    }
}

fn classify(export: &str, err: wasmtime::Error) -> HostError {
    // Stubbed imports fail with an `UnknownImportError` rather than a `Trap`;
    // either way the guest faulted mid-call.
    if err.is::<Trap>() || err.is::<UnknownImportError>() {
        return HostError::GuestTrap {
            export: export.to_string(),
            message: format!("{err:#}"),
        };
    }
    HostError::InvalidCall {
        export: export.to_string(),
        reason: format!("{err:#}"),
    }
}
