//! Sandboxed guest module
//!
//! Compiles and instantiates the renderer module with wasmtime and exposes its
//! exports and linear memory to the rest of the host:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ GuestRuntime (Engine + limits)               │
//! │   └── CompiledGuest (Module)                 │
//! │         └── GuestModule (Store + Instance)   │
//! │               ├── exported functions         │
//! │               └── linear memory "memory"     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A `GuestModule` is single-threaded: one call at a time, each call blocking
//! until the guest returns or traps.

pub mod exports;
mod instance;
mod runtime;

pub use instance::{CallMetrics, GuestModule};
pub use runtime::{CompiledGuest, GuestRuntime};
