//! Host binding for the sandboxed asciirend renderer
//!
//! The renderer runs as a WASM guest with its own linear memory and is only
//! reachable through its exports. This crate layers the protocol needed to
//! drive it:
//!
//! - [`guest`]: compile and instantiate the module, call exports, raw memory
//!   access, resource limits and call metrics
//! - [`memory`]: owned guest allocations for text, `(ptr, len)` tuples and
//!   pixel grids, each consumed by its release
//! - [`session`]: the per-scene state machine and one-shot rendering
//! - [`pixels`]: host-owned pixel grids and their text output
//! - [`shared`]: serialized access for multi-threaded hosts
//!
//! # Example
//!
//! ```no_run
//! use asciirend_host::{FrameParams, Palette, SceneSession};
//!
//! # fn main() -> Result<(), asciirend_host::HostError> {
//! let bytes = std::fs::read("asciirend.wasm")?;
//! let mut session = SceneSession::from_bytes(&bytes)?;
//!
//! let frame = FrameParams::new(64, 18);
//! let text = session.render_text_once(r#"{"objects":[]}"#, Palette::Ansi256, &frame)?;
//! print!("{text}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod guest;
pub mod memory;
pub mod pixels;
pub mod session;
pub mod shared;

pub use config::HostConfig;
pub use error::{HostError, HostReport, HostResult, IntoHostReport};
pub use guest::{CompiledGuest, GuestModule, GuestRuntime};
pub use memory::MemoryMarshaler;
pub use pixels::{Palette, PaletteId, PixelBuffer};
pub use session::{FrameParams, ProjectionKind, SceneHandle, SceneSession, SceneState};
pub use shared::SharedSession;
