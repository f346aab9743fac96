//! Owned guest allocations
//!
//! Every value here binds a guest pointer to its exact length and is consumed
//! by its release operation, so a released allocation cannot be touched again
//! and a release can never be issued with the wrong length.

use std::fmt;
use std::ops::Deref;
use tracing::warn;
use wasmtime::Val;

use super::MemoryMarshaler;
use crate::error::HostResult;

/// Guest pointer type (32-bit address in WASM linear memory)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuestPtr(pub u32);

impl GuestPtr {
    pub fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub fn offset(&self, bytes: u32) -> Self {
        Self(self.0.saturating_add(bytes))
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Reinterpret a guest `usize` returned through an `i32` result.
    pub fn from_i32(raw: i32) -> Self {
        Self(raw as u32)
    }

    /// Encode as an `i32` argument for a guest call.
    pub fn to_val(self) -> Val {
        Val::I32(self.0 as i32)
    }
}

impl From<u32> for GuestPtr {
    fn from(addr: u32) -> Self {
        Self(addr)
    }
}

impl From<GuestPtr> for u32 {
    fn from(ptr: GuestPtr) -> Self {
        ptr.0
    }
}

impl fmt::Display for GuestPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A guest allocation the host is responsible for releasing exactly once.
pub trait GuestAllocation {
    fn ptr(&self) -> GuestPtr;

    /// Exact size of the allocation in bytes
    fn byte_len(&self) -> u32;

    /// Return the allocation to the guest allocator.
    fn release(self, marshaler: &mut MemoryMarshaler) -> HostResult<()>;
}

/// UTF-8 bytes resident in guest memory.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "guest text must be released with `dealloc_string`"]
pub struct StringBlob {
    pub(super) ptr: GuestPtr,
    pub(super) len: u32,
}

impl StringBlob {
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl GuestAllocation for StringBlob {
    fn ptr(&self) -> GuestPtr {
        self.ptr
    }

    fn byte_len(&self) -> u32 {
        self.len
    }

    fn release(self, marshaler: &mut MemoryMarshaler) -> HostResult<()> {
        marshaler.dealloc_string(self)
    }
}

/// A guest allocation ferrying a packed `(ptr, len)` pair.
///
/// Decoding consumes the handle and releases the tuple, so it can be read
/// only once:
///
/// ```compile_fail
/// use asciirend_host::memory::{MemoryMarshaler, TupleHandle};
///
/// fn decode_twice(marshaler: &mut MemoryMarshaler, tuple: TupleHandle) {
///     let _first = marshaler.decode_tuple(tuple);
///     let _second = marshaler.decode_tuple(tuple);
/// }
/// ```
#[derive(Debug, PartialEq, Eq)]
#[must_use = "tuples must be decoded or released"]
pub struct TupleHandle {
    pub(super) ptr: GuestPtr,
}

impl TupleHandle {
    /// Size of the packed pair in guest memory
    pub const SIZE: u32 = 8;
}

impl GuestAllocation for TupleHandle {
    fn ptr(&self) -> GuestPtr {
        self.ptr
    }

    fn byte_len(&self) -> u32 {
        Self::SIZE
    }

    fn release(self, marshaler: &mut MemoryMarshaler) -> HostResult<()> {
        marshaler.dealloc_tuple(self)
    }
}

/// A rendered pixel grid still resident in guest memory.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "guest pixels must be released with `free_pixels`"]
pub struct GuestPixels {
    pub(super) ptr: GuestPtr,
    pub(super) width: u32,
    pub(super) height: u32,
    pub(super) len: u32,
}

impl GuestPixels {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl GuestAllocation for GuestPixels {
    fn ptr(&self) -> GuestPtr {
        self.ptr
    }

    fn byte_len(&self) -> u32 {
        self.len
    }

    fn release(self, marshaler: &mut MemoryMarshaler) -> HostResult<()> {
        marshaler.free_pixels(self)
    }
}

/// Releases its allocation when dropped unless [detached](Scoped::detach).
///
/// Errors from a release during drop cannot propagate and are logged; call
/// [`release`](Scoped::release) to observe them.
pub struct Scoped<'m, A: GuestAllocation> {
    marshaler: &'m mut MemoryMarshaler,
    allocation: Option<A>,
}

impl<'m, A: GuestAllocation> Scoped<'m, A> {
    pub(super) fn new(marshaler: &'m mut MemoryMarshaler, allocation: A) -> Self {
        Self {
            marshaler,
            allocation: Some(allocation),
        }
    }

    /// The marshaler the allocation belongs to, for calls made while it lives.
    pub fn marshaler(&mut self) -> &mut MemoryMarshaler {
        self.marshaler
    }

    /// Take ownership back; the caller becomes responsible for releasing it.
    pub fn detach(mut self) -> A {
        self.allocation
            .take()
            .expect("scoped allocation is present until detached or released")
    }

    /// Release now and report the outcome.
    pub fn release(mut self) -> HostResult<()> {
        match self.allocation.take() {
            Some(allocation) => allocation.release(self.marshaler),
            None => Ok(()),
        }
    }
}

impl<A: GuestAllocation> Deref for Scoped<'_, A> {
    type Target = A;

    fn deref(&self) -> &A {
        self.allocation
            .as_ref()
            .expect("scoped allocation is present until detached or released")
    }
}

impl<A: GuestAllocation> Drop for Scoped<'_, A> {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let ptr = allocation.ptr();
            let len = allocation.byte_len();
            if let Err(e) = allocation.release(self.marshaler) {
                warn!("Failed to release {} bytes at {} on scope exit: {}", len, ptr, e);
            }
        }
    }
}
