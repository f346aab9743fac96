//! Marshaling values through guest linear memory
//!
//! The guest cannot receive structured data, so text, pointer/length tuples
//! and pixel grids are staged in its memory and referenced by offset. The
//! [`MemoryMarshaler`] owns the guest instance and hands out owned allocation
//! values ([`StringBlob`], [`TupleHandle`], [`GuestPixels`]) that bind each
//! pointer to its exact length and are consumed by their release.
//!
//! Every allocation the host is responsible for is also recorded in a ledger,
//! so a release the host cannot vouch for is refused before it reaches the
//! guest allocator.

mod alloc;
mod ledger;

pub use alloc::{GuestAllocation, GuestPixels, GuestPtr, Scoped, StringBlob, TupleHandle};
pub use ledger::AllocationKind;

use tracing::debug;
use wasmtime::Val;

use self::ledger::AllocationLedger;
use crate::error::{HostError, HostResult};
use crate::guest::{GuestModule, exports};
use crate::pixels::{PixelBuffer, pixel_byte_len};

/// Alloc, read, write and release primitives over one guest instance.
pub struct MemoryMarshaler {
    guest: GuestModule,
    ledger: AllocationLedger,
}

impl MemoryMarshaler {
    pub fn new(guest: GuestModule) -> Self {
        Self {
            guest,
            ledger: AllocationLedger::default(),
        }
    }

    pub fn guest(&self) -> &GuestModule {
        &self.guest
    }

    /// Direct access to the instance, for exports this layer does not wrap.
    pub fn guest_mut(&mut self) -> &mut GuestModule {
        &mut self.guest
    }

    pub fn into_guest(self) -> GuestModule {
        self.guest
    }

    /// Reserve `len` bytes of guest memory for text.
    pub fn alloc_string(&mut self, len: u32) -> HostResult<StringBlob> {
        let raw = self
            .guest
            .call_i32(exports::ALLOC_STRING, &[Val::I32(len as i32)])?;
        let ptr = GuestPtr::from_i32(raw);
        self.ledger.track(ptr, AllocationKind::Text, len);

        Ok(StringBlob { ptr, len })
    }

    /// Write bytes at the start of `blob`.
    ///
    /// Fails with [`HostError::AllocationMismatch`] without touching guest
    /// memory when `bytes` is longer than the allocation.
    pub fn write_string(&mut self, blob: &StringBlob, bytes: &[u8]) -> HostResult<()> {
        if bytes.len() > blob.len as usize {
            return Err(HostError::AllocationMismatch {
                ptr: blob.ptr.0,
                expected: blob.len,
                actual: u32::try_from(bytes.len()).unwrap_or(u32::MAX),
            });
        }
        self.guest.memory_write(blob.ptr.0, bytes)
    }

    /// Copy the blob's bytes out of guest memory. Does not release it.
    pub fn read_string(&self, blob: &StringBlob) -> HostResult<Vec<u8>> {
        self.guest.memory_read(blob.ptr.0, blob.len)
    }

    /// Read the blob as UTF-8 text. Does not release it.
    pub fn read_str(&self, blob: &StringBlob) -> HostResult<String> {
        let bytes = self.read_string(blob)?;
        String::from_utf8(bytes).map_err(|e| HostError::encoding(None, e.utf8_error()))
    }

    /// Return a text region to the guest allocator.
    pub fn dealloc_string(&mut self, blob: StringBlob) -> HostResult<()> {
        self.ledger
            .untrack(blob.ptr, AllocationKind::Text, blob.len)?;
        self.guest.call_void(
            exports::DEALLOC_STRING,
            &[blob.ptr.to_val(), Val::I32(blob.len as i32)],
        )
    }

    /// Allocate a region sized to `text` and copy it in.
    pub fn encode_string(&mut self, text: &str) -> HostResult<StringBlob> {
        let len = u32::try_from(text.len()).map_err(|_| HostError::InvalidCall {
            export: exports::ALLOC_STRING.to_string(),
            reason: format!("{} bytes do not fit in guest memory", text.len()),
        })?;

        let blob = self.alloc_string(len)?;
        let mut guard = self.scoped(blob);
        let ptr = guard.ptr();
        guard
            .marshaler()
            .guest
            .memory_write(ptr.0, text.as_bytes())?;

        Ok(guard.detach())
    }

    /// Read the blob as UTF-8 text and release it.
    ///
    /// The blob is released even when the read or the decode fails.
    pub fn take_string(&mut self, blob: StringBlob) -> HostResult<String> {
        let bytes = self.read_string(&blob);
        self.dealloc_string(blob)?;

        String::from_utf8(bytes?).map_err(|e| HostError::encoding(None, e.utf8_error()))
    }

    /// Adopt a tuple pointer returned by the guest.
    pub(crate) fn adopt_tuple(&mut self, raw: i32) -> TupleHandle {
        let ptr = GuestPtr::from_i32(raw);
        self.ledger
            .track(ptr, AllocationKind::Tuple, TupleHandle::SIZE);
        TupleHandle { ptr }
    }

    /// Read the packed `(ptr, len)` pair and release the tuple.
    ///
    /// The returned blob is owned by the caller. If releasing the tuple fails,
    /// the blob it pointed at is released before the error is returned.
    pub fn decode_tuple(&mut self, tuple: TupleHandle) -> HostResult<StringBlob> {
        let pair = self
            .guest
            .memory_read(tuple.ptr.0, TupleHandle::SIZE)
            .and_then(|raw| unpack_tuple(tuple.ptr, &raw));
        let (ptr, len) = match pair {
            Ok(pair) => pair,
            Err(e) => {
                self.dealloc_tuple(tuple)?;
                return Err(e);
            }
        };
        debug!("Decoded tuple into {} bytes at {}", len, ptr);

        self.ledger.track(ptr, AllocationKind::Text, len);
        let mut text = self.scoped(StringBlob { ptr, len });
        text.marshaler().dealloc_tuple(tuple)?;
        Ok(text.detach())
    }

    /// Release a tuple without reading it.
    pub fn dealloc_tuple(&mut self, tuple: TupleHandle) -> HostResult<()> {
        self.ledger
            .untrack(tuple.ptr, AllocationKind::Tuple, TupleHandle::SIZE)?;
        self.guest
            .call_void(exports::DEALLOC_STRTUP, &[tuple.ptr.to_val()])
    }

    /// Adopt a pixel grid pointer returned by the guest.
    pub(crate) fn adopt_pixels(
        &mut self,
        raw: i32,
        width: u32,
        height: u32,
    ) -> HostResult<GuestPixels> {
        let len = pixel_byte_len(width, height)?;
        let ptr = GuestPtr::from_i32(raw);
        self.ledger.track(ptr, AllocationKind::Pixels, len);

        Ok(GuestPixels {
            ptr,
            width,
            height,
            len,
        })
    }

    /// Copy a rendered grid into a host-owned [`PixelBuffer`]. Does not free.
    pub fn decode_pixel_buffer(&self, pixels: &GuestPixels) -> HostResult<PixelBuffer> {
        let bytes = self.guest.memory_read(pixels.ptr.0, pixels.len)?;
        PixelBuffer::from_bytes(pixels.width, pixels.height, bytes)
    }

    /// Size-aware release of a rendered grid.
    pub fn free_pixels(&mut self, pixels: GuestPixels) -> HostResult<()> {
        self.ledger
            .untrack(pixels.ptr, AllocationKind::Pixels, pixels.len)?;
        self.guest.call_void(
            exports::FREE_RAW_PIXELS,
            &[
                pixels.ptr.to_val(),
                Val::I32(pixels.width as i32),
                Val::I32(pixels.height as i32),
            ],
        )
    }

    /// Guard an allocation so it is released on every exit path.
    pub fn scoped<A: GuestAllocation>(&mut self, allocation: A) -> Scoped<'_, A> {
        Scoped::new(self, allocation)
    }

    /// Number of live host-owned guest allocations
    pub fn outstanding(&self) -> usize {
        self.ledger.outstanding()
    }

    pub fn outstanding_of(&self, kind: AllocationKind) -> usize {
        self.ledger.outstanding_of(kind)
    }

    pub fn outstanding_bytes(&self) -> u64 {
        self.ledger.outstanding_bytes()
    }

    pub fn peak_bytes(&self) -> u64 {
        self.ledger.peak_bytes()
    }
}

fn unpack_tuple(tuple: GuestPtr, raw: &[u8]) -> HostResult<(GuestPtr, u32)> {
    let [p0, p1, p2, p3, l0, l1, l2, l3] = raw[..] else {
        return Err(HostError::AllocationMismatch {
            ptr: tuple.0,
            expected: TupleHandle::SIZE,
            actual: u32::try_from(raw.len()).unwrap_or(u32::MAX),
        });
    };
    Ok((
        GuestPtr(u32::from_le_bytes([p0, p1, p2, p3])),
        u32::from_le_bytes([l0, l1, l2, l3]),
    ))
}
