//! Bookkeeping of live host-owned guest allocations

use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

use super::GuestPtr;
use crate::error::{HostError, HostResult};

/// Wire shape of a tracked allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationKind {
    Text,
    Tuple,
    Pixels,
}

impl fmt::Display for AllocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationKind::Text => write!(f, "text"),
            AllocationKind::Tuple => write!(f, "tuple"),
            AllocationKind::Pixels => write!(f, "pixels"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveAllocation {
    kind: AllocationKind,
    len: u32,
    // Zero-sized allocations may share an address.
    count: u32,
}

/// Live allocations keyed by guest address
#[derive(Debug, Default)]
pub(crate) struct AllocationLedger {
    live: HashMap<GuestPtr, LiveAllocation>,
    bytes: u64,
    peak_bytes: u64,
}

impl AllocationLedger {
    pub fn track(&mut self, ptr: GuestPtr, kind: AllocationKind, len: u32) {
        match self.live.get_mut(&ptr) {
            Some(entry) if entry.kind == kind && entry.len == 0 && len == 0 => entry.count += 1,
            Some(entry) => {
                warn!(
                    "Guest returned {} which the host still holds as {} bytes of {}",
                    ptr, entry.len, entry.kind
                );
                self.bytes = self.bytes.saturating_sub(entry.len as u64 * entry.count as u64);
                *entry = LiveAllocation {
                    kind,
                    len,
                    count: 1,
                };
                self.bytes += len as u64;
            }
            None => {
                self.live.insert(
                    ptr,
                    LiveAllocation {
                        kind,
                        len,
                        count: 1,
                    },
                );
                self.bytes += len as u64;
            }
        }

        self.peak_bytes = self.peak_bytes.max(self.bytes);
        debug!("Tracking {} bytes of {} at {}", len, kind, ptr);
    }

    /// Stop tracking an allocation, refusing releases the ledger cannot vouch for.
    pub fn untrack(&mut self, ptr: GuestPtr, kind: AllocationKind, len: u32) -> HostResult<()> {
        let Some(entry) = self.live.get_mut(&ptr) else {
            // expected == 0: nothing is allocated at this address
            return Err(HostError::AllocationMismatch {
                ptr: ptr.0,
                expected: 0,
                actual: len,
            });
        };

        if entry.kind != kind || entry.len != len {
            return Err(HostError::AllocationMismatch {
                ptr: ptr.0,
                expected: entry.len,
                actual: len,
            });
        }

        entry.count -= 1;
        if entry.count == 0 {
            self.live.remove(&ptr);
        }
        self.bytes = self.bytes.saturating_sub(len as u64);
        Ok(())
    }

    /// Number of live allocations
    pub fn outstanding(&self) -> usize {
        self.live.values().map(|entry| entry.count as usize).sum()
    }

    pub fn outstanding_of(&self, kind: AllocationKind) -> usize {
        self.live
            .values()
            .filter(|entry| entry.kind == kind)
            .map(|entry| entry.count as usize)
            .sum()
    }

    pub fn outstanding_bytes(&self) -> u64 {
        self.bytes
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak_bytes
    }
}
