//! UMEM: the registered, chunked packet buffer (spec §3, §4.2).
//!
//! Grounded on `xsk/umem.rs`'s `XskUmem::new`/`configure` for the overall
//! registration shape (validate, then hand the validated region to the
//! platform layer) and on `original_source/core/sys/xsk.c`'s `UMEM`/
//! `XskUmemInitialize` for the exact bounds-checking rules this crate must
//! reproduce (headroom/chunk/total-size relationships, truncation of
//! `total_size` to a multiple of `chunk_size`).

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::UmemReg;
use crate::error::{XskError, XskResult};
use crate::platform::ProcessAttachToken;

/// Matches the original's `Reg->Headroom > MAXUINT16` check: headroom is
/// packed into the 16-bit offset field of a [`crate::ring::BufferDescriptor`]
/// (spec §3), so it must fit in `u16`, not merely be `<= 64 KiB`.
const MAX_HEADROOM: u32 = u16::MAX as u32;

/// A registered UMEM region. Reference counted: socket closure and sharing
/// with a peer XSK both hold references (spec invariant I1).
pub struct Umem {
    address: usize,
    total_size: u64,
    chunk_size: u32,
    headroom: u32,
    chunk_count: u32,
    owning_process: Arc<dyn ProcessAttachToken>,
    refcount: AtomicUsize,
}

impl Umem {
    /// Validate and register a UMEM region (spec §4.2).
    ///
    /// Fails with [`XskError::InvalidParameter`] if `headroom > chunk_size`,
    /// `chunk_size == 0`, or `headroom > 64 KiB`. `total_size` is truncated
    /// down to a multiple of `chunk_size`.
    pub fn register(reg: UmemReg, owning_process: Arc<dyn ProcessAttachToken>) -> XskResult<Self> {
        if reg.chunk_size == 0 {
            log::warn!("umem register rejected: chunk_size is zero");
            return Err(XskError::InvalidParameter("chunk_size must be non-zero"));
        }
        if reg.headroom > MAX_HEADROOM {
            log::warn!("umem register rejected: headroom {} exceeds 64 KiB", reg.headroom);
            return Err(XskError::InvalidParameter("headroom exceeds 64 KiB"));
        }
        if reg.headroom > reg.chunk_size {
            log::warn!(
                "umem register rejected: headroom {} exceeds chunk_size {}",
                reg.headroom,
                reg.chunk_size
            );
            return Err(XskError::InvalidParameter("headroom exceeds chunk_size"));
        }
        if reg.total_size > (1u64 << 32) {
            log::warn!("umem register rejected: total_size {} exceeds 2^32", reg.total_size);
            return Err(XskError::InvalidParameter("total_size exceeds 2^32"));
        }

        let chunk_count = (reg.total_size / reg.chunk_size as u64) as u32;
        let total_size = chunk_count as u64 * reg.chunk_size as u64;
        log::trace!(
            "umem registered ({:?}): total_size={} chunk_size={} chunk_count={}",
            crate::diag::AllocationTag::Umem,
            total_size,
            reg.chunk_size,
            chunk_count
        );

        Ok(Umem {
            address: reg.address,
            total_size,
            chunk_size: reg.chunk_size,
            headroom: reg.headroom,
            chunk_count,
            owning_process,
            refcount: AtomicUsize::new(1),
        })
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn headroom(&self) -> u32 {
        self.headroom
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Whether `base` is a valid chunk-aligned, in-bounds UMEM-relative
    /// address (used by the fill-descriptor validation in the RX pipeline,
    /// spec §4.5).
    pub fn chunk_base_in_bounds(&self, base: u64) -> bool {
        base <= self.total_size.saturating_sub(self.chunk_size as u64)
    }

    /// Whether `[base + offset, base + offset + length)` lies fully inside
    /// the registered region (used by the TX pipeline's descriptor
    /// validation, spec §4.6).
    pub fn range_in_bounds(&self, base: u64, offset: u32, length: u32) -> bool {
        let end = base
            .saturating_add(offset as u64)
            .saturating_add(length as u64);
        end <= self.total_size
    }

    /// True if `[base+offset, base+offset+length)` stays within a single
    /// chunk (spec §4.3 "fails if the addressed region straddles a chunk
    /// boundary").
    pub fn within_one_chunk(&self, base: u64, offset: u32, length: u32) -> bool {
        let chunk_index = base / self.chunk_size as u64;
        let chunk_start = chunk_index * self.chunk_size as u64;
        let chunk_end = chunk_start + self.chunk_size as u64;
        let start = base + offset as u64;
        let end = start + length as u64;
        start >= chunk_start && end <= chunk_end
    }

    pub fn chunk_index_of(&self, base: u64) -> u32 {
        (base / self.chunk_size as u64) as u32
    }

    /// Pointer to the start of UMEM-relative byte `offset`.
    ///
    /// # Safety
    ///
    /// `offset` must be `< total_size` and the caller must not construct
    /// overlapping mutable references to the same bytes from two call sites
    /// at once, beyond what the RX/TX pipelines' own single-writer
    /// discipline already guarantees.
    pub unsafe fn byte_ptr(&self, offset: u64) -> *mut u8 {
        (self.address as *mut u8).add(offset as usize)
    }

    /// Called when a peer socket starts sharing this UMEM (spec invariant
    /// I1: "total UMEM references = sockets using it").
    pub fn add_ref(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Called on socket teardown. Returns `true` if this was the last
    /// reference, in which case the caller should run the unmap/MDL-release
    /// sequence under `owning_process` (spec §4.2 `deref`).
    pub fn release(&self) -> bool {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "UMEM refcount underflow");
        prev == 1
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    pub fn owning_process(&self) -> &Arc<dyn ProcessAttachToken> {
        &self.owning_process
    }
}

#[cfg(all(test, feature = "test-util"))]
mod tests {
    use super::*;
    use crate::platform::fake::FakeProcessToken;

    fn token() -> Arc<dyn ProcessAttachToken> {
        Arc::new(FakeProcessToken)
    }

    #[test]
    fn truncates_total_size_to_multiple_of_chunk_size() {
        let umem = Umem::register(
            UmemReg {
                address: 0x1000,
                total_size: 70_000,
                chunk_size: 4096,
                headroom: 0,
            },
            token(),
        )
        .unwrap();
        assert_eq!(umem.chunk_count(), 70_000 / 4096);
        assert_eq!(umem.total_size(), (70_000 / 4096) * 4096);
    }

    #[test]
    fn rejects_headroom_over_chunk_size() {
        let err = Umem::register(
            UmemReg {
                address: 0,
                total_size: 4096,
                chunk_size: 1024,
                headroom: 2048,
            },
            token(),
        )
        .unwrap_err();
        assert_eq!(err, XskError::InvalidParameter("headroom exceeds chunk_size"));
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let err = Umem::register(
            UmemReg {
                address: 0,
                total_size: 4096,
                chunk_size: 0,
                headroom: 0,
            },
            token(),
        )
        .unwrap_err();
        assert_eq!(err, XskError::InvalidParameter("chunk_size must be non-zero"));
    }

    #[test]
    fn chunk_base_bounds_check() {
        let umem = Umem::register(
            UmemReg {
                address: 0,
                total_size: 4096 * 4,
                chunk_size: 4096,
                headroom: 0,
            },
            token(),
        )
        .unwrap();
        assert!(umem.chunk_base_in_bounds(0));
        assert!(umem.chunk_base_in_bounds(4096 * 3));
        assert!(!umem.chunk_base_in_bounds(4096 * 4));
    }

    #[test]
    fn within_one_chunk_detects_straddle() {
        let umem = Umem::register(
            UmemReg {
                address: 0,
                total_size: 4096 * 2,
                chunk_size: 4096,
                headroom: 0,
            },
            token(),
        )
        .unwrap();
        assert!(umem.within_one_chunk(0, 4000, 96));
        assert!(!umem.within_one_chunk(0, 4000, 200));
    }

    #[test]
    fn refcount_tracks_sharing() {
        let umem = Umem::register(
            UmemReg {
                address: 0,
                total_size: 4096,
                chunk_size: 4096,
                headroom: 0,
            },
            token(),
        )
        .unwrap();
        assert_eq!(umem.refcount(), 1);
        umem.add_ref();
        assert_eq!(umem.refcount(), 2);
        assert!(!umem.release());
        assert!(umem.release());
    }
}
