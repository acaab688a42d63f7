//! Bounce buffer for TX frames that cannot be posted directly from UMEM
//! (spec §3 `BounceBuffer`, §4.3).
//!
//! Grounded on `original_source/core/sys/xsk.c`'s `UMEM_BOUNCE` (a
//! process-independent staging buffer allocated alongside the UMEM for the
//! generic-mode TX path, since generic-mode NBLs cannot reference
//! user-mapped MDLs directly) and on the chunk layout already validated by
//! [`crate::umem::Umem`].

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{XskError, XskResult};
use crate::umem::Umem;

/// One bounce slot per UMEM chunk, counting outstanding in-flight transmits
/// for that chunk (spec §4.3 "a `tracker[chunk_count]` counts outstanding
/// in-flight transmits per chunk; a non-zero counter freezes subsequent
/// writes"). Unlike a lock, a non-zero counter does not reject a further
/// post of the same chunk — it only suppresses the copy, so every in-flight
/// transmit for that chunk observes the bytes captured by the first post
/// (spec §8 testable property 4, "bounce immutability").
pub struct BounceBuffer {
    chunk_size: u32,
    storage: Vec<u8>,
    tracker: Vec<AtomicU32>,
}

impl BounceBuffer {
    /// Allocate a bounce region sized to back every chunk of `umem`.
    pub fn new(umem: &Umem) -> Self {
        let chunk_size = umem.chunk_size();
        let chunk_count = umem.chunk_count() as usize;
        let mut tracker = Vec::with_capacity(chunk_count);
        tracker.resize_with(chunk_count, || AtomicU32::new(0));
        log::trace!(
            "bounce buffer allocated ({:?}): {} chunks of {} bytes",
            crate::diag::AllocationTag::Bounce,
            chunk_count,
            chunk_size
        );
        BounceBuffer {
            chunk_size,
            storage: alloc::vec![0u8; chunk_count * chunk_size as usize],
            tracker,
        }
    }

    /// Copy `[base+offset, base+offset+length)` out of `umem` into the
    /// bounce slot for that chunk, but only if no transmit for that chunk is
    /// currently outstanding; always increments the tracker and returns the
    /// bounce mapping (spec §4.3). Fails only if the range straddles a chunk
    /// boundary (spec §4.3 "fails if the addressed region straddles a chunk
    /// boundary").
    pub fn bounce(&self, umem: &Umem, base: u64, offset: u32, length: u32) -> XskResult<&[u8]> {
        if !umem.within_one_chunk(base, offset, length) {
            return Err(XskError::InvalidRing);
        }
        let chunk_index = umem.chunk_index_of(base) as usize;
        let slot = self
            .tracker
            .get(chunk_index)
            .ok_or(XskError::InvalidRing)?;

        let prev = slot.fetch_add(1, Ordering::AcqRel);

        let slot_start = chunk_index * self.chunk_size as usize;
        let src_start = slot_start + offset as usize;

        if prev == 0 {
            let dst = unsafe {
                let ptr = self.storage.as_ptr().add(slot_start) as *mut u8;
                core::slice::from_raw_parts_mut(ptr, self.chunk_size as usize)
            };
            unsafe {
                let src = umem.byte_ptr(base + offset as u64);
                core::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), length as usize);
            }
        }

        Ok(&self.storage[src_start..src_start + length as usize])
    }

    /// Decrement the tracker for `base`'s chunk once the lower layer has
    /// completed that send (spec §4.3 `release`).
    pub fn release(&self, umem: &Umem, base: u64) {
        let chunk_index = umem.chunk_index_of(base) as usize;
        if let Some(slot) = self.tracker.get(chunk_index) {
            let prev = slot.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(prev > 0, "bounce tracker underflow");
        }
    }

    pub fn is_in_flight(&self, umem: &Umem, base: u64) -> bool {
        let chunk_index = umem.chunk_index_of(base) as usize;
        self.tracker
            .get(chunk_index)
            .map(|s| s.load(Ordering::Acquire) != 0)
            .unwrap_or(false)
    }

    /// The full bounce slot backing `base`'s chunk. A platform binding reads
    /// this to build the VA/LA/MDL extension it hands the lower interface in
    /// place of the UMEM mapping (spec §4.6 "populate each enabled
    /// extension"), since [`Self::bounce`] only returns a transient borrow
    /// tied to the call that posted it.
    pub fn chunk_slice(&self, umem: &Umem, base: u64) -> &[u8] {
        let chunk_index = umem.chunk_index_of(base) as usize;
        let start = chunk_index * self.chunk_size as usize;
        &self.storage[start..start + self.chunk_size as usize]
    }
}

#[cfg(all(test, feature = "test-util"))]
mod tests {
    use super::*;
    use crate::config::UmemReg;
    use crate::platform::fake::FakeProcessToken;
    use alloc::sync::Arc;

    fn umem_with_data(chunk_size: u32, chunks: u32, fill: u8) -> Umem {
        let total = chunk_size as u64 * chunks as u64;
        let layout = alloc::alloc::Layout::from_size_align(total as usize, 8).unwrap();
        let ptr = unsafe { alloc::alloc::alloc(layout) };
        unsafe { core::ptr::write_bytes(ptr, fill, total as usize) };
        Umem::register(
            UmemReg {
                address: ptr as usize,
                total_size: total,
                chunk_size,
                headroom: 0,
            },
            Arc::new(FakeProcessToken),
        )
        .unwrap()
    }

    #[test]
    fn bounces_payload_and_tracks_in_flight() {
        let umem = umem_with_data(256, 4, 0xAB);
        let bounce = BounceBuffer::new(&umem);

        assert!(!bounce.is_in_flight(&umem, 256));
        let copied = bounce.bounce(&umem, 256, 0, 64).unwrap();
        assert_eq!(copied.len(), 64);
        assert!(copied.iter().all(|&b| b == 0xAB));
        assert!(bounce.is_in_flight(&umem, 256));

        bounce.release(&umem, 256);
        assert!(!bounce.is_in_flight(&umem, 256));
    }

    #[test]
    fn rejects_chunk_straddling_range() {
        let umem = umem_with_data(256, 4, 0);
        let bounce = BounceBuffer::new(&umem);
        assert!(bounce.bounce(&umem, 0, 200, 100).is_err());
    }

    #[test]
    fn second_bounce_of_outstanding_chunk_keeps_first_posts_bytes() {
        let umem = umem_with_data(256, 4, 0xAB);
        let bounce = BounceBuffer::new(&umem);
        let first = bounce.bounce(&umem, 0, 0, 32).unwrap().to_vec();
        assert!(bounce.is_in_flight(&umem, 0));

        // A concurrent userspace write to the chunk would land here, but the
        // second bounce while the first is still outstanding must not pick
        // it up: it returns the bytes captured by the first post (spec §8
        // testable property 4).
        unsafe { core::ptr::write_bytes(umem.byte_ptr(0), 0xFF, 256) };
        let second = bounce.bounce(&umem, 0, 0, 32).unwrap();
        assert_eq!(second, first.as_slice());

        bounce.release(&umem, 0);
        assert!(bounce.is_in_flight(&umem, 0));
        bounce.release(&umem, 0);
        assert!(!bounce.is_in_flight(&umem, 0));
    }

    #[test]
    fn chunk_slice_exposes_bounced_bytes_at_their_offset() {
        let umem = umem_with_data(256, 4, 0xAB);
        let bounce = BounceBuffer::new(&umem);
        bounce.bounce(&umem, 256, 13, 5).unwrap();
        let slot = bounce.chunk_slice(&umem, 256);
        assert_eq!(slot.len(), 256);
        assert_eq!(&slot[13..18], &[0xAB; 5]);
    }
}
