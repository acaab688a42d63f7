//! The shared-ring protocol (spec §3, §4.1).
//!
//! Grounded on `xsk/ring.rs` in the teacher crate: the cached-producer /
//! cached-consumer reservation algorithm and the acquire/release/relaxed
//! fence split are kept verbatim. What changes is the backing memory: the
//! teacher maps its ring over an `mmap`'d page from a Linux AF_XDP socket;
//! here the ring lives in a buffer the platform layer already allocated and
//! mapped into both kernel and user address space (spec §4.4
//! `set_ring_size`), so construction takes a `NonNull<u8>` directly instead
//! of an `fd`+`offset` pair.

use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

/// Ring flag bits, shared with userspace through the ring header (spec §6).
pub mod ring_flags {
    pub const NEED_POKE: u32 = 1;
    pub const ERROR: u32 = 2;
    pub const OFFLOAD_CHANGED: u32 = 4;
    pub const AFFINITY_CHANGED: u32 = 8;
}

/// The sticky ring error enum (spec §3, §6). Installed at most once per
/// ring; later [`SharedRing::set_error`] calls are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RingError {
    NoError = 0,
    InterfaceDetach = 1,
    InvalidRing = 2,
}

impl RingError {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => RingError::InterfaceDetach,
            2 => RingError::InvalidRing,
            _ => RingError::NoError,
        }
    }
}

/// An index into a ring's descriptor array.
///
/// Not a pure offset: callers must mask by the ring's `size - 1` to find the
/// actual slot. Two `BufIdx` values are only comparable relative to a given
/// ring's cached state — see the teacher's own note on this in
/// `xsk/ring.rs`, which this type keeps.
#[repr(transparent)]
#[derive(Debug, Default, Copy, Clone)]
pub struct BufIdx(pub u32);

/// The ring header as laid out in shared memory: `{producer_index,
/// consumer_index, flags, reserved}` followed by a power-of-two array of
/// descriptors on 8-byte alignment (spec §3).
#[repr(C)]
pub struct RingHeader {
    pub producer_index: AtomicU32,
    pub consumer_index: AtomicU32,
    pub flags: AtomicU32,
    /// Doubles as the sticky error code once `flags & ERROR` is set; `0`
    /// (= [`RingError::NoError`]) otherwise. Written exactly once via
    /// `compare_exchange` in [`RingInner::set_error`].
    pub reserved: AtomicU32,
}

impl RingHeader {
    /// Raw flag-bit mutation against the header alone, for callers (e.g. the
    /// poll-mode controller, spec §4.7) that only ever need to twiddle
    /// `NEED_POKE`-style bits and have no reason to stand up a full
    /// `RingProd`/`RingCons` view (stride/count are irrelevant to a header-only
    /// op).
    pub fn set_flags(&self, bits: u32) {
        self.flags.fetch_or(bits, Ordering::AcqRel);
    }

    /// See [`Self::set_flags`].
    pub fn clear_flags(&self, bits: u32) {
        self.flags.fetch_and(!bits, Ordering::AcqRel);
    }
}

/// Shared state common to the producer and consumer views of a ring.
///
/// # Safety
///
/// The pointers here alias shared memory that the kernel and userspace both
/// observe. All accesses to `header` and `elements` go through atomics or
/// are guarded by the single-writer discipline documented on each ring
/// operation.
struct RingInner {
    header: NonNull<RingHeader>,
    elements: NonNull<u8>,
    mask: u32,
    size: u32,
    stride: u32,
    cached_producer: u32,
    cached_consumer: u32,
}

// SAFETY: `RingInner` is only ever mutated through `&mut self` on the owning
// producer/consumer wrapper; the shared memory it points at is designed for
// concurrent cross-process access via the atomics in `RingHeader`.
unsafe impl Send for RingInner {}

impl fmt::Debug for RingInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingInner")
            .field("mask", &self.mask)
            .field("size", &self.size)
            .field("stride", &self.stride)
            .field("cached_producer", &self.cached_producer)
            .field("cached_consumer", &self.cached_consumer)
            .finish()
    }
}

impl RingInner {
    /// # Safety
    ///
    /// `header` must point to a valid `RingHeader` immediately followed by
    /// `count * stride` bytes of descriptor storage, all of it valid for the
    /// lifetime of the ring and not mutably aliased outside the documented
    /// single-writer discipline. `count` must be a power of two.
    unsafe fn new(header: NonNull<RingHeader>, stride: u32, count: u32) -> Self {
        debug_assert!(count.is_power_of_two());
        let elements = header.cast::<u8>().as_ptr().add(core::mem::size_of::<RingHeader>());
        let header_ref = header.as_ref();
        RingInner {
            header,
            elements: NonNull::new_unchecked(elements),
            mask: count - 1,
            size: count,
            stride,
            cached_producer: header_ref.producer_index.load(Ordering::Relaxed),
            cached_consumer: header_ref.consumer_index.load(Ordering::Relaxed),
        }
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: constructor contract.
        unsafe { self.header.as_ref() }
    }

    /// Element pointer for a raw index. Caller masks by ring size.
    ///
    /// # Safety
    ///
    /// `T` must match the ring's actual element stride and `idx` must refer
    /// to a slot within `[0, size)` once masked.
    unsafe fn element<T>(&self, idx: BufIdx) -> NonNull<T> {
        let slot = (idx.0 & self.mask) as isize;
        let base = self.elements.as_ptr().cast::<T>();
        NonNull::new_unchecked(base.offset(slot))
    }

    fn check_flags(&self) -> u32 {
        self.header().flags.load(Ordering::Acquire)
    }

    /// Install the first error on this ring; later calls are no-ops (spec §4.1).
    fn set_error(&self, error: RingError) {
        let header = self.header();
        // First-writer-wins: only the caller that manages to move `reserved`
        // from `NoError` to a real code gets to also raise the flag and log.
        let code = error as u32;
        if header
            .reserved
            .compare_exchange(
                RingError::NoError as u32,
                code,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            header.flags.fetch_or(ring_flags::ERROR, Ordering::AcqRel);
            // Only the call that actually installs the first error logs;
            // later no-op calls (gated by the `compare_exchange` above)
            // never flood the log under a sustained-error workload
            // (SPEC_FULL.md §4.1 ambient addition).
            log::trace!("ring sealed with error {:?}", error);
        }
    }

    fn error(&self) -> RingError {
        if self.header().flags.load(Ordering::Acquire) & ring_flags::ERROR == 0 {
            RingError::NoError
        } else {
            RingError::from_u32(self.header().reserved.load(Ordering::Acquire))
        }
    }

    /// OR `bits` into the flags word (e.g. `NEED_POKE`, spec §4.6/§4.4).
    fn set_flags(&self, bits: u32) {
        self.header().flags.fetch_or(bits, Ordering::AcqRel);
    }

    /// Clear `bits` from the flags word.
    fn clear_flags(&self, bits: u32) {
        self.header().flags.fetch_and(!bits, Ordering::AcqRel);
    }
}

/// A producer ring: userspace (or the datapath, depending on ring kind)
/// maintains the write head, the peer maintains the read tail.
#[derive(Debug)]
pub struct RingProd {
    inner: RingInner,
}

/// A consumer ring: the peer maintains the write head, this side maintains
/// the read tail.
#[derive(Debug)]
pub struct RingCons {
    inner: RingInner,
}

impl RingProd {
    /// # Safety
    ///
    /// See [`RingInner::new`].
    pub unsafe fn new(header: NonNull<RingHeader>, stride: u32, count: u32) -> Self {
        RingProd {
            inner: RingInner::new(header, stride, count),
        }
    }

    /// # Safety
    ///
    /// `T` must match this ring's element type and `idx` must come from a
    /// successful `reserve` on this same ring.
    pub unsafe fn element<T>(&self, idx: BufIdx) -> NonNull<T> {
        self.inner.element(idx)
    }

    pub fn check_flags(&self) -> u32 {
        self.inner.check_flags()
    }

    pub fn set_error(&self, error: RingError) {
        self.inner.set_error(error)
    }

    pub fn error(&self) -> RingError {
        self.inner.error()
    }

    /// Set one or more flag bits on the ring header (e.g. `NEED_POKE` at
    /// initialization, spec §4.4 "TX ring is initialized with `NEED_POKE`
    /// set").
    pub fn set_flags(&self, bits: u32) {
        self.inner.set_flags(bits)
    }

    /// Clear one or more flag bits on the ring header.
    pub fn clear_flags(&self, bits: u32) {
        self.inner.clear_flags(bits)
    }

    /// Query for up to `nb` free entries, refreshing the cached consumer
    /// head if the fast path under-counts.
    pub fn count_free(&mut self, nb: u32) -> u32 {
        let free = self.inner.cached_consumer.wrapping_sub(self.inner.cached_producer);
        if free >= nb {
            return free;
        }
        self.inner.cached_consumer = self.inner.header().consumer_index.load(Ordering::Acquire);
        self.inner.cached_consumer = self.inner.cached_consumer.wrapping_add(self.inner.size);
        self.inner.cached_consumer.wrapping_sub(self.inner.cached_producer)
    }

    /// Prepare to produce up to `nb` entries without publishing them yet.
    /// Returns the number actually reserved (`0` if fewer than `nb` are
    /// free) and writes the base index into `idx`.
    pub fn reserve(&mut self, nb: u32, idx: &mut BufIdx) -> u32 {
        if self.count_free(nb) < nb {
            return 0;
        }
        *idx = BufIdx(self.inner.cached_producer);
        self.inner.cached_producer = self.inner.cached_producer.wrapping_add(nb);
        nb
    }

    /// Undo part or all of a previous `reserve`.
    pub fn cancel(&mut self, nb: u32) {
        self.inner.cached_producer = self.inner.cached_producer.wrapping_sub(nb);
    }

    /// Publish `nb` previously reserved entries to the peer (release fence).
    pub fn submit(&mut self, nb: u32) {
        let header = self.inner.header();
        let cur = header.producer_index.load(Ordering::Relaxed);
        header.producer_index.store(cur.wrapping_add(nb), Ordering::Release);
    }

    pub fn producer_index(&self) -> u32 {
        self.inner.header().producer_index.load(Ordering::Relaxed)
    }
}

impl RingCons {
    /// # Safety
    ///
    /// See [`RingInner::new`].
    pub unsafe fn new(header: NonNull<RingHeader>, stride: u32, count: u32) -> Self {
        RingCons {
            inner: RingInner::new(header, stride, count),
        }
    }

    /// # Safety
    ///
    /// `T` must match this ring's element type and `idx` must come from a
    /// successful `peek` on this same ring.
    pub unsafe fn element<T>(&self, idx: BufIdx) -> NonNull<T> {
        self.inner.element(idx)
    }

    pub fn check_flags(&self) -> u32 {
        self.inner.check_flags()
    }

    pub fn set_error(&self, error: RingError) {
        self.inner.set_error(error)
    }

    pub fn error(&self) -> RingError {
        self.inner.error()
    }

    /// Set one or more flag bits on the ring header (spec §4.6 "Need-poke
    /// policy": "set `NEED_POKE` then re-check for input").
    pub fn set_flags(&self, bits: u32) {
        self.inner.set_flags(bits)
    }

    /// Clear one or more flag bits on the ring header (spec §4.6: "the
    /// datapath must clear it before dequeuing input").
    pub fn clear_flags(&self, bits: u32) {
        self.inner.clear_flags(bits)
    }

    /// Number of entries available to consume, up to `nb`, refreshing the
    /// cached producer head (acquire fence) when our view is stale.
    pub fn count_available(&mut self, nb: u32) -> u32 {
        let mut available = self.inner.cached_producer.wrapping_sub(self.inner.cached_consumer);
        if available == 0 {
            self.inner.cached_producer = self.inner.header().producer_index.load(Ordering::Acquire);
            available = self.inner.cached_producer.wrapping_sub(self.inner.cached_consumer);
        }
        available.min(nb)
    }

    /// Peek at up to `nb` available entries without releasing them yet.
    /// Returns the number actually available and writes the base index.
    pub fn peek(&mut self, nb: u32, idx: &mut BufIdx) -> u32 {
        let count = self.count_available(nb);
        if count == 0 {
            return 0;
        }
        *idx = BufIdx(self.inner.cached_consumer);
        self.inner.cached_consumer = self.inner.cached_consumer.wrapping_add(count);
        count
    }

    /// Undo part or all of a previous `peek`.
    pub fn cancel(&mut self, nb: u32) {
        self.inner.cached_consumer = self.inner.cached_consumer.wrapping_sub(nb);
    }

    /// Release `nb` previously peeked entries back to the peer (relaxed
    /// store on the consumer head; the corresponding acquire happens on the
    /// peer's next `count_free`/`count_available`).
    pub fn release(&mut self, nb: u32) {
        let header = self.inner.header();
        let cur = header.consumer_index.load(Ordering::Relaxed);
        header.consumer_index.store(cur.wrapping_add(nb), Ordering::Release);
    }

    pub fn consumer_index(&self) -> u32 {
        self.inner.header().consumer_index.load(Ordering::Relaxed)
    }
}

/// `XSK_BUFFER_DESCRIPTOR`: an RX/TX descriptor (spec §3).
///
/// The high 16 bits of `address` encode a per-descriptor offset, the low 48
/// bits the UMEM-relative chunk base.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct BufferDescriptor {
    pub address: u64,
    pub length: u32,
    pub reserved: u32,
}

impl BufferDescriptor {
    const OFFSET_SHIFT: u32 = 48;
    const BASE_MASK: u64 = (1u64 << Self::OFFSET_SHIFT) - 1;

    pub fn new(base: u64, offset: u16, length: u32) -> Self {
        debug_assert!(base <= Self::BASE_MASK);
        BufferDescriptor {
            address: base | ((offset as u64) << Self::OFFSET_SHIFT),
            length,
            reserved: 0,
        }
    }

    pub fn base(&self) -> u64 {
        self.address & Self::BASE_MASK
    }

    pub fn offset(&self) -> u16 {
        (self.address >> Self::OFFSET_SHIFT) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::alloc::{alloc_zeroed, dealloc, Layout};

    struct TestRing {
        ptr: NonNull<u8>,
        layout: Layout,
    }

    impl TestRing {
        fn new(count: u32, stride: u32) -> Self {
            let size = core::mem::size_of::<RingHeader>() + (count as usize) * (stride as usize);
            let layout = Layout::from_size_align(size, 8).unwrap();
            let ptr = unsafe { alloc_zeroed(layout) };
            TestRing {
                ptr: NonNull::new(ptr).unwrap(),
                layout,
            }
        }

        fn header(&self) -> NonNull<RingHeader> {
            self.ptr.cast()
        }
    }

    impl Drop for TestRing {
        fn drop(&mut self) {
            unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
        }
    }

    #[test]
    fn reserve_submit_peek_release_roundtrip() {
        let ring = TestRing::new(8, core::mem::size_of::<u64>() as u32);
        let mut prod = unsafe { RingProd::new(ring.header(), 8, 8) };
        let mut cons = unsafe { RingCons::new(ring.header(), 8, 8) };

        let mut idx = BufIdx(0);
        assert_eq!(prod.reserve(4, &mut idx), 4);
        for i in 0..4u64 {
            unsafe { *prod.element::<u64>(BufIdx(idx.0 + i as u32)).as_ptr() = i * 10 };
        }
        prod.submit(4);

        let mut cidx = BufIdx(0);
        assert_eq!(cons.peek(4, &mut cidx), 4);
        for i in 0..4u64 {
            let v = unsafe { *cons.element::<u64>(BufIdx(cidx.0 + i as u32)).as_ptr() };
            assert_eq!(v, i * 10);
        }
        cons.release(4);

        assert_eq!(cons.peek(1, &mut cidx), 0);
    }

    #[test]
    fn reserve_fails_when_ring_full() {
        let ring = TestRing::new(4, core::mem::size_of::<u64>() as u32);
        let mut prod = unsafe { RingProd::new(ring.header(), 8, 4) };

        let mut idx = BufIdx(0);
        assert_eq!(prod.reserve(4, &mut idx), 4);
        assert_eq!(prod.reserve(1, &mut idx), 0);
        prod.cancel(4);
        assert_eq!(prod.reserve(4, &mut idx), 4);
    }

    #[test]
    fn set_error_is_sticky_first_writer_wins() {
        let ring = TestRing::new(4, core::mem::size_of::<u64>() as u32);
        let prod = unsafe { RingProd::new(ring.header(), 8, 4) };

        assert_eq!(prod.error(), RingError::NoError);
        prod.set_error(RingError::InvalidRing);
        assert_eq!(prod.check_flags() & ring_flags::ERROR, ring_flags::ERROR);
        // Second call must not override a differing error code, because the
        // flags bit is already latched and is the sole gate.
        prod.set_error(RingError::InterfaceDetach);
        assert_eq!(prod.check_flags() & ring_flags::ERROR, ring_flags::ERROR);
    }

    #[test]
    fn buffer_descriptor_packs_base_and_offset() {
        let d = BufferDescriptor::new(0x1000, 256, 64);
        assert_eq!(d.base(), 0x1000);
        assert_eq!(d.offset(), 256);
        assert_eq!(d.length, 64);
    }

    #[test]
    fn set_and_clear_flags_round_trip() {
        let ring = TestRing::new(4, core::mem::size_of::<u64>() as u32);
        let prod = unsafe { RingProd::new(ring.header(), 8, 4) };

        prod.set_flags(ring_flags::NEED_POKE);
        assert_eq!(prod.check_flags() & ring_flags::NEED_POKE, ring_flags::NEED_POKE);
        prod.clear_flags(ring_flags::NEED_POKE);
        assert_eq!(prod.check_flags() & ring_flags::NEED_POKE, 0);
    }
}
