//! Property tests for the shared-ring and TX-completion invariants spec §8
//! calls out for randomized checking: ring monotonicity (invariant 1) and
//! completion accounting (invariant 3).

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::Arc;

use proptest::prelude::*;

use xsk_datapath_core::config::UmemReg;
use xsk_datapath_core::platform::fake::FakeProcessToken;
use xsk_datapath_core::ring::{BufIdx, BufferDescriptor, RingCons, RingHeader, RingProd};
use xsk_datapath_core::stats::XskStatistics;
use xsk_datapath_core::tx::{CompletionMode, TxPipeline, TxQueueCaps};
use xsk_datapath_core::umem::Umem;

/// A heap-backed ring, freed on drop, for tests that don't go through
/// `Socket` (which owns its own `RingStorage`).
struct OwnedRing {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl OwnedRing {
    fn new(count: u32, stride: u32) -> Self {
        let size = std::mem::size_of::<RingHeader>() + count as usize * stride as usize;
        let layout = Layout::from_size_align(size, 8).unwrap();
        let ptr = unsafe { alloc_zeroed(layout) };
        OwnedRing {
            ptr: NonNull::new(ptr).unwrap(),
            layout,
        }
    }

    fn header(&self) -> NonNull<RingHeader> {
        self.ptr.cast()
    }
}

impl Drop for OwnedRing {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

const RING_SIZE: u32 = 8;
const STRIDE: u32 = 8;

#[derive(Debug, Clone, Copy)]
enum RingOp {
    Produce(u32),
    Consume(u32),
}

fn ring_op_strategy() -> impl Strategy<Value = RingOp> {
    prop_oneof![(0u32..=6).prop_map(RingOp::Produce), (0u32..=6).prop_map(RingOp::Consume),]
}

proptest! {
    /// Invariant 1 (spec §8): for every ring, `producer_index >= consumer_index`
    /// mod 2^32, and neither index ever decreases, across any interleaving of
    /// (possibly over-budget) reserve/submit and peek/release calls.
    #[test]
    fn ring_monotonicity_holds_across_random_ops(ops in proptest::collection::vec(ring_op_strategy(), 0..200)) {
        let ring = OwnedRing::new(RING_SIZE, STRIDE);
        let mut prod = unsafe { RingProd::new(ring.header(), STRIDE, RING_SIZE) };
        let mut cons = unsafe { RingCons::new(ring.header(), STRIDE, RING_SIZE) };

        let mut last_producer = prod.producer_index();
        let mut last_consumer = cons.consumer_index();

        for op in ops {
            match op {
                RingOp::Produce(n) => {
                    let mut idx = BufIdx::default();
                    let got = prod.reserve(n, &mut idx);
                    if got > 0 {
                        prod.submit(got);
                    }
                }
                RingOp::Consume(n) => {
                    let mut idx = BufIdx::default();
                    let got = cons.peek(n, &mut idx);
                    if got > 0 {
                        cons.release(got);
                    }
                }
            }

            let producer = prod.producer_index();
            let consumer = cons.consumer_index();

            // Neither index moves backward: the forward distance from the
            // last observation is small, not a huge wrap-around delta.
            prop_assert!(producer.wrapping_sub(last_producer) < (1u32 << 31));
            prop_assert!(consumer.wrapping_sub(last_consumer) < (1u32 << 31));
            // producer never runs more than a ring's worth ahead of consumer.
            prop_assert!(producer.wrapping_sub(consumer) <= RING_SIZE);

            last_producer = producer;
            last_consumer = consumer;
        }
    }
}

const CHUNK_SIZE: u32 = 64;
const CHUNKS: u32 = 16;
const COMPLETION_RING_SIZE: u32 = 8;
const TX_RING_SIZE: u32 = 8;

fn make_umem() -> Umem {
    let total = CHUNK_SIZE as u64 * CHUNKS as u64;
    let layout = Layout::from_size_align(total as usize, 8).unwrap();
    let ptr = unsafe { alloc_zeroed(layout) };
    Umem::register(
        UmemReg {
            address: ptr as usize,
            total_size: total,
            chunk_size: CHUNK_SIZE,
            headroom: 0,
        },
        Arc::new(FakeProcessToken),
    )
    .unwrap()
}

#[derive(Debug, Clone, Copy)]
enum TxOp {
    Enqueue(u32),
    Complete(u32),
    DrainCompletions(u32),
}

fn tx_op_strategy() -> impl Strategy<Value = TxOp> {
    prop_oneof![
        (0u32..=4).prop_map(TxOp::Enqueue),
        (0u32..=4).prop_map(TxOp::Complete),
        (0u32..=4).prop_map(TxOp::DrainCompletions),
    ]
}

proptest! {
    /// Invariant 3 (spec §8): at all times, `outstanding_frames +
    /// completion_producer_count - completion_consumer_count <=
    /// completion_ring.size`, across any interleaving of posting TX
    /// descriptors, reaping NIC completions (in order), and the application
    /// draining its completion ring.
    #[test]
    fn completion_accounting_stays_within_ring_capacity(ops in proptest::collection::vec(tx_op_strategy(), 0..200)) {
        let umem = make_umem();
        let tx_ring = OwnedRing::new(TX_RING_SIZE, std::mem::size_of::<BufferDescriptor>() as u32);
        let completion_ring = OwnedRing::new(COMPLETION_RING_SIZE, std::mem::size_of::<u64>() as u32);

        let mut tx_prod = unsafe { RingProd::new(tx_ring.header(), std::mem::size_of::<BufferDescriptor>() as u32, TX_RING_SIZE) };
        let mut tx_cons = unsafe { RingCons::new(tx_ring.header(), std::mem::size_of::<BufferDescriptor>() as u32, TX_RING_SIZE) };
        let mut completion_prod = unsafe { RingProd::new(completion_ring.header(), 8, COMPLETION_RING_SIZE) };
        let mut completion_cons = unsafe { RingCons::new(completion_ring.header(), 8, COMPLETION_RING_SIZE) };

        let mut pipeline = TxPipeline::new(TxQueueCaps {
            max_buffer_length: CHUNK_SIZE,
            max_frame_length: CHUNK_SIZE,
            completion_mode: CompletionMode::InOrder,
        });
        let stats = XskStatistics::new();

        let mut in_flight: VecDeque<u64> = VecDeque::new();
        let mut next_chunk: u32 = 0;

        for op in ops {
            match op {
                TxOp::Enqueue(n) => {
                    let free = tx_prod.count_free(n);
                    let to_post = n.min(free);
                    if to_post > 0 {
                        let mut idx = BufIdx::default();
                        assert_eq!(tx_prod.reserve(to_post, &mut idx), to_post);
                        for i in 0..to_post {
                            let base = (next_chunk % CHUNKS) as u64 * CHUNK_SIZE as u64;
                            next_chunk = next_chunk.wrapping_add(1);
                            unsafe {
                                *tx_prod.element::<BufferDescriptor>(BufIdx(idx.0 + i)).as_ptr() =
                                    BufferDescriptor::new(base, 0, 32);
                            }
                        }
                        tx_prod.submit(to_post);
                    }

                    let completion_free = completion_prod.count_free(u32::MAX);
                    let produced = pipeline
                        .enqueue(&mut tx_cons, completion_free, u32::MAX, None, &umem, &stats, true, |base, _, _| {
                            in_flight.push_back(base);
                        })
                        .unwrap_or(0);
                    let _ = produced;
                }
                TxOp::Complete(n) => {
                    let take = (n as usize).min(in_flight.len());
                    if take > 0 {
                        let addrs: Vec<u64> = (0..take).map(|_| in_flight.pop_front().unwrap()).collect();
                        pipeline.reap_completions(&addrs, None, &umem, &mut completion_prod);
                    }
                }
                TxOp::DrainCompletions(n) => {
                    let mut idx = BufIdx::default();
                    let got = completion_cons.peek(n, &mut idx);
                    if got > 0 {
                        completion_cons.release(got);
                    }
                }
            }

            let pending_in_ring =
                completion_prod.producer_index().wrapping_sub(completion_cons.consumer_index()) as u64;
            prop_assert!(pipeline.outstanding_frames() + pending_in_ring <= COMPLETION_RING_SIZE as u64);
        }
    }
}
