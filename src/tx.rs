//! TX pipeline (spec §4.6).
//!
//! Grounded on `original_source/core/sys/xsk.c`'s `XskTxReapCompletion` for
//! the in-order/out-of-order completion split and the outstanding-frame
//! drain-to-zero detach signal, and on `ring.rs`'s `count_free`/`reserve`
//! pair for the desired-count computation
//! (`min(xdp_tx_free, xsk_tx_pending, xsk_completion_free - outstanding)`).

use crate::bounce::BounceBuffer;
use crate::error::{XskError, XskResult};
use crate::ring::{ring_flags, BufIdx, BufferDescriptor, RingCons, RingError, RingProd};
use crate::stats::XskStatistics;
use crate::umem::Umem;

/// Whether NIC completions for this TX queue arrive in the order frames were
/// submitted, or out of order via a dedicated completion ring (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    InOrder,
    OutOfOrder,
}

/// The capability set read once at TX-queue bind time (spec §4.6 "fail if
/// `length > min(max_buffer_length, max_frame_length)`").
#[derive(Debug, Clone, Copy)]
pub struct TxQueueCaps {
    pub max_buffer_length: u32,
    pub max_frame_length: u32,
    pub completion_mode: CompletionMode,
}

/// Tracks in-flight TX frames for one socket's TX binding.
pub struct TxPipeline {
    caps: TxQueueCaps,
    outstanding_frames: u64,
}

impl TxPipeline {
    pub fn new(caps: TxQueueCaps) -> Self {
        TxPipeline {
            caps,
            outstanding_frames: 0,
        }
    }

    pub fn outstanding_frames(&self) -> u64 {
        self.outstanding_frames
    }

    /// Reap completions from the XDP side and publish UMEM addresses onto
    /// the socket's completion ring (spec §4.6 "Completion reap").
    ///
    /// `xdp_completed` is the set of raw UMEM-relative addresses (already
    /// translated from whichever mapping extension — VA/LA/MDL — is enabled;
    /// that translation happens in the platform binding, not here) the XDP
    /// TX queue reports complete this round.
    ///
    /// Returns `true` if outstanding frames dropped to zero, signaling that
    /// a pending detach-flush should complete.
    pub fn reap_completions(
        &mut self,
        xdp_completed: &[u64],
        bounce: Option<&BounceBuffer>,
        umem: &Umem,
        completion: &mut RingProd,
    ) -> bool {
        if xdp_completed.is_empty() {
            return false;
        }

        let mut base_idx = BufIdx(0);
        let reserved = completion.reserve(xdp_completed.len() as u32, &mut base_idx);
        if (reserved as usize) < xdp_completed.len() {
            completion.set_error(RingError::InvalidRing);
            return false;
        }

        for (i, &addr) in xdp_completed.iter().enumerate() {
            if let Some(bounce) = bounce {
                bounce.release(umem, addr);
            }
            // SAFETY: `base_idx + i` was reserved above; `u64` matches the
            // completion ring's element stride.
            unsafe {
                *completion
                    .element::<u64>(BufIdx(base_idx.0 + i as u32))
                    .as_ptr() = addr;
            }
        }

        completion.submit(xdp_completed.len() as u32);
        self.outstanding_frames = self.outstanding_frames.saturating_sub(xdp_completed.len() as u64);
        self.outstanding_frames == 0
    }

    /// Enqueue as many TX descriptors as fit within `min(xdp_tx_free,
    /// xsk_tx_pending, xsk_completion_free - outstanding)` (spec §4.6
    /// "Enqueue").
    ///
    /// `submit_to_xdp` is called once per accepted descriptor with the
    /// validated, possibly-bounced `(umem_relative_base, offset, length)`
    /// triple; it is the platform binding's job to build the actual XDP
    /// buffer extensions (VA/LA/MDL) from that triple and advance the XDP
    /// frame ring producer.
    ///
    /// `xdp_poll_handle_is_null` mirrors spec §4.6's "if the XDP poll handle
    /// is null and at least one frame is outstanding and `NEED_POKE` is
    /// currently set... atomically clear it" — pass `true` when the socket
    /// holds no polling backchannel for this direction (`PollMode::Default`
    /// with no synchronous drive), `false` under `Socket`/`Busy` poll mode.
    pub fn enqueue(
        &mut self,
        tx: &mut RingCons,
        completion_free: u32,
        xdp_tx_free: u32,
        bounce: Option<&BounceBuffer>,
        umem: &Umem,
        stats: &XskStatistics,
        xdp_poll_handle_is_null: bool,
        mut submit_to_xdp: impl FnMut(u64, u32, u32),
    ) -> XskResult<u32> {
        let free_budget = completion_free as i64 - self.outstanding_frames as i64;
        if free_budget < 0 {
            tx.set_error(RingError::InvalidRing);
            return Err(XskError::InvalidRing);
        }

        let mut tx_idx = BufIdx(0);
        let pending = tx.count_available(u32::MAX);
        let desired = xdp_tx_free.min(pending).min(free_budget as u32);
        if desired == 0 {
            return Ok(0);
        }

        let taken = tx.peek(desired, &mut tx_idx);
        let mut produced = 0u32;

        for i in 0..taken {
            // SAFETY: `tx_idx + i` was peeked above; `BufferDescriptor`
            // matches the TX ring's element stride.
            let desc = unsafe { *tx.element::<BufferDescriptor>(BufIdx(tx_idx.0 + i)).as_ptr() };
            let base = desc.base();
            let offset = desc.offset() as u32;
            let length = desc.length;

            if length == 0
                || !umem.range_in_bounds(base, offset, length)
                || length > self.caps.max_buffer_length.min(self.caps.max_frame_length)
            {
                stats.inc_tx_invalid_descriptors();
                continue;
            }

            let payload_base = match bounce {
                Some(bounce) => match bounce.bounce(umem, base, offset, length) {
                    Ok(_) => base,
                    Err(_) => {
                        stats.inc_tx_invalid_descriptors();
                        continue;
                    }
                },
                None => base,
            };

            submit_to_xdp(payload_base, offset, length);
            produced += 1;
        }

        tx.release(taken);
        self.outstanding_frames += produced as u64;

        if produced > 0
            && xdp_poll_handle_is_null
            && self.outstanding_frames > 0
            && tx.check_flags() & ring_flags::NEED_POKE != 0
        {
            tx.clear_flags(ring_flags::NEED_POKE);
        }

        Ok(produced)
    }

    /// Two-phase need-poke policy (spec §4.6 "Need-poke policy"): call with
    /// no more input available; if the ring was not already armed, this
    /// arms `NEED_POKE` and returns `true` so the caller re-checks for input
    /// before truly going idle (the two-phase arm-then-check sequence spec
    /// §4.6 requires to avoid losing a concurrently enqueued wakeup).
    pub fn arm_need_poke_if_idle(&mut self, tx: &mut RingCons) -> bool {
        if self.outstanding_frames != 0 {
            return false;
        }
        if tx.count_available(1) != 0 {
            return false;
        }
        tx.set_flags(ring_flags::NEED_POKE);
        true
    }
}
