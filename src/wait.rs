//! The edge-triggered wakeup primitive underlying `notify`'s wait path
//! (spec §4.8, §5, §9).
//!
//! Spec §9 proposes exactly this shape: "a 64-bit state word encoding
//! `{armed_flags, generation}` and a wake handle. The producer publishes
//! readiness and a single compare-and-swap decides whether to signal."

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use alloc::sync::Arc;

use crate::platform::WakeHandle;

const GENERATION_SHIFT: u32 = 32;

fn pack(armed_flags: u32, generation: u32) -> u64 {
    ((generation as u64) << GENERATION_SHIFT) | armed_flags as u64
}

fn unpack(word: u64) -> (u32, u32) {
    (word as u32, (word >> GENERATION_SHIFT) as u32)
}

/// Tracks which wait conditions are currently armed for a socket, plus a
/// generation counter so an in-flight wait can detect an intervening
/// poll-mode change (spec §4.8: "detect intervening poll-mode change via a
/// snapshot of an internal-wait generation counter and abandon the wait if
/// it changed").
pub struct WaitSlot {
    state: AtomicU64,
    wake: Arc<dyn WakeHandle>,
}

impl WaitSlot {
    pub fn new(wake: Arc<dyn WakeHandle>) -> Self {
        WaitSlot {
            state: AtomicU64::new(0),
            wake,
        }
    }

    /// Current generation, to snapshot before starting a wait.
    pub fn generation(&self) -> u32 {
        unpack(self.state.load(Ordering::Acquire)).1
    }

    /// Arm the given flags for waiting, bumping the generation so any wait
    /// already in flight observes the change on its next check.
    pub fn arm(&self, flags: u32) {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            let (armed, gen) = unpack(cur);
            let next = pack(armed | flags, gen.wrapping_add(1));
            match self
                .state
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Clear all armed flags (called when a wait wakes up, spec §4.8 "on
    /// wake, clear `io_wait_flags`").
    pub fn disarm(&self) {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            let (_, gen) = unpack(cur);
            let next = pack(0, gen);
            match self
                .state
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn armed_flags(&self) -> u32 {
        unpack(self.state.load(Ordering::Acquire)).0
    }

    /// Publish readiness: if any of `ready_flags` is currently armed,
    /// signal the wake handle. This is the single compare-and-swap spec §9
    /// calls for — the CAS lives in [`Self::arm`]/[`Self::disarm`]; this
    /// method is the producer side and only needs a load, since signaling
    /// the wake handle is itself idempotent.
    pub fn signal_if_armed(&self, ready_flags: u32) {
        if self.armed_flags() & ready_flags != 0 {
            self.wake.signal();
        }
    }

    /// Block until signaled or `timeout` elapses. Returns `true` if
    /// signaled before the timeout.
    pub fn wait(&self, timeout: Option<core::time::Duration>) -> bool {
        self.wake.wait(timeout)
    }

    /// Non-blocking readiness check, used by the overlapped `notify` variant
    /// (spec §4.8) to poll without parking the calling thread.
    pub fn poll_ready(&self) -> bool {
        self.wake.wait(Some(core::time::Duration::from_nanos(0)))
    }
}

const OVERLAPPED_PENDING: u32 = 0;
const OVERLAPPED_COMPLETED: u32 = 1;
const OVERLAPPED_CANCELLED: u32 = 2;

/// Token for the overlapped `notify` variant (spec §4.8 "Overlapped variant
/// maps to the same state machine with a completion-port notification; must
/// support cancellation"). Unlike the synchronous `notify` path, an
/// overlapped wait never blocks the calling thread: the caller's own
/// completion-port plumbing (a platform concern, spec §1) is expected to
/// poll [`Socket::poll_overlapped`][crate::socket::Socket::poll_overlapped]
/// once the underlying wake handle becomes ready. This token only exists so
/// [`Socket::cancel_overlapped`][crate::socket::Socket::cancel_overlapped]
/// can atomically race that completion.
pub struct OverlappedWait {
    state: AtomicU32,
    flags: u32,
    generation: u32,
}

impl OverlappedWait {
    pub(crate) fn new(flags: u32, generation: u32) -> Self {
        OverlappedWait {
            state: AtomicU32::new(OVERLAPPED_PENDING),
            flags,
            generation,
        }
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Move `Pending -> Completed`. Returns `true` if this call won the
    /// race against a concurrent [`Self::cancel`].
    pub(crate) fn try_complete(&self) -> bool {
        self.state
            .compare_exchange(OVERLAPPED_PENDING, OVERLAPPED_COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Cancel a pending wait (spec §5 "an overlapped `notify` is cancellable;
    /// the wait is released and the IO completes with a cancel status").
    /// Returns `true` if this call won the race against a concurrent
    /// completion.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(OVERLAPPED_PENDING, OVERLAPPED_CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == OVERLAPPED_CANCELLED
    }

    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::Acquire) == OVERLAPPED_COMPLETED
    }
}

#[cfg(all(test, feature = "test-util"))]
mod tests {
    use super::*;
    use crate::platform::fake::FakeWakeHandle;

    #[test]
    fn arm_bumps_generation_and_or_in_flags() {
        let slot = WaitSlot::new(Arc::new(FakeWakeHandle::default()));
        let g0 = slot.generation();
        slot.arm(0b01);
        assert_eq!(slot.armed_flags(), 0b01);
        assert_ne!(slot.generation(), g0);
        slot.arm(0b10);
        assert_eq!(slot.armed_flags(), 0b11);
    }

    #[test]
    fn disarm_clears_flags_but_keeps_generation() {
        let slot = WaitSlot::new(Arc::new(FakeWakeHandle::default()));
        slot.arm(0b01);
        let g = slot.generation();
        slot.disarm();
        assert_eq!(slot.armed_flags(), 0);
        assert_eq!(slot.generation(), g);
    }

    #[test]
    fn signal_only_wakes_when_armed() {
        let wake = Arc::new(FakeWakeHandle::default());
        let slot = WaitSlot::new(wake.clone());
        slot.signal_if_armed(0b01);
        assert!(!slot.wait(Some(core::time::Duration::from_millis(1))));

        slot.arm(0b01);
        slot.signal_if_armed(0b01);
        assert!(slot.wait(Some(core::time::Duration::from_millis(50))));
    }

    #[test]
    fn overlapped_wait_completes_once() {
        let token = OverlappedWait::new(0b01, 7);
        assert_eq!(token.flags(), 0b01);
        assert_eq!(token.generation(), 7);
        assert!(token.try_complete());
        assert!(token.is_completed());
        // A completed token cannot later be cancelled.
        assert!(!token.cancel());
    }

    #[test]
    fn overlapped_wait_cancel_wins_race_against_completion() {
        let token = OverlappedWait::new(0b10, 1);
        assert!(token.cancel());
        assert!(token.is_cancelled());
        // A cancelled token cannot later be completed.
        assert!(!token.try_complete());
    }
}
