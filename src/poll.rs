//! Poll-mode control (spec §4.7).
//!
//! Grounded on `original_source/core/sys/xsk.c`'s `XSK_POLL_MODE` and the
//! `PollLock`/`PollWaiters`/`PollRequested` fields that serialize a socket's
//! own poll invocation against the NDIS polling backchannel's concurrent
//! invocation from a different CPU. The push-lock-plus-waiter-counter shape
//! is reimplemented here with `spin::RwLock` + `AtomicU32`, the way the
//! teacher crate already reaches for `spin` to arbitrate shared UMEM access
//! in `xsk/umem.rs`.

use alloc::sync::Arc;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::RwLock;

pub use crate::config::PollMode;
use crate::platform::PollBackchannel;
use crate::ring::{ring_flags, RingHeader};

/// Quota of socket-poll-loop iterations per invocation (SPEC_FULL.md §11,
/// resolution of open question 3: "a named constant, not a configurable
/// parameter").
pub const SOCKET_POLL_QUOTA: u32 = 256;

/// Serializes a socket's own call into the NDIS polling backchannel against
/// a concurrent invocation arriving from the backchannel itself, while
/// letting independent sockets poll in parallel.
///
/// `exclusion` is held shared by callers draining the backchannel and taken
/// exclusively only when the mode itself is being changed, mirroring the
/// original's `PollLock` rw-exclusion between "doing I/O" and "changing poll
/// state".
pub struct PollModeController {
    backchannel: Arc<dyn PollBackchannel>,
    mode: RwLock<PollMode>,
    waiters: AtomicU32,
}

impl PollModeController {
    pub fn new(backchannel: Arc<dyn PollBackchannel>) -> Self {
        PollModeController {
            backchannel,
            mode: RwLock::new(PollMode::Default),
            waiters: AtomicU32::new(0),
        }
    }

    pub fn mode(&self) -> PollMode {
        *self.mode.read()
    }

    /// Change the poll mode (spec §4.4 `set_poll_mode`). Takes the lock
    /// exclusively so no concurrent `socket_poll` observes a torn mode
    /// transition, toggles the backchannel's busy-reference accordingly, and
    /// drives the per-mode `NEED_POKE` transition spec §4.7 requires:
    /// entering `Socket` mode marks `NEED_POKE` on whichever of the RX/TX
    /// ring headers are bound ("so the interface will not self-drive");
    /// entering `Busy` mode clears it on both ("the interface polls
    /// continuously"). `Default` leaves the flag alone — it is whatever the
    /// datapath's own need-poke policy (spec §4.6) last left it at.
    pub fn set_mode(&self, mode: PollMode, rx_ring: Option<NonNull<RingHeader>>, tx_ring: Option<NonNull<RingHeader>>) {
        let mut guard = self.mode.write();
        if *guard == mode {
            return;
        }
        self.backchannel.set_busy(mode == PollMode::Busy);
        match mode {
            PollMode::Socket => {
                // SAFETY: callers pass a header belonging to a ring they
                // still hold bound for the lifetime of this call.
                if let Some(rx) = rx_ring {
                    unsafe { rx.as_ref() }.set_flags(ring_flags::NEED_POKE);
                }
                if let Some(tx) = tx_ring {
                    unsafe { tx.as_ref() }.set_flags(ring_flags::NEED_POKE);
                }
            }
            PollMode::Busy => {
                if let Some(rx) = rx_ring {
                    unsafe { rx.as_ref() }.clear_flags(ring_flags::NEED_POKE);
                }
                if let Some(tx) = tx_ring {
                    unsafe { tx.as_ref() }.clear_flags(ring_flags::NEED_POKE);
                }
            }
            PollMode::Default => {}
        }
        *guard = mode;
    }

    /// Run the socket-poll loop: repeatedly invoke the backchannel with the
    /// quota budget until either the quota is exhausted or a full quota's
    /// worth of work was not consumed (meaning the queue ran dry), matching
    /// the `XskPoke`-driven socket-poll shape in the original, which stops
    /// as soon as a round does less than a full quota of work.
    ///
    /// Returns `true` if any I/O the caller cares about became ready.
    pub fn socket_poll(&self, rx_quota: u32, tx_quota: u32) -> bool {
        let _guard = self.mode.read();
        self.waiters.fetch_add(1, Ordering::AcqRel);
        let mut became_ready = false;
        let mut remaining = SOCKET_POLL_QUOTA;
        while remaining > 0 {
            let this_round_rx = rx_quota.min(remaining);
            let this_round_tx = tx_quota.min(remaining);
            if self.backchannel.poll_invoke(this_round_rx, this_round_tx) {
                became_ready = true;
            }
            if this_round_rx < remaining && this_round_tx < remaining {
                break;
            }
            remaining = remaining.saturating_sub(this_round_rx.max(this_round_tx).max(1));
        }
        self.waiters.fetch_sub(1, Ordering::AcqRel);
        became_ready
    }

    pub fn waiter_count(&self) -> u32 {
        self.waiters.load(Ordering::Acquire)
    }
}

#[cfg(all(test, feature = "test-util"))]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use spin::Mutex;

    struct CountingBackchannel {
        invocations: Mutex<u32>,
        busy: Mutex<bool>,
    }

    impl Default for CountingBackchannel {
        fn default() -> Self {
            CountingBackchannel {
                invocations: Mutex::new(0),
                busy: Mutex::new(false),
            }
        }
    }

    impl PollBackchannel for CountingBackchannel {
        fn poll_invoke(&self, _rx_quota: u32, _tx_quota: u32) -> bool {
            *self.invocations.lock() += 1;
            false
        }

        fn set_busy(&self, busy: bool) {
            *self.busy.lock() = busy;
        }
    }

    #[test]
    fn set_mode_toggles_backchannel_busy_ref() {
        let chan = Arc::new(CountingBackchannel::default());
        let ctl = PollModeController::new(chan.clone());
        assert_eq!(ctl.mode(), PollMode::Default);
        ctl.set_mode(PollMode::Busy, None, None);
        assert!(*chan.busy.lock());
        ctl.set_mode(PollMode::Default, None, None);
        assert!(!*chan.busy.lock());
    }

    #[test]
    fn socket_poll_stops_once_a_round_underflows_quota() {
        let chan = Arc::new(CountingBackchannel::default());
        let ctl = PollModeController::new(chan.clone());
        ctl.socket_poll(4, 4);
        assert_eq!(*chan.invocations.lock(), 1);
        assert_eq!(ctl.waiter_count(), 0);
    }
}
