//! Per-socket statistics counters, surfaced through `GET_SOCKOPT`.
//!
//! Every counter is a lock-free `AtomicU64` because the datapath increments
//! these from dispatch-level code and must never block (see spec §5).

use core::sync::atomic::{AtomicU64, Ordering};

/// Statistics accumulated by the RX and TX pipelines of a single socket.
#[derive(Debug, Default)]
pub struct XskStatistics {
    rx_dropped: AtomicU64,
    rx_invalid_descriptors: AtomicU64,
    rx_truncated: AtomicU64,
    tx_invalid_descriptors: AtomicU64,
}

impl XskStatistics {
    pub const fn new() -> Self {
        XskStatistics {
            rx_dropped: AtomicU64::new(0),
            rx_invalid_descriptors: AtomicU64::new(0),
            rx_truncated: AtomicU64::new(0),
            tx_invalid_descriptors: AtomicU64::new(0),
        }
    }

    pub fn rx_dropped(&self) -> u64 {
        self.rx_dropped.load(Ordering::Relaxed)
    }

    pub fn rx_invalid_descriptors(&self) -> u64 {
        self.rx_invalid_descriptors.load(Ordering::Relaxed)
    }

    pub fn rx_truncated(&self) -> u64 {
        self.rx_truncated.load(Ordering::Relaxed)
    }

    pub fn tx_invalid_descriptors(&self) -> u64 {
        self.tx_invalid_descriptors.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_rx_dropped(&self) {
        self.rx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_rx_invalid_descriptors(&self) {
        self.rx_invalid_descriptors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_rx_truncated(&self) {
        self.rx_truncated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_tx_invalid_descriptors(&self) {
        self.tx_invalid_descriptors.fetch_add(1, Ordering::Relaxed);
    }
}
