//! Configuration and control-surface types (spec §3, §4.4, §6, §9).
//!
//! Registry-driven globals (`XskDisableTxBounce`, `XskRxZeroCopy` in the
//! original kernel source) are replaced by [`XskGlobalConfig`], an explicit
//! struct passed in at [`crate::socket::Socket::create`] time, per the
//! redesign advice in spec §9.

use core::num::NonZeroU32;

/// UMEM registration parameters (`XSK_UMEM_REG` in the external interface).
///
/// `address` is an opaque handle to the caller's locked buffer as seen by
/// this crate: the platform layer (not this struct) is responsible for the
/// actual page-locking/MDL/mapping dance (spec §4.2); this struct only
/// carries the bounds the datapath validates against.
#[derive(Debug, Clone, Copy)]
pub struct UmemReg {
    /// Opaque base address of the registered region, as handed back by the
    /// platform mapping step.
    pub address: usize,
    /// Total size of the region in bytes, prior to truncation.
    pub total_size: u64,
    /// Size of one chunk in bytes. Must be non-zero.
    pub chunk_size: u32,
    /// Reserved bytes at the start of every chunk. Must be `<= chunk_size`
    /// and `<= 64 KiB`.
    pub headroom: u32,
}

/// The four ring kinds a socket may size (spec §3, §4.4 `set_ring_size`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RingKind {
    Rx,
    Tx,
    Fill,
    Completion,
}

/// Bind flags (`XSK_BIND_FLAGS` in the external interface, spec §6).
pub mod bind_flags {
    pub const RX: u32 = 1;
    pub const TX: u32 = 2;
    pub const GENERIC: u32 = 4;
    pub const NATIVE: u32 = 8;
}

/// Notify flags and result flags (`XSK_NOTIFY_FLAGS` / result, spec §4.8, §6).
pub mod notify_flags {
    pub const POKE_RX: u32 = 1;
    pub const POKE_TX: u32 = 2;
    pub const WAIT_RX: u32 = 4;
    pub const WAIT_TX: u32 = 8;
}

pub mod notify_result_flags {
    pub const RX_AVAILABLE: u32 = 1;
    pub const TX_COMP_AVAILABLE: u32 = 2;
}

/// A bind request: exactly one of `{unset, generic, native}` plus at least
/// one of `{rx, tx}` must be set; validated in
/// [`crate::socket::Socket::bind`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BindFlags(pub u32);

impl BindFlags {
    pub fn rx(self) -> bool {
        self.0 & bind_flags::RX != 0
    }

    pub fn tx(self) -> bool {
        self.0 & bind_flags::TX != 0
    }

    pub fn generic(self) -> bool {
        self.0 & bind_flags::GENERIC != 0
    }

    pub fn native(self) -> bool {
        self.0 & bind_flags::NATIVE != 0
    }

    /// `GENERIC` and `NATIVE` are mutually exclusive, and at least one
    /// direction must be requested.
    pub fn is_valid(self) -> bool {
        let mode_bits = self.0 & (bind_flags::GENERIC | bind_flags::NATIVE);
        let exclusive_mode = mode_bits == 0 || mode_bits == bind_flags::GENERIC || mode_bits == bind_flags::NATIVE;
        exclusive_mode && (self.rx() || self.tx())
    }
}

/// Layer/direction/sublayer hook-id triple (spec §4.4, glossary "Hook id").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    L2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubLayer {
    Inspect,
    Inject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookId {
    pub layer: Layer,
    pub direction: Direction,
    pub sublayer: SubLayer,
}

impl HookId {
    /// Default RX hook: `L2/RX/INSPECT`.
    pub const fn default_rx() -> Self {
        HookId {
            layer: Layer::L2,
            direction: Direction::Rx,
            sublayer: SubLayer::Inspect,
        }
    }

    /// Default TX hook: `L2/TX/INJECT`.
    pub const fn default_tx() -> Self {
        HookId {
            layer: Layer::L2,
            direction: Direction::Tx,
            sublayer: SubLayer::Inject,
        }
    }
}

/// The three poll modes of spec §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollMode {
    #[default]
    Default,
    Socket,
    Busy,
}

/// Replaces the original kernel source's process-wide registry values
/// (`XskDisableTxBounce`, `XskRxZeroCopy`) with an explicit configuration
/// object threaded through at socket construction (spec §9 redesign advice).
#[derive(Debug, Clone, Copy, Default)]
pub struct XskGlobalConfig {
    /// When set, TX never bounces even when the lower interface is
    /// generic-mode (normally bounce is mandatory there, spec §3 `BounceBuffer`).
    pub disable_tx_bounce: bool,
    /// When set, the RX pipeline skips the payload copy and trusts that the
    /// XDP RX queue already delivered the payload into the UMEM chunk.
    pub rx_zero_copy: bool,
}

/// A ring size request: must be a power of two (spec §4.4 `set_ring_size`).
#[derive(Debug, Clone, Copy)]
pub struct RingSize(NonZeroU32);

impl RingSize {
    pub fn new(n: u32) -> Option<Self> {
        if n == 0 || !n.is_power_of_two() {
            return None;
        }
        NonZeroU32::new(n).map(RingSize)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}
