//! Socket: the per-application XSK handle (spec §3, §4.4).
//!
//! Grounded on `xsk/socket.rs`'s `Socket::new`/`with_shared` for the overall
//! constructor shape (a socket either creates its own underlying resource or
//! shares a peer's) and on `original_source/core/sys/xsk.c`'s `_XSK` struct
//! and `XskIrpDeviceIoControlBind` for the state machine and the
//! bind-dispatches-work-items-then-waits control flow.

pub mod state;

use alloc::sync::Arc;
use core::ptr::NonNull;

use spin::Mutex;

use crate::bounce::BounceBuffer;
use crate::config::{BindFlags, HookId, RingKind, RingSize, UmemReg, XskGlobalConfig};
use crate::error::{XskError, XskResult};
use crate::platform::{BindingWorkQueue, Platform, PollBackchannel, RxQueueHandle, TxQueueHandle};
use crate::poll::{PollMode, PollModeController};
use crate::ring::{RingCons, RingHeader, RingProd};
use crate::stats::XskStatistics;
use crate::umem::Umem;
use crate::wait::{OverlappedWait, WaitSlot};

use state::SocketState;

/// A ring buffer this crate owns directly: a plain heap allocation sized
/// `header + count * stride`. Real page-locking/non-cached-VA mapping is a
/// platform concern out of scope here (spec §4.4 `set_ring_size` describes
/// the mapping step, not the ring algorithm this crate is responsible for).
struct RingStorage {
    ptr: NonNull<u8>,
    layout: alloc::alloc::Layout,
}

impl RingStorage {
    fn new(count: u32, stride: u32) -> XskResult<Self> {
        let size = core::mem::size_of::<RingHeader>() + count as usize * stride as usize;
        let layout = alloc::alloc::Layout::from_size_align(size, 8)
            .map_err(|_| XskError::InvalidParameter("ring size overflow"))?;
        let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            log::warn!("ring allocation failed ({:?}): {} bytes", crate::diag::AllocationTag::Ring, size);
            XskError::NoMemory("ring allocation failed")
        })?;
        Ok(RingStorage { ptr, layout })
    }

    fn header(&self) -> NonNull<RingHeader> {
        self.ptr.cast()
    }
}

impl Drop for RingStorage {
    fn drop(&mut self) {
        unsafe { alloc::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// One direction's bound queue plus the ring pair feeding it.
struct RxBinding {
    queue: Arc<dyn RxQueueHandle>,
    fill: RingStorage,
    rx: RingStorage,
}

struct TxBinding {
    queue: Arc<dyn TxQueueHandle>,
    tx: RingStorage,
    completion: RingStorage,
}

/// Sizes recorded by `set_ring_size`, applied once `bind` allocates the
/// backing storage.
#[derive(Default, Clone, Copy)]
struct RingSizes {
    rx: Option<u32>,
    tx: Option<u32>,
    fill: Option<u32>,
    completion: Option<u32>,
}

const RX_DESC_STRIDE: u32 = core::mem::size_of::<crate::ring::BufferDescriptor>() as u32;
const TX_DESC_STRIDE: u32 = core::mem::size_of::<crate::ring::BufferDescriptor>() as u32;
const FILL_STRIDE: u32 = core::mem::size_of::<u64>() as u32;
const COMPLETION_STRIDE: u32 = core::mem::size_of::<u64>() as u32;

/// A single XSK socket (spec §3, §4.4). Holds its own lock guarding the
/// state machine and ring-size/hook-id configuration, matching the single
/// per-socket spinlock of spec §5.
pub struct Socket {
    platform: Arc<dyn Platform>,
    global_config: XskGlobalConfig,
    inner: Mutex<SocketInner>,
    stats: XskStatistics,
    wait: WaitSlot,
}

struct SocketInner {
    state: SocketState,
    umem: Option<Arc<Umem>>,
    ring_sizes: RingSizes,
    rx_hook: HookId,
    tx_hook: HookId,
    rx_binding: Option<RxBinding>,
    tx_binding: Option<TxBinding>,
    bounce: Option<BounceBuffer>,
    poll: Option<Arc<PollModeController>>,
    if_index: u32,
}

impl Socket {
    /// `create` (spec §4.4): allocates a zeroed socket with default hook ids
    /// and `Unbound` state.
    pub fn create(platform: Arc<dyn Platform>, global_config: XskGlobalConfig) -> Self {
        let wake = platform.new_wake_handle();
        Socket {
            platform,
            global_config,
            inner: Mutex::new(SocketInner {
                state: SocketState::Unbound,
                umem: None,
                ring_sizes: RingSizes::default(),
                rx_hook: HookId::default_rx(),
                tx_hook: HookId::default_tx(),
                rx_binding: None,
                tx_binding: None,
                bounce: None,
                poll: None,
                if_index: 0,
            }),
            stats: XskStatistics::new(),
            wait: WaitSlot::new(wake),
        }
    }

    pub fn state(&self) -> SocketState {
        self.inner.lock().state
    }

    pub fn statistics(&self) -> &XskStatistics {
        &self.stats
    }

    /// `set_umem(reg)` (spec §4.4): only in `Unbound`, only if no UMEM yet
    /// attached.
    pub fn set_umem(&self, reg: UmemReg) -> XskResult<()> {
        let mut inner = self.inner.lock();
        inner.state.require_unbound("set_umem").map_err(|_| XskError::WrongState)?;
        if inner.umem.is_some() {
            return Err(XskError::WrongState);
        }
        let token = self.platform.process_attach_token();
        let umem = Umem::register(reg, token)?;
        if !self.global_config.disable_tx_bounce {
            inner.bounce = Some(BounceBuffer::new(&umem));
        }
        inner.umem = Some(Arc::new(umem));
        Ok(())
    }

    /// Attach a peer socket's already-registered UMEM, incrementing its
    /// reference count (spec §4.4 "shared attach increments the UMEM
    /// reference").
    pub fn set_umem_shared(&self, peer: &Socket) -> XskResult<()> {
        let mut inner = self.inner.lock();
        inner.state.require_unbound("set_umem").map_err(|_| XskError::WrongState)?;
        if inner.umem.is_some() {
            return Err(XskError::WrongState);
        }
        let peer_inner = peer.inner.lock();
        peer_inner.state.require_unbound("set_umem(shared target)").map_err(|_| XskError::InvalidPeer)?;
        let umem = peer_inner.umem.clone().ok_or(XskError::InvalidPeer)?;
        umem.add_ref();
        if !self.global_config.disable_tx_bounce {
            inner.bounce = Some(BounceBuffer::new(&umem));
        }
        inner.umem = Some(umem);
        Ok(())
    }

    /// `set_ring_size(kind, n)` (spec §4.4): only in `Unbound`, `n` must be a
    /// power of two. Recorded here; the actual allocation happens at `bind`
    /// once the enabled directions are known.
    pub fn set_ring_size(&self, kind: RingKind, size: RingSize) -> XskResult<()> {
        let mut inner = self.inner.lock();
        inner.state.require_unbound("set_ring_size").map_err(|_| XskError::WrongState)?;
        let n = size.get();
        match kind {
            RingKind::Rx => inner.ring_sizes.rx = Some(n),
            RingKind::Tx => inner.ring_sizes.tx = Some(n),
            RingKind::Fill => inner.ring_sizes.fill = Some(n),
            RingKind::Completion => inner.ring_sizes.completion = Some(n),
        }
        Ok(())
    }

    /// `set_hook_id(dir, hook)` (spec §4.4): only in `Unbound`.
    pub fn set_hook_id(&self, direction: crate::config::Direction, hook: HookId) -> XskResult<()> {
        let mut inner = self.inner.lock();
        inner.state.require_unbound("set_hook_id").map_err(|_| XskError::WrongState)?;
        match direction {
            crate::config::Direction::Rx => inner.rx_hook = hook,
            crate::config::Direction::Tx => inner.tx_hook = hook,
        }
        Ok(())
    }

    /// `bind(if_index, queue_id, flags)` (spec §4.4). Validates `flags`,
    /// checks the enabled directions' rings are sized, transitions
    /// `Unbound → Binding`, dispatches one work item per enabled direction
    /// onto the interface binding queue, and waits for each completion. On
    /// any failure, already-bound directions are detached and the socket
    /// falls back to `Unbound`.
    pub fn bind(&self, if_index: u32, queue_id: u32, flags: BindFlags) -> XskResult<()> {
        if !flags.is_valid() {
            return Err(XskError::InvalidParameter("bind flags"));
        }

        let mut inner = self.inner.lock();
        if inner.umem.is_none() {
            return Err(XskError::WrongState);
        }
        if flags.rx() && (inner.ring_sizes.rx.is_none() || inner.ring_sizes.fill.is_none()) {
            return Err(XskError::InvalidParameter("RX/FILL ring not sized"));
        }
        if flags.tx() && (inner.ring_sizes.tx.is_none() || inner.ring_sizes.completion.is_none()) {
            return Err(XskError::InvalidParameter("TX/COMPLETION ring not sized"));
        }

        inner.state.begin_bind().map_err(|_| XskError::WrongState)?;
        inner.if_index = if_index;

        let work_queue = self.platform.binding_work_queue();
        let mut rx_ok = true;
        let mut tx_ok = true;

        if flags.rx() {
            match work_queue.bind_rx(if_index, queue_id) {
                Ok(queue) => {
                    let fill = RingStorage::new(inner.ring_sizes.fill.unwrap(), FILL_STRIDE);
                    let rx = RingStorage::new(inner.ring_sizes.rx.unwrap(), RX_DESC_STRIDE);
                    match (fill, rx) {
                        (Ok(fill), Ok(rx)) => inner.rx_binding = Some(RxBinding { queue, fill, rx }),
                        _ => {
                            work_queue.detach_rx(&queue);
                            rx_ok = false;
                        }
                    }
                }
                Err(_) => rx_ok = false,
            }
        }

        if flags.tx() {
            match work_queue.bind_tx(if_index, queue_id) {
                Ok(queue) => {
                    let tx = RingStorage::new(inner.ring_sizes.tx.unwrap(), TX_DESC_STRIDE);
                    let completion = RingStorage::new(inner.ring_sizes.completion.unwrap(), COMPLETION_STRIDE);
                    match (tx, completion) {
                        (Ok(tx), Ok(completion)) => {
                            // TX ring starts with NEED_POKE set (spec §4.4):
                            // until the application produces, the interface
                            // need not drive callbacks on our behalf.
                            let tx_count = inner.ring_sizes.tx.unwrap();
                            unsafe {
                                RingProd::new(tx.header(), TX_DESC_STRIDE, tx_count)
                                    .set_flags(crate::ring::ring_flags::NEED_POKE);
                            }
                            inner.tx_binding = Some(TxBinding { queue, tx, completion });
                        }
                        _ => {
                            work_queue.detach_tx(&queue);
                            tx_ok = false;
                        }
                    }
                }
                Err(_) => tx_ok = false,
            }
        }

        if !rx_ok || !tx_ok {
            if let Some(rx) = inner.rx_binding.take() {
                work_queue.detach_rx(&rx.queue);
            }
            if let Some(tx) = inner.tx_binding.take() {
                work_queue.detach_tx(&tx.queue);
            }
            inner.state.complete_bind(false);
            return Err(XskError::InterfaceDetach);
        }

        inner.state.complete_bind(true);
        Ok(())
    }

    /// `activate(flags)` (spec §4.4): transitions `Binding → Bound`. Kept
    /// distinct from `bind` so callers may query ring info between the two
    /// steps.
    pub fn activate(&self) -> XskResult<()> {
        let mut inner = self.inner.lock();
        // `bind` above already drives `Binding -> Bound` on success; this
        // entry point exists for callers that bound successfully but have
        // not yet observed the `Bound` transition (e.g. a shared-UMEM peer
        // racing attach notification, spec §4.7 "the attach notification
        // re-enters the correct mode if the socket is now `Bound`").
        if inner.state == SocketState::Bound {
            return Ok(());
        }
        inner.state.activate().map_err(|_| XskError::WrongState)
    }

    /// `set_poll_mode` (spec §4.4, §4.7).
    pub fn set_poll_mode(&self, mode: PollMode, backchannel: Arc<dyn PollBackchannel>) {
        let mut inner = self.inner.lock();
        if inner.poll.is_none() {
            inner.poll = Some(Arc::new(PollModeController::new(backchannel)));
        }
        let rx_ring = inner.rx_binding.as_ref().map(|b| b.rx.header());
        let tx_ring = inner.tx_binding.as_ref().map(|b| b.tx.header());
        if let Some(poll) = &inner.poll {
            poll.set_mode(mode, rx_ring, tx_ring);
        }
    }

    /// `notify(in_flags, timeout)` (spec §4.8). Validates flags, ensures the
    /// requested directions have a bound ring, drives poke if requested,
    /// then waits for the requested conditions (or returns immediately if
    /// none are requested).
    pub fn notify(
        &self,
        in_flags: u32,
        timeout: Option<core::time::Duration>,
    ) -> XskResult<u32> {
        use crate::config::notify_flags;

        let inner = self.inner.lock();
        if !inner.state.is_bound() {
            return Err(XskError::WrongState);
        }
        if (in_flags & (notify_flags::POKE_RX | notify_flags::WAIT_RX) != 0) && inner.rx_binding.is_none() {
            return Err(XskError::InvalidParameter("RX not bound"));
        }
        if (in_flags & (notify_flags::POKE_TX | notify_flags::WAIT_TX) != 0) && inner.tx_binding.is_none() {
            return Err(XskError::InvalidParameter("TX not bound"));
        }
        let poll = inner.poll.clone();
        drop(inner);

        if in_flags & (notify_flags::POKE_RX | notify_flags::POKE_TX) != 0 {
            if let Some(poll) = poll {
                let (rx_quota, tx_quota) = self.poll_quotas();
                poll.socket_poll(rx_quota, tx_quota);
            }
        }

        let wait_flags = in_flags & (notify_flags::WAIT_RX | notify_flags::WAIT_TX);
        if wait_flags == 0 {
            return Ok(0);
        }

        // Opportunistic check (spec §4.8 "perform an opportunistic ready
        // check"): a batch may have produced into the ring and called
        // `signal_rx_available`/`signal_tx_complete_available` before this
        // call armed the wait, in which case `WaitSlot::signal_if_armed`
        // found nothing armed and dropped the wakeup on the floor. Catching
        // readiness here, before blocking, is what keeps property 6 ("for
        // any that returns TIMEOUT, no descriptors were producible during
        // [call, return]") true.
        let ready = self.ready_flags(wait_flags);
        if ready != 0 {
            return Ok(Self::wait_result_flags(ready));
        }

        self.wait.arm(wait_flags);

        // Re-check after arming (spec §4.8 "re-check readiness (and signal
        // self if ready)"): a producer may have run between the check above
        // and the arm and, finding nothing armed yet, not signaled either.
        let ready = self.ready_flags(wait_flags);
        if ready != 0 {
            self.wait.disarm();
            return Ok(Self::wait_result_flags(ready));
        }

        let woken = self.wait.wait(timeout);
        self.wait.disarm();

        if !woken {
            return Ok(0);
        }

        let ready = self.ready_flags(wait_flags);
        Ok(Self::wait_result_flags(if ready != 0 { ready } else { wait_flags }))
    }

    fn wait_result_flags(wait_flags: u32) -> u32 {
        use crate::config::{notify_flags, notify_result_flags};
        let mut out_flags = 0;
        if wait_flags & notify_flags::WAIT_RX != 0 {
            out_flags |= notify_result_flags::RX_AVAILABLE;
        }
        if wait_flags & notify_flags::WAIT_TX != 0 {
            out_flags |= notify_result_flags::TX_COMP_AVAILABLE;
        }
        out_flags
    }

    /// Overlapped variant of `notify` (spec §4.8 "Overlapped variant maps to
    /// the same state machine with a completion-port notification; must
    /// support cancellation"). Validates flags/direction exactly as `notify`
    /// and drives any requested poke synchronously, but never blocks: a
    /// requested wait is armed and handed back as a token the caller polls
    /// with [`Self::poll_overlapped`] (or cancels with
    /// [`Self::cancel_overlapped`]) from whatever completion-port machinery
    /// it owns — that plumbing is out of this crate's scope (spec §1).
    pub fn notify_overlapped(&self, in_flags: u32) -> XskResult<Arc<OverlappedWait>> {
        use crate::config::notify_flags;

        let inner = self.inner.lock();
        if !inner.state.is_bound() {
            return Err(XskError::WrongState);
        }
        if (in_flags & (notify_flags::POKE_RX | notify_flags::WAIT_RX) != 0) && inner.rx_binding.is_none() {
            return Err(XskError::InvalidParameter("RX not bound"));
        }
        if (in_flags & (notify_flags::POKE_TX | notify_flags::WAIT_TX) != 0) && inner.tx_binding.is_none() {
            return Err(XskError::InvalidParameter("TX not bound"));
        }
        let poll = inner.poll.clone();
        drop(inner);

        if in_flags & (notify_flags::POKE_RX | notify_flags::POKE_TX) != 0 {
            if let Some(poll) = poll {
                let (rx_quota, tx_quota) = self.poll_quotas();
                poll.socket_poll(rx_quota, tx_quota);
            }
        }

        let wait_flags = in_flags & (notify_flags::WAIT_RX | notify_flags::WAIT_TX);
        let generation = self.wait.generation();
        if wait_flags != 0 {
            self.wait.arm(wait_flags);
            // Same opportunistic re-check as `notify` (spec §4.8): if the
            // ring was already ready by the time the wait got armed, signal
            // immediately so the first `poll_overlapped` call observes it
            // instead of waiting on a wakeup nothing will ever deliver.
            if self.ready_flags(wait_flags) != 0 {
                self.wait.signal_if_armed(wait_flags);
            }
        }
        Ok(Arc::new(OverlappedWait::new(wait_flags, generation)))
    }

    /// Non-blocking poll of an overlapped wait's readiness (spec §4.8).
    /// Returns `None` while still pending (including once cancelled or
    /// already completed by an earlier poll), `Some(out_flags)` the first
    /// time it observes readiness — that single call is the one that
    /// transitions the token to `Completed` and disarms the wait slot.
    pub fn poll_overlapped(&self, token: &OverlappedWait) -> Option<u32> {
        if token.flags() == 0 {
            return if token.try_complete() { Some(0) } else { None };
        }
        if token.is_cancelled() || token.is_completed() {
            return None;
        }
        if !self.wait.poll_ready() {
            return None;
        }
        if token.try_complete() {
            self.wait.disarm();
            Some(Self::wait_result_flags(token.flags()))
        } else {
            None
        }
    }

    /// Cancel a pending overlapped wait (spec §4.8, §5 "an overlapped
    /// `notify` is cancellable; the wait is released and the IO completes
    /// with a cancel status"). Returns `true` if this call actually
    /// cancelled it (it was still pending); `false` if it had already
    /// completed.
    pub fn cancel_overlapped(&self, token: &OverlappedWait) -> bool {
        let cancelled = token.cancel();
        if cancelled {
            self.wait.disarm();
        }
        cancelled
    }

    /// `get_sockopt`/`set_sockopt` surface used by ring-info, stats, and
    /// poll-mode queries (spec §6). Concrete option decoding is left to a
    /// driver binding's IOCTL dispatch; this crate exposes the values
    /// directly through typed accessors instead of an untyped byte buffer.
    pub fn statistics_snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.stats.rx_dropped(),
            self.stats.rx_invalid_descriptors(),
            self.stats.rx_truncated(),
            self.stats.tx_invalid_descriptors(),
        )
    }

    pub fn poll_mode(&self) -> Option<PollMode> {
        self.inner.lock().poll.as_ref().map(|p| p.mode())
    }

    /// Construct `RingProd`/`RingCons` views over an already-bound RX
    /// direction's fill/rx rings, for the datapath (spec §4.5) to drive.
    pub fn rx_rings(&self) -> XskResult<(RingProd, RingCons, RingProd, RingCons)> {
        let inner = self.inner.lock();
        let binding = inner.rx_binding.as_ref().ok_or(XskError::WrongState)?;
        let fill_count = inner.ring_sizes.fill.unwrap();
        let rx_count = inner.ring_sizes.rx.unwrap();
        unsafe {
            Ok((
                RingProd::new(binding.fill.header(), FILL_STRIDE, fill_count),
                RingCons::new(binding.fill.header(), FILL_STRIDE, fill_count),
                RingProd::new(binding.rx.header(), RX_DESC_STRIDE, rx_count),
                RingCons::new(binding.rx.header(), RX_DESC_STRIDE, rx_count),
            ))
        }
    }

    /// Construct `RingProd`/`RingCons` views over an already-bound TX
    /// direction's tx/completion rings, for the datapath (spec §4.6).
    pub fn tx_rings(&self) -> XskResult<(RingProd, RingCons, RingProd, RingCons)> {
        let inner = self.inner.lock();
        let binding = inner.tx_binding.as_ref().ok_or(XskError::WrongState)?;
        let tx_count = inner.ring_sizes.tx.unwrap();
        let completion_count = inner.ring_sizes.completion.unwrap();
        unsafe {
            Ok((
                RingProd::new(binding.tx.header(), TX_DESC_STRIDE, tx_count),
                RingCons::new(binding.tx.header(), TX_DESC_STRIDE, tx_count),
                RingProd::new(binding.completion.header(), COMPLETION_STRIDE, completion_count),
                RingCons::new(binding.completion.header(), COMPLETION_STRIDE, completion_count),
            ))
        }
    }

    pub fn umem(&self) -> Option<Arc<Umem>> {
        self.inner.lock().umem.clone()
    }

    /// The bound RX queue's platform handle, or `None` if RX isn't bound.
    /// Two sockets share an RX queue (a shared-UMEM peer pair bound to the
    /// same interface/queue) iff `Arc::ptr_eq` on the returned handles holds
    /// (spec §11 Open Question 2).
    pub fn rx_queue_handle(&self) -> Option<Arc<dyn RxQueueHandle>> {
        self.inner.lock().rx_binding.as_ref().map(|b| b.queue.clone())
    }

    /// The bound TX queue's platform handle, or `None` if TX isn't bound.
    pub fn tx_queue_handle(&self) -> Option<Arc<dyn TxQueueHandle>> {
        self.inner.lock().tx_binding.as_ref().map(|b| b.queue.clone())
    }

    /// The UMEM addressing extension the bound TX queue enabled (spec §4.4,
    /// §4.6), or `None` if TX isn't bound. A platform binding driving
    /// [`crate::tx::TxPipeline`] uses this to translate the XDP queue's
    /// completed-frame addresses back to UMEM-relative before calling
    /// `reap_completions`.
    pub fn tx_umem_mapping(&self) -> Option<crate::diag::UmemMapping> {
        self.inner.lock().tx_binding.as_ref().map(|b| b.queue.umem_mapping())
    }

    /// The sticky error latched on the bound RX ring (spec §3, §6), or
    /// [`XskError::WrongState`] if RX isn't bound. Constructing a transient
    /// `RingCons` just to read the error flag is safe: it only touches the
    /// shared `reserved`/`flags` words through atomics and never mutates the
    /// cached producer/consumer state the real datapath views track.
    pub fn rx_error(&self) -> XskResult<crate::ring::RingError> {
        let inner = self.inner.lock();
        let binding = inner.rx_binding.as_ref().ok_or(XskError::WrongState)?;
        let rx_count = inner.ring_sizes.rx.unwrap();
        let cons = unsafe { RingCons::new(binding.rx.header(), RX_DESC_STRIDE, rx_count) };
        Ok(cons.error())
    }

    /// The sticky error latched on the bound TX ring (spec §3, §6), or
    /// [`XskError::WrongState`] if TX isn't bound.
    pub fn tx_error(&self) -> XskResult<crate::ring::RingError> {
        let inner = self.inner.lock();
        let binding = inner.tx_binding.as_ref().ok_or(XskError::WrongState)?;
        let tx_count = inner.ring_sizes.tx.unwrap();
        let cons = unsafe { RingCons::new(binding.tx.header(), TX_DESC_STRIDE, tx_count) };
        Ok(cons.error())
    }

    /// Diagnostic-only record of which allocation path backs this socket's
    /// bounce buffer (spec §3 `BounceAllocationSource`, surfaced through
    /// `GET_SOCKOPT` for diagnostics). This crate's own bounce storage is a
    /// plain heap allocation sized against UMEM (spec §4.3); the DMA-common-
    /// buffer path is a platform concern this crate does not drive, so the
    /// only two values this accessor ever reports are whether bouncing is
    /// configured at all.
    pub fn bounce_allocation_source(&self) -> crate::diag::BounceAllocationSource {
        let inner = self.inner.lock();
        if inner.bounce.is_some() {
            crate::diag::BounceAllocationSource::MappedUmemMdl
        } else {
            crate::diag::BounceAllocationSource::NotAllocated
        }
    }

    /// Whether the bound RX ring currently holds at least one descriptor the
    /// application hasn't consumed yet. Constructing a transient `RingCons`
    /// is safe for the same reason as [`Self::rx_error`]: it only reads the
    /// shared producer/consumer words, never mutates them.
    fn rx_ready(&self) -> bool {
        let inner = self.inner.lock();
        let Some(binding) = inner.rx_binding.as_ref() else {
            return false;
        };
        let rx_count = inner.ring_sizes.rx.unwrap();
        let mut cons = unsafe { RingCons::new(binding.rx.header(), RX_DESC_STRIDE, rx_count) };
        cons.count_available(1) > 0
    }

    /// Whether the bound TX completion ring currently holds at least one
    /// descriptor the application hasn't consumed yet.
    fn tx_ready(&self) -> bool {
        let inner = self.inner.lock();
        let Some(binding) = inner.tx_binding.as_ref() else {
            return false;
        };
        let completion_count = inner.ring_sizes.completion.unwrap();
        let mut cons = unsafe { RingCons::new(binding.completion.header(), COMPLETION_STRIDE, completion_count) };
        cons.count_available(1) > 0
    }

    /// Per-iteration RX/TX quotas for the socket-poll loop (spec §4.7: "RX
    /// quota = `min(256, fill_available, rx_free)`; TX quota = `min(256,
    /// tx_available, completion_free)`"). `0` for a direction that isn't
    /// bound, matching `poll_invoke`'s contract that a zero quota does no
    /// work for that side.
    fn poll_quotas(&self) -> (u32, u32) {
        let inner = self.inner.lock();
        let rx_quota = match inner.rx_binding.as_ref() {
            Some(binding) => {
                let fill_count = inner.ring_sizes.fill.unwrap();
                let rx_count = inner.ring_sizes.rx.unwrap();
                let mut fill = unsafe { RingCons::new(binding.fill.header(), FILL_STRIDE, fill_count) };
                let mut rx = unsafe { RingProd::new(binding.rx.header(), RX_DESC_STRIDE, rx_count) };
                // `count_available` is already capped at its argument;
                // `count_free`'s argument only controls when it refreshes
                // its cache, so the result still needs its own `min`.
                let fill_available = fill.count_available(crate::poll::SOCKET_POLL_QUOTA);
                let rx_free = rx.count_free(crate::poll::SOCKET_POLL_QUOTA);
                fill_available.min(rx_free)
            }
            None => 0,
        };
        let tx_quota = match inner.tx_binding.as_ref() {
            Some(binding) => {
                let tx_count = inner.ring_sizes.tx.unwrap();
                let completion_count = inner.ring_sizes.completion.unwrap();
                let mut tx = unsafe { RingCons::new(binding.tx.header(), TX_DESC_STRIDE, tx_count) };
                let mut completion = unsafe { RingProd::new(binding.completion.header(), COMPLETION_STRIDE, completion_count) };
                let tx_available = tx.count_available(crate::poll::SOCKET_POLL_QUOTA);
                let completion_free = completion.count_free(crate::poll::SOCKET_POLL_QUOTA);
                tx_available.min(completion_free)
            }
            None => 0,
        };
        (rx_quota, tx_quota)
    }

    /// Readiness across whichever of `WAIT_RX`/`WAIT_TX` is set in `wait_flags`.
    fn ready_flags(&self, wait_flags: u32) -> u32 {
        use crate::config::notify_flags;
        let mut ready = 0;
        if wait_flags & notify_flags::WAIT_RX != 0 && self.rx_ready() {
            ready |= notify_flags::WAIT_RX;
        }
        if wait_flags & notify_flags::WAIT_TX != 0 && self.tx_ready() {
            ready |= notify_flags::WAIT_TX;
        }
        ready
    }

    /// Signal any waiter armed for `WAIT_RX` (spec §4.5: the RX datapath
    /// wakes a waiting application once it has produced into the RX ring).
    /// The caller driving [`crate::rx::RxPipeline::process_batch`] invokes
    /// this after a batch produces at least one descriptor.
    ///
    /// `WaitSlot::arm`/`armed_flags` speak the `notify_flags` bit space
    /// (`WAIT_RX`/`WAIT_TX`, what `notify` installs), not the
    /// `notify_result_flags` space `notify` hands back to its caller — this
    /// must gate on the same bit `notify` armed.
    pub fn signal_rx_available(&self) {
        self.wait.signal_if_armed(crate::config::notify_flags::WAIT_RX);
    }

    /// Signal any waiter armed for `WAIT_TX` (spec §4.6 "Signal wait event if
    /// `WAIT_TX` is armed"). The caller driving
    /// [`crate::tx::TxPipeline::reap_completions`] invokes this after a
    /// completion batch publishes onto the completion ring.
    pub fn signal_tx_complete_available(&self) {
        self.wait.signal_if_armed(crate::config::notify_flags::WAIT_TX);
    }

    /// Run `f` against the socket's bounce buffer, if one is configured
    /// (spec §4.3 "pass-through when unconfigured"). Used by the TX pipeline
    /// integration to bounce descriptors without exposing the buffer's
    /// lifetime past the lock.
    pub fn with_bounce<R>(&self, f: impl FnOnce(Option<&BounceBuffer>) -> R) -> R {
        let inner = self.inner.lock();
        f(inner.bounce.as_ref())
    }

    /// Lower-layer detach event (spec §3, §4.4 "TX detach event"). Moves
    /// `Bound -> Detached` unless a close already raced it, and dispatches
    /// detach work for whatever is bound.
    pub fn on_lower_layer_detach(&self) {
        let mut inner = self.inner.lock();
        inner.state.detach();
        let work_queue = self.platform.binding_work_queue();
        if let Some(rx) = &inner.rx_binding {
            work_queue.detach_rx(&rx.queue);
        }
        if let Some(tx) = &inner.tx_binding {
            work_queue.detach_tx(&tx.queue);
        }
        self.wait.signal_if_armed(u32::MAX);
    }

    /// IOCTL cleanup (spec §3 "IOCTL cleanup transitions any state to
    /// `Closing`"); releases the UMEM reference and cancels any active wait.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.state.close();
        if let Some(umem) = inner.umem.take() {
            umem.release();
        }
        self.wait.signal_if_armed(u32::MAX);
    }

    pub fn if_index(&self) -> u32 {
        self.inner.lock().if_index
    }
}
