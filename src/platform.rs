//! Trait boundary for the "external collaborators" named in spec §1: the
//! IOCTL/FastIO transport, the generic-mode NDIS filter, driver registry
//! plumbing, tracing, NMR provider registration, the XDP program engine,
//! the RX queue object, the TX queue object, the interface-binding work
//! queue, and the NDIS polling backchannel.
//!
//! None of those are implemented here — this crate only needs their
//! *contracts*. A real driver binding supplies WDK-backed implementations
//! (see `examples/other_examples/...nt-include.rs.rs` in the retrieval pack
//! for the shape such an implementation takes: `extern "system"` calls into
//! `Ex*`/`Mm*`/`Ke*`). The [`fake`] submodule supplies deterministic
//! in-memory implementations used by this crate's own tests.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::time::Duration;

use crate::error::XskResult;

/// A scoped capability granting access to the owning process's address
/// space, matching spec §4.2/§9 ("per-process mapping for UMEM... scoped
/// acquisition of process-address-space with guaranteed detach on all exit
/// paths").
pub trait ProcessAttachToken {
    /// Attach the calling thread to the owning process, if it is not
    /// already attached. Detach happens when the returned guard drops.
    fn attach(&self) -> Box<dyn ProcessAttachGuard + '_>;
}

/// RAII guard produced by [`ProcessAttachToken::attach`].
pub trait ProcessAttachGuard {}

/// A handle the socket holds on its bound RX queue (spec §4.4 "RX bind
/// work", "RX queue notifications").
pub trait RxQueueHandle: Send + Sync {
    /// Stable identity used for `XskValidateDatapathHandle`-style equality
    /// checks (SPEC_FULL.md §11, open question 2): two handles are the same
    /// queue iff they resolve to the same pointer.
    fn identity(&self) -> usize;
}

/// A handle the socket holds on its bound TX queue (spec §4.4 "TX bind
/// work").
pub trait TxQueueHandle: Send + Sync {
    fn identity(&self) -> usize;
    /// Capabilities read once at bind time.
    fn max_buffer_length(&self) -> u32;
    fn max_frame_length(&self) -> u32;
    fn out_of_order_completion_enabled(&self) -> bool;

    /// The UMEM addressing extension this queue enabled at bind time (spec
    /// §4.4 "queries enabled extensions", §4.6 "populate each enabled
    /// extension"). [`crate::tx::TxPipeline`] hands back already-translated
    /// UMEM-relative addresses, so it never calls this itself — a platform
    /// binding uses it both to build the outgoing extension in `enqueue` and
    /// to translate completed frames back via
    /// [`crate::diag::UmemMapping::umem_relative_address`] before calling
    /// `reap_completions`.
    fn umem_mapping(&self) -> crate::diag::UmemMapping;
}

/// One direction's binding outcome, returned by [`BindingWorkQueue::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Bound,
    Failed,
}

/// The interface-binding work queue: binding and teardown for a given
/// interface are serialized on this queue (spec §2 "Control flow", §4.4,
/// §5). Modeled as spec §9 suggests: "an explicit task queue with ordered
/// execution per interface; the socket's bind routine submits a task and
/// awaits a completion channel."
pub trait BindingWorkQueue {
    /// Submit an RX-bind work item for `(if_index, queue_id, hook_id)` and
    /// block the calling (control-path) thread until it completes.
    fn bind_rx(&self, if_index: u32, queue_id: u32) -> XskResult<Arc<dyn RxQueueHandle>>;

    /// Submit a TX-bind work item and block until it completes.
    fn bind_tx(&self, if_index: u32, queue_id: u32) -> XskResult<Arc<dyn TxQueueHandle>>;

    /// Submit a detach work item for a previously bound RX queue.
    fn detach_rx(&self, handle: &Arc<dyn RxQueueHandle>);

    /// Submit a detach work item for a previously bound TX queue.
    fn detach_tx(&self, handle: &Arc<dyn TxQueueHandle>);
}

/// An NDIS polling backchannel handle for one direction (spec §4.7).
pub trait PollBackchannel: Send + Sync {
    /// Drive up to `rx_quota`/`tx_quota` units of work; returns `true` if
    /// any I/O the caller was waiting on became ready.
    fn poll_invoke(&self, rx_quota: u32, tx_quota: u32) -> bool;

    /// Take (or release) a "busy" reference that keeps the interface
    /// polling continuously (`PollMode::Busy`, spec §4.7).
    fn set_busy(&self, busy: bool);
}

/// A wake handle backing the edge-triggered wait primitive in
/// [`crate::wait::WaitSlot`] (spec §4.8, §9 "a wake handle").
pub trait WakeHandle: Send + Sync {
    fn signal(&self);
    /// Block the calling thread until signaled or `timeout` elapses.
    /// Returns `true` if signaled, `false` on timeout.
    fn wait(&self, timeout: Option<Duration>) -> bool;
}

/// Marker trait for the IOCTL/FastIO transport (spec §1, §6). This crate
/// never constructs bytes on a wire; a driver binding threads the existing
/// `bind`/`get_sockopt`/`set_sockopt`/`notify` entry points through whatever
/// transport it implements.
pub trait IoctlTransport {}

/// The platform-wide entry point a [`crate::socket::Socket`] is constructed
/// with, bundling all of the above plus the fatal-error escape hatch (spec
/// §7 "Fatal... immediate crash").
pub trait Platform: Send + Sync {
    fn binding_work_queue(&self) -> &dyn BindingWorkQueue;
    fn new_wake_handle(&self) -> Arc<dyn WakeHandle>;
    fn process_attach_token(&self) -> Arc<dyn ProcessAttachToken>;

    /// Called when an internal invariant is violated (spec §7 Fatal class).
    /// A real driver binding implements this with `KeBugCheck` and never
    /// returns; the in-memory fakes panic, which is adequate for a
    /// `panic = "abort"` test binary.
    fn bugcheck(&self, reason: &str) -> !;
}

/// Deterministic in-memory collaborator implementations for tests.
#[cfg(feature = "test-util")]
pub mod fake {
    use super::*;
    use spin::Mutex;

    pub struct FakeProcessToken;

    impl ProcessAttachToken for FakeProcessToken {
        fn attach(&self) -> Box<dyn ProcessAttachGuard + '_> {
            struct Guard;
            impl ProcessAttachGuard for Guard {}
            Box::new(Guard)
        }
    }

    pub struct FakeRxQueue {
        id: usize,
    }

    impl FakeRxQueue {
        pub fn new(id: usize) -> Arc<dyn RxQueueHandle> {
            Arc::new(FakeRxQueue { id })
        }
    }

    impl RxQueueHandle for FakeRxQueue {
        fn identity(&self) -> usize {
            self.id
        }
    }

    pub struct FakeTxQueue {
        id: usize,
        pub max_buffer_length: u32,
        pub max_frame_length: u32,
        pub out_of_order_completion_enabled: bool,
        pub umem_mapping: crate::diag::UmemMapping,
    }

    impl FakeTxQueue {
        pub fn new(id: usize, max_buffer_length: u32, max_frame_length: u32, ooo: bool) -> Arc<dyn TxQueueHandle> {
            Arc::new(FakeTxQueue {
                id,
                max_buffer_length,
                max_frame_length,
                out_of_order_completion_enabled: ooo,
                umem_mapping: crate::diag::UmemMapping::VirtualAddress(0),
            })
        }
    }

    impl TxQueueHandle for FakeTxQueue {
        fn identity(&self) -> usize {
            self.id
        }
        fn max_buffer_length(&self) -> u32 {
            self.max_buffer_length
        }
        fn max_frame_length(&self) -> u32 {
            self.max_frame_length
        }
        fn out_of_order_completion_enabled(&self) -> bool {
            self.out_of_order_completion_enabled
        }
        fn umem_mapping(&self) -> crate::diag::UmemMapping {
            self.umem_mapping
        }
    }

    /// A binding work queue that always succeeds immediately, handing back
    /// freshly minted fake queue handles. Good enough for unit and
    /// integration tests that don't exercise bind-failure recovery.
    pub struct AlwaysSucceedsWorkQueue {
        next_id: Mutex<usize>,
        pub tx_caps: (u32, u32, bool),
    }

    impl Default for AlwaysSucceedsWorkQueue {
        fn default() -> Self {
            AlwaysSucceedsWorkQueue {
                next_id: Mutex::new(1),
                tx_caps: (4096, 4096, false),
            }
        }
    }

    impl BindingWorkQueue for AlwaysSucceedsWorkQueue {
        fn bind_rx(&self, _if_index: u32, _queue_id: u32) -> XskResult<Arc<dyn RxQueueHandle>> {
            let mut id = self.next_id.lock();
            *id += 1;
            Ok(FakeRxQueue::new(*id))
        }

        fn bind_tx(&self, _if_index: u32, _queue_id: u32) -> XskResult<Arc<dyn TxQueueHandle>> {
            let mut id = self.next_id.lock();
            *id += 1;
            let (max_buf, max_frame, ooo) = self.tx_caps;
            Ok(FakeTxQueue::new(*id, max_buf, max_frame, ooo))
        }

        fn detach_rx(&self, _handle: &Arc<dyn RxQueueHandle>) {}
        fn detach_tx(&self, _handle: &Arc<dyn TxQueueHandle>) {}
    }

    /// An in-process wake handle: `signal` flips a flag, `wait` busy-polls it
    /// with a coarse sleep substitute (there is no executor in `no_std`
    /// tests, so `wait` is only ever used from `std` integration tests where
    /// the `std`-only spin/park fallback below applies).
    pub struct FakeWakeHandle {
        signaled: Mutex<bool>,
    }

    impl Default for FakeWakeHandle {
        fn default() -> Self {
            FakeWakeHandle {
                signaled: Mutex::new(false),
            }
        }
    }

    impl WakeHandle for FakeWakeHandle {
        fn signal(&self) {
            *self.signaled.lock() = true;
        }

        fn wait(&self, timeout: Option<Duration>) -> bool {
            // `test-util` implies `std`: real thread parking is available.
            let start = std::time::Instant::now();
            loop {
                if core::mem::replace(&mut *self.signaled.lock(), false) {
                    return true;
                }
                if let Some(t) = timeout {
                    if start.elapsed() >= t {
                        return false;
                    }
                }
                std::thread::yield_now();
            }
        }
    }

    pub struct FakePlatform {
        work_queue: AlwaysSucceedsWorkQueue,
    }

    impl Default for FakePlatform {
        fn default() -> Self {
            FakePlatform {
                work_queue: AlwaysSucceedsWorkQueue::default(),
            }
        }
    }

    impl Platform for FakePlatform {
        fn binding_work_queue(&self) -> &dyn BindingWorkQueue {
            &self.work_queue
        }

        fn new_wake_handle(&self) -> Arc<dyn WakeHandle> {
            Arc::new(FakeWakeHandle::default())
        }

        fn process_attach_token(&self) -> Arc<dyn ProcessAttachToken> {
            Arc::new(FakeProcessToken)
        }

        fn bugcheck(&self, reason: &str) -> ! {
            panic!("fatal invariant violation: {reason}")
        }
    }

    /// A tiny FIFO used by tests that want to assert ordering of queued
    /// binding work items directly, without going through `Platform`.
    #[derive(Default)]
    pub struct RecordingQueue<T> {
        items: Mutex<VecDeque<T>>,
    }

    impl<T> RecordingQueue<T> {
        pub fn push(&self, item: T) {
            self.items.lock().push_back(item);
        }

        pub fn pop(&self) -> Option<T> {
            self.items.lock().pop_front()
        }
    }
}
