//! Error taxonomy for the XSK datapath core.
//!
//! Mirrors the five classes laid out for the control path: parameter, state,
//! resource and fatal errors are returned from here; peer-protocol and
//! lower-layer-detach errors are *not* represented as `XskError` because the
//! datapath never surfaces them through a `Result` — they are recorded as
//! ring flags and statistics instead (see [`crate::ring::RingError`] and
//! [`crate::stats::XskStatistics`]).

use thiserror::Error;

/// Control-path error, one variant per class in the spec's error taxonomy.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum XskError {
    /// A parameter was out of range or otherwise malformed. No state change
    /// occurred.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// The operation is not permitted in the socket's current state. No
    /// state change occurred.
    #[error("operation not valid in current socket state")]
    WrongState,

    /// Allocation or page-locking failed. Any partially acquired resources
    /// were released before returning.
    #[error("resource allocation failed: {0}")]
    NoMemory(&'static str),

    /// The addressed ring, UMEM region, or descriptor fails a control-path
    /// consistency check that is not covered by a more specific variant.
    #[error("invalid ring or descriptor state")]
    InvalidRing,

    /// The target of a shared-UMEM or shared-queue operation does not exist
    /// or is in the wrong state to participate.
    #[error("peer socket not eligible for this operation")]
    InvalidPeer,

    /// The underlying interface or queue is gone.
    #[error("interface or queue detached")]
    InterfaceDetach,

    /// An internal invariant was violated. The caller should treat this as
    /// fatal; the platform layer is expected to bugcheck rather than return
    /// from the call that observed it (see [`crate::platform::Platform::bugcheck`]).
    #[error("fatal invariant violation: {0}")]
    Fatal(&'static str),
}

impl XskError {
    /// A coarse-grained status family, useful for a driver binding that
    /// wants to map this error onto an `NTSTATUS`-shaped result without this
    /// crate depending on any Windows crate.
    pub fn status_family(&self) -> StatusFamily {
        match self {
            XskError::InvalidParameter(_) => StatusFamily::InvalidParameter,
            XskError::WrongState => StatusFamily::InvalidDeviceState,
            XskError::NoMemory(_) => StatusFamily::InsufficientResources,
            XskError::InvalidRing | XskError::InvalidPeer => StatusFamily::InvalidParameter,
            XskError::InterfaceDetach => StatusFamily::DeviceNotReady,
            XskError::Fatal(_) => StatusFamily::InternalError,
        }
    }

    /// The `NTSTATUS`-shaped 32-bit code a driver binding would hand back
    /// from its `IRP_MJ_DEVICE_CONTROL` dispatch for this error, without
    /// this crate taking a dependency on any Windows crate to name the real
    /// constants. Values match the well-known `STATUS_*` codes for each
    /// family (e.g. `STATUS_INVALID_PARAMETER`, `STATUS_INSUFFICIENT_RESOURCES`).
    pub fn ntstatus_like(&self) -> u32 {
        match self.status_family() {
            StatusFamily::InvalidParameter => 0xC000_000D,
            StatusFamily::InvalidDeviceState => 0xC000_0184,
            StatusFamily::InsufficientResources => 0xC000_009A,
            StatusFamily::DeviceNotReady => 0xC000_0010,
            StatusFamily::InternalError => 0xC000_001D,
        }
    }
}

/// A coarse status family a driver binding can map onto its own error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFamily {
    InvalidParameter,
    InvalidDeviceState,
    InsufficientResources,
    DeviceNotReady,
    InternalError,
}

/// Convenience alias for control-path results.
pub type XskResult<T> = Result<T, XskError>;
