//! Socket lifecycle state machine (spec §3, §4.4).
//!
//! Grounded on `original_source/core/sys/xsk.c`'s `XSK_STATE` enum and the
//! transition table implicit in `XskIrpDeviceIoControlBind` /
//! `XskDetachEvent`: `Unbound → Binding → Bound → Detached`, with
//! `Closing` reachable from any state.

/// Mirrors `XSK_STATE` (spec §3 "State machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Unbound,
    Binding,
    Bound,
    Detached,
    Closing,
}

/// A requested transition that is not legal from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: SocketState,
    pub attempted: &'static str,
}

impl SocketState {
    /// `register_umem`/`set_ring_size`/`set_hook_id`/`bind` are only legal in
    /// `Unbound` (spec §4.4).
    pub fn require_unbound(self, op: &'static str) -> Result<(), IllegalTransition> {
        if self == SocketState::Unbound {
            Ok(())
        } else {
            Err(IllegalTransition { from: self, attempted: op })
        }
    }

    /// `bind` atomically transitions `Unbound → Binding`.
    pub fn begin_bind(&mut self) -> Result<(), IllegalTransition> {
        self.require_unbound("bind")?;
        *self = SocketState::Binding;
        Ok(())
    }

    /// The binding work item's completion: success moves to `Bound`,
    /// failure restores `Unbound` (spec §4.4 "On any failure... restores
    /// `Unbound`").
    pub fn complete_bind(&mut self, success: bool) {
        debug_assert_eq!(*self, SocketState::Binding);
        *self = if success { SocketState::Bound } else { SocketState::Unbound };
    }

    /// `activate` transitions `Binding → Bound` (spec §4.4).
    pub fn activate(&mut self) -> Result<(), IllegalTransition> {
        if *self == SocketState::Binding {
            *self = SocketState::Bound;
            Ok(())
        } else {
            Err(IllegalTransition { from: *self, attempted: "activate" })
        }
    }

    /// Lower-layer detach transitions `Bound → Detached`, unless a close is
    /// already racing it (spec §3 "unless racing `Closing`").
    pub fn detach(&mut self) {
        if *self != SocketState::Closing {
            *self = SocketState::Detached;
        }
    }

    /// IOCTL cleanup transitions any state to `Closing` (spec §3).
    pub fn close(&mut self) {
        *self = SocketState::Closing;
    }

    pub fn is_bound(self) -> bool {
        self == SocketState::Bound
    }
}

impl Default for SocketState {
    fn default() -> Self {
        SocketState::Unbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_activate_happy_path() {
        let mut state = SocketState::Unbound;
        state.begin_bind().unwrap();
        assert_eq!(state, SocketState::Binding);
        state.activate().unwrap();
        assert_eq!(state, SocketState::Bound);
    }

    #[test]
    fn failed_bind_restores_unbound() {
        let mut state = SocketState::Unbound;
        state.begin_bind().unwrap();
        state.complete_bind(false);
        assert_eq!(state, SocketState::Unbound);
    }

    #[test]
    fn detach_does_not_override_closing() {
        let mut state = SocketState::Bound;
        state.close();
        state.detach();
        assert_eq!(state, SocketState::Closing);
    }

    #[test]
    fn rejects_bind_from_non_unbound_state() {
        let mut state = SocketState::Bound;
        assert!(state.begin_bind().is_err());
    }
}
