//! Continuous acquisition: handshake, frame loop, and the caller-facing
//! control surface (`start`, `stop`, `state`).

pub mod session;
pub mod state;

pub use session::{start, AcquisitionConfig, SessionHandle, SessionReport};
pub use state::{FaultKind, FaultReason, LoopState, SessionStats, SessionStatus, StopFlag};

use crate::error::AcquisitionResult;

/// Stop a session and wait for its worker. See [`SessionHandle::stop`].
pub fn stop<C>(handle: SessionHandle<C>) -> AcquisitionResult<SessionReport<C>> {
    handle.stop()
}

/// Current state of a session. See [`SessionHandle::state`].
pub fn state<C>(handle: &SessionHandle<C>) -> LoopState {
    handle.state()
}
