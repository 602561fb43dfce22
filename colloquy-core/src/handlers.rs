//! Caller-supplied handler interfaces.
//!
//! Named traits instead of bare function pointers: a handler can be a plain
//! closure (blanket impls below) or a named type that carries its own state,
//! and the controller owns it for the lifetime of the session.

use crate::session::SessionSignal;

/// Receives recognised text fragments, partial and final alike.
///
/// Invoked zero or more times per session, always from the coordinator
/// thread, and always strictly before the session's terminal status signal.
pub trait ResultHandler: Send + 'static {
    fn on_result(&mut self, text: &str);
}

/// Receives session status signals.
///
/// Per accepted start the controller delivers `Starting`, then possibly
/// `Listening`, then exactly one terminal signal (`StoppedNormally` or
/// `Failed`). `SessionSignal::is_listening` recovers the plain boolean
/// contract for callers that only drive an indicator light.
pub trait StatusHandler: Send + 'static {
    fn on_status(&mut self, signal: SessionSignal);
}

impl<F> ResultHandler for F
where
    F: FnMut(&str) + Send + 'static,
{
    fn on_result(&mut self, text: &str) {
        self(text);
    }
}

impl<F> StatusHandler for F
where
    F: FnMut(SessionSignal) + Send + 'static,
{
    fn on_status(&mut self, signal: SessionSignal) {
        self(signal);
    }
}
