//! Recognition session state machine.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──► Starting ──► Listening ──► Stopping ──► Stopped ──► Idle
//!             │             │             │
//!             └─────────────┴─────────────┴──► Failed ──► Idle
//! ```
//!
//! Exactly one session may be engaged at a time; the coordinator owns it.
//! A start issued while permission is still unresolved is *parked*: the
//! handlers are held, the engine is not engaged, and the parked start can
//! be cancelled or denied without ever touching the engine.
//!
//! Engine events are tagged with the epoch assigned at engagement. After a
//! session reaches a terminal state its epoch is retired, so late events
//! from an engine that is still winding down are discarded instead of
//! leaking into the next session.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engines::RecognitionHandle;
use crate::handlers::{ResultHandler, StatusHandler};

/// Current state of a recognition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No session engaged; ready for a fresh start.
    Idle,
    /// Engine engaged, waiting for readiness or the first result.
    Starting,
    /// Actively streaming recognition results.
    Listening,
    /// Stop requested; draining the last buffered results.
    Stopping,
    /// Session ended normally. Transient — resets to `Idle`.
    Stopped,
    /// Engine reported an error. Transient — resets to `Idle`.
    Failed,
}

impl SessionStatus {
    /// Whether a session currently owns the engine.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionStatus::Starting | SessionStatus::Listening | SessionStatus::Stopping
        )
    }
}

/// Why a session ended in failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    /// Permission resolved to denied after the start was accepted.
    PermissionDenied,
    /// Lost a start race, or pre-emption is disabled and another speech
    /// operation holds the audio path.
    Conflict,
    /// The capture/recognition engine reported an error.
    Engine(String),
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFailure::PermissionDenied => write!(f, "permission denied"),
            SessionFailure::Conflict => write!(f, "conflicting operation"),
            SessionFailure::Engine(msg) => write!(f, "engine error: {msg}"),
        }
    }
}

/// Status signal delivered to a caller's `StatusHandler`.
///
/// Per accepted start: `Starting`, then possibly `Listening`, then exactly
/// one terminal signal. The boolean contract (`is_listening`) maps
/// Starting/Listening to `true` and both terminals to `false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    Starting,
    Listening,
    StoppedNormally,
    Failed(SessionFailure),
}

impl SessionSignal {
    pub fn is_listening(&self) -> bool {
        matches!(self, SessionSignal::Starting | SessionSignal::Listening)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionSignal::StoppedNormally | SessionSignal::Failed(_)
        )
    }
}

/// Handlers held while a start waits for permission resolution.
pub(crate) struct ParkedStart {
    pub result: Box<dyn ResultHandler>,
    pub status: Box<dyn StatusHandler>,
}

/// The single recognition session owned by the coordinator.
pub(crate) struct RecognitionSession {
    status: SessionStatus,
    /// Epoch of the engaged engine stream; `None` when no stream is live.
    active_epoch: Option<u64>,
    next_epoch: u64,
    result_handler: Option<Box<dyn ResultHandler>>,
    status_handler: Option<Box<dyn StatusHandler>>,
    parked: Option<ParkedStart>,
    handle: Option<Box<dyn RecognitionHandle>>,
    transcript: Vec<String>,
    max_transcript_fragments: usize,
}

impl RecognitionSession {
    pub(crate) fn new(max_transcript_fragments: usize) -> Self {
        Self {
            status: SessionStatus::Idle,
            active_epoch: None,
            next_epoch: 0,
            result_handler: None,
            status_handler: None,
            parked: None,
            handle: None,
            transcript: Vec::new(),
            max_transcript_fragments,
        }
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.status
    }

    pub(crate) fn epoch_matches(&self, epoch: u64) -> bool {
        self.active_epoch == Some(epoch)
    }

    pub(crate) fn has_parked(&self) -> bool {
        self.parked.is_some()
    }

    pub(crate) fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Park a start until permission resolves. The engine is not engaged.
    pub(crate) fn park(&mut self, result: Box<dyn ResultHandler>, status: Box<dyn StatusHandler>) {
        debug!("parking start until permission resolves");
        self.parked = Some(ParkedStart { result, status });
    }

    pub(crate) fn take_parked(&mut self) -> Option<ParkedStart> {
        self.parked.take()
    }

    /// Cancel a parked start before the engine was ever engaged.
    /// Delivers the one terminal signal so the caller can reset its state.
    pub(crate) fn cancel_parked(&mut self) {
        if let Some(mut parked) = self.parked.take() {
            info!("parked start cancelled before engaging the engine");
            parked.status.on_status(SessionSignal::StoppedNormally);
        }
    }

    /// Reject a parked start because permission resolved to denied.
    /// One terminal signal, zero results, session stays Idle.
    pub(crate) fn deny_parked(&mut self) {
        if let Some(mut parked) = self.parked.take() {
            info!("parked start rejected: permission denied");
            parked
                .status
                .on_status(SessionSignal::Failed(SessionFailure::PermissionDenied));
        }
    }

    /// Engage: Idle → Starting. Fires the `Starting` signal and returns the
    /// epoch to tag the engine stream with.
    pub(crate) fn begin(
        &mut self,
        result: Box<dyn ResultHandler>,
        status: Box<dyn StatusHandler>,
    ) -> u64 {
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        self.active_epoch = Some(epoch);
        self.status = SessionStatus::Starting;
        self.transcript.clear();
        self.result_handler = Some(result);
        self.status_handler = Some(status);
        info!(epoch, "recognition session starting");
        self.signal(SessionSignal::Starting);
        epoch
    }

    pub(crate) fn attach_handle(&mut self, handle: Box<dyn RecognitionHandle>) {
        self.handle = Some(handle);
    }

    /// Starting → Listening (no-op in any other state).
    pub(crate) fn mark_listening(&mut self) {
        if self.status == SessionStatus::Starting {
            self.status = SessionStatus::Listening;
            info!("recognition session listening");
            self.signal(SessionSignal::Listening);
        }
    }

    /// Append a fragment and invoke the result handler.
    pub(crate) fn deliver_result(&mut self, text: &str) {
        if !self.status.is_active() {
            return;
        }
        if self.transcript.len() == self.max_transcript_fragments {
            self.transcript.remove(0);
        }
        self.transcript.push(text.to_string());
        if let Some(handler) = self.result_handler.as_mut() {
            handler.on_result(text);
        }
    }

    /// Request a graceful stop: Starting/Listening → Stopping, and tell the
    /// engine to flush. Returns whether this call was the effective one.
    pub(crate) fn request_stop(&mut self) -> bool {
        match self.status {
            SessionStatus::Starting | SessionStatus::Listening => {
                self.status = SessionStatus::Stopping;
                info!("recognition session stopping");
                if let Some(handle) = self.handle.as_mut() {
                    handle.finish();
                }
                true
            }
            _ => false,
        }
    }

    /// Terminal: the engine stream ended. Fires `StoppedNormally` and
    /// releases handlers, handle, and epoch.
    pub(crate) fn finish_stopped(&mut self) {
        self.status = SessionStatus::Stopped;
        info!("recognition session stopped");
        self.retire();
        self.signal_terminal(SessionSignal::StoppedNormally);
    }

    /// Terminal: the engine reported an error. Fires `Failed` and releases
    /// handlers, handle, and epoch. Further engine events are discarded.
    pub(crate) fn fail(&mut self, failure: SessionFailure) {
        self.status = SessionStatus::Failed;
        info!(%failure, "recognition session failed");
        self.retire();
        self.signal_terminal(SessionSignal::Failed(failure));
    }

    /// Stopped/Failed → Idle, ready for a fresh start.
    pub(crate) fn reset_idle(&mut self) {
        self.status = SessionStatus::Idle;
    }

    fn retire(&mut self) {
        self.active_epoch = None;
        self.handle = None;
        self.result_handler = None;
    }

    fn signal(&mut self, signal: SessionSignal) {
        if let Some(handler) = self.status_handler.as_mut() {
            handler.on_status(signal);
        }
    }

    fn signal_terminal(&mut self, signal: SessionSignal) {
        // Dropping the handler afterwards guarantees at most one terminal.
        if let Some(mut handler) = self.status_handler.take() {
            handler.on_status(signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct NoopHandle;

    impl RecognitionHandle for NoopHandle {
        fn finish(&mut self) {}
    }

    fn recorder() -> (
        Arc<Mutex<Vec<String>>>,
        Arc<Mutex<Vec<SessionSignal>>>,
        Box<dyn ResultHandler>,
        Box<dyn StatusHandler>,
    ) {
        let results: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let signals: Arc<Mutex<Vec<SessionSignal>>> = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&results);
        let s = Arc::clone(&signals);
        (
            results,
            signals,
            Box::new(move |text: &str| r.lock().push(text.to_string())),
            Box::new(move |signal: SessionSignal| s.lock().push(signal)),
        )
    }

    #[test]
    fn normal_lifecycle_fires_one_terminal() {
        let mut session = RecognitionSession::new(16);
        let (results, signals, result_cb, status_cb) = recorder();

        let epoch = session.begin(result_cb, status_cb);
        session.attach_handle(Box::new(NoopHandle));
        assert!(session.epoch_matches(epoch));

        session.mark_listening();
        session.mark_listening(); // idempotent
        session.deliver_result("hello");
        assert!(session.request_stop());
        assert!(!session.request_stop(), "second stop is not effective");
        session.deliver_result("hello world");
        session.finish_stopped();
        session.reset_idle();

        assert_eq!(*results.lock(), vec!["hello", "hello world"]);
        assert_eq!(
            *signals.lock(),
            vec![
                SessionSignal::Starting,
                SessionSignal::Listening,
                SessionSignal::StoppedNormally,
            ]
        );
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(!session.epoch_matches(epoch), "epoch retired at terminal");
    }

    #[test]
    fn failure_suppresses_later_results_and_signals() {
        let mut session = RecognitionSession::new(16);
        let (results, signals, result_cb, status_cb) = recorder();

        session.begin(result_cb, status_cb);
        session.attach_handle(Box::new(NoopHandle));
        session.mark_listening();
        session.fail(SessionFailure::Engine("device unavailable".into()));
        session.reset_idle();

        // Late engine output must not reach the caller.
        session.deliver_result("stale");
        session.finish_stopped();

        assert!(results.lock().is_empty());
        let signals = signals.lock();
        assert_eq!(signals.len(), 3);
        assert_eq!(
            signals[2],
            SessionSignal::Failed(SessionFailure::Engine("device unavailable".into()))
        );
    }

    #[test]
    fn cancelled_parked_start_delivers_single_terminal() {
        let mut session = RecognitionSession::new(16);
        let (results, signals, result_cb, status_cb) = recorder();

        session.park(result_cb, status_cb);
        assert!(session.has_parked());
        session.cancel_parked();
        session.cancel_parked(); // second cancel is a no-op

        assert!(results.lock().is_empty());
        assert_eq!(*signals.lock(), vec![SessionSignal::StoppedNormally]);
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[test]
    fn denied_parked_start_reports_permission_failure() {
        let mut session = RecognitionSession::new(16);
        let (results, signals, result_cb, status_cb) = recorder();

        session.park(result_cb, status_cb);
        session.deny_parked();

        assert!(results.lock().is_empty());
        assert_eq!(
            *signals.lock(),
            vec![SessionSignal::Failed(SessionFailure::PermissionDenied)]
        );
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[test]
    fn transcript_is_bounded() {
        let mut session = RecognitionSession::new(2);
        let (_results, _signals, result_cb, status_cb) = recorder();

        session.begin(result_cb, status_cb);
        session.deliver_result("a");
        session.deliver_result("b");
        session.deliver_result("c");
        assert_eq!(session.transcript(), ["b", "c"]);
    }
}
