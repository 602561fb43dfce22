//! Single-consumer coordination loop.
//!
//! ## Per-command flow
//!
//! ```text
//! 1. Public call or engine sink → Command on the queue
//! 2. Coordinator thread applies the transition (gate/session/queue)
//! 3. Caller handlers fire inline, in command order
//! 4. Observer events broadcast; read-side snapshot refreshed
//! ```
//!
//! The queue *is* the mutual-exclusion domain: one consumer thread owns the
//! permission gate, the recognition session, and the synthesis queue, so no
//! interleaving of `start`/`stop`/`speak`/engine callbacks can observe a
//! half-applied transition. Ordering falls out of the same structure — a
//! result queued before a stop completes is delivered before the terminal
//! status signal.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::engines::{RecognitionEngine, RecognitionEvent, RecognitionSink, SynthesisEvent};
use crate::events::{FragmentKind, SessionStatusEvent, TranscriptEvent, UtteranceEvent};
use crate::handlers::{ResultHandler, StatusHandler};
use crate::permission::{PermissionCallback, PermissionGate, PermissionState};
use crate::session::{RecognitionSession, SessionFailure, SessionSignal, SessionStatus};
use crate::synthesis::{SynthesisQueue, UtteranceStatus, UtteranceTransition};

use super::{ControllerConfig, CoordinatorDiagnostics};

/// Everything the coordinator serializes.
pub(crate) enum Command {
    RequestPermission {
        callback: PermissionCallback,
    },
    PermissionResolved {
        granted: bool,
    },
    StartRecording {
        result: Box<dyn ResultHandler>,
        status: Box<dyn StatusHandler>,
    },
    StopRecording,
    StartSpeaking {
        id: u64,
        text: String,
    },
    StopSpeaking,
    Recognition {
        epoch: u64,
        event: RecognitionEvent,
    },
    Synthesis {
        utterance: u64,
        event: SynthesisEvent,
    },
    Dispose,
}

/// Read-side state mirror for synchronous checks on caller threads.
#[derive(Debug, Clone)]
pub(crate) struct SharedSnapshot {
    pub permission: PermissionState,
    pub session_status: SessionStatus,
    /// A start is parked awaiting permission resolution.
    pub pending_start: bool,
    pub speaking: bool,
    pub queue_len: usize,
    pub transcript: Vec<String>,
}

impl Default for SharedSnapshot {
    fn default() -> Self {
        Self {
            permission: PermissionState::Undetermined,
            session_status: SessionStatus::Idle,
            pending_start: false,
            speaking: false,
            queue_len: 0,
            transcript: Vec::new(),
        }
    }
}

/// All state the coordinator owns, passed as one struct so the spawn site
/// stays tidy.
pub(crate) struct Coordinator {
    pub config: ControllerConfig,
    pub rx: Receiver<Command>,
    pub tx: Sender<Command>,
    pub gate: PermissionGate,
    pub session: RecognitionSession,
    pub recognition: Box<dyn RecognitionEngine>,
    pub queue: SynthesisQueue,
    pub shared: Arc<Mutex<SharedSnapshot>>,
    pub diagnostics: Arc<CoordinatorDiagnostics>,
    pub transcript_tx: broadcast::Sender<TranscriptEvent>,
    pub status_tx: broadcast::Sender<SessionStatusEvent>,
    pub utterance_tx: broadcast::Sender<UtteranceEvent>,
    pub transcript_seq: u64,
}

impl Coordinator {
    fn handle(&mut self, command: Command) {
        match command {
            Command::RequestPermission { callback } => {
                self.gate.request(Some(callback), &self.tx);
                self.sync_shared();
            }
            Command::PermissionResolved { granted } => self.on_permission_resolved(granted),
            Command::StartRecording { result, status } => self.on_start_recording(result, status),
            Command::StopRecording => self.on_stop_recording(),
            Command::StartSpeaking { id, text } => self.on_start_speaking(id, text),
            Command::StopSpeaking => self.on_stop_speaking(),
            Command::Recognition { epoch, event } => self.on_recognition_event(epoch, event),
            Command::Synthesis { utterance, event } => self.on_synthesis_event(utterance, event),
            // Handled in `run`.
            Command::Dispose => {}
        }
    }

    // ── Recording ────────────────────────────────────────────────────────

    fn on_start_recording(
        &mut self,
        result: Box<dyn ResultHandler>,
        mut status: Box<dyn StatusHandler>,
    ) {
        // Recording and speaking are mutually exclusive: recording wins.
        if self.queue.is_speaking() || self.queue.queue_len() > 0 {
            if self.config.preempt_on_conflict {
                info!("pre-empting active synthesis for a recognition session");
                self.diagnostics.preemptions.fetch_add(1, Ordering::Relaxed);
                let transitions = self.queue.cancel_all();
                self.publish_utterances(transitions);
                self.sync_shared();
            } else {
                status.on_status(SessionSignal::Failed(SessionFailure::Conflict));
                return;
            }
        }

        // Only one session at a time; a racing second start loses.
        if self.session.status().is_active() || self.session.has_parked() {
            warn!("start_recording rejected: session already active");
            status.on_status(SessionSignal::Failed(SessionFailure::Conflict));
            return;
        }

        match self.gate.state() {
            PermissionState::Denied => {
                // The synchronous check raced a denial; report on the
                // status channel since the call already returned Ok.
                status.on_status(SessionSignal::Failed(SessionFailure::PermissionDenied));
            }
            PermissionState::Granted => {
                self.engage(result, status);
            }
            PermissionState::Undetermined => {
                self.session.park(result, status);
                self.gate.request(None, &self.tx);
                self.sync_shared();
            }
        }
    }

    /// Engage the recognition engine: Idle → Starting (→ Failed on refusal).
    fn engage(&mut self, result: Box<dyn ResultHandler>, status: Box<dyn StatusHandler>) {
        self.diagnostics
            .sessions_started
            .fetch_add(1, Ordering::Relaxed);
        let epoch = self.session.begin(result, status);
        self.publish_status(None);

        let sink = RecognitionSink::new(epoch, self.tx.clone());
        match self.recognition.begin_session(sink) {
            Ok(handle) => {
                self.session.attach_handle(handle);
                self.sync_shared();
            }
            Err(e) => {
                warn!("recognition engine failed to start: {e}");
                self.fail_session(SessionFailure::Engine(e.to_string()));
            }
        }
    }

    fn on_stop_recording(&mut self) {
        if self.session.has_parked() {
            // Cancel before the engine was ever engaged.
            self.session.cancel_parked();
            self.sync_shared();
            self.pump_queue();
            return;
        }
        match self.session.status() {
            SessionStatus::Starting | SessionStatus::Listening => {
                self.session.request_stop();
                self.publish_status(None);
                self.sync_shared();
            }
            // Idle, Stopping, Stopped, Failed: no-op.
            _ => debug!("stop_recording ignored: no effective session"),
        }
    }

    fn on_recognition_event(&mut self, epoch: u64, event: RecognitionEvent) {
        if !self.session.epoch_matches(epoch) {
            debug!(epoch, "discarding stale recognition event");
            return;
        }
        match event {
            RecognitionEvent::Ready => {
                if self.session.status() == SessionStatus::Starting {
                    self.session.mark_listening();
                    self.publish_status(None);
                    self.sync_shared();
                }
            }
            RecognitionEvent::Partial(text) => self.deliver_result(text, FragmentKind::Partial),
            RecognitionEvent::Final(text) => self.deliver_result(text, FragmentKind::Final),
            RecognitionEvent::Ended => {
                // Graceful end — either a requested stop completing after
                // its last buffered result, or the engine ending on its own.
                self.session.finish_stopped();
                self.diagnostics
                    .sessions_completed
                    .fetch_add(1, Ordering::Relaxed);
                self.publish_status(None);
                self.session.reset_idle();
                self.publish_status(None);
                self.sync_shared();
                self.pump_queue();
            }
            RecognitionEvent::Error(msg) => {
                warn!("recognition engine error: {msg}");
                self.fail_session(SessionFailure::Engine(msg));
            }
        }
    }

    fn deliver_result(&mut self, text: String, kind: FragmentKind) {
        // The first result doubles as the ready signal.
        if self.session.status() == SessionStatus::Starting {
            self.session.mark_listening();
            self.publish_status(None);
        }
        if !self.session.status().is_active() {
            return;
        }
        self.session.deliver_result(&text);
        self.diagnostics
            .results_delivered
            .fetch_add(1, Ordering::Relaxed);
        self.transcript_seq += 1;
        let _ = self.transcript_tx.send(TranscriptEvent {
            seq: self.transcript_seq,
            text,
            kind,
        });
        self.sync_shared();
    }

    /// Session → Failed → Idle; the system is ready for a fresh start.
    fn fail_session(&mut self, failure: SessionFailure) {
        let detail = failure.to_string();
        self.session.fail(failure);
        self.diagnostics
            .sessions_failed
            .fetch_add(1, Ordering::Relaxed);
        self.publish_status(Some(detail));
        self.session.reset_idle();
        self.publish_status(None);
        self.sync_shared();
        self.pump_queue();
    }

    // ── Permission ───────────────────────────────────────────────────────

    fn on_permission_resolved(&mut self, granted: bool) {
        info!(granted, "permission request resolved");
        self.gate.resolve(granted);
        self.sync_shared();

        if self.session.has_parked() {
            if granted {
                if let Some(parked) = self.session.take_parked() {
                    self.engage(parked.result, parked.status);
                }
            } else {
                self.session.deny_parked();
                self.sync_shared();
                self.pump_queue();
            }
        }
    }

    // ── Synthesis ────────────────────────────────────────────────────────

    fn on_start_speaking(&mut self, id: u64, text: String) {
        // Speaking while listening stops the session; playback waits until
        // the session is fully idle.
        if self.session.has_parked() {
            if !self.config.preempt_on_conflict {
                warn!(id, "utterance dropped: session pending and pre-emption off");
                self.drop_utterance(id, text);
                return;
            }
            info!("pre-empting parked recognition start for synthesis");
            self.diagnostics.preemptions.fetch_add(1, Ordering::Relaxed);
            self.session.cancel_parked();
            self.sync_shared();
        } else if self.session.status().is_active() {
            if !self.config.preempt_on_conflict {
                warn!(id, "utterance dropped: session active and pre-emption off");
                self.drop_utterance(id, text);
                return;
            }
            if self.session.request_stop() {
                info!("pre-empting active recognition session for synthesis");
                self.diagnostics.preemptions.fetch_add(1, Ordering::Relaxed);
                self.publish_status(None);
                self.sync_shared();
            }
            // Already Stopping: the queue simply waits for the session to
            // finish draining.
        }

        match self.queue.enqueue(id, text) {
            Ok(transition) => {
                self.diagnostics
                    .utterances_enqueued
                    .fetch_add(1, Ordering::Relaxed);
                self.publish_utterances(vec![transition]);
                self.pump_queue();
            }
            Err(e) => {
                // Validated at the call site; only a racing caller path
                // lands here.
                warn!(id, "utterance rejected: {e}");
            }
        }
    }

    /// A raced utterance that lost to strict conflict rejection still gets
    /// a terminal event so observers are not left hanging.
    fn drop_utterance(&mut self, id: u64, text: String) {
        self.publish_utterances(vec![UtteranceTransition {
            id,
            status: UtteranceStatus::Cancelled,
            text,
            engine_error: None,
        }]);
    }

    fn on_stop_speaking(&mut self) {
        let transitions = self.queue.cancel_all();
        self.publish_utterances(transitions);
        self.sync_shared();
    }

    fn on_synthesis_event(&mut self, utterance: u64, event: SynthesisEvent) {
        let transitions = self.queue.on_event(utterance, event);
        self.publish_utterances(transitions);
        self.pump_queue();
    }

    /// Advance playback if the audio path is free.
    fn pump_queue(&mut self) {
        let blocked = self.session.status().is_active() || self.session.has_parked();
        let transitions = self.queue.pump(blocked, &self.tx);
        self.publish_utterances(transitions);
        self.sync_shared();
    }

    // ── Teardown ─────────────────────────────────────────────────────────

    fn teardown(&mut self) {
        info!("coordinator tearing down");
        self.session.cancel_parked();
        if self.session.status().is_active() {
            // Tell the engine to finalize, then release without waiting.
            self.session.request_stop();
            self.session.finish_stopped();
            self.publish_status(None);
            self.session.reset_idle();
            self.publish_status(None);
        }
        let transitions = self.queue.cancel_all();
        self.publish_utterances(transitions);
        self.sync_shared();
    }

    // ── Event fan-out ────────────────────────────────────────────────────

    fn publish_status(&mut self, detail: Option<String>) {
        let _ = self.status_tx.send(SessionStatusEvent {
            status: self.session.status(),
            detail,
        });
    }

    fn publish_utterances(&mut self, transitions: Vec<UtteranceTransition>) {
        for transition in transitions {
            match transition.status {
                UtteranceStatus::Completed => {
                    self.diagnostics
                        .utterances_completed
                        .fetch_add(1, Ordering::Relaxed);
                }
                UtteranceStatus::Cancelled => {
                    self.diagnostics
                        .utterances_cancelled
                        .fetch_add(1, Ordering::Relaxed);
                    if transition.engine_error.is_some() {
                        self.diagnostics
                            .synthesis_errors
                            .fetch_add(1, Ordering::Relaxed);
                    }
                }
                UtteranceStatus::Queued | UtteranceStatus::Speaking => {}
            }
            let _ = self.utterance_tx.send(UtteranceEvent {
                id: transition.id,
                status: transition.status,
                text: transition.text,
            });
        }
    }

    fn sync_shared(&mut self) {
        let mut shared = self.shared.lock();
        shared.permission = self.gate.state();
        shared.session_status = self.session.status();
        shared.pending_start = self.session.has_parked();
        shared.speaking = self.queue.is_speaking();
        shared.queue_len = self.queue.queue_len();
        shared.transcript = self.session.transcript().to_vec();
    }
}

/// Run the coordination loop until `Dispose` or until every sender is gone.
pub(crate) fn run(mut coordinator: Coordinator) {
    info!("speech coordinator started");
    while let Ok(command) = coordinator.rx.recv() {
        if matches!(command, Command::Dispose) {
            coordinator.teardown();
            break;
        }
        coordinator.handle(command);
    }
    info!("speech coordinator stopped");
}
