//! `SpeechController` — top-level façade over the speech bridge.
//!
//! ## Lifecycle
//!
//! ```text
//! SpeechController::new(permission, recognition, synthesis)
//!     ├─► request_permission(cb)          → cached or one platform prompt
//!     ├─► start_recording(result, status) → session Starting → Listening
//!     │       └─► stop_recording()       → Stopping → Stopped → Idle
//!     ├─► start_speaking(text)            → FIFO utterance queue
//!     │       └─► stop_speaking()        → immediate cancellation
//!     └─► dispose()                       → engines released, worker joined
//! ```
//!
//! ## Threading
//!
//! Every public call returns immediately. All state transitions are
//! serialized through one command queue consumed by a dedicated coordinator
//! thread — `start`, `stop`, `speak`, and engine callbacks never interleave
//! into an inconsistent state. The controller keeps a read-side snapshot
//! for synchronous checks (`session_status`, `permission_state`, ...).
//!
//! Recording and speaking are mutually exclusive on the audio path. The
//! default policy is pre-emption: starting recognition cancels active
//! synthesis, and speaking while listening gracefully stops the session
//! (playback waits until the session is fully idle). Setting
//! `ControllerConfig::preempt_on_conflict` to `false` switches to strict
//! rejection with `ConflictingOperation`.

pub(crate) mod coordinator;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::engines::{PermissionProvider, RecognitionEngine, SynthesisEngine};
use crate::error::{ColloquyError, Result};
use crate::events::{SessionStatusEvent, TranscriptEvent, UtteranceEvent};
use crate::handlers::{ResultHandler, StatusHandler};
use crate::permission::{PermissionGate, PermissionState};
use crate::session::{RecognitionSession, SessionStatus};
use crate::synthesis::SynthesisQueue;

use coordinator::{Command, Coordinator, SharedSnapshot};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `SpeechController`.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Resolve recording/speaking conflicts by cancelling the other
    /// operation (`true`, default) instead of rejecting the new request
    /// with `ConflictingOperation` (`false`).
    pub preempt_on_conflict: bool,
    /// Fragments retained in the session transcript snapshot. Default: 256.
    pub max_transcript_fragments: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            preempt_on_conflict: true,
            max_transcript_fragments: 256,
        }
    }
}

/// Coordinator counters for observability.
#[derive(Debug, Default)]
pub struct CoordinatorDiagnostics {
    pub sessions_started: AtomicUsize,
    pub sessions_completed: AtomicUsize,
    pub sessions_failed: AtomicUsize,
    pub results_delivered: AtomicUsize,
    pub utterances_enqueued: AtomicUsize,
    pub utterances_completed: AtomicUsize,
    pub utterances_cancelled: AtomicUsize,
    pub synthesis_errors: AtomicUsize,
    pub preemptions: AtomicUsize,
}

impl CoordinatorDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            results_delivered: self.results_delivered.load(Ordering::Relaxed),
            utterances_enqueued: self.utterances_enqueued.load(Ordering::Relaxed),
            utterances_completed: self.utterances_completed.load(Ordering::Relaxed),
            utterances_cancelled: self.utterances_cancelled.load(Ordering::Relaxed),
            synthesis_errors: self.synthesis_errors.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
        }
    }
}

/// One-lock snapshot of the externally observable bridge state.
#[derive(Debug, Clone, Copy)]
pub struct BridgeState {
    pub permission: PermissionState,
    pub session_status: SessionStatus,
    /// A start is parked awaiting permission resolution.
    pub pending_start: bool,
    pub speaking: bool,
    pub queue_len: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub sessions_started: usize,
    pub sessions_completed: usize,
    pub sessions_failed: usize,
    pub results_delivered: usize,
    pub utterances_enqueued: usize,
    pub utterances_completed: usize,
    pub utterances_cancelled: usize,
    pub synthesis_errors: usize,
    pub preemptions: usize,
}

/// The top-level controller handle.
///
/// `SpeechController` is `Send + Sync` — all fields use interior
/// mutability. Wrap in `Arc` to share between threads; every operation
/// takes `&self`.
pub struct SpeechController {
    config: ControllerConfig,
    tx: Sender<Command>,
    shared: Arc<Mutex<SharedSnapshot>>,
    diagnostics: Arc<CoordinatorDiagnostics>,
    transcript_tx: broadcast::Sender<TranscriptEvent>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    utterance_tx: broadcast::Sender<UtteranceEvent>,
    next_utterance_id: AtomicU64,
    disposed: AtomicBool,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SpeechController {
    /// Create a controller with default configuration.
    pub fn new(
        permission: Box<dyn PermissionProvider>,
        recognition: Box<dyn RecognitionEngine>,
        synthesis: Box<dyn SynthesisEngine>,
    ) -> Self {
        Self::with_config(ControllerConfig::default(), permission, recognition, synthesis)
    }

    /// Create a controller and spawn its coordinator thread.
    pub fn with_config(
        config: ControllerConfig,
        permission: Box<dyn PermissionProvider>,
        recognition: Box<dyn RecognitionEngine>,
        synthesis: Box<dyn SynthesisEngine>,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Mutex::new(SharedSnapshot::default()));
        let diagnostics = Arc::new(CoordinatorDiagnostics::default());
        let (transcript_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (utterance_tx, _) = broadcast::channel(BROADCAST_CAP);

        let coordinator = Coordinator {
            config: config.clone(),
            rx,
            tx: tx.clone(),
            gate: PermissionGate::new(permission),
            session: RecognitionSession::new(config.max_transcript_fragments),
            recognition,
            queue: SynthesisQueue::new(synthesis),
            shared: Arc::clone(&shared),
            diagnostics: Arc::clone(&diagnostics),
            transcript_tx: transcript_tx.clone(),
            status_tx: status_tx.clone(),
            utterance_tx: utterance_tx.clone(),
            transcript_seq: 0,
        };
        let worker = thread::spawn(move || coordinator::run(coordinator));

        Self {
            config,
            tx,
            shared,
            diagnostics,
            transcript_tx,
            status_tx,
            utterance_tx,
            next_utterance_id: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Resolve microphone/recognition permission.
    ///
    /// A cached Granted/Denied answers immediately on the calling thread —
    /// no re-prompt. Undetermined delegates to the platform provider
    /// (prompting at most once per process lifetime) and completes
    /// asynchronously. After `dispose` the cached state is all there is.
    pub fn request_permission<F>(&self, on_result: F)
    where
        F: FnOnce(PermissionState) + Send + 'static,
    {
        let state = self.shared.lock().permission;
        if state != PermissionState::Undetermined || self.disposed.load(Ordering::SeqCst) {
            on_result(state);
            return;
        }
        if let Err(rejected) = self.tx.send(Command::RequestPermission {
            callback: Box::new(on_result),
        }) {
            // Coordinator already gone; answer with what we know.
            if let Command::RequestPermission { callback } = rejected.0 {
                callback(state);
            }
        }
    }

    /// Start a recording-to-text session.
    ///
    /// Results stream to `result`; status signals (including exactly one
    /// terminal) go to `status`. With pre-emption on, active synthesis is
    /// cancelled first.
    ///
    /// # Errors
    /// - `Disposed` after teardown.
    /// - `PermissionDenied` when access was already denied (the engine is
    ///   never engaged).
    /// - `ConflictingOperation` when a session is already active or
    ///   pending, or when pre-emption is disabled and synthesis is active.
    pub fn start_recording<R, S>(&self, result: R, status: S) -> Result<()>
    where
        R: ResultHandler,
        S: StatusHandler,
    {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ColloquyError::Disposed);
        }
        {
            let shared = self.shared.lock();
            if shared.permission == PermissionState::Denied {
                return Err(ColloquyError::PermissionDenied);
            }
            if shared.session_status.is_active() || shared.pending_start {
                return Err(ColloquyError::ConflictingOperation);
            }
            if !self.config.preempt_on_conflict && (shared.speaking || shared.queue_len > 0) {
                return Err(ColloquyError::ConflictingOperation);
            }
        }
        self.tx
            .send(Command::StartRecording {
                result: Box::new(result),
                status: Box::new(status),
            })
            .map_err(|_| ColloquyError::Disposed)
    }

    /// Stop the active session, if any.
    ///
    /// Gracefully finalizes: the engine flushes its last buffered result
    /// before the terminal status signal fires. Stopping an idle or
    /// already-stopped session is a no-op; concurrent stops are safe and
    /// only the first effective one performs work. Also cancels a start
    /// still waiting on permission resolution.
    pub fn stop_recording(&self) {
        let _ = self.tx.send(Command::StopRecording);
    }

    /// Queue text for synthesis and return the utterance id.
    ///
    /// FIFO: utterances play strictly in submission order, one at a time.
    /// With pre-emption on, an active recognition session is stopped first
    /// and playback begins once it is fully idle.
    ///
    /// # Errors
    /// - `Disposed` after teardown.
    /// - `EmptyInput` for empty or whitespace-only text.
    /// - `ConflictingOperation` when pre-emption is disabled and a session
    ///   is active or pending.
    pub fn start_speaking(&self, text: &str) -> Result<u64> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ColloquyError::Disposed);
        }
        if text.trim().is_empty() {
            return Err(ColloquyError::EmptyInput);
        }
        if !self.config.preempt_on_conflict {
            let shared = self.shared.lock();
            if shared.session_status.is_active() || shared.pending_start {
                return Err(ColloquyError::ConflictingOperation);
            }
        }
        let id = self.next_utterance_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.tx
            .send(Command::StartSpeaking {
                id,
                text: text.to_string(),
            })
            .map_err(|_| ColloquyError::Disposed)?;
        Ok(id)
    }

    /// Cancel the in-flight utterance and drop everything queued.
    /// A no-op when nothing is speaking.
    pub fn stop_speaking(&self) {
        let _ = self.tx.send(Command::StopSpeaking);
    }

    /// Consistent snapshot of the externally observable bridge state.
    ///
    /// All fields are read under one lock, so mutually exclusive states
    /// (listening + speaking) can never be observed together.
    pub fn state_snapshot(&self) -> BridgeState {
        let shared = self.shared.lock();
        BridgeState {
            permission: shared.permission,
            session_status: shared.session_status,
            pending_start: shared.pending_start,
            speaking: shared.speaking,
            queue_len: shared.queue_len,
        }
    }

    /// Current permission state (snapshot).
    pub fn permission_state(&self) -> PermissionState {
        self.shared.lock().permission
    }

    /// Current session status (snapshot).
    pub fn session_status(&self) -> SessionStatus {
        self.shared.lock().session_status
    }

    /// Whether an utterance is currently being rendered (snapshot).
    pub fn is_speaking(&self) -> bool {
        self.shared.lock().speaking
    }

    /// Utterances waiting behind the active one (snapshot).
    pub fn queue_len(&self) -> usize {
        self.shared.lock().queue_len
    }

    /// Ordered fragments recognised by the current/last session (snapshot).
    pub fn transcript_snapshot(&self) -> Vec<String> {
        self.shared.lock().transcript.clone()
    }

    /// Subscribe to recognised text fragments.
    pub fn subscribe_transcripts(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.transcript_tx.subscribe()
    }

    /// Subscribe to session status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to utterance status change events.
    pub fn subscribe_utterances(&self) -> broadcast::Receiver<UtteranceEvent> {
        self.utterance_tx.subscribe()
    }

    /// Snapshot of coordinator counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Tear down: stop the session, cancel synthesis, release engine
    /// handles, and join the coordinator thread. Idempotent. Must not be
    /// called from inside a handler callback (it would join the thread the
    /// callback runs on).
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("disposing speech controller");
        let _ = self.tx.send(Command::Dispose);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SpeechController {
    fn drop(&mut self) {
        self.dispose();
    }
}
