//! Capability interfaces for the external speech engines.
//!
//! The traits decouple the coordinator from any specific backend (platform
//! recognizer, cloud STT, local neural TTS, the stubs in [`stub`], ...).
//! Engines are treated as unreliable I/O: they may fail to start, error
//! mid-stream, or deliver callbacks on their own threads.
//!
//! ## Callback marshalling
//!
//! Engines never touch coordinator state. Each engine is handed a *sink*
//! (or a responder, for permission) that forwards its callbacks into the
//! coordinator's single-consumer command queue, so every callback is
//! re-serialized into the one mutual-exclusion domain before any state
//! changes. Sinks are `Clone + Send` and may be used from any thread.

pub mod stub;

use crossbeam_channel::Sender;

use crate::controller::coordinator::Command;
use crate::error::Result;

/// Event stream of a recognition session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// The engine is capturing and ready; speech may now be recognised.
    Ready,
    /// A streaming hypothesis — text may still change.
    Partial(String),
    /// A committed recognition result.
    Final(String),
    /// End of stream. After `finish()` the engine emits any last buffered
    /// result, then `Ended`. Engines may also end spontaneously.
    Ended,
    /// The engine failed; no further events follow.
    Error(String),
}

/// Outcome events for one synthesis utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    Completed,
    Cancelled,
    Error(String),
}

/// One-shot resolution handle for a platform permission prompt.
pub struct PermissionResponder {
    tx: Sender<Command>,
}

impl PermissionResponder {
    pub(crate) fn new(tx: Sender<Command>) -> Self {
        Self { tx }
    }

    /// Deliver the user's decision. Consumes the responder — a prompt
    /// resolves exactly once.
    pub fn resolve(self, granted: bool) {
        let _ = self.tx.send(Command::PermissionResolved { granted });
    }
}

/// Forwards recognition callbacks into the coordinator queue.
///
/// Tagged with the session epoch; events from a finished or failed session
/// are discarded by the coordinator instead of leaking into a newer one.
#[derive(Clone)]
pub struct RecognitionSink {
    epoch: u64,
    tx: Sender<Command>,
}

impl RecognitionSink {
    pub(crate) fn new(epoch: u64, tx: Sender<Command>) -> Self {
        Self { epoch, tx }
    }

    pub fn emit(&self, event: RecognitionEvent) {
        let _ = self.tx.send(Command::Recognition {
            epoch: self.epoch,
            event,
        });
    }
}

/// Forwards synthesis callbacks into the coordinator queue.
#[derive(Clone)]
pub struct SynthesisSink {
    utterance: u64,
    tx: Sender<Command>,
}

impl SynthesisSink {
    pub(crate) fn new(utterance: u64, tx: Sender<Command>) -> Self {
        Self { utterance, tx }
    }

    pub fn emit(&self, event: SynthesisEvent) {
        let _ = self.tx.send(Command::Synthesis {
            utterance: self.utterance,
            event,
        });
    }
}

/// Platform authorization capability.
pub trait PermissionProvider: Send + 'static {
    /// Show the consent prompt (or consult platform state) and resolve the
    /// responder exactly once, from any thread. Called at most once per
    /// process lifetime — the gate caches the outcome.
    fn request_access(&mut self, responder: PermissionResponder);
}

/// Capture + speech-to-text capability.
pub trait RecognitionEngine: Send + 'static {
    /// Open a capture/recognition stream. Events flow through `sink`;
    /// the returned handle controls the stream.
    ///
    /// # Errors
    /// Returns an error if the stream cannot be opened (no device, engine
    /// refusal). The session fails without ever becoming active.
    fn begin_session(&mut self, sink: RecognitionSink) -> Result<Box<dyn RecognitionHandle>>;
}

/// Control handle for one recognition stream.
pub trait RecognitionHandle: Send {
    /// Request a flush: emit any last buffered result, then `Ended`.
    fn finish(&mut self);
}

/// Text-to-speech capability.
pub trait SynthesisEngine: Send + 'static {
    /// Start rendering one utterance. The queue drives this one utterance
    /// at a time; the engine reports the outcome through `sink`.
    ///
    /// # Errors
    /// Returns an error if playback cannot start; the queue advances past
    /// the utterance.
    fn speak(&mut self, text: &str, sink: SynthesisSink) -> Result<Box<dyn SynthesisHandle>>;
}

/// Control handle for one in-flight utterance.
pub trait SynthesisHandle: Send {
    /// Stop playback as soon as possible. The engine follows up with
    /// `Cancelled` on its sink.
    fn cancel(&mut self);
}
