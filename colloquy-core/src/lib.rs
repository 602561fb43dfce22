//! # colloquy-core
//!
//! Speech bridge SDK: the session state machine and callback coordinator
//! sitting between a caller and three asynchronous platform capabilities —
//! permission prompts, streaming speech recognition, and text-to-speech.
//!
//! ## Architecture
//!
//! ```text
//! caller ──► SpeechController ──► Command queue (single consumer)
//!                                       │
//!                      ┌────────────────┼────────────────┐
//!               PermissionGate  RecognitionSession  SynthesisQueue
//!                      │                │                │
//!              PermissionProvider RecognitionEngine SynthesisEngine
//!                      └──── sinks re-serialize callbacks ────┘
//! ```
//!
//! Engines deliver callbacks on their own threads; sinks forward them into
//! the command queue, so every transition happens on one coordinator
//! thread. Caller handlers fire inline in command order, which is what
//! makes the ordering guarantee (results strictly before the terminal
//! status signal) structural rather than best-effort.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod controller;
pub mod engines;
pub mod error;
pub mod events;
pub mod handlers;
pub mod permission;
pub mod session;
pub mod synthesis;

// Convenience re-exports for downstream crates
pub use controller::{BridgeState, ControllerConfig, DiagnosticsSnapshot, SpeechController};
pub use engines::{
    PermissionProvider, PermissionResponder, RecognitionEngine, RecognitionEvent,
    RecognitionHandle, RecognitionSink, SynthesisEngine, SynthesisEvent, SynthesisHandle,
    SynthesisSink,
};
pub use error::ColloquyError;
pub use events::{FragmentKind, SessionStatusEvent, TranscriptEvent, UtteranceEvent};
pub use handlers::{ResultHandler, StatusHandler};
pub use permission::PermissionState;
pub use session::{SessionFailure, SessionSignal, SessionStatus};
pub use synthesis::{Utterance, UtteranceStatus};
