//! Stub engines — placeholder backends with no real audio I/O.
//!
//! Used by the CLI host and as ready-made fakes in tests, so the full
//! controller/coordinator path can be exercised end-to-end before real
//! platform engines are wired in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::engines::{
    PermissionProvider, PermissionResponder, RecognitionEngine, RecognitionEvent,
    RecognitionHandle, RecognitionSink, SynthesisEngine, SynthesisEvent, SynthesisHandle,
    SynthesisSink,
};
use crate::error::Result;
use crate::events::FragmentKind;

/// Permission provider with a canned answer and configurable latency.
pub struct StubPermission {
    grant: bool,
    delay: Duration,
}

impl StubPermission {
    pub fn granting() -> Self {
        Self {
            grant: true,
            delay: Duration::from_millis(10),
        }
    }

    pub fn denying() -> Self {
        Self {
            grant: false,
            delay: Duration::from_millis(10),
        }
    }

    /// Simulated time the consent prompt stays open.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl PermissionProvider for StubPermission {
    fn request_access(&mut self, responder: PermissionResponder) {
        let grant = self.grant;
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            debug!(grant, "stub permission prompt resolving");
            responder.resolve(grant);
        });
    }
}

/// One scripted recognition output.
#[derive(Debug, Clone)]
pub struct ScriptedFragment {
    pub text: String,
    pub kind: FragmentKind,
}

impl ScriptedFragment {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: FragmentKind::Partial,
        }
    }

    pub fn committed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: FragmentKind::Final,
        }
    }
}

/// Recognition engine that replays a script on a worker thread.
///
/// Emits `Ready`, then one fragment per `step`. `finish()` flushes the next
/// committed fragment (if the script still has one) and ends the stream;
/// an exhausted script ends the stream spontaneously.
pub struct ScriptedRecognition {
    script: Vec<ScriptedFragment>,
    step: Duration,
}

impl ScriptedRecognition {
    pub fn new(script: Vec<ScriptedFragment>) -> Self {
        Self {
            script,
            step: Duration::from_millis(25),
        }
    }

    /// Pacing between scripted fragments.
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }
}

impl RecognitionEngine for ScriptedRecognition {
    fn begin_session(&mut self, sink: RecognitionSink) -> Result<Box<dyn RecognitionHandle>> {
        let finish = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finish);
        let script = self.script.clone();
        let step = self.step;

        thread::spawn(move || {
            sink.emit(RecognitionEvent::Ready);
            let mut fragments = script.into_iter();
            loop {
                if flag.load(Ordering::SeqCst) {
                    // Flush the last buffered result before ending.
                    if let Some(f) = fragments.find(|f| f.kind == FragmentKind::Final) {
                        sink.emit(RecognitionEvent::Final(f.text));
                    }
                    break;
                }
                let Some(f) = fragments.next() else {
                    break;
                };
                thread::sleep(step);
                match f.kind {
                    FragmentKind::Partial => sink.emit(RecognitionEvent::Partial(f.text)),
                    FragmentKind::Final => sink.emit(RecognitionEvent::Final(f.text)),
                }
            }
            debug!("scripted recognition stream ended");
            sink.emit(RecognitionEvent::Ended);
        });

        Ok(Box::new(ScriptedHandle { finish }))
    }
}

struct ScriptedHandle {
    finish: Arc<AtomicBool>,
}

impl RecognitionHandle for ScriptedHandle {
    fn finish(&mut self) {
        self.finish.store(true, Ordering::SeqCst);
    }
}

/// Synthesis engine that "plays" text at a fixed per-character pace.
pub struct StubSynthesis {
    char_ms: u64,
}

impl StubSynthesis {
    pub fn new() -> Self {
        Self { char_ms: 5 }
    }

    /// Milliseconds of simulated playback per character.
    pub fn with_pacing(char_ms: u64) -> Self {
        Self { char_ms }
    }
}

impl Default for StubSynthesis {
    fn default() -> Self {
        Self::new()
    }
}

impl SynthesisEngine for StubSynthesis {
    fn speak(&mut self, text: &str, sink: SynthesisSink) -> Result<Box<dyn SynthesisHandle>> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let total = Duration::from_millis(
            self.char_ms
                .saturating_mul(text.chars().count() as u64)
                .max(1),
        );

        thread::spawn(move || {
            let slice = Duration::from_millis(2);
            let mut remaining = total;
            while remaining > Duration::ZERO {
                if flag.load(Ordering::SeqCst) {
                    debug!("stub synthesis cancelled mid-utterance");
                    sink.emit(SynthesisEvent::Cancelled);
                    return;
                }
                let nap = slice.min(remaining);
                thread::sleep(nap);
                remaining -= nap;
            }
            sink.emit(SynthesisEvent::Completed);
        });

        Ok(Box::new(StubSynthesisHandle { cancelled }))
    }
}

struct StubSynthesisHandle {
    cancelled: Arc<AtomicBool>,
}

impl SynthesisHandle for StubSynthesisHandle {
    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}
