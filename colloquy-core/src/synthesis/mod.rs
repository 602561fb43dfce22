//! Text-to-speech utterance queue.
//!
//! Strict FIFO: the engine is driven one utterance at a time and the queue
//! advances only when the active utterance reaches `Completed` or
//! `Cancelled` (engine errors advance past the failed utterance). Playback
//! never begins while a recognition session is engaged or parked — recording
//! and speaking are mutually exclusive on the audio path.

use std::collections::VecDeque;
use std::time::Instant;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::controller::coordinator::Command;
use crate::engines::{SynthesisEngine, SynthesisEvent, SynthesisHandle, SynthesisSink};
use crate::error::{ColloquyError, Result};

/// Playback state of one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UtteranceStatus {
    /// Waiting its turn in the queue.
    Queued,
    /// Currently being rendered by the synthesis engine.
    Speaking,
    /// Playback finished.
    Completed,
    /// Cancelled before or during playback (also used for engine failures).
    Cancelled,
}

/// One unit of text submitted for synthesis.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
    pub enqueued_at: Instant,
    pub status: UtteranceStatus,
}

/// A status change to surface on the utterance event channel.
#[derive(Debug, Clone)]
pub(crate) struct UtteranceTransition {
    pub id: u64,
    pub status: UtteranceStatus,
    pub text: String,
    /// Set when the transition was forced by an engine error.
    pub engine_error: Option<String>,
}

impl UtteranceTransition {
    fn of(utterance: &Utterance) -> Self {
        Self {
            id: utterance.id,
            status: utterance.status,
            text: utterance.text.clone(),
            engine_error: None,
        }
    }
}

struct ActiveUtterance {
    utterance: Utterance,
    handle: Box<dyn SynthesisHandle>,
}

/// FIFO drive of the synthesis engine, one utterance at a time.
pub(crate) struct SynthesisQueue {
    engine: Box<dyn SynthesisEngine>,
    queue: VecDeque<Utterance>,
    active: Option<ActiveUtterance>,
}

impl SynthesisQueue {
    pub(crate) fn new(engine: Box<dyn SynthesisEngine>) -> Self {
        Self {
            engine,
            queue: VecDeque::new(),
            active: None,
        }
    }

    pub(crate) fn is_speaking(&self) -> bool {
        self.active.is_some()
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Append a non-empty utterance. Whitespace-only text is rejected.
    pub(crate) fn enqueue(&mut self, id: u64, text: String) -> Result<UtteranceTransition> {
        if text.trim().is_empty() {
            return Err(ColloquyError::EmptyInput);
        }
        let utterance = Utterance {
            id,
            text,
            enqueued_at: Instant::now(),
            status: UtteranceStatus::Queued,
        };
        debug!(id, "utterance queued");
        let transition = UtteranceTransition::of(&utterance);
        self.queue.push_back(utterance);
        Ok(transition)
    }

    /// Start the next queued utterance unless playback is blocked or one is
    /// already speaking. An engine refusal cancels that utterance and moves
    /// on to the next.
    pub(crate) fn pump(&mut self, blocked: bool, tx: &Sender<Command>) -> Vec<UtteranceTransition> {
        let mut transitions = Vec::new();
        while self.active.is_none() && !blocked {
            let Some(mut utterance) = self.queue.pop_front() else {
                break;
            };
            let sink = SynthesisSink::new(utterance.id, tx.clone());
            match self.engine.speak(&utterance.text, sink) {
                Ok(handle) => {
                    utterance.status = UtteranceStatus::Speaking;
                    info!(id = utterance.id, "utterance speaking");
                    transitions.push(UtteranceTransition::of(&utterance));
                    self.active = Some(ActiveUtterance { utterance, handle });
                }
                Err(e) => {
                    warn!(id = utterance.id, "synthesis engine refused utterance: {e}");
                    utterance.status = UtteranceStatus::Cancelled;
                    let mut transition = UtteranceTransition::of(&utterance);
                    transition.engine_error = Some(e.to_string());
                    transitions.push(transition);
                }
            }
        }
        transitions
    }

    /// Apply an engine event for the active utterance. Events for any other
    /// utterance are stale (already cancelled) and are discarded.
    pub(crate) fn on_event(&mut self, id: u64, event: SynthesisEvent) -> Vec<UtteranceTransition> {
        let matches = self
            .active
            .as_ref()
            .is_some_and(|active| active.utterance.id == id);
        if !matches {
            debug!(id, "discarding stale synthesis event");
            return Vec::new();
        }
        let Some(mut active) = self.active.take() else {
            return Vec::new();
        };
        let transition = match event {
            SynthesisEvent::Completed => {
                active.utterance.status = UtteranceStatus::Completed;
                info!(id, "utterance completed");
                UtteranceTransition::of(&active.utterance)
            }
            SynthesisEvent::Cancelled => {
                active.utterance.status = UtteranceStatus::Cancelled;
                info!(id, "utterance cancelled");
                UtteranceTransition::of(&active.utterance)
            }
            SynthesisEvent::Error(msg) => {
                warn!(id, "synthesis engine error: {msg}");
                active.utterance.status = UtteranceStatus::Cancelled;
                let mut t = UtteranceTransition::of(&active.utterance);
                t.engine_error = Some(msg);
                t
            }
        };
        vec![transition]
    }

    /// Cancel the in-flight utterance and drop everything queued.
    pub(crate) fn cancel_all(&mut self) -> Vec<UtteranceTransition> {
        let mut transitions = Vec::new();
        if let Some(mut active) = self.active.take() {
            active.handle.cancel();
            active.utterance.status = UtteranceStatus::Cancelled;
            info!(id = active.utterance.id, "active utterance cancelled");
            transitions.push(UtteranceTransition::of(&active.utterance));
        }
        for mut utterance in self.queue.drain(..) {
            utterance.status = UtteranceStatus::Cancelled;
            transitions.push(UtteranceTransition::of(&utterance));
        }
        if !transitions.is_empty() {
            info!(count = transitions.len(), "synthesis queue cleared");
        }
        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct FakeHandle {
        cancelled: Arc<AtomicBool>,
    }

    impl SynthesisHandle for FakeHandle {
        fn cancel(&mut self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    struct FakeEngine {
        spoken: Arc<Mutex<Vec<String>>>,
        cancelled: Arc<AtomicBool>,
        refuse: bool,
    }

    impl SynthesisEngine for FakeEngine {
        fn speak(&mut self, text: &str, _sink: SynthesisSink) -> Result<Box<dyn SynthesisHandle>> {
            if self.refuse {
                return Err(ColloquyError::EngineFailure("voice unavailable".into()));
            }
            self.spoken.lock().push(text.to_string());
            Ok(Box::new(FakeHandle {
                cancelled: Arc::clone(&self.cancelled),
            }))
        }
    }

    fn queue_with_fake(refuse: bool) -> (SynthesisQueue, Arc<Mutex<Vec<String>>>, Arc<AtomicBool>) {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let queue = SynthesisQueue::new(Box::new(FakeEngine {
            spoken: Arc::clone(&spoken),
            cancelled: Arc::clone(&cancelled),
            refuse,
        }));
        (queue, spoken, cancelled)
    }

    #[test]
    fn empty_and_whitespace_text_is_rejected() {
        let (mut queue, _, _) = queue_with_fake(false);
        assert!(matches!(
            queue.enqueue(1, String::new()),
            Err(ColloquyError::EmptyInput)
        ));
        assert!(matches!(
            queue.enqueue(2, "   ".into()),
            Err(ColloquyError::EmptyInput)
        ));
        assert_eq!(queue.queue_len(), 0);
    }

    #[test]
    fn playback_is_strictly_fifo() {
        let (mut queue, spoken, _) = queue_with_fake(false);
        let (tx, _rx) = crossbeam_channel::unbounded();

        for (id, text) in [(1, "a"), (2, "b"), (3, "c")] {
            queue.enqueue(id, text.into()).expect("enqueue");
        }

        queue.pump(false, &tx);
        assert!(queue.is_speaking());
        assert_eq!(queue.queue_len(), 2);

        queue.on_event(1, SynthesisEvent::Completed);
        queue.pump(false, &tx);
        queue.on_event(2, SynthesisEvent::Completed);
        queue.pump(false, &tx);
        queue.on_event(3, SynthesisEvent::Completed);
        queue.pump(false, &tx);

        assert_eq!(*spoken.lock(), vec!["a", "b", "c"]);
        assert!(!queue.is_speaking());
    }

    #[test]
    fn blocked_pump_does_not_engage_the_engine() {
        let (mut queue, spoken, _) = queue_with_fake(false);
        let (tx, _rx) = crossbeam_channel::unbounded();

        queue.enqueue(1, "hello".into()).expect("enqueue");
        let transitions = queue.pump(true, &tx);
        assert!(transitions.is_empty());
        assert!(spoken.lock().is_empty());
        assert_eq!(queue.queue_len(), 1);
    }

    #[test]
    fn cancel_all_cancels_active_and_queued() {
        let (mut queue, _, cancelled) = queue_with_fake(false);
        let (tx, _rx) = crossbeam_channel::unbounded();

        queue.enqueue(1, "a".into()).expect("enqueue");
        queue.enqueue(2, "b".into()).expect("enqueue");
        queue.pump(false, &tx);

        let transitions = queue.cancel_all();
        assert!(cancelled.load(Ordering::SeqCst), "engine handle cancelled");
        assert_eq!(transitions.len(), 2);
        assert!(transitions
            .iter()
            .all(|t| t.status == UtteranceStatus::Cancelled));
        assert!(!queue.is_speaking());
        assert_eq!(queue.queue_len(), 0);
    }

    #[test]
    fn engine_refusal_advances_past_the_failed_utterance() {
        let (mut queue, _, _) = queue_with_fake(true);
        let (tx, _rx) = crossbeam_channel::unbounded();

        queue.enqueue(1, "a".into()).expect("enqueue");
        queue.enqueue(2, "b".into()).expect("enqueue");
        let transitions = queue.pump(false, &tx);

        assert_eq!(transitions.len(), 2);
        assert!(transitions.iter().all(|t| t.engine_error.is_some()));
        assert!(!queue.is_speaking());
        assert_eq!(queue.queue_len(), 0);
    }

    #[test]
    fn stale_events_are_discarded() {
        let (mut queue, _, _) = queue_with_fake(false);
        let (tx, _rx) = crossbeam_channel::unbounded();

        queue.enqueue(1, "a".into()).expect("enqueue");
        queue.pump(false, &tx);
        assert!(queue.on_event(99, SynthesisEvent::Completed).is_empty());
        assert!(queue.is_speaking());
    }
}
