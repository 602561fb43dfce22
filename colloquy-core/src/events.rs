//! Observer event types broadcast by the controller.
//!
//! Three channels, subscribe-style:
//!
//! | Event | Channel |
//! |-------|---------|
//! | [`TranscriptEvent`] | `SpeechController::subscribe_transcripts` |
//! | [`SessionStatusEvent`] | `SpeechController::subscribe_status` |
//! | [`UtteranceEvent`] | `SpeechController::subscribe_utterances` |
//!
//! All types serialize with camelCase fields and lowercase variants so a
//! host process can forward them over IPC unchanged.

use serde::{Deserialize, Serialize};

use crate::session::SessionStatus;
use crate::synthesis::UtteranceStatus;

/// Emitted for every recognised fragment, partial and final alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Recognised text.
    pub text: String,
    /// Whether this is a streaming partial or a committed final.
    pub kind: FragmentKind,
}

/// Distinguishes streaming partials from committed finals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    /// Streaming partial — text may change in a later fragment.
    Partial,
    /// Committed final — the fragment will not change.
    Final,
}

/// Emitted on every session status edge, including the transient
/// Stopped/Failed states and the reset to Idle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. engine error message).
    pub detail: Option<String>,
}

/// Emitted on every utterance status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtteranceEvent {
    pub id: u64,
    pub status: UtteranceStatus,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_event_serializes_with_lowercase_kind() {
        let event = TranscriptEvent {
            seq: 7,
            text: "hello".into(),
            kind: FragmentKind::Partial,
        };

        let json = serde_json::to_value(&event).expect("serialize transcript event");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["text"], "hello");
        assert_eq!(json["kind"], "partial");

        let round_trip: TranscriptEvent =
            serde_json::from_value(json).expect("deserialize transcript event");
        assert_eq!(round_trip.seq, 7);
        assert_eq!(round_trip.kind, FragmentKind::Partial);
    }

    #[test]
    fn session_status_event_serializes_with_lowercase_status() {
        let event = SessionStatusEvent {
            status: SessionStatus::Listening,
            detail: None,
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "listening");
        assert_eq!(json["detail"], serde_json::Value::Null);

        let failed = SessionStatusEvent {
            status: SessionStatus::Failed,
            detail: Some("device unavailable".into()),
        };
        let json = serde_json::to_value(&failed).expect("serialize failed event");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["detail"], "device unavailable");
    }

    #[test]
    fn utterance_event_serializes_with_camel_case_fields() {
        let event = UtteranceEvent {
            id: 3,
            status: UtteranceStatus::Speaking,
            text: "reading back".into(),
        };

        let json = serde_json::to_value(&event).expect("serialize utterance event");
        assert_eq!(json["id"], 3);
        assert_eq!(json["status"], "speaking");
        assert_eq!(json["text"], "reading back");

        let round_trip: UtteranceEvent =
            serde_json::from_value(json).expect("deserialize utterance event");
        assert_eq!(round_trip.status, UtteranceStatus::Speaking);
    }

    #[test]
    fn fragment_kind_rejects_non_lowercase_values() {
        let invalid = r#""Partial""#;
        let err = serde_json::from_str::<FragmentKind>(invalid);
        assert!(err.is_err(), "expected invalid casing to fail");
    }
}
