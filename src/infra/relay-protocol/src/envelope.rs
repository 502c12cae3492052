use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// A sequenced, session-scoped record wrapping either a user-submitted
/// action or a harness-emitted event.
///
/// Discriminated by `kind`:
/// - `submit`  — a user-authored action, recorded before the harness sees it
/// - `harness` — a verbatim event object produced by the agent harness
///
/// # Wire shape
///
/// ```json
/// {"kind":"submit","sessionId":"s1","sequenceHint":0,"payload":{"type":"control_submitted","action":"stop"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub session_id: String,
    /// Zero-based, strictly increasing per session. Assigned at write time
    /// by the sequencer; establishes total order for a session's event log.
    pub sequence_hint: u64,
    #[serde(flatten)]
    pub body: EnvelopeBody,
}

/// The two event kinds a session log interleaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EnvelopeBody {
    Submit(SubmitPayload),
    /// Harness payloads stay opaque JSON so the sequencer never has to
    /// track harness event internals.
    Harness(Value),
}

/// A user-authored action persisted ahead of the harness call it triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmitPayload {
    UserMessageSubmitted {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_message_id: Option<String>,
    },
    ControlSubmitted {
        action: String,
    },
    ApprovalSubmitted {
        tool_call_id: String,
        decision: String,
    },
    QuestionSubmitted {
        question_id: String,
        answer: String,
    },
    PlanSubmitted {
        plan_id: String,
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<String>,
    },
}

impl Envelope {
    pub fn submit(session_id: impl Into<String>, sequence_hint: u64, payload: SubmitPayload) -> Self {
        Self {
            session_id: session_id.into(),
            sequence_hint,
            body: EnvelopeBody::Submit(payload),
        }
    }

    pub fn harness(session_id: impl Into<String>, sequence_hint: u64, payload: Value) -> Self {
        Self {
            session_id: session_id.into(),
            sequence_hint,
            body: EnvelopeBody::Harness(payload),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.body {
            EnvelopeBody::Submit(_) => "submit",
            EnvelopeBody::Harness(_) => "harness",
        }
    }
}

/// Encode an `Envelope` for appending to the durable stream.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode an `Envelope` from a durable stream record.
pub fn decode_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Check that a replayed session log is gap-free: hints must run
/// `0,1,2,...` for a single session.
pub fn verify_sequence_hints(envelopes: &[Envelope]) -> Result<(), ProtocolError> {
    let session_id = match envelopes.first() {
        Some(first) => first.session_id.as_str(),
        None => return Ok(()),
    };
    for (expected, envelope) in envelopes.iter().enumerate() {
        if envelope.session_id != session_id {
            return Err(ProtocolError::SessionMismatch {
                expected: session_id.to_string(),
                got: envelope.session_id.clone(),
            });
        }
        let expected = expected as u64;
        if envelope.sequence_hint != expected {
            return Err(ProtocolError::SequenceGap {
                expected,
                got: envelope.sequence_hint,
            });
        }
    }
    Ok(())
}
