use relay_protocol::{Message, Role};
use uuid::Uuid;

use super::reconcile::{dedupe_messages, DedupeOutcome};

/// Builds the rendered message list from three sources: replayed
/// history, one locally-sent message awaiting its echo, and the
/// currently streaming assistant message.
///
/// Holds at most one optimistic message; a newer local send replaces
/// the previous one.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    optimistic: Option<Message>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a locally-sent user message so it renders before the
    /// server echoes it back. Returns the message (fresh random id).
    pub fn note_local_send(&mut self, text: &str) -> Message {
        let message = Message::user(Uuid::new_v4().to_string(), text);
        self.optimistic = Some(message.clone());
        message
    }

    pub fn has_pending_send(&self) -> bool {
        self.optimistic.is_some()
    }

    /// Recompute the canonical list. The optimistic message is cleared
    /// once any user message in history carries the same text (the
    /// server echo arrived under its own id), then the remaining
    /// candidates go through reconciliation.
    pub fn reconcile(&mut self, history: &[Message], in_flight: Option<&Message>) -> DedupeOutcome {
        if let Some(optimistic) = &self.optimistic {
            let echoed = history
                .iter()
                .any(|m| m.role == Role::User && m.text_content() == optimistic.text_content());
            if echoed {
                self.optimistic = None;
            }
        }

        let mut candidates: Vec<Message> = history.to_vec();
        if let Some(optimistic) = &self.optimistic {
            candidates.push(optimistic.clone());
        }
        if let Some(in_flight) = in_flight {
            candidates.push(in_flight.clone());
        }
        dedupe_messages(&candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::Part;

    #[test]
    fn optimistic_message_renders_until_echoed() {
        let mut assembler = MessageAssembler::new();
        let local = assembler.note_local_send("hello");
        assert!(assembler.has_pending_send());

        let outcome = assembler.reconcile(&[], None);
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].id, local.id);

        // Echo arrives under the server's id; the optimistic copy goes.
        let history = vec![Message::user("srv-1", "hello")];
        let outcome = assembler.reconcile(&history, None);
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].id, "srv-1");
        assert!(!assembler.has_pending_send());
    }

    #[test]
    fn echo_with_different_text_keeps_optimistic() {
        let mut assembler = MessageAssembler::new();
        assembler.note_local_send("second question");

        let history = vec![Message::user("srv-1", "first question")];
        let outcome = assembler.reconcile(&history, None);
        assert_eq!(outcome.messages.len(), 2);
        assert!(assembler.has_pending_send());
    }

    #[test]
    fn newer_send_replaces_pending_one() {
        let mut assembler = MessageAssembler::new();
        let first = assembler.note_local_send("draft");
        let second = assembler.note_local_send("final");
        assert_ne!(first.id, second.id);

        let outcome = assembler.reconcile(&[], None);
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].text_content(), "final");
    }

    #[test]
    fn in_flight_snapshot_is_appended_and_deduped() {
        let mut assembler = MessageAssembler::new();
        let history = vec![
            Message::user("srv-1", "go"),
            Message::assistant("a1", vec![Part::text("working")]),
        ];
        let in_flight = Message::assistant(
            "a1",
            vec![Part::text("working"), Part::text(" on it")],
        );
        let outcome = assembler.reconcile(&history, Some(&in_flight));
        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.messages[1].text_content(), "working on it");
        assert_eq!(
            outcome.summary.dropped_message_ids,
            vec!["a1".to_string()]
        );
    }

    #[test]
    fn reconcile_is_pure_recomputation() {
        let mut assembler = MessageAssembler::new();
        assembler.note_local_send("hello");
        let history = vec![Message::user("srv-0", "earlier")];
        let first = assembler.reconcile(&history, None);
        let second = assembler.reconcile(&history, None);
        assert_eq!(first.messages, second.messages);
    }
}
