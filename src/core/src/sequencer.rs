//! Durable event sequencer.
//!
//! Each session owns exactly one sequence counter, starting at 0 and
//! incremented once per envelope written, submit or harness alike. The
//! shared counter is what lets a client observe the exact submit that
//! caused a harness event via strict envelope ordering.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use relay_protocol::{Envelope, EnvelopeBody, SubmitPayload};

use crate::transport::StreamProducer;

struct ProducerSlot {
    next_seq: u64,
    producer: Box<dyn StreamProducer>,
}

pub struct EventSequencer {
    // Per-session slots behind their own locks; appends for different
    // sessions never contend.
    slots: Mutex<HashMap<String, Arc<Mutex<ProducerSlot>>>>,
}

impl EventSequencer {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a producer for the session. Returns false (and drops the
    /// producer) when the session is already registered.
    pub async fn register(&self, session_id: &str, producer: Box<dyn StreamProducer>) -> bool {
        let mut slots = self.slots.lock().await;
        if slots.contains_key(session_id) {
            return false;
        }
        slots.insert(
            session_id.to_string(),
            Arc::new(Mutex::new(ProducerSlot {
                next_seq: 0,
                producer,
            })),
        );
        true
    }

    pub async fn is_registered(&self, session_id: &str) -> bool {
        self.slots.lock().await.contains_key(session_id)
    }

    pub async fn append_submit(
        &self,
        session_id: &str,
        payload: SubmitPayload,
    ) -> Result<u64, String> {
        self.append(session_id, EnvelopeBody::Submit(payload)).await
    }

    pub async fn append_harness(&self, session_id: &str, payload: Value) -> Result<u64, String> {
        self.append(session_id, EnvelopeBody::Harness(payload))
            .await
    }

    async fn append(&self, session_id: &str, body: EnvelopeBody) -> Result<u64, String> {
        let slot = {
            let slots = self.slots.lock().await;
            slots
                .get(session_id)
                .cloned()
                .ok_or_else(|| format!("no stream producer for session {session_id}"))?
        };
        let mut slot = slot.lock().await;
        // Read and increment under the slot lock, with no await between:
        // numbers are never skipped or reused for this producer instance.
        let sequence_hint = slot.next_seq;
        slot.next_seq += 1;
        let envelope = Envelope {
            session_id: session_id.to_string(),
            sequence_hint,
            body,
        };
        let payload =
            serde_json::to_value(&envelope).map_err(|e| format!("encode envelope: {e}"))?;
        slot.producer.append(&payload)?;
        Ok(sequence_hint)
    }

    /// Flush and detach every registered producer, clearing the map.
    /// Returns per-session errors instead of aborting early.
    pub async fn flush_and_detach_all(&self) -> Vec<(String, String)> {
        let drained: Vec<(String, Arc<Mutex<ProducerSlot>>)> =
            self.slots.lock().await.drain().collect();
        let mut errors = Vec::new();
        for (session_id, slot) in drained {
            let slot = slot.lock().await;
            if let Err(error) = slot.producer.flush() {
                errors.push((session_id.clone(), error));
            }
            if let Err(error) = slot.producer.detach() {
                errors.push((session_id, error));
            }
        }
        errors
    }
}

impl Default for EventSequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct RecordingProducer {
        appended: Arc<StdMutex<Vec<Value>>>,
        flushes: Arc<AtomicUsize>,
        detaches: Arc<AtomicUsize>,
    }

    impl StreamProducer for RecordingProducer {
        fn append(&self, payload: &Value) -> Result<(), String> {
            self.appended.lock().unwrap().push(payload.clone());
            Ok(())
        }

        fn flush(&self) -> Result<(), String> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn detach(&self) -> Result<(), String> {
            self.detaches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn recording() -> (Box<dyn StreamProducer>, Arc<StdMutex<Vec<Value>>>) {
        let appended = Arc::new(StdMutex::new(Vec::new()));
        let producer = RecordingProducer {
            appended: appended.clone(),
            flushes: Arc::new(AtomicUsize::new(0)),
            detaches: Arc::new(AtomicUsize::new(0)),
        };
        (Box::new(producer), appended)
    }

    #[tokio::test]
    async fn hints_are_contiguous_across_kinds() {
        let sequencer = EventSequencer::new();
        let (producer, appended) = recording();
        assert!(sequencer.register("s1", producer).await);

        let first = sequencer
            .append_submit(
                "s1",
                SubmitPayload::ControlSubmitted {
                    action: "stop".to_string(),
                },
            )
            .await
            .unwrap();
        let second = sequencer
            .append_harness("s1", json!({"type": "run/started"}))
            .await
            .unwrap();
        let third = sequencer
            .append_harness("s1", json!({"type": "run/ended"}))
            .await
            .unwrap();
        assert_eq!((first, second, third), (0, 1, 2));

        let appended = appended.lock().unwrap();
        assert_eq!(appended.len(), 3);
        assert_eq!(appended[0]["kind"], "submit");
        assert_eq!(appended[1]["kind"], "harness");
        assert_eq!(appended[2]["sequenceHint"], 2);
    }

    #[tokio::test]
    async fn sessions_count_independently() {
        let sequencer = EventSequencer::new();
        let (p1, _) = recording();
        let (p2, _) = recording();
        sequencer.register("s1", p1).await;
        sequencer.register("s2", p2).await;

        assert_eq!(sequencer.append_harness("s1", json!({})).await.unwrap(), 0);
        assert_eq!(sequencer.append_harness("s1", json!({})).await.unwrap(), 1);
        assert_eq!(sequencer.append_harness("s2", json!({})).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let sequencer = EventSequencer::new();
        let (p1, _) = recording();
        let (p2, _) = recording();
        assert!(sequencer.register("s1", p1).await);
        assert!(!sequencer.register("s1", p2).await);
    }

    #[tokio::test]
    async fn append_without_registration_fails() {
        let sequencer = EventSequencer::new();
        let err = sequencer.append_harness("ghost", json!({})).await.unwrap_err();
        assert!(err.contains("no stream producer"));
    }

    #[tokio::test]
    async fn shutdown_flushes_then_detaches_each_producer() {
        let sequencer = EventSequencer::new();
        let flushes = Arc::new(AtomicUsize::new(0));
        let detaches = Arc::new(AtomicUsize::new(0));
        sequencer
            .register(
                "s1",
                Box::new(RecordingProducer {
                    appended: Arc::new(StdMutex::new(Vec::new())),
                    flushes: flushes.clone(),
                    detaches: detaches.clone(),
                }),
            )
            .await;

        let errors = sequencer.flush_and_detach_all().await;
        assert!(errors.is_empty());
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
        assert_eq!(detaches.load(Ordering::SeqCst), 1);
        assert!(!sequencer.is_registered("s1").await);
    }
}
