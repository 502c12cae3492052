//! Send pipeline: per-session FIFO queue, single drain task, and the
//! submit-then-stream ordering contract.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use relay_protocol::SubmitPayload;

use crate::auth_retry::run_with_provider_auth_retry;
use crate::harness::{RunEvent, RunLifecycle, RunStream};

use super::state::{PendingSend, SendMetadata};
use super::{RuntimeInner, SessionRuntime};

/// Whether a send was taken. Rejected sends are never queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted,
    Rejected { reason: String },
}

impl SessionRuntime {
    /// Queue a user message for the session. Sends are dispatched
    /// strictly in arrival order, one at a time; a message submitted
    /// while another is streaming waits its turn.
    pub async fn send_message(
        &self,
        session_id: &str,
        content: &str,
        metadata: SendMetadata,
        client_message_id: Option<String>,
    ) -> SendOutcome {
        if !self.inner.sequencer.is_registered(session_id).await {
            tracing::warn!(%session_id, "send rejected: runtime not active");
            return SendOutcome::Rejected {
                reason: "Runtime not active for session".to_string(),
            };
        }

        let start_drain = {
            let mut state = self.inner.state.lock().await;
            state
                .send_queue
                .entry(session_id.to_string())
                .or_default()
                .push_back(PendingSend {
                    content: content.to_string(),
                    metadata,
                    client_message_id,
                });
            state.sending.insert(session_id.to_string())
        };
        if start_drain {
            let inner = self.inner.clone();
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                drain_sends(inner, session_id).await;
            });
        }
        SendOutcome::Accepted
    }
}

async fn drain_sends(inner: Arc<RuntimeInner>, session_id: String) {
    loop {
        let next = {
            let mut state = inner.state.lock().await;
            let next = state
                .send_queue
                .get_mut(&session_id)
                .and_then(|queue| queue.pop_front());
            if next.is_none() {
                state.send_queue.remove(&session_id);
                state.sending.remove(&session_id);
            }
            next
        };
        let Some(send) = next else { break };
        // One run at a time per session: the next queued send waits for
        // this run to reach a terminal lifecycle. Waiting happens with
        // the op lock released, so `stop` can still abort the run.
        if let Some(done) = process_send(&inner, &session_id, send).await {
            let _ = done.await;
        }
    }
}

/// Dispatch one queued send: fold metadata into the session context,
/// write the submit envelope, then start the harness run. The op lock
/// keeps the envelope write and the harness call an atomic pair.
async fn process_send(
    inner: &Arc<RuntimeInner>,
    session_id: &str,
    send: PendingSend,
) -> Option<oneshot::Receiver<()>> {
    let lock = inner.op_lock(session_id).await;
    let _guard = lock.lock().await;

    let mut ctx = inner.context_or_default(session_id).await;
    if let Some(mode) = send.metadata.permission_mode {
        ctx.permission_mode = mode;
    }
    if let Some(thinking) = send.metadata.thinking {
        ctx.thinking_enabled = thinking;
    }
    if let Some(model) = send.metadata.model.as_ref().filter(|m| **m != ctx.model_id) {
        let switched = run_with_provider_auth_retry(model, || {
            inner.harness.switch_model(session_id, model)
        })
        .await;
        match switched {
            Ok(()) => ctx.model_id = model.clone(),
            Err(error) => {
                tracing::warn!(%session_id, %model, error = %error, "model switch failed, keeping current model");
            }
        }
    }
    inner
        .state
        .lock()
        .await
        .contexts
        .insert(session_id.to_string(), ctx.clone());

    let payload = SubmitPayload::UserMessageSubmitted {
        content: send.content.clone(),
        metadata: metadata_value(&send.metadata),
        client_message_id: send.client_message_id,
    };
    if let Err(error) = inner.sequencer.append_submit(session_id, payload).await {
        tracing::warn!(%session_id, error = %error, "failed to persist send, dropping it");
        return None;
    }

    let options = ctx.run_options(&inner.config, session_id);
    let prompt = send.content;
    let result = run_with_provider_auth_retry(&ctx.model_id, || {
        inner.harness.stream(session_id, &prompt, options.clone())
    })
    .await;
    match result {
        Ok(run) => Some(install_run(inner, session_id, run).await),
        Err(error) => {
            inner.fail_run(session_id, &error).await;
            None
        }
    }
}

fn metadata_value(metadata: &SendMetadata) -> Option<Value> {
    serde_json::to_value(metadata)
        .ok()
        .filter(|value| value.as_object().is_some_and(|map| !map.is_empty()))
}

/// Adopt a new run as the session's live one and start pumping its
/// events into the durable stream. A handle left over from an earlier
/// run is replaced without aborting; its run already ended in the
/// harness. The returned receiver fires when the run reaches a
/// terminal lifecycle (or its event channel closes).
pub(super) async fn install_run(
    inner: &Arc<RuntimeInner>,
    session_id: &str,
    run: RunStream,
) -> oneshot::Receiver<()> {
    let RunStream { events, handle, .. } = run;
    tracing::debug!(%session_id, run_id = %handle.run_id(), "run installed");
    {
        let mut state = inner.state.lock().await;
        state.run_handles.insert(session_id.to_string(), handle);
    }
    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(pump_run_events(
        inner.clone(),
        session_id.to_string(),
        events,
        done_tx,
    ));
    done_rx
}

async fn pump_run_events(
    inner: Arc<RuntimeInner>,
    session_id: String,
    mut events: mpsc::UnboundedReceiver<RunEvent>,
    done: oneshot::Sender<()>,
) {
    while let Some(event) = events.recv().await {
        match event {
            RunEvent::Emitted(payload) => {
                if let Err(error) = inner.sequencer.append_harness(&session_id, payload).await {
                    tracing::warn!(%session_id, error = %error, "failed to persist harness event");
                }
            }
            RunEvent::Lifecycle(RunLifecycle::Started) => {}
            RunEvent::Lifecycle(RunLifecycle::Completed)
            | RunEvent::Lifecycle(RunLifecycle::Canceled) => {
                inner.clear_run(&session_id).await;
                break;
            }
            RunEvent::Lifecycle(RunLifecycle::Failed { error }) => {
                inner.fail_run(&session_id, &error).await;
                break;
            }
        }
    }
    let _ = done.send(());
}
