//! Per-session run lifecycle.
//!
//! One `SessionRuntime` hosts many sessions. For each it tracks the
//! live run, serializes sends, and guarantees the write order the
//! clients depend on: every submit envelope lands in the durable stream
//! before the harness call it triggers can emit anything.

mod send;
mod state;

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;

use relay_protocol::SubmitPayload;

use crate::auth_retry::run_with_provider_auth_retry;
use crate::config::RelayConfig;
use crate::harness::{
    AgentHarness, ApprovalCallOptions, ApprovalDecision, DisplayState, ResumeRequest,
};
use crate::sequencer::EventSequencer;
use crate::session::{PermissionMode, SessionContext};
use crate::transport::{DurableStream, StreamScope};

use state::RuntimeState;

pub use send::SendOutcome;
pub use state::SendMetadata;

/// Result of `ensure_runtime`. Not ready means the durable stream could
/// not be set up; the session stays usable for retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureOutcome {
    pub ready: bool,
    pub reason: Option<String>,
}

impl EnsureOutcome {
    fn ready() -> Self {
        Self {
            ready: true,
            reason: None,
        }
    }

    fn not_ready(reason: String) -> Self {
        Self {
            ready: false,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayStateOutcome {
    Ready(DisplayState),
    NotReady { reason: String },
}

/// How a client-side tool execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutputState {
    Output,
    OutputError,
}

#[derive(Clone)]
pub struct SessionRuntime {
    inner: Arc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    pub(crate) harness: Arc<dyn AgentHarness>,
    pub(crate) stream: Arc<dyn DurableStream>,
    pub(crate) config: Arc<RelayConfig>,
    pub(crate) sequencer: EventSequencer,
    pub(crate) state: Mutex<RuntimeState>,
}

impl SessionRuntime {
    pub fn new(
        harness: Arc<dyn AgentHarness>,
        stream: Arc<dyn DurableStream>,
        config: Arc<RelayConfig>,
    ) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                harness,
                stream,
                config,
                sequencer: EventSequencer::new(),
                state: Mutex::new(RuntimeState::default()),
            }),
        }
    }

    /// Prepare a session: register its durable stream, attach a
    /// producer, and seed the session context. Idempotent; a second
    /// call for an active session is a no-op.
    pub async fn ensure_runtime(
        &self,
        session_id: &str,
        cwd: Option<&str>,
        workspace_id: Option<&str>,
    ) -> EnsureOutcome {
        if self.inner.sequencer.is_registered(session_id).await {
            return EnsureOutcome::ready();
        }

        let scope = StreamScope {
            session_id: session_id.to_string(),
            organization_id: self.inner.config.api.organization_id.clone(),
            workspace_id: workspace_id.map(str::to_string),
        };
        if let Err(error) = self.inner.stream.ensure_session_stream(&scope) {
            tracing::warn!(%session_id, error = %error, "failed to ensure session stream");
            return EnsureOutcome::not_ready(error);
        }
        let producer = match self.inner.stream.create_producer(session_id) {
            Ok(producer) => producer,
            Err(error) => {
                tracing::warn!(%session_id, error = %error, "failed to create stream producer");
                return EnsureOutcome::not_ready(error);
            }
        };
        // A concurrent ensure may have won the race; its producer stands.
        self.inner.sequencer.register(session_id, producer).await;

        let mut state = self.inner.state.lock().await;
        state
            .contexts
            .entry(session_id.to_string())
            .or_insert_with(|| SessionContext::from_config(&self.inner.config, cwd));
        tracing::info!(%session_id, "session runtime ready");
        EnsureOutcome::ready()
    }

    /// Record a control action. Only `stop` has runtime behavior: it
    /// aborts the live run locally and in the harness. Other actions
    /// are persisted for replay and logged.
    pub async fn control(&self, session_id: &str, action: &str) -> Result<(), String> {
        let lock = self.inner.op_lock(session_id).await;
        let _guard = lock.lock().await;

        self.inner
            .sequencer
            .append_submit(
                session_id,
                SubmitPayload::ControlSubmitted {
                    action: action.to_string(),
                },
            )
            .await?;

        if action != "stop" {
            tracing::info!(%session_id, %action, "control action recorded");
            return Ok(());
        }

        let handle = {
            let mut state = self.inner.state.lock().await;
            state.run_handles.remove(session_id)
        };
        if let Some(mut handle) = handle {
            handle.abort();
        }
        self.inner.harness.abort(session_id).await
    }

    /// Persist an approval decision, then deliver it to the harness.
    /// Returns false when delivery failed; the submit is kept either way.
    pub async fn approval_respond(
        &self,
        session_id: &str,
        tool_call_id: &str,
        decision: ApprovalDecision,
    ) -> bool {
        let lock = self.inner.op_lock(session_id).await;
        let _guard = lock.lock().await;

        let tool_call_id = normalize_tool_call_id(tool_call_id);
        if let Err(error) = self
            .inner
            .sequencer
            .append_submit(
                session_id,
                SubmitPayload::ApprovalSubmitted {
                    tool_call_id: tool_call_id.to_string(),
                    decision: decision.as_str().to_string(),
                },
            )
            .await
        {
            tracing::warn!(%session_id, error = %error, "failed to persist approval");
            return false;
        }
        match self
            .inner
            .harness
            .respond_to_tool_approval(session_id, tool_call_id, decision)
            .await
        {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%session_id, %tool_call_id, error = %error, "approval delivery failed");
                false
            }
        }
    }

    pub async fn question_respond(&self, session_id: &str, question_id: &str, answer: &str) -> bool {
        let lock = self.inner.op_lock(session_id).await;
        let _guard = lock.lock().await;

        if let Err(error) = self
            .inner
            .sequencer
            .append_submit(
                session_id,
                SubmitPayload::QuestionSubmitted {
                    question_id: question_id.to_string(),
                    answer: answer.to_string(),
                },
            )
            .await
        {
            tracing::warn!(%session_id, error = %error, "failed to persist question answer");
            return false;
        }
        match self
            .inner
            .harness
            .respond_to_question(session_id, question_id, answer)
            .await
        {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%session_id, %question_id, error = %error, "answer delivery failed");
                false
            }
        }
    }

    pub async fn plan_respond(
        &self,
        session_id: &str,
        plan_id: &str,
        action: &str,
        feedback: Option<&str>,
    ) -> bool {
        let lock = self.inner.op_lock(session_id).await;
        let _guard = lock.lock().await;

        if let Err(error) = self
            .inner
            .sequencer
            .append_submit(
                session_id,
                SubmitPayload::PlanSubmitted {
                    plan_id: plan_id.to_string(),
                    action: action.to_string(),
                    feedback: feedback.map(str::to_string),
                },
            )
            .await
        {
            tracing::warn!(%session_id, error = %error, "failed to persist plan response");
            return false;
        }
        match self
            .inner
            .harness
            .respond_to_plan_approval(session_id, plan_id, action, feedback)
            .await
        {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%session_id, %plan_id, error = %error, "plan response delivery failed");
                false
            }
        }
    }

    /// Resume a run suspended on a tool call, feeding the tool's output
    /// back in. An errored tool resumes with empty answers.
    #[allow(clippy::too_many_arguments)]
    pub async fn continue_agent_with_tool_output(
        &self,
        session_id: &str,
        run_id: &str,
        tool_call_id: &str,
        tool_name: &str,
        state: ToolOutputState,
        output: Option<Value>,
        fallback_context: Option<Value>,
    ) -> Result<(), String> {
        let lock = self.inner.op_lock(session_id).await;
        let _guard = lock.lock().await;

        let ctx = self.inner.context_or_default(session_id).await;
        let options = ctx.run_options(&self.inner.config, session_id);
        let resume = ResumeRequest {
            run_id: run_id.to_string(),
            tool_call_id: normalize_tool_call_id(tool_call_id).to_string(),
            tool_name: tool_name.to_string(),
            answers: resume_answers(state, output.as_ref()),
            fallback_context,
        };

        let result = run_with_provider_auth_retry(&ctx.model_id, || {
            self.inner
                .harness
                .resume_stream(session_id, resume.clone(), options.clone())
        })
        .await;
        match result {
            Ok(run) => {
                let _done = send::install_run(&self.inner, session_id, run).await;
                Ok(())
            }
            Err(error) => {
                self.inner.fail_run(session_id, &error).await;
                Err(error)
            }
        }
    }

    /// Re-authorize the pending tool call of a suspended run,
    /// optionally tightening or loosening the permission mode first.
    pub async fn resume_agent(
        &self,
        session_id: &str,
        run_id: &str,
        decision: ApprovalDecision,
        tool_call_id: &str,
        permission_mode: Option<PermissionMode>,
    ) -> Result<(), String> {
        let lock = self.inner.op_lock(session_id).await;
        let _guard = lock.lock().await;

        let ctx = {
            let mut state = self.inner.state.lock().await;
            let ctx = state
                .contexts
                .entry(session_id.to_string())
                .or_insert_with(|| SessionContext::from_config(&self.inner.config, None));
            if let Some(mode) = permission_mode {
                ctx.permission_mode = mode;
            }
            ctx.clone()
        };

        let call = ApprovalCallOptions {
            run_id: run_id.to_string(),
            tool_call_id: normalize_tool_call_id(tool_call_id).to_string(),
            options: ctx.run_options(&self.inner.config, session_id),
        };
        let result = run_with_provider_auth_retry(&ctx.model_id, || {
            let call = call.clone();
            match decision {
                ApprovalDecision::Accept => self.inner.harness.approve_tool_call(session_id, call),
                ApprovalDecision::Decline => self.inner.harness.decline_tool_call(session_id, call),
            }
        })
        .await;
        match result {
            Ok(run) => {
                let _done = send::install_run(&self.inner, session_id, run).await;
                Ok(())
            }
            Err(error) => {
                self.inner.fail_run(session_id, &error).await;
                Err(error)
            }
        }
    }

    /// Run id of the session's live run, if any.
    pub async fn active_run_id(&self, session_id: &str) -> Option<String> {
        self.inner
            .state
            .lock()
            .await
            .run_handles
            .get(session_id)
            .map(|handle| handle.run_id().to_string())
    }

    pub async fn display_state(&self, session_id: &str) -> DisplayStateOutcome {
        if !self.inner.sequencer.is_registered(session_id).await {
            return DisplayStateOutcome::NotReady {
                reason: "Runtime not active for session".to_string(),
            };
        }
        match self.inner.harness.display_state(session_id).await {
            Ok(state) => DisplayStateOutcome::Ready(state),
            Err(reason) => DisplayStateOutcome::NotReady { reason },
        }
    }

    /// Shut down: abort live runs, then flush and detach every stream
    /// producer, clearing all session state. Runs are aborted first so
    /// their event pumps wind down before the producers stop accepting
    /// appends.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock().await;
            for (session_id, handle) in state.run_handles.iter_mut() {
                if handle.abort() {
                    tracing::debug!(%session_id, "aborted live run at shutdown");
                }
            }
            *state = RuntimeState::default();
        }
        for (session_id, error) in self.inner.sequencer.flush_and_detach_all().await {
            tracing::warn!(%session_id, error = %error, "producer shutdown error");
        }
    }
}

impl RuntimeInner {
    pub(crate) async fn op_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut state = self.state.lock().await;
        state
            .op_locks
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    pub(crate) async fn context_or_default(&self, session_id: &str) -> SessionContext {
        let mut state = self.state.lock().await;
        state
            .contexts
            .entry(session_id.to_string())
            .or_insert_with(|| SessionContext::from_config(&self.config, None))
            .clone()
    }

    /// Unrecoverable run failure: persist the error and an abort marker
    /// so replaying clients see the run end, then drop the run and its
    /// context. The stream producer stays registered, so the next send
    /// starts fresh from config defaults.
    pub(crate) async fn fail_run(&self, session_id: &str, error: &str) {
        tracing::warn!(%session_id, error = %error, "run failed");
        if let Err(e) = self
            .sequencer
            .append_harness(session_id, json!({"type": "error", "errorText": error}))
            .await
        {
            tracing::warn!(%session_id, error = %e, "failed to persist run error");
        }
        if let Err(e) = self
            .sequencer
            .append_harness(session_id, json!({"type": "abort"}))
            .await
        {
            tracing::warn!(%session_id, error = %e, "failed to persist abort marker");
        }
        let mut state = self.state.lock().await;
        state.run_handles.remove(session_id);
        state.contexts.remove(session_id);
    }

    pub(crate) async fn clear_run(&self, session_id: &str) {
        let mut state = self.state.lock().await;
        state.run_handles.remove(session_id);
    }
}

/// Harnesses disagree on tool-call id shape; some prefix ids with
/// dashes, some pad them. Trim whitespace and leading dashes, falling
/// back to the raw id when stripping would leave nothing.
pub(crate) fn normalize_tool_call_id(raw: &str) -> &str {
    let trimmed = raw.trim().trim_start_matches('-');
    if trimmed.is_empty() {
        raw
    } else {
        trimmed
    }
}

/// Answers object handed back when resuming on tool output: the
/// output's `answers` object when present and well-formed, otherwise
/// empty. An errored tool always resumes empty.
pub(crate) fn resume_answers(state: ToolOutputState, output: Option<&Value>) -> Value {
    if state == ToolOutputState::OutputError {
        return json!({});
    }
    match output.and_then(|output| output.get("answers")) {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => json!({}),
    }
}
