//! Contract for the external agent harness.
//!
//! The harness turns a prompt into a stream of structured events. The
//! runtime stays agnostic to event internals: emitted payloads flow
//! through the sequencer verbatim, and only the lifecycle markers drive
//! run bookkeeping.

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Options passed to every run-starting harness call.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_steps: u32,
    pub memory: MemoryScope,
    pub require_tool_approval: bool,
    /// Present only when thinking is enabled for the session.
    pub provider_options: Option<ProviderOptions>,
    /// Ordered connection parameters derived from the session context.
    pub request_entries: Vec<(String, String)>,
}

/// Harness memory scoping; thread and resource are both the session id.
#[derive(Debug, Clone)]
pub struct MemoryScope {
    pub thread: String,
    pub resource: String,
}

#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub thinking: ThinkingOptions,
}

#[derive(Debug, Clone)]
pub struct ThinkingOptions {
    pub budget_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Accept,
    Decline,
}

impl ApprovalDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Decline => "decline",
        }
    }
}

/// Read-only run snapshot sourced from the harness.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayState {
    pub is_running: bool,
    pub token_usage: Value,
}

/// Resume data for a run suspended on a tool call.
#[derive(Debug, Clone)]
pub struct ResumeRequest {
    pub run_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    /// Empty object when the tool errored or produced no answers.
    pub answers: Value,
    pub fallback_context: Option<Value>,
}

/// Target of an approve/decline re-authorization call.
#[derive(Debug, Clone)]
pub struct ApprovalCallOptions {
    pub run_id: String,
    pub tool_call_id: String,
    pub options: RunOptions,
}

/// One event from a live run.
#[derive(Debug)]
pub enum RunEvent {
    /// A verbatim harness event object; persisted as-is.
    Emitted(Value),
    Lifecycle(RunLifecycle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunLifecycle {
    Started,
    Completed,
    Failed { error: String },
    Canceled,
}

/// Cancellation handle for an in-flight run. A session holds at most one.
#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    abort_tx: Option<oneshot::Sender<()>>,
}

impl RunHandle {
    pub fn new(run_id: impl Into<String>) -> (Self, oneshot::Receiver<()>) {
        let (abort_tx, abort_rx) = oneshot::channel();
        (
            Self {
                run_id: run_id.into(),
                abort_tx: Some(abort_tx),
            },
            abort_rx,
        )
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Request cancellation. Returns false if the run already finished
    /// or abort was already requested.
    pub fn abort(&mut self) -> bool {
        match self.abort_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// A live run: its id, its event stream, and its cancellation handle.
#[derive(Debug)]
pub struct RunStream {
    pub run_id: String,
    pub events: mpsc::UnboundedReceiver<RunEvent>,
    pub handle: RunHandle,
}

/// The external agent/model-execution engine.
///
/// Session scoping is explicit: every method takes the session id, and
/// `switch_model` applies to that session's conversation thread only.
pub trait AgentHarness: Send + Sync {
    fn stream<'a>(
        &'a self,
        session_id: &'a str,
        prompt: &'a str,
        options: RunOptions,
    ) -> BoxFuture<'a, Result<RunStream, String>>;

    fn resume_stream<'a>(
        &'a self,
        session_id: &'a str,
        resume: ResumeRequest,
        options: RunOptions,
    ) -> BoxFuture<'a, Result<RunStream, String>>;

    fn approve_tool_call<'a>(
        &'a self,
        session_id: &'a str,
        call: ApprovalCallOptions,
    ) -> BoxFuture<'a, Result<RunStream, String>>;

    fn decline_tool_call<'a>(
        &'a self,
        session_id: &'a str,
        call: ApprovalCallOptions,
    ) -> BoxFuture<'a, Result<RunStream, String>>;

    fn switch_model<'a>(
        &'a self,
        session_id: &'a str,
        model_id: &'a str,
    ) -> BoxFuture<'a, Result<(), String>>;

    fn respond_to_tool_approval<'a>(
        &'a self,
        session_id: &'a str,
        tool_call_id: &'a str,
        decision: ApprovalDecision,
    ) -> BoxFuture<'a, Result<(), String>>;

    fn respond_to_question<'a>(
        &'a self,
        session_id: &'a str,
        question_id: &'a str,
        answer: &'a str,
    ) -> BoxFuture<'a, Result<(), String>>;

    fn respond_to_plan_approval<'a>(
        &'a self,
        session_id: &'a str,
        plan_id: &'a str,
        action: &'a str,
        feedback: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), String>>;

    fn display_state<'a>(&'a self, session_id: &'a str)
        -> BoxFuture<'a, Result<DisplayState, String>>;

    fn abort<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), String>>;
}
