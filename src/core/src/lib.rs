//! Relay core: the agent session runtime.
//!
//! Hosts many concurrent sessions against one external agent harness.
//! Every user action and every harness event is stamped with a
//! per-session sequence number and appended to a durable stream; the
//! `client` module reconciles replayed, optimistic, and in-flight
//! message snapshots into one canonical list.

pub mod auth_retry;
pub mod client;
pub mod config;
pub mod harness;
pub mod runtime;
pub mod sequencer;
pub mod session;
pub mod transport;

pub use config::RelayConfig;
pub use harness::{
    AgentHarness, ApprovalCallOptions, ApprovalDecision, DisplayState, MemoryScope,
    ProviderOptions, ResumeRequest, RunEvent, RunHandle, RunLifecycle, RunOptions, RunStream,
    ThinkingOptions,
};
pub use runtime::{
    DisplayStateOutcome, EnsureOutcome, SendMetadata, SendOutcome, SessionRuntime, ToolOutputState,
};
pub use session::{PermissionMode, SessionContext};
pub use transport::{DurableStream, SqliteStreamStore, StreamProducer, StreamScope};
