use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::harness::RunHandle;
use crate::session::{PermissionMode, SessionContext};

/// Per-send overrides carried alongside the message text. Absent fields
/// leave the session context untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<bool>,
}

#[derive(Debug)]
pub(super) struct PendingSend {
    pub content: String,
    pub metadata: SendMetadata,
    pub client_message_id: Option<String>,
}

/// All mutable per-session bookkeeping, behind one runtime-wide lock.
/// Held only for map reads/writes, never across an await on the harness.
#[derive(Default)]
pub(super) struct RuntimeState {
    pub contexts: HashMap<String, SessionContext>,
    /// The live run per session; the handle carries the run id.
    pub run_handles: HashMap<String, RunHandle>,
    /// Sessions with a live drain task.
    pub sending: HashSet<String>,
    pub send_queue: HashMap<String, VecDeque<PendingSend>>,
    /// Serializes submit-write + harness-call pairs per session.
    pub op_locks: HashMap<String, Arc<Mutex<()>>>,
}
