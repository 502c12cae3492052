//! Client-side reconciliation: merges history replay, optimistic local
//! state, and the in-flight streaming message into one canonical,
//! gap-free message list. Pure recomputation, safe to run on every
//! render.

mod assembler;
mod reconcile;

pub use assembler::MessageAssembler;
pub use reconcile::{dedupe_messages, DedupeOutcome, DedupeSummary};
