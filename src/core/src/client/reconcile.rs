use std::collections::{HashMap, HashSet};

use serde_json::Value;

use relay_protocol::{Message, Part, Role};

/// Audit record of what reconciliation removed and why.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupeSummary {
    pub initial_message_count: usize,
    pub final_message_count: usize,
    /// Message ids that appeared more than once in the candidates.
    pub dropped_message_ids: Vec<String>,
    pub dropped_tool_part_count: usize,
    pub dropped_tool_parts_by_message: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct DedupeOutcome {
    pub messages: Vec<Message>,
    pub summary: DedupeSummary,
}

/// Merge a candidate list (history + optimistic + in-flight) into one
/// deduplicated, ordered message list.
///
/// Four passes, in order:
/// 1. message-level dedupe by id — last occurrence's payload wins, first
///    occurrence's position is kept;
/// 2. tool-part dedupe within each message — same rule per part id;
/// 3. resolved-over-executing — a still-executing call whose
///    `(name, args)` signature matches a resolved call is a stale
///    duplicate and is dropped;
/// 4. turn-bounded subsumption — an assistant message whose parts are a
///    multiset subset of a later assistant message in the same turn is a
///    stale snapshot and is dropped.
pub fn dedupe_messages(candidates: &[Message]) -> DedupeOutcome {
    let mut summary = DedupeSummary {
        initial_message_count: candidates.len(),
        ..DedupeSummary::default()
    };

    let mut messages = dedupe_by_id(candidates, &mut summary.dropped_message_ids);

    for message in &mut messages {
        let dropped =
            dedupe_tool_parts(&mut message.content) + prune_superseded_calls(&mut message.content);
        if dropped > 0 {
            summary.dropped_tool_part_count += dropped;
            *summary
                .dropped_tool_parts_by_message
                .entry(message.id.clone())
                .or_insert(0) += dropped;
        }
    }

    let messages = prune_subsumed_turn_snapshots(messages);
    summary.final_message_count = messages.len();
    DedupeOutcome { messages, summary }
}

fn dedupe_by_id(candidates: &[Message], dropped_ids: &mut Vec<String>) -> Vec<Message> {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, Message> = HashMap::new();
    for message in candidates {
        if by_id.insert(message.id.clone(), message.clone()).is_some() {
            if !dropped_ids.contains(&message.id) {
                dropped_ids.push(message.id.clone());
            }
        } else {
            order.push(message.id.clone());
        }
    }
    order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect()
}

fn tool_part_key(part: &Part) -> Option<(&'static str, &str)> {
    match part {
        Part::ToolCall { id, .. } => Some(("tool_call", id)),
        Part::ToolResult { id, .. } => Some(("tool_result", id)),
        _ => None,
    }
}

/// Tool parts sharing an id keep the first occurrence's position but the
/// last occurrence's value.
fn dedupe_tool_parts(parts: &mut Vec<Part>) -> usize {
    let mut first_index: HashMap<(&'static str, String), usize> = HashMap::new();
    let mut kept: Vec<Part> = Vec::with_capacity(parts.len());
    let mut dropped = 0;
    for part in parts.drain(..) {
        let key = tool_part_key(&part).map(|(kind, id)| (kind, id.to_string()));
        match key {
            Some(key) => {
                if let Some(&at) = first_index.get(&key) {
                    kept[at] = part;
                    dropped += 1;
                } else {
                    first_index.insert(key, kept.len());
                    kept.push(part);
                }
            }
            None => kept.push(part),
        }
    }
    *parts = kept;
    dropped
}

/// Drop still-executing calls shadowed by a resolved call with the same
/// signature. Covers the client pattern where a completed call reappears
/// under a new id while the stale "executing" copy lingers.
fn prune_superseded_calls(parts: &mut Vec<Part>) -> usize {
    let resolved_ids: HashSet<String> = parts
        .iter()
        .filter_map(|part| match part {
            Part::ToolResult { id, .. } => Some(id.clone()),
            _ => None,
        })
        .collect();
    let resolved_signatures: HashSet<String> = parts
        .iter()
        .filter_map(|part| match part {
            Part::ToolCall { id, name, args } if resolved_ids.contains(id) => {
                Some(call_signature(name, args))
            }
            _ => None,
        })
        .collect();

    let before = parts.len();
    parts.retain(|part| match part {
        Part::ToolCall { id, name, args } if !resolved_ids.contains(id) => {
            !resolved_signatures.contains(&call_signature(name, args))
        }
        _ => true,
    });
    before - parts.len()
}

fn call_signature(name: &str, args: &Value) -> String {
    format!("{name}\u{1f}{}", stable_json(args))
}

/// JSON serialization with object keys sorted recursively, so equal
/// values always produce equal strings.
fn stable_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        Value::String(key.clone()),
                        stable_json(&map[key])
                    )
                })
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(stable_json).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

fn part_multiset(parts: &[Part]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for part in parts {
        let key = serde_json::to_value(part)
            .map(|value| stable_json(&value))
            .unwrap_or_default();
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

fn is_multiset_superset(sup: &HashMap<String, usize>, sub: &HashMap<String, usize>) -> bool {
    sub.iter()
        .all(|(key, count)| sup.get(key).copied().unwrap_or(0) >= *count)
}

/// Drop assistant messages fully contained in a later assistant message
/// within the same turn. The scan stops at the next user message, so
/// snapshots from different turns never subsume each other.
fn prune_subsumed_turn_snapshots(messages: Vec<Message>) -> Vec<Message> {
    let multisets: Vec<HashMap<String, usize>> = messages
        .iter()
        .map(|message| part_multiset(&message.content))
        .collect();
    let mut keep = vec![true; messages.len()];
    for i in 0..messages.len() {
        if messages[i].role != Role::Assistant {
            continue;
        }
        for j in (i + 1)..messages.len() {
            match messages[j].role {
                Role::User => break,
                Role::Assistant => {
                    if is_multiset_superset(&multisets[j], &multisets[i]) {
                        keep[i] = false;
                        break;
                    }
                }
            }
        }
    }
    messages
        .into_iter()
        .zip(keep)
        .filter_map(|(message, keep)| keep.then_some(message))
        .collect()
}
