//! Conversation store: the transcript the agent owns.
//!
//! Entries are append-only except for pruning. A pinned system preamble sits
//! outside the entry list and is never pruned. Provider messages are derived
//! from the entries on every request.

use kestrel_core::message::{ChatEntry, ChatEntryKind, Message};
use tracing::debug;

use crate::token::{estimate_entry_tokens, estimate_tokens, ENTRY_OVERHEAD};

/// Outcome of a [`ConversationStore::prune`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    /// Entries removed
    pub removed: usize,
    /// Estimated size after pruning
    pub estimated_tokens: usize,
    /// Whether the result fits the limit
    pub within_budget: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    preamble: Option<String>,
    entries: Vec<ChatEntry>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preamble(preamble: impl Into<String>) -> Self {
        Self {
            preamble: Some(preamble.into()),
            entries: Vec::new(),
        }
    }

    pub fn preamble(&self) -> Option<&str> {
        self.preamble.as_deref()
    }

    pub fn set_preamble(&mut self, preamble: impl Into<String>) {
        self.preamble = Some(preamble.into());
    }

    /// Append an entry and return its index.
    pub fn append(&mut self, entry: ChatEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ChatEntry> {
        self.entries.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry. The preamble stays.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Index of the most recent user entry.
    fn last_user_index(&self) -> Option<usize> {
        self.entries.iter().rposition(|e| e.kind == ChatEntryKind::User)
    }

    /// Entries of the most recent user turn, starting at the user entry.
    pub fn current_turn(&self) -> &[ChatEntry] {
        match self.last_user_index() {
            Some(start) => &self.entries[start..],
            None => &[],
        }
    }

    fn preamble_tokens(&self) -> usize {
        self.preamble
            .as_deref()
            .map(|p| ENTRY_OVERHEAD + estimate_tokens(p))
            .unwrap_or(0)
    }

    /// Heuristic size of preamble plus history.
    pub fn estimated_tokens(&self) -> usize {
        self.preamble_tokens() + self.entries.iter().map(estimate_entry_tokens).sum::<usize>()
    }

    /// Derive provider messages: preamble first, then the transcript.
    ///
    /// Tool calls ride on the assistant message that issued them. Calls whose
    /// assistant entry carried no text are grouped into one synthesized
    /// assistant message. Empty assistant entries are skipped.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.entries.len() + 1);
        if let Some(preamble) = &self.preamble {
            messages.push(Message::system(preamble.as_str()));
        }

        let mut attached: Vec<&str> = Vec::new();
        let mut synthesized_open = false;

        for entry in &self.entries {
            match entry.kind {
                ChatEntryKind::User => {
                    messages.push(Message::user(entry.content.as_str()));
                    synthesized_open = false;
                }
                ChatEntryKind::Assistant => {
                    let calls = entry.tool_calls.clone().unwrap_or_default();
                    if entry.content.is_empty() && calls.is_empty() {
                        continue;
                    }
                    attached = entry
                        .tool_calls
                        .iter()
                        .flatten()
                        .map(|c| c.id.as_str())
                        .collect();
                    messages.push(Message::assistant(entry.content.as_str()).with_tool_calls(calls));
                    synthesized_open = false;
                }
                ChatEntryKind::ToolCall => {
                    let Some(call) = &entry.tool_call else { continue };
                    if attached.contains(&call.id.as_str()) {
                        continue;
                    }
                    match messages.last_mut() {
                        Some(last) if synthesized_open => last.tool_calls.push(call.clone()),
                        _ => {
                            messages.push(Message::assistant("").with_tool_calls(vec![call.clone()]));
                            synthesized_open = true;
                        }
                    }
                }
                ChatEntryKind::ToolResult => {
                    let Some(call_id) = entry.call_id() else { continue };
                    messages.push(Message::tool_result(call_id, entry.content.as_str()));
                    synthesized_open = false;
                }
            }
        }

        messages
    }

    /// Split `entries[..end]` into removable units.
    ///
    /// A tool exchange (assistant entry with calls, its `tool_call` entries
    /// and their `tool_result` entries) forms one unit. A new round of
    /// `tool_call` entries after a result starts a new unit.
    fn units(&self, end: usize) -> Vec<std::ops::Range<usize>> {
        let mut units = Vec::new();
        let mut i = 0;
        while i < end {
            let start = i;
            let opens_exchange = match self.entries[i].kind {
                ChatEntryKind::Assistant => self.entries[i].has_tool_calls(),
                ChatEntryKind::ToolCall | ChatEntryKind::ToolResult => true,
                ChatEntryKind::User => false,
            };
            i += 1;
            if opens_exchange {
                let mut seen_result = self.entries[start].kind == ChatEntryKind::ToolResult;
                while i < end {
                    match self.entries[i].kind {
                        ChatEntryKind::ToolCall if !seen_result => {}
                        ChatEntryKind::ToolResult => seen_result = true,
                        _ => break,
                    }
                    i += 1;
                }
            }
            units.push(start..i);
        }
        units
    }

    /// Remove the oldest entries until the estimate fits `limit`.
    ///
    /// The preamble, the most recent user entry and the newest exchange after
    /// it are never removed. Older exchanges of the current turn go like any
    /// other, always whole. Survivors keep their order.
    pub fn prune(&mut self, limit: usize) -> PruneReport {
        let mut total = self.estimated_tokens();
        if total <= limit {
            return PruneReport {
                removed: 0,
                estimated_tokens: total,
                within_budget: true,
            };
        }

        let latest_user = self.last_user_index();
        let units = self.units(self.entries.len());
        let newest = units
            .last()
            .filter(|unit| latest_user.is_some_and(|user| unit.start > user))
            .cloned();

        let mut keep = vec![true; self.entries.len()];
        let mut removed = 0;

        for unit in units {
            if total <= limit {
                break;
            }
            if Some(unit.start) == latest_user || Some(&unit) == newest.as_ref() {
                continue;
            }
            for index in unit {
                total -= estimate_entry_tokens(&self.entries[index]);
                keep[index] = false;
                removed += 1;
            }
        }

        let mut flags = keep.into_iter();
        self.entries.retain(|_| flags.next().unwrap_or(true));

        debug!(removed, estimated_tokens = total, limit, "Pruned conversation");

        PruneReport {
            removed,
            estimated_tokens: total,
            within_budget: total <= limit,
        }
    }
}
