//! Turning a reference timeline into bounded AI requests.
//!
//! Items still needing work are grouped into batches of a configured size;
//! a sliding window of already-resolved neighbors is prepended as read-only
//! context, with a per-field character cap (oldest items truncated first)
//! so one verbose field cannot blow up the prompt.

use crate::ai::request::{AiRequest, Content, ContentPart, Message, Role};
use crate::project::TimedItem;
use crate::timing::format_timecode;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Tuning knobs for batch construction, embedded in AI worker config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiOptions {
    /// Maximum items requested per AI round-trip.
    pub batch_size: usize,
    /// Already-resolved neighbors prepended as read-only context.
    pub context_items: usize,
    /// Per-field character budget within the context window.
    pub max_field_chars: usize,
    /// A response resolving fewer items than this aborts the request loop
    /// (the model has stopped cooperating).
    pub min_items_to_continue: usize,
    /// Metadata key whose presence marks an item as done.
    pub produces: String,
    /// Requirements on the reference metadata for an item to need work at
    /// all; `!Key` means the key must be absent. Lets a stage skip rows
    /// already classified as non-vocal, for example.
    pub needed: Vec<String>,
}

impl Default for AiOptions {
    fn default() -> Self {
        Self {
            batch_size: 20,
            context_items: 10,
            max_field_chars: 1000,
            min_items_to_continue: 1,
            produces: crate::metadata::KEY_VOICE_TEXT.to_string(),
            needed: Vec::new(),
        }
    }
}

impl AiOptions {
    fn rules_respected(&self, metadata: &crate::metadata::MetadataBag) -> bool {
        self.needed.iter().all(|rule| match rule.strip_prefix('!') {
            Some(key) => !metadata.contains_key(key),
            None => metadata.contains_key(rule),
        })
    }
}

/// State of one reference row with respect to this stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowState {
    /// Work needed and not yet produced.
    ToDo,
    /// Work already produced by a previous run or batch.
    Done,
    /// Not needed by this stage's rules.
    Skipped,
}

/// Builds successive requests for one AI stage over a fixed reference
/// timeline, re-reading the target collection's items each time so applied
/// responses shrink the remaining work.
#[derive(Debug)]
pub struct RequestBuilder<'a> {
    task_id: String,
    reference: &'a [TimedItem],
    options: &'a AiOptions,
    system_prompt: Option<String>,
    user_prompt: Option<String>,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(
        task_id: &str,
        reference: &'a [TimedItem],
        options: &'a AiOptions,
        system_prompt: Option<String>,
        user_prompt: Option<String>,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            reference,
            options,
            system_prompt,
            user_prompt,
        }
    }

    fn classify(&self, produced: &[TimedItem]) -> Vec<RowState> {
        self.reference
            .iter()
            .map(|row| {
                if !self.options.rules_respected(&row.metadata) {
                    return RowState::Skipped;
                }
                let done = produced.iter().any(|item| {
                    item.interval.start == row.interval.start
                        && item.metadata.contains_key(&self.options.produces)
                });
                if done { RowState::Done } else { RowState::ToDo }
            })
            .collect()
    }

    /// Remaining rows this stage still has to produce.
    pub fn remaining(&self, produced: &[TimedItem]) -> usize {
        self.classify(produced)
            .iter()
            .filter(|s| **s == RowState::ToDo)
            .count()
    }

    pub fn is_finished(&self, produced: &[TimedItem]) -> bool {
        self.remaining(produced) == 0
    }

    /// Build the next bounded request, or `None` when the stage is done.
    pub fn next_request(&self, produced: &[TimedItem], number: u32) -> Option<AiRequest> {
        let states = self.classify(produced);
        let first_todo = states.iter().position(|s| *s == RowState::ToDo)?;

        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(Message::text(Role::System, system));
        }

        let mut parts: Vec<ContentPart> = Vec::new();
        if let Some(user) = &self.user_prompt {
            parts.push(ContentPart::Text { text: user.clone() });
        }

        // Read-only context: the resolved rows just before the first to-do,
        // oldest first, fields truncated from the oldest side of the window.
        let context_start = first_todo.saturating_sub(self.options.context_items);
        let context_rows: Vec<&TimedItem> = (context_start..first_todo)
            .filter(|&i| states[i] == RowState::Done)
            .map(|i| &self.reference[i])
            .collect();
        for (position, row) in context_rows.iter().enumerate() {
            let produced_row = produced
                .iter()
                .find(|item| item.interval.start == row.interval.start);
            parts.push(ContentPart::Text {
                text: self.render_context_row(row, produced_row, position, context_rows.len()),
            });
        }

        let mut in_batch = 0usize;
        for (index, state) in states.iter().enumerate().skip(first_todo) {
            if *state != RowState::ToDo {
                continue;
            }
            parts.push(ContentPart::Text {
                text: render_row_json(&self.reference[index], None),
            });
            in_batch += 1;
            if in_batch == self.options.batch_size {
                break;
            }
        }

        messages.push(Message {
            role: Role::User,
            content: Content::Parts(parts),
        });

        Some(AiRequest::new(&self.task_id, number, messages, in_batch))
    }

    /// A context row shows the reference metadata plus what the stage
    /// already produced for it. `position`/`total` drive oldest-first
    /// truncation: the per-field budget is split across the window and
    /// unspent budget rolls forward, so the newest rows keep full text.
    fn render_context_row(
        &self,
        row: &TimedItem,
        produced: Option<&TimedItem>,
        position: usize,
        total: usize,
    ) -> String {
        let remaining_rows = total - position;
        let budget = self.options.max_field_chars / remaining_rows.max(1);
        let merged = match produced {
            Some(item) => {
                let mut bag = row.metadata.clone();
                bag.merge(&item.metadata, None);
                bag
            }
            None => row.metadata.clone(),
        };
        let mut capped = crate::metadata::MetadataBag::new();
        for (key, value) in merged.iter() {
            capped.insert(key, &truncate_front(value, budget));
        }
        render_row_json(&TimedItem::new(row.interval, capped), Some("context"))
    }
}

/// Serialize one row as the indented JSON object the model sees, reserved
/// timing fields injected alongside the metadata.
fn render_row_json(row: &TimedItem, note: Option<&str>) -> String {
    let mut object = serde_json::Map::new();
    if let Some(note) = note {
        object.insert("Context".into(), json!(note));
    }
    object.insert(
        "StartTime".into(),
        json!(format_timecode(row.interval.start)),
    );
    object.insert("EndTime".into(), json!(format_timecode(row.interval.end)));
    for (key, value) in row.metadata.iter() {
        object.insert(key.to_string(), json!(value));
    }
    serde_json::to_string_pretty(&object).unwrap_or_else(|_| "{}".to_string())
}

/// Keep the tail of `text`, which for running dialogue is the recent part.
fn truncate_front(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let tail: String = text
        .chars()
        .rev()
        .take(budget.saturating_sub(1))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("…{tail}")
}
