//! Transcriptions and translations: the per-stage result collections.

use crate::metadata::MetadataBag;
use crate::project::cost::CostRecord;
use crate::project::item::TimedItem;
use crate::timing::Interval;
use serde::{Deserialize, Serialize};

/// Shared surface for the two collection kinds; the AI orchestrator and the
/// aggregator work against this instead of knowing which one they hold.
pub trait MetadataTimeline {
    /// Stage identifier as used in source patterns: `id` for transcriptions,
    /// `id/translation` for translations.
    fn full_id(&self) -> String;
    fn items(&self) -> &[TimedItem];
    fn items_mut(&mut self) -> &mut Vec<TimedItem>;
    fn costs_mut(&mut self) -> &mut Vec<CostRecord>;
    fn is_finished(&self) -> bool;
    /// Sort items by start time and flag the stage as done.
    fn mark_finished(&mut self);

    fn add_item(&mut self, interval: Interval, metadata: MetadataBag) {
        self.items_mut().push(TimedItem::new(interval, metadata));
    }
}

/// Result of one named transcription stage.
///
/// `finished` is the completion flag other stages poll. `job_state` is an
/// opaque, stage-defined resumption checkpoint (e.g. which source id a clone
/// used last time); the driver never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub id: String,
    pub language: String,
    #[serde(default)]
    pub items: Vec<TimedItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub costs: Vec<CostRecord>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_state: Option<serde_json::Value>,
    /// Stages like manual imports may re-run and overwrite after finishing.
    #[serde(default)]
    pub can_be_updated: bool,
}

impl Transcription {
    pub fn new(id: &str, language: &str) -> Self {
        Self {
            id: id.to_string(),
            language: language.to_string(),
            items: Vec::new(),
            costs: Vec::new(),
            finished: false,
            job_state: None,
            can_be_updated: false,
        }
    }

    /// Sort items by start time, then flag the stage as done.
    ///
    /// Incremental insertion does not keep `items` sorted; this is the one
    /// place ordering is restored.
    pub fn mark_finished(&mut self) {
        self.items.sort_by_key(|i| i.interval.start);
        self.finished = true;
    }

    /// The intervals of this stage's items, for use as a reference timeline.
    pub fn timings(&self) -> Vec<Interval> {
        self.items.iter().map(|i| i.interval).collect()
    }
}

impl MetadataTimeline for Transcription {
    fn full_id(&self) -> String {
        self.id.clone()
    }

    fn items(&self) -> &[TimedItem] {
        &self.items
    }

    fn items_mut(&mut self) -> &mut Vec<TimedItem> {
        &mut self.items
    }

    fn costs_mut(&mut self) -> &mut Vec<CostRecord> {
        &mut self.costs
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn mark_finished(&mut self) {
        Transcription::mark_finished(self);
    }
}

/// Result of one translation stage, keyed under its parent transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Translation {
    pub transcription_id: String,
    pub translation_id: String,
    pub language: String,
    #[serde(default)]
    pub items: Vec<TimedItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub costs: Vec<CostRecord>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_state: Option<serde_json::Value>,
    #[serde(default)]
    pub can_be_updated: bool,
}

impl Translation {
    pub fn new(transcription_id: &str, translation_id: &str, language: &str) -> Self {
        Self {
            transcription_id: transcription_id.to_string(),
            translation_id: translation_id.to_string(),
            language: language.to_string(),
            items: Vec::new(),
            costs: Vec::new(),
            finished: false,
            job_state: None,
            can_be_updated: false,
        }
    }

    pub fn mark_finished(&mut self) {
        self.items.sort_by_key(|i| i.interval.start);
        self.finished = true;
    }
}

impl MetadataTimeline for Translation {
    fn full_id(&self) -> String {
        format!("{}/{}", self.transcription_id, self.translation_id)
    }

    fn items(&self) -> &[TimedItem] {
        &self.items
    }

    fn items_mut(&mut self) -> &mut Vec<TimedItem> {
        &mut self.items
    }

    fn costs_mut(&mut self) -> &mut Vec<CostRecord> {
        &mut self.costs
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn mark_finished(&mut self) {
        Translation::mark_finished(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::KEY_VOICE_TEXT;

    #[test]
    fn mark_finished_sorts_items_by_start() {
        let mut t = Transcription::new("full", "ja");
        t.add_item(
            Interval::from_secs(5.0, 8.0).unwrap(),
            MetadataBag::simple(KEY_VOICE_TEXT, "b"),
        );
        t.add_item(
            Interval::from_secs(0.0, 4.0).unwrap(),
            MetadataBag::simple(KEY_VOICE_TEXT, "a"),
        );
        t.mark_finished();
        assert!(t.finished);
        assert_eq!(t.items[0].metadata.voice_text(), Some("a"));
        assert_eq!(t.items[1].metadata.voice_text(), Some("b"));
    }

    #[test]
    fn translation_full_id_includes_parent() {
        let tr = Translation::new("full", "en", "en");
        assert_eq!(tr.full_id(), "full/en");
    }

    #[test]
    fn job_state_is_opaque_json() {
        let mut t = Transcription::new("clone", "ja");
        t.job_state = Some(serde_json::json!({ "source_id": "import" }));
        let json = serde_json::to_string(&t).unwrap();
        let back: Transcription = serde_json::from_str(&json).unwrap();
        assert_eq!(back.job_state.unwrap()["source_id"], "import");
    }
}
