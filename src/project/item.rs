//! Timeline items: an interval, a metadata bag, and optional word timings.

use crate::metadata::MetadataBag;
use crate::timing::Interval;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single word (or token) with its own timestamp, as produced by
/// word-level transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    #[serde(flatten)]
    pub interval: Interval,
    pub text: String,
    #[serde(default)]
    pub confidence: f32,
}

impl WordTiming {
    pub fn new(interval: Interval, text: &str, confidence: f32) -> Self {
        Self {
            interval,
            text: text.to_string(),
            confidence,
        }
    }
}

/// An interval on the timeline plus everything the stages know about it.
///
/// Identity is positional (the index in the owning collection), never
/// value equality; two items with identical fields are still distinct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedItem {
    #[serde(flatten)]
    pub interval: Interval,
    #[serde(default, skip_serializing_if = "MetadataBag::is_empty")]
    pub metadata: MetadataBag,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<WordTiming>,
}

impl TimedItem {
    pub fn new(interval: Interval, metadata: MetadataBag) -> Self {
        Self {
            interval,
            metadata,
            words: Vec::new(),
        }
    }

    pub fn with_words(mut self, words: Vec<WordTiming>) -> Self {
        self.words = words;
        self
    }

    pub fn start(&self) -> Duration {
        self.interval.start
    }

    pub fn end(&self) -> Duration {
        self.interval.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::KEY_VOICE_TEXT;

    #[test]
    fn item_serializes_with_flat_interval() {
        let item = TimedItem::new(
            Interval::from_secs(1.0, 2.5).unwrap(),
            MetadataBag::simple(KEY_VOICE_TEXT, "hello"),
        );
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["start"], "00:00:01.000");
        assert_eq!(json["end"], "00:00:02.500");
        assert_eq!(json["metadata"]["VoiceText"], "hello");
        assert!(json.get("words").is_none());
    }

    #[test]
    fn words_round_trip() {
        let item = TimedItem::new(Interval::from_secs(0.0, 2.0).unwrap(), MetadataBag::new())
            .with_words(vec![WordTiming::new(
                Interval::from_secs(0.0, 1.0).unwrap(),
                "Hi",
                0.9,
            )]);
        let json = serde_json::to_string(&item).unwrap();
        let back: TimedItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }
}
