//! Case-insensitive key/value metadata attached to timeline items.
//!
//! Every upstream stage (transcription, translation, on-screen text, speaker
//! tagging) contributes string fields; downstream stages read them through
//! the reserved-key accessors below. Keys are unique case-insensitively and
//! the first-seen casing is preserved for serialization.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved key: spoken text produced by a transcription stage.
pub const KEY_VOICE_TEXT: &str = "VoiceText";
/// Reserved key: translated text produced by a translation stage.
pub const KEY_TRANSLATED_TEXT: &str = "TranslatedText";
/// Reserved key: marks an interval as containing no speech.
pub const KEY_NO_VOICE: &str = "NoVoice";
/// Reserved key: text visible on screen rather than spoken.
pub const KEY_ON_SCREEN_TEXT: &str = "OnScreenText";

/// Per-key merge rules: rename a key on merge, or drop it entirely
/// (empty target name). Keys are matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergeRules(pub BTreeMap<String, String>);

impl MergeRules {
    fn lookup(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Case-insensitive string→string bag. Insertion order is preserved only
/// for readable serialization; it carries no meaning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataBag {
    entries: Vec<(String, String)>,
}

impl MetadataBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-entry bag, the common case for imported text.
    pub fn simple(key: &str, value: &str) -> Self {
        let mut bag = Self::new();
        bag.insert(key, value);
        bag
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace. An existing key keeps its original casing.
    pub fn insert(&mut self, key: &str, value: &str) {
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some((_, v)) => *v = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge `other` into `self`, last-writer-wins per key. Optional rules
    /// rename keys on the way in or drop them (empty rename target).
    pub fn merge(&mut self, other: &MetadataBag, rules: Option<&MergeRules>) {
        for (key, value) in other.iter() {
            match rules.and_then(|r| r.lookup(key)) {
                Some("") => {} // dropped by rule
                Some(renamed) => self.insert(renamed, value),
                None => self.insert(key, value),
            }
        }
    }

    // --- Reserved-key views ---

    pub fn voice_text(&self) -> Option<&str> {
        self.get(KEY_VOICE_TEXT)
    }

    pub fn translated_text(&self) -> Option<&str> {
        self.get(KEY_TRANSLATED_TEXT)
    }

    pub fn on_screen_text(&self) -> Option<&str> {
        self.get(KEY_ON_SCREEN_TEXT)
    }

    /// An interval is vocal unless it carries a no-voice marker or is
    /// classified as on-screen text.
    pub fn is_vocal(&self) -> bool {
        !self.contains_key(KEY_NO_VOICE) && !self.contains_key(KEY_ON_SCREEN_TEXT)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for MetadataBag {
    fn from(pairs: [(&str, &str); N]) -> Self {
        let mut bag = Self::new();
        for (k, v) in pairs {
            bag.insert(k, v);
        }
        bag
    }
}

impl Serialize for MetadataBag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MetadataBag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BagVisitor;

        impl<'de> Visitor<'de> for BagVisitor {
            type Value = MetadataBag;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of string metadata")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut bag = MetadataBag::new();
                while let Some((key, value)) = access.next_entry::<String, String>()? {
                    bag.insert(&key, &value);
                }
                Ok(bag)
            }
        }

        deserializer.deserialize_map(BagVisitor)
    }
}
