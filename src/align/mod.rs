//! Word→interval reconciliation.
//!
//! A free-running word-level transcription produces segment boundaries that
//! rarely match the target intervals another stage supplies (e.g. forced VAD
//! boundaries). This module reassigns every word to exactly one target
//! interval using deterministic, explainable tie-break heuristics; the
//! precedence of the ranking criteria is load-bearing and must not be
//! "improved".

pub mod adjust;

use crate::error::{Result, SubgenError};
use crate::project::{TimedItem, WordTiming};
use crate::timing::Interval;
use std::collections::BTreeMap;

/// Trailing punctuation that glues a word to its predecessor's interval.
pub fn ends_with_continuation(text: &str) -> bool {
    const MARKERS: [&str; 8] = ["...", ",", "、", ".", "。", "?", "!", "…"];
    MARKERS.iter().any(|m| text.ends_with(m))
}

/// The words of one source item that landed in one target interval.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedGroup {
    /// Index of the source item in the input slice.
    pub item: usize,
    /// Index of the target interval in the input timeline.
    pub timing: usize,
    pub words: Vec<WordTiming>,
}

impl AlignedGroup {
    /// The group's text, words joined without separators (word timings keep
    /// their own leading spaces, CJK text has none).
    pub fn concatenated_text(&self) -> String {
        self.words.iter().map(|w| w.text.as_str()).collect()
    }
}

/// Bidirectional index over the alignment, plus the two leftover sets that
/// must be surfaced to callers rather than dropped.
#[derive(Debug, Clone, Default)]
pub struct Alignment {
    pub groups: Vec<AlignedGroup>,
    /// timing index → indices into `groups`.
    pub by_timing: BTreeMap<usize, Vec<usize>>,
    /// item index → indices into `groups`.
    pub by_item: BTreeMap<usize, Vec<usize>>,
    /// Target intervals with zero matched words ("missing transcription").
    pub unmatched_timings: Vec<usize>,
    /// Source items with zero matched words ("extra transcription").
    pub extra_items: Vec<usize>,
}

impl Alignment {
    pub fn groups_for_timing(&self, timing: usize) -> impl Iterator<Item = &AlignedGroup> {
        self.by_timing
            .get(&timing)
            .into_iter()
            .flatten()
            .map(|&g| &self.groups[g])
    }

    pub fn total_words(&self) -> usize {
        self.groups.iter().map(|g| g.words.len()).sum()
    }
}

/// Assign every word of every item to exactly one target interval.
///
/// Items without word timings are treated as a single synthetic word
/// spanning the whole item, so metadata-only items still participate.
pub fn align(items: &[TimedItem], timings: &[Interval]) -> Result<Alignment> {
    if timings.is_empty() {
        return Err(SubgenError::InvariantViolation(
            "alignment requested against an empty target timeline".into(),
        ));
    }

    let mut groups: Vec<AlignedGroup> = Vec::new();
    let mut expected_words = 0usize;

    for (item_index, item) in items.iter().enumerate() {
        let synthetic;
        let words: &[WordTiming] = if item.words.is_empty() {
            synthetic = [WordTiming::new(item.interval, "", 0.0)];
            &synthetic
        } else {
            &item.words
        };
        expected_words += words.len();

        // Group index of the last assignment for this item, and whether the
        // previous word was glued by a continuation marker.
        let mut last_assigned: Option<usize> = None;
        let mut prev_was_continuation = false;

        for word in words {
            // Continuation rule: trailing punctuation attaches this word to
            // the same interval as its predecessor, skipping overlap math.
            if ends_with_continuation(&word.text) {
                if let Some(group) = last_assigned {
                    groups[group].words.push(word.clone());
                    prev_was_continuation = true;
                    continue;
                }
            }

            let chosen = choose_timing(word, timings, prev_was_continuation)?;
            let group = find_or_create_group(&mut groups, item_index, chosen);
            groups[group].words.push(word.clone());

            last_assigned = Some(group);
            prev_was_continuation = false;
        }
    }

    let mut alignment = Alignment::default();
    for (index, group) in groups.iter().enumerate() {
        alignment.by_timing.entry(group.timing).or_default().push(index);
        alignment.by_item.entry(group.item).or_default().push(index);
    }
    alignment.groups = groups;
    alignment.unmatched_timings = (0..timings.len())
        .filter(|t| !alignment.by_timing.contains_key(t))
        .collect();
    alignment.extra_items = (0..items.len())
        .filter(|i| !alignment.by_item.contains_key(i))
        .collect();

    // Conservation: a dropped or duplicated word is a bug, not a tolerable
    // inaccuracy.
    if alignment.total_words() != expected_words {
        return Err(SubgenError::InvariantViolation(format!(
            "alignment assigned {} words out of {}",
            alignment.total_words(),
            expected_words
        )));
    }

    Ok(alignment)
}

/// Pick the target interval for one word.
fn choose_timing(
    word: &WordTiming,
    timings: &[Interval],
    prev_was_continuation: bool,
) -> Result<usize> {
    let word_mid = word.interval.midpoint_nanos();

    let mut overlapping: Vec<(usize, f32, f32)> = Vec::new(); // (timing, of_word, of_timing)
    let mut closest: Option<(usize, i128)> = None;

    for (index, timing) in timings.iter().enumerate() {
        if let Some(o) = word.interval.overlap_with(timing) {
            overlapping.push((index, o.of_a, o.of_b));
        }

        let timing_mid = timing.midpoint_nanos();
        let distance = (timing_mid - word_mid).abs();
        if closest.is_none_or(|(_, best)| distance < best) {
            // After a glued word, never pull the next word backward: only
            // intervals at or after the word's midpoint qualify as nearest.
            if !prev_was_continuation || timing_mid > word_mid {
                closest = Some((index, distance));
            }
        }
    }

    // A trailing continuation word after the final interval can leave no
    // nearest candidate; fall back to the timeline's last interval.
    let closest = closest.map(|(index, _)| index).unwrap_or(timings.len() - 1);

    let chosen = match overlapping.len() {
        0 => closest,
        1 => overlapping[0].0,
        _ if prev_was_continuation => {
            // Glued context: always take the temporally latest overlap.
            overlapping[overlapping.len() - 1].0
        }
        _ => {
            // Rank by fraction of the target interval covered, then by
            // fraction of the word covered; earliest wins a full tie.
            // Precedence order is intentional and downstream behavior
            // depends on it.
            let mut best = overlapping[0];
            for candidate in &overlapping[1..] {
                let better_target = candidate.2 > best.2;
                let tie_better_word = candidate.2 == best.2 && candidate.1 > best.1;
                if better_target || tie_better_word {
                    best = *candidate;
                }
            }
            best.0
        }
    };

    Ok(chosen)
}

fn find_or_create_group(groups: &mut Vec<AlignedGroup>, item: usize, timing: usize) -> usize {
    if let Some(index) = groups
        .iter()
        .position(|g| g.item == item && g.timing == timing)
    {
        index
    } else {
        groups.push(AlignedGroup {
            item,
            timing,
            words: Vec::new(),
        });
        groups.len() - 1
    }
}
