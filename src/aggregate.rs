//! Cross-stage metadata aggregation onto a reference timeline.
//!
//! Several upstream stages each produce time-stamped metadata on their own
//! schedule; before an AI stage can run it needs all of them merged onto the
//! single timeline it will answer against, and it needs a reason it can
//! show the user when they are not ready yet.

use crate::error::{Result, SubgenError};
use crate::metadata::{MergeRules, MetadataBag};
use crate::project::{MetadataTimeline, Project, TimedItem};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A worker declaration visible to pattern matching: what stage it produces
/// and whether it is enabled. Disabled stages are ignored by prerequisite
/// checks but still contribute finished results.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDecl {
    pub transcription_id: String,
    pub translation_id: Option<String>,
    pub enabled: bool,
}

impl StageDecl {
    pub fn full_id(&self) -> String {
        match &self.translation_id {
            Some(tr) => format!("{}/{}", self.transcription_id, tr),
            None => self.transcription_id.clone(),
        }
    }
}

/// `"<transcriptionId>|*[/<translationId>|*]"`; `*` expands to all declared
/// stages of that kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourcePattern(pub String);

impl SourcePattern {
    fn regex(&self) -> Result<Regex> {
        let escaped = self
            .0
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        Regex::new(&format!("^{escaped}$")).map_err(|e| SubgenError::Config {
            message: format!("invalid source pattern '{}': {e}", self.0),
        })
    }

    /// All declared stages matching this pattern, in declaration order.
    pub fn matching<'a>(&self, stages: &'a [StageDecl]) -> Result<Vec<&'a StageDecl>> {
        let regex = self.regex()?;
        Ok(stages
            .iter()
            .filter(|s| regex.is_match(&s.full_id()))
            .collect())
    }
}

/// Aggregation settings, embedded in AI worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataAggregator {
    /// Stage whose finished items supply the reference timeline.
    pub timings_source: String,
    /// Metadata providers, merged in declaration order (later sources
    /// override earlier on key collision).
    #[serde(default)]
    pub sources: Vec<SourcePattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_rules: Option<MergeRules>,
}

/// The outcome of one aggregation attempt. Unmet-dependency reasons are
/// captured instead of failing immediately so the caller can decide whether
/// timings are even required for its check.
#[derive(Debug, Clone)]
pub struct Aggregation {
    timings_source: String,
    unmet: Vec<String>,
    reference: Option<Vec<TimedItem>>,
}

impl Aggregation {
    /// Human-readable prerequisite check. With `timings_required`, a missing
    /// or unfinished timings source is itself an unmet dependency.
    pub fn prerequisites_met(&self, timings_required: bool) -> std::result::Result<(), String> {
        let mut reasons = self.unmet.clone();
        if timings_required && self.reference.is_none() {
            reasons.insert(
                0,
                format!(
                    "transcription '{}' is not done yet (for timings)",
                    self.timings_source
                ),
            );
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(reasons.join("\n"))
        }
    }

    /// Reference intervals with merged metadata, sorted by start time.
    pub fn reference_items(&self) -> Result<&[TimedItem]> {
        self.reference
            .as_deref()
            .ok_or_else(|| SubgenError::PrerequisiteNotMet {
                reason: format!(
                    "transcription '{}' is not done yet (for timings)",
                    self.timings_source
                ),
            })
    }
}

impl MetadataAggregator {
    /// Resolve patterns against the declared stages and the project's
    /// finished results, then merge providers onto the reference timeline.
    pub fn aggregate(&self, stages: &[StageDecl], project: &Project) -> Result<Aggregation> {
        let (providers, unmet) = self.collect_providers(stages, project)?;

        let reference = match project.transcription(&self.timings_source) {
            Some(t) if t.finished => Some(self.merge_providers(&t.timings(), &providers)?),
            _ => None,
        };

        Ok(Aggregation {
            timings_source: self.timings_source.clone(),
            unmet,
            reference,
        })
    }

    /// Finished provider collections in source-declaration order, plus the
    /// reasons for every enabled stage that is not finished yet.
    fn collect_providers<'a>(
        &self,
        stages: &[StageDecl],
        project: &'a Project,
    ) -> Result<(Vec<(String, &'a [TimedItem])>, Vec<String>)> {
        let mut providers: Vec<(String, &[TimedItem])> = Vec::new();
        let mut unmet: Vec<String> = Vec::new();

        for pattern in &self.sources {
            for stage in pattern.matching(stages)? {
                let timeline: Option<&dyn MetadataTimeline> = match &stage.translation_id {
                    None => project
                        .transcription(&stage.transcription_id)
                        .map(|t| t as &dyn MetadataTimeline),
                    Some(tr) => project
                        .translation(&stage.transcription_id, tr)
                        .map(|t| t as &dyn MetadataTimeline),
                };

                let finished = timeline.is_some_and(|t| t.is_finished());
                if stage.enabled && !finished {
                    let reason = match &stage.translation_id {
                        None => format!(
                            "transcription '{}' is not done yet",
                            stage.transcription_id
                        ),
                        Some(_) => format!("translation '{}' is not done yet", stage.full_id()),
                    };
                    if !unmet.contains(&reason) {
                        unmet.push(reason);
                    }
                }
                if finished {
                    let id = stage.full_id();
                    if !providers.iter().any(|(existing, _)| *existing == id) {
                        if let Some(t) = timeline {
                            providers.push((id, t.items()));
                        }
                    }
                }
            }
        }

        Ok((providers, unmet))
    }

    /// For each reference interval, merge every overlapping provider item in
    /// declaration order. A provider item claimed by no reference interval
    /// is a configuration bug and fails loudly.
    fn merge_providers(
        &self,
        timings: &[crate::timing::Interval],
        providers: &[(String, &[TimedItem])],
    ) -> Result<Vec<TimedItem>> {
        // Working "unclaimed" set: (provider index, item index).
        let mut unclaimed: Vec<(usize, usize)> = providers
            .iter()
            .enumerate()
            .flat_map(|(p, (_, items))| (0..items.len()).map(move |i| (p, i)))
            .collect();

        let mut merged: Vec<TimedItem> = Vec::with_capacity(timings.len());
        for timing in timings {
            let mut metadata = MetadataBag::new();
            for (p, (_, items)) in providers.iter().enumerate() {
                for (i, item) in items.iter().enumerate() {
                    if item.interval.overlaps(timing) {
                        unclaimed.retain(|&entry| entry != (p, i));
                        metadata.merge(&item.metadata, self.merge_rules.as_ref());
                    }
                }
            }
            merged.push(TimedItem::new(*timing, metadata));
        }

        if !unclaimed.is_empty() {
            let described: Vec<String> = unclaimed
                .iter()
                .map(|&(p, i)| format!("'{}' item at [{}]", providers[p].0, providers[p].1[i].interval))
                .collect();
            return Err(SubgenError::InvariantViolation(format!(
                "aggregation for timings source '{}' left {} provider item(s) unclaimed \
                 (reference timings do not cover the full timeline): {}",
                self.timings_source,
                described.len(),
                described.join(", ")
            )));
        }

        merged.sort_by_key(|item| item.interval.start);
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::KEY_VOICE_TEXT;
    use crate::timing::Interval;
    use std::path::Path;

    fn iv(start: f64, end: f64) -> Interval {
        Interval::from_secs(start, end).unwrap()
    }

    fn stage(id: &str, enabled: bool) -> StageDecl {
        StageDecl {
            transcription_id: id.to_string(),
            translation_id: None,
            enabled,
        }
    }

    fn project_with(transcriptions: Vec<(&str, Vec<(f64, f64, &str, &str)>, bool)>) -> Project {
        let mut project = Project::new(Path::new("/tmp/test.subgen.json"));
        for (id, items, finished) in transcriptions {
            let t = project.ensure_transcription(id, "ja");
            for (start, end, key, value) in items {
                t.add_item(iv(start, end), MetadataBag::simple(key, value));
            }
            if finished {
                t.mark_finished();
            }
        }
        project
    }

    fn aggregator(timings: &str, sources: &[&str]) -> MetadataAggregator {
        MetadataAggregator {
            timings_source: timings.to_string(),
            sources: sources.iter().map(|s| SourcePattern(s.to_string())).collect(),
            merge_rules: None,
        }
    }

    #[test]
    fn wildcard_matches_all_declared_stages() {
        let stages = vec![stage("vad", true), stage("full", true)];
        let pattern = SourcePattern("*".into());
        let matched = pattern.matching(&stages).unwrap();
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn translation_patterns_match_full_ids() {
        let stages = vec![
            StageDecl {
                transcription_id: "full".into(),
                translation_id: Some("en".into()),
                enabled: true,
            },
            stage("full", true),
        ];
        let matched = SourcePattern("full/*".into()).matching(&stages).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].full_id(), "full/en");
    }

    #[test]
    fn aggregation_merges_in_declaration_order() {
        let project = project_with(vec![
            ("vad", vec![(0.0, 5.0, "Speaker", "alice"), (5.0, 10.0, "Speaker", "bob")], true),
            ("full", vec![(1.0, 4.0, KEY_VOICE_TEXT, "hello"), (1.0, 4.0, "Speaker", "carol")], true),
        ]);
        let stages = vec![stage("vad", true), stage("full", true)];

        let agg = aggregator("vad", &["vad", "full"])
            .aggregate(&stages, &project)
            .unwrap();
        let reference = agg.reference_items().unwrap();

        assert_eq!(reference.len(), 2);
        // "full" declared later → its Speaker wins on the first interval.
        assert_eq!(reference[0].metadata.get("Speaker"), Some("carol"));
        assert_eq!(reference[0].metadata.voice_text(), Some("hello"));
        assert_eq!(reference[1].metadata.get("Speaker"), Some("bob"));
    }

    #[test]
    fn unclaimed_provider_item_is_an_invariant_violation() {
        let project = project_with(vec![
            ("vad", vec![(0.0, 5.0, "Speaker", "a")], true),
            // Item at (8,9) overlaps no reference interval.
            ("full", vec![(8.0, 9.0, KEY_VOICE_TEXT, "orphan")], true),
        ]);
        let stages = vec![stage("vad", true), stage("full", true)];

        let err = aggregator("vad", &["full"])
            .aggregate(&stages, &project)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("BUG"), "{message}");
        assert!(message.contains("full"), "{message}");
        assert!(message.contains("00:00:08.000"), "{message}");
    }

    #[test]
    fn unfinished_enabled_source_reports_a_reason() {
        let project = project_with(vec![
            ("vad", vec![(0.0, 5.0, "Speaker", "a")], true),
            ("full", vec![], false),
        ]);
        let stages = vec![stage("vad", true), stage("full", true)];

        let agg = aggregator("vad", &["*"]).aggregate(&stages, &project).unwrap();
        let reason = agg.prerequisites_met(true).unwrap_err();
        assert!(reason.contains("'full' is not done yet"));
    }

    #[test]
    fn disabled_unfinished_source_is_ignored() {
        let project = project_with(vec![("vad", vec![(0.0, 5.0, "Speaker", "a")], true)]);
        let stages = vec![stage("vad", true), stage("full", false)];

        let agg = aggregator("vad", &["*"]).aggregate(&stages, &project).unwrap();
        assert!(agg.prerequisites_met(true).is_ok());
    }

    #[test]
    fn missing_timings_source_only_fails_when_required() {
        let project = project_with(vec![("full", vec![(0.0, 5.0, KEY_VOICE_TEXT, "x")], true)]);
        let stages = vec![stage("vad", true), stage("full", true)];

        let agg = aggregator("vad", &["full"]).aggregate(&stages, &project).unwrap();
        assert!(agg.prerequisites_met(false).is_ok());
        assert!(agg.prerequisites_met(true).is_err());
        assert!(agg.reference_items().is_err());
    }

    #[test]
    fn reference_output_is_sorted_by_start() {
        let mut project = project_with(vec![("full", vec![(0.0, 12.0, KEY_VOICE_TEXT, "x")], true)]);
        // Unsorted reference timeline.
        let t = project.ensure_transcription("vad", "ja");
        t.add_item(iv(5.0, 10.0), MetadataBag::new());
        t.add_item(iv(0.0, 5.0), MetadataBag::new());
        t.add_item(iv(10.0, 15.0), MetadataBag::new());
        t.finished = true; // deliberately without the sorting mark_finished

        let stages = vec![stage("vad", true), stage("full", true)];
        let agg = aggregator("vad", &["full"]).aggregate(&stages, &project).unwrap();
        let reference = agg.reference_items().unwrap();
        let starts: Vec<_> = reference.iter().map(|r| r.interval.start).collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
    }

    #[test]
    fn completeness_reference_length_matches_timeline() {
        let project = project_with(vec![
            ("vad", vec![(0.0, 5.0, "A", "1"), (5.0, 10.0, "A", "2"), (10.0, 20.0, "A", "3")], true),
            ("full", vec![(1.0, 6.0, KEY_VOICE_TEXT, "spans two")], true),
        ]);
        let stages = vec![stage("vad", true), stage("full", true)];

        let agg = aggregator("vad", &["full"]).aggregate(&stages, &project).unwrap();
        let reference = agg.reference_items().unwrap();
        assert_eq!(reference.len(), 3);
        // The spanning item is merged into both overlapped intervals.
        assert_eq!(reference[0].metadata.voice_text(), Some("spans two"));
        assert_eq!(reference[1].metadata.voice_text(), Some("spans two"));
        assert_eq!(reference[2].metadata.voice_text(), None);
    }
}
