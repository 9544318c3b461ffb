//! Clone worker: copy a finished transcription under a new id.
//!
//! Typically used to freeze an imported or AI-produced timeline under a
//! stable name that later stages reference, while the upstream stage keeps
//! evolving.

use crate::aggregate::StageDecl;
use crate::error::{Result, SubgenError};
use crate::worker::context::PipelineContext;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloneWorker {
    pub transcription_id: String,
    /// Ordered candidates; the first one finished wins. `*` matches any
    /// declared transcription id.
    pub sources: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "crate::worker::default_true")]
    pub enabled: bool,
}

impl CloneWorker {
    /// The source id this run would pick: the first candidate (in declared
    /// order, wildcards expanded in stage order) that is finished.
    pub fn pick_source(&self, stages: &[StageDecl], ctx: &PipelineContext) -> Option<String> {
        for candidate in &self.sources {
            let ids: Vec<String> = if candidate.contains('*') {
                let Ok(pattern) = crate::aggregate::SourcePattern(candidate.clone()).matching(stages)
                else {
                    continue;
                };
                pattern
                    .iter()
                    .filter(|s| s.translation_id.is_none())
                    .map(|s| s.transcription_id.clone())
                    .collect()
            } else {
                vec![candidate.clone()]
            };
            for id in ids {
                if id == self.transcription_id {
                    continue;
                }
                if ctx.project.transcription(&id).is_some_and(|t| t.finished) {
                    return Some(id);
                }
            }
        }
        None
    }

    pub fn is_prerequisites_met(
        &self,
        stages: &[StageDecl],
        ctx: &PipelineContext,
    ) -> std::result::Result<(), String> {
        match self.pick_source(stages, ctx) {
            Some(_) => Ok(()),
            None => Err(format!(
                "none of [{}] is done yet",
                self.sources.join(", ")
            )),
        }
    }

    /// A finished clone goes stale when the candidate list would now pick a
    /// different source (e.g. a better stage finished since last run).
    pub fn needs_to_run(&self, stages: &[StageDecl], ctx: &PipelineContext) -> Option<String> {
        let previous = ctx
            .project
            .transcription(&self.transcription_id)?
            .job_state
            .as_ref()?["source_id"]
            .as_str()?
            .to_string();
        let current = self.pick_source(stages, ctx)?;
        if current != previous {
            Some(format!(
                "source changed from '{previous}' to '{current}'"
            ))
        } else {
            None
        }
    }

    pub fn do_work(&self, stages: &[StageDecl], ctx: &mut PipelineContext) -> Result<()> {
        let source_id = self.pick_source(stages, ctx).ok_or_else(|| {
            SubgenError::PrerequisiteNotMet {
                reason: format!("none of [{}] is done yet", self.sources.join(", ")),
            }
        })?;
        let source = ctx
            .project
            .transcription(&source_id)
            .ok_or_else(|| SubgenError::UnresolvedHandle {
                kind: "transcription",
                handle: source_id.clone(),
            })?;
        let items = source.items.clone();
        let language = self
            .language
            .clone()
            .unwrap_or_else(|| source.language.clone());

        let target = ctx
            .project
            .ensure_transcription(&self.transcription_id, &language);
        target.items = items;
        target.language = language;
        target.job_state = Some(json!({ "source_id": source_id }));
        target.can_be_updated = true;
        target.mark_finished();
        ctx.project.save()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataBag;
    use crate::project::{MetadataTimeline, Project};
    use crate::timing::Interval;
    use std::collections::BTreeMap;

    fn stages() -> Vec<StageDecl> {
        ["manual", "import", "full"]
            .into_iter()
            .map(|id| StageDecl {
                transcription_id: id.to_string(),
                translation_id: None,
                enabled: true,
            })
            .collect()
    }

    fn context_with(finished: &[&str]) -> (tempfile::TempDir, PipelineContext) {
        let dir = tempfile::tempdir().unwrap();
        let mut project = Project::new(&dir.path().join("movie.subgen.json"));
        for id in finished {
            let t = project.ensure_transcription(id, "ja");
            t.add_item(
                Interval::from_secs(0.0, 1.0).unwrap(),
                MetadataBag::simple("VoiceText", id),
            );
            t.mark_finished();
        }
        (dir, PipelineContext::new(project, BTreeMap::new()))
    }

    fn worker(sources: &[&str]) -> CloneWorker {
        CloneWorker {
            transcription_id: "chosen".into(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            language: None,
            enabled: true,
        }
    }

    #[test]
    fn first_finished_candidate_wins() {
        let (_dir, ctx) = context_with(&["import", "full"]);
        let w = worker(&["manual", "import", "full"]);
        assert_eq!(w.pick_source(&stages(), &ctx), Some("import".into()));
    }

    #[test]
    fn wildcard_expands_in_declaration_order() {
        let (_dir, ctx) = context_with(&["full"]);
        let w = worker(&["*"]);
        assert_eq!(w.pick_source(&stages(), &ctx), Some("full".into()));
    }

    #[test]
    fn stale_when_a_better_candidate_finished_later() {
        let (_dir, mut ctx) = context_with(&["import"]);
        let w = worker(&["manual", "import"]);
        w.do_work(&stages(), &mut ctx).unwrap();

        assert!(w.needs_to_run(&stages(), &ctx).is_none());

        ctx.project.ensure_transcription("manual", "ja").mark_finished();
        let reason = w.needs_to_run(&stages(), &ctx).unwrap();
        assert!(reason.contains("'import'"));
        assert!(reason.contains("'manual'"));
    }

    #[test]
    fn clone_copies_items_and_records_its_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = Project::new(&dir.path().join("movie.subgen.json"));
        let t = project.ensure_transcription("import", "ja");
        t.add_item(
            Interval::from_secs(0.0, 1.0).unwrap(),
            MetadataBag::simple("VoiceText", "hello"),
        );
        t.mark_finished();
        let mut ctx = PipelineContext::new(project, BTreeMap::new());

        let w = worker(&["import"]);
        w.do_work(&stages(), &mut ctx).unwrap();

        let cloned = ctx.project.transcription("chosen").unwrap();
        assert!(cloned.finished);
        assert!(cloned.can_be_updated);
        assert_eq!(cloned.items.len(), 1);
        assert_eq!(cloned.job_state.as_ref().unwrap()["source_id"], "import");
    }
}
