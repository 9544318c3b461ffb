//! AI transcription and translation workers.
//!
//! Both are thin shells around the same machinery: aggregate upstream
//! metadata onto a reference timeline, then let the stage runner batch it
//! through the configured engine until every row is produced.

use crate::aggregate::MetadataAggregator;
use crate::ai::batch::AiOptions;
use crate::ai::runner::AiStage;
use crate::config::Config;
use crate::error::{Result, SubgenError};
use crate::metadata::KEY_TRANSLATED_TEXT;
use crate::project::TimelineKey;
use crate::worker::context::PipelineContext;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiTranscribeWorker {
    pub transcription_id: String,
    /// Engine handle from the `[engines]` arena.
    pub engine: String,
    #[serde(default)]
    pub language: Option<String>,
    /// Prompt handles from `[prompts]`.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub user_prompt: Option<String>,
    #[serde(default)]
    pub options: AiOptions,
    #[serde(flatten)]
    pub aggregator: MetadataAggregator,
    #[serde(default = "crate::worker::default_true")]
    pub enabled: bool,
}

impl AiTranscribeWorker {
    fn language<'a>(&'a self, config: &'a Config) -> &'a str {
        self.language.as_deref().unwrap_or(&config.source_language)
    }

    pub fn is_prerequisites_met(&self, config: &Config, ctx: &PipelineContext) -> Result<()> {
        let stages = crate::worker::declared_stages(&config.workers);
        let aggregation = self.aggregator.aggregate(&stages, &ctx.project)?;
        aggregation
            .prerequisites_met(true)
            .map_err(|reason| SubgenError::PrerequisiteNotMet { reason })
    }

    pub fn do_work(&self, config: &Config, ctx: &mut PipelineContext) -> Result<()> {
        let language = self.language(config).to_string();
        run_ai_stage(
            TimelineKey::Transcription(self.transcription_id.clone()),
            &self.engine,
            self.system_prompt.as_deref(),
            self.user_prompt.as_deref(),
            &self.options,
            &self.aggregator,
            &language,
            config,
            ctx,
        )
    }
}

fn translate_options() -> AiOptions {
    AiOptions {
        produces: KEY_TRANSLATED_TEXT.to_string(),
        ..AiOptions::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiTranslateWorker {
    /// Parent transcription the translation is keyed under.
    pub transcription_id: String,
    pub translation_id: String,
    /// Target language, substituted into prompt placeholders.
    pub language: String,
    pub engine: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub user_prompt: Option<String>,
    #[serde(default = "translate_options")]
    pub options: AiOptions,
    #[serde(flatten)]
    pub aggregator: MetadataAggregator,
    #[serde(default = "crate::worker::default_true")]
    pub enabled: bool,
}

impl AiTranslateWorker {
    pub fn is_prerequisites_met(&self, config: &Config, ctx: &PipelineContext) -> Result<()> {
        let stages = crate::worker::declared_stages(&config.workers);
        let aggregation = self.aggregator.aggregate(&stages, &ctx.project)?;
        aggregation
            .prerequisites_met(true)
            .map_err(|reason| SubgenError::PrerequisiteNotMet { reason })
    }

    pub fn do_work(&self, config: &Config, ctx: &mut PipelineContext) -> Result<()> {
        run_ai_stage(
            TimelineKey::Translation {
                transcription_id: self.transcription_id.clone(),
                translation_id: self.translation_id.clone(),
            },
            &self.engine,
            self.system_prompt.as_deref(),
            self.user_prompt.as_deref(),
            &self.options,
            &self.aggregator,
            &self.language,
            config,
            ctx,
        )
    }
}

#[allow(clippy::too_many_arguments)]
fn run_ai_stage(
    key: TimelineKey,
    engine_handle: &str,
    system_prompt: Option<&str>,
    user_prompt: Option<&str>,
    options: &AiOptions,
    aggregator: &MetadataAggregator,
    language: &str,
    config: &Config,
    ctx: &mut PipelineContext,
) -> Result<()> {
    let stages = crate::worker::declared_stages(&config.workers);
    let aggregation = aggregator.aggregate(&stages, &ctx.project)?;
    if let Err(reason) = aggregation.prerequisites_met(true) {
        return Err(SubgenError::PrerequisiteNotMet { reason });
    }

    match &key {
        TimelineKey::Transcription(id) => {
            ctx.project.ensure_transcription(id, language);
        }
        TimelineKey::Translation {
            transcription_id,
            translation_id,
        } => {
            ctx.project
                .ensure_translation(transcription_id, translation_id, language);
        }
    }

    let system_prompt = system_prompt
        .map(|handle| config.prompt(handle, language))
        .transpose()?;
    let user_prompt = user_prompt
        .map(|handle| config.prompt(handle, language))
        .transpose()?;
    let engine = config.resolve_engine(engine_handle)?;

    let stage = AiStage {
        key,
        engine,
        options,
        system_prompt,
        user_prompt,
    };
    stage.run(aggregation.reference_items()?, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{KEY_VOICE_TEXT, MetadataBag};
    use crate::project::{MetadataTimeline, Project};
    use crate::timing::Interval;
    use std::collections::BTreeMap;

    fn config() -> Config {
        toml::from_str(
            r#"
            source_language = "ja"

            [prompts]
            sys = "transcribe {source_language}"

            [engines.chat]
            type = "manual"

            [[workers]]
            type = "import_file"
            transcription_id = "import"
            suffix = ".timings.txt"

            [[workers]]
            type = "ai_transcribe"
            transcription_id = "full"
            engine = "chat"
            system_prompt = "sys"
            timings_source = "import"
            sources = ["import"]
            "#,
        )
        .unwrap()
    }

    fn transcribe_worker(config: &Config) -> AiTranscribeWorker {
        let crate::worker::Worker::AiTranscribe(w) = &config.workers[1] else {
            panic!("expected ai_transcribe");
        };
        w.clone()
    }

    #[test]
    fn unfinished_source_is_a_prerequisite_failure() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(&dir.path().join("movie.subgen.json"));
        let ctx = PipelineContext::new(project, BTreeMap::new());
        let config = config();

        let err = transcribe_worker(&config)
            .is_prerequisites_met(&config, &ctx)
            .unwrap_err();
        assert!(matches!(err, SubgenError::PrerequisiteNotMet { .. }));
        assert!(err.to_string().contains("'import'"));
    }

    #[test]
    fn manual_engine_stage_parks_a_prompt_for_the_reference_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = Project::new(&dir.path().join("movie.subgen.json"));
        let t = project.ensure_transcription("import", "ja");
        t.add_item(
            Interval::from_secs(0.0, 2.0).unwrap(),
            MetadataBag::simple(KEY_VOICE_TEXT, "rough"),
        );
        t.mark_finished();
        let mut ctx = PipelineContext::new(project, BTreeMap::new());
        let config = config();
        let worker = transcribe_worker(&config);

        worker.is_prerequisites_met(&config, &ctx).unwrap();
        let err = worker.do_work(&config, &mut ctx).unwrap_err();
        assert!(matches!(err, SubgenError::ExternalInputRequired { .. }));

        // Target record exists, unfinished, with the prompt parked beside it.
        let target = ctx.project.transcription("full").unwrap();
        assert!(!target.finished);
        let side = dir.path().join("movie.TODO_full_0001.txt");
        let prompt = std::fs::read_to_string(side).unwrap();
        assert!(prompt.contains("transcribe ja"));
        assert!(prompt.contains("rough"));
    }
}
