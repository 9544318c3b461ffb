//! The worker pipeline: a declared list of stages run in order, once per
//! invocation, converging over repeated runs.
//!
//! A worker that cannot run yet is skipped with a reason, never an error;
//! one that needs a human leaves a to-do; only a broken invariant stops the
//! current file.

pub mod ai;
pub mod clone;
pub mod context;
pub mod import;
pub mod manual;

use crate::aggregate::StageDecl;
use crate::config::Config;
use crate::error::{Result, SubgenError};
use crate::project::{MetadataTimeline, TimelineKey};
use crate::report;
use serde::{Deserialize, Serialize};

pub use ai::{AiTranscribeWorker, AiTranslateWorker};
pub use clone::CloneWorker;
pub use context::PipelineContext;
pub use import::{DelimitedTextImport, ImportFileWorker, SubtitleImport};
pub use manual::ManualEditWorker;

pub(crate) fn default_true() -> bool {
    true
}

/// One entry of the configured worker list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Worker {
    ImportFile(ImportFileWorker),
    ManualEdit(ManualEditWorker),
    Clone(CloneWorker),
    AiTranscribe(AiTranscribeWorker),
    AiTranslate(AiTranslateWorker),
}

impl Worker {
    pub fn enabled(&self) -> bool {
        match self {
            Worker::ImportFile(w) => w.enabled,
            Worker::ManualEdit(w) => w.enabled,
            Worker::Clone(w) => w.enabled,
            Worker::AiTranscribe(w) => w.enabled,
            Worker::AiTranslate(w) => w.enabled,
        }
    }

    /// The stage this worker produces, as seen by source patterns.
    pub fn stage(&self) -> StageDecl {
        let (transcription_id, translation_id) = match self {
            Worker::ImportFile(w) => (w.transcription_id.clone(), None),
            Worker::ManualEdit(w) => (w.transcription_id.clone(), None),
            Worker::Clone(w) => (w.transcription_id.clone(), None),
            Worker::AiTranscribe(w) => (w.transcription_id.clone(), None),
            Worker::AiTranslate(w) => {
                (w.transcription_id.clone(), Some(w.translation_id.clone()))
            }
        };
        StageDecl {
            transcription_id,
            translation_id,
            enabled: self.enabled(),
        }
    }

    pub fn full_id(&self) -> String {
        self.stage().full_id()
    }

    fn key(&self) -> TimelineKey {
        match self {
            Worker::AiTranslate(w) => TimelineKey::Translation {
                transcription_id: w.transcription_id.clone(),
                translation_id: w.translation_id.clone(),
            },
            other => TimelineKey::Transcription(other.stage().transcription_id),
        }
    }

    /// Engine handle this worker references, for config validation.
    pub fn engine_handle(&self) -> Option<&str> {
        match self {
            Worker::AiTranscribe(w) => Some(&w.engine),
            Worker::AiTranslate(w) => Some(&w.engine),
            _ => None,
        }
    }

    /// Batch options of an AI worker, for config validation.
    pub fn ai_options(&self) -> Option<&crate::ai::batch::AiOptions> {
        match self {
            Worker::AiTranscribe(w) => Some(&w.options),
            Worker::AiTranslate(w) => Some(&w.options),
            _ => None,
        }
    }

    /// Prompt handles this worker references, for config validation.
    pub fn prompt_handles(&self) -> Vec<&str> {
        let (system, user) = match self {
            Worker::AiTranscribe(w) => (w.system_prompt.as_deref(), w.user_prompt.as_deref()),
            Worker::AiTranslate(w) => (w.system_prompt.as_deref(), w.user_prompt.as_deref()),
            _ => (None, None),
        };
        system.into_iter().chain(user).collect()
    }

    /// Read-only readiness check; `PrerequisiteNotMet` is the normal
    /// "skip for now" outcome.
    pub fn is_prerequisites_met(&self, config: &Config, ctx: &PipelineContext) -> Result<()> {
        match self {
            Worker::ImportFile(_) | Worker::ManualEdit(_) => Ok(()),
            Worker::Clone(w) => w
                .is_prerequisites_met(&declared_stages(&config.workers), ctx)
                .map_err(|reason| SubgenError::PrerequisiteNotMet { reason }),
            Worker::AiTranscribe(w) => w.is_prerequisites_met(config, ctx),
            Worker::AiTranslate(w) => w.is_prerequisites_met(config, ctx),
        }
    }

    /// A reason to re-run even though the stage is marked finished, from
    /// comparing persisted `job_state` against the current situation.
    pub fn needs_to_run(&self, config: &Config, ctx: &PipelineContext) -> Option<String> {
        match self {
            Worker::ImportFile(w) => w.needs_to_run(ctx),
            Worker::ManualEdit(w) => w.needs_to_run(ctx),
            Worker::Clone(w) => w.needs_to_run(&declared_stages(&config.workers), ctx),
            Worker::AiTranscribe(_) | Worker::AiTranslate(_) => None,
        }
    }

    pub fn do_work(
        &self,
        config: &Config,
        ctx: &mut PipelineContext,
        import: &dyn SubtitleImport,
    ) -> Result<()> {
        match self {
            Worker::ImportFile(w) => w.do_work(config, ctx, import),
            Worker::ManualEdit(w) => w.do_work(config, ctx, import),
            Worker::Clone(w) => w.do_work(&declared_stages(&config.workers), ctx),
            Worker::AiTranscribe(w) => w.do_work(config, ctx),
            Worker::AiTranslate(w) => w.do_work(config, ctx),
        }
    }
}

/// The stages the worker list declares, in declaration order.
pub fn declared_stages(workers: &[Worker]) -> Vec<StageDecl> {
    workers.iter().map(Worker::stage).collect()
}

/// Run every declared worker once against the context's project.
///
/// Recoverable failures end up in the context's error list; only an
/// unrecoverable error (a broken invariant) aborts the file.
pub fn run_pipeline(
    config: &Config,
    ctx: &mut PipelineContext,
    import: &dyn SubtitleImport,
) -> Result<()> {
    for worker in &config.workers {
        if !worker.enabled() {
            continue;
        }
        let id = worker.full_id();

        let finished = ctx
            .project
            .timeline(&worker.key())
            .is_some_and(|t| t.is_finished());
        let stale = worker.needs_to_run(config, ctx);
        if finished && stale.is_none() {
            report::stage_already_done(&id);
            continue;
        }
        if let Some(reason) = &stale {
            report::stage_rerun(&id, reason);
        }

        match worker.is_prerequisites_met(config, ctx) {
            Ok(()) => {}
            Err(SubgenError::PrerequisiteNotMet { reason }) => {
                report::stage_not_ready(&id, &reason);
                continue;
            }
            Err(e) if e.is_recoverable() => {
                report::stage_failed(&id, &e.to_string());
                ctx.record_error(&id, &e.to_string());
                continue;
            }
            Err(e) => return Err(e),
        }

        match worker.do_work(config, ctx, import) {
            Ok(()) => report::stage_done(&id),
            Err(SubgenError::PrerequisiteNotMet { reason }) => {
                report::stage_not_ready(&id, &reason);
            }
            Err(SubgenError::ExternalInputRequired { .. }) => {
                // The worker queued its own to-do with the details.
                report::stage_waiting(&id);
            }
            Err(e) if e.is_recoverable() => {
                report::stage_failed(&id, &e.to_string());
                ctx.record_error(&id, &e.to_string());
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
