//! Manual-edit worker: a human-reviewed subtitle file.
//!
//! Same flow as a file import, with one extra gate: the file may carry a
//! needs-revision marker (left in by an earlier stage or by the human as a
//! bookmark), and as long as any marker remains the stage is not done.

use crate::config::Config;
use crate::error::{Result, SubgenError};
use crate::worker::context::PipelineContext;
use crate::worker::import::{ImportFileWorker, SubtitleImport, import_rows};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn default_marker() -> String {
    "[REVISE]".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualEditWorker {
    pub transcription_id: String,
    pub suffix: String,
    #[serde(default)]
    pub language: Option<String>,
    /// While this string appears anywhere in the file, the review is
    /// considered unfinished.
    #[serde(default = "default_marker")]
    pub revision_marker: String,
    #[serde(default = "crate::worker::default_true")]
    pub enabled: bool,
}

impl ManualEditWorker {
    pub fn source_path(&self, base: &Path) -> PathBuf {
        PathBuf::from(format!("{}{}", base.display(), self.suffix))
    }

    pub fn needs_to_run(&self, ctx: &PipelineContext) -> Option<String> {
        self.as_import().needs_to_run(ctx)
    }

    pub fn do_work(
        &self,
        config: &Config,
        ctx: &mut PipelineContext,
        import: &dyn SubtitleImport,
    ) -> Result<()> {
        let path = self.source_path(&ctx.base_path());
        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let markers = contents.matches(self.revision_marker.as_str()).count();
            if markers > 0 {
                let instruction = format!(
                    "finish reviewing '{}': {markers} '{}' marker(s) left",
                    path.display(),
                    self.revision_marker
                );
                ctx.add_todo(&instruction);
                return Err(SubgenError::ExternalInputRequired { instruction });
            }
        }
        import_rows(
            &self.transcription_id,
            self.language.as_deref(),
            &path,
            config,
            ctx,
            import,
        )
    }

    /// The mtime bookkeeping is identical to a plain import.
    fn as_import(&self) -> ImportFileWorker {
        ImportFileWorker {
            transcription_id: self.transcription_id.clone(),
            suffix: self.suffix.clone(),
            language: self.language.clone(),
            enabled: self.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Project;
    use crate::worker::import::DelimitedTextImport;
    use std::collections::BTreeMap;

    fn worker() -> ManualEditWorker {
        ManualEditWorker {
            transcription_id: "reviewed".into(),
            suffix: ".reviewed.txt".into(),
            language: None,
            revision_marker: default_marker(),
            enabled: true,
        }
    }

    fn context(dir: &Path) -> PipelineContext {
        let project = Project::new(&dir.join("movie.subgen.json"));
        PipelineContext::new(project, BTreeMap::new())
    }

    #[test]
    fn remaining_markers_block_the_import() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        fs::write(
            dir.path().join("movie.reviewed.txt"),
            "0:01\t0:02\thello [REVISE]\n0:03\t0:04\tworld [REVISE]\n",
        )
        .unwrap();

        let err = worker()
            .do_work(&Config::default(), &mut ctx, &DelimitedTextImport)
            .unwrap_err();
        assert!(matches!(err, SubgenError::ExternalInputRequired { .. }));
        assert!(ctx.todos[0].contains("2 '[REVISE]' marker(s)"));
        assert!(ctx.project.transcription("reviewed").is_none());
    }

    #[test]
    fn marker_free_file_imports_like_a_plain_import() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        fs::write(dir.path().join("movie.reviewed.txt"), "0:01\t0:02\thello\n").unwrap();

        worker()
            .do_work(&Config::default(), &mut ctx, &DelimitedTextImport)
            .unwrap();
        let t = ctx.project.transcription("reviewed").unwrap();
        assert!(t.finished);
        assert_eq!(t.items[0].metadata.voice_text(), Some("hello"));
    }

    #[test]
    fn missing_file_is_still_a_todo() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        let err = worker()
            .do_work(&Config::default(), &mut ctx, &DelimitedTextImport)
            .unwrap_err();
        assert!(matches!(err, SubgenError::ExternalInputRequired { .. }));
    }
}
