//! File-import worker and the subtitle-reading seam.
//!
//! Parsing real subtitle formats is someone else's job; the pipeline only
//! needs timed text rows, so it reads through a trait and ships one plain
//! tab-separated implementation.

use crate::config::Config;
use crate::error::{Result, SubgenError};
use crate::metadata::{KEY_VOICE_TEXT, MetadataBag};
use crate::project::MetadataTimeline;
use crate::timing::{Interval, parse_timecode};
use crate::worker::context::PipelineContext;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

pub trait SubtitleImport {
    /// Read a file into (interval, text) rows, in file order.
    fn read(&self, path: &Path) -> Result<Vec<(Interval, String)>>;
}

/// One row per line: `start<TAB>end<TAB>text`. Empty lines and `#` comments
/// are skipped; bad rows name their line number so the human can fix them.
pub struct DelimitedTextImport;

impl SubtitleImport for DelimitedTextImport {
    fn read(&self, path: &Path) -> Result<Vec<(Interval, String)>> {
        let contents = fs::read_to_string(path)?;
        let mut rows = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.splitn(3, '\t');
            let (Some(start), Some(end)) = (fields.next(), fields.next()) else {
                return Err(bad_row(path, index, "expected start<TAB>end<TAB>text"));
            };
            let text = fields.next().unwrap_or("").trim();
            let start = parse_timecode(start)
                .map_err(|e| bad_row(path, index, &e.to_string()))?;
            let end = parse_timecode(end)
                .map_err(|e| bad_row(path, index, &e.to_string()))?;
            let interval = Interval::new(start, end)
                .map_err(|e| bad_row(path, index, &e.to_string()))?;
            rows.push((interval, text.to_string()));
        }
        Ok(rows)
    }
}

fn bad_row(path: &Path, index: usize, message: &str) -> SubgenError {
    SubgenError::ExternalInputRequired {
        instruction: format!(
            "fix line {} of '{}': {message}",
            index + 1,
            path.display()
        ),
    }
}

/// Imports `<base><suffix>` into a transcription. Re-runs whenever the file
/// changes, overwriting the previous import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportFileWorker {
    pub transcription_id: String,
    /// Appended to the video's base path, e.g. `.timings.txt`.
    pub suffix: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "crate::worker::default_true")]
    pub enabled: bool,
}

impl ImportFileWorker {
    pub fn source_path(&self, base: &Path) -> PathBuf {
        PathBuf::from(format!("{}{}", base.display(), self.suffix))
    }

    /// The file's mtime went into `job_state` on import; a different mtime
    /// now means the human edited it and the import is stale.
    pub fn needs_to_run(&self, ctx: &PipelineContext) -> Option<String> {
        let path = self.source_path(&ctx.base_path());
        let recorded = ctx
            .project
            .transcription(&self.transcription_id)?
            .job_state
            .as_ref()?["modified_ms"]
            .as_u64()?;
        let current = modified_ms(&path)?;
        if current != recorded {
            Some(format!("'{}' changed since last import", path.display()))
        } else {
            None
        }
    }

    pub fn do_work(
        &self,
        config: &Config,
        ctx: &mut PipelineContext,
        import: &dyn SubtitleImport,
    ) -> Result<()> {
        let path = self.source_path(&ctx.base_path());
        import_rows(
            &self.transcription_id,
            self.language.as_deref(),
            &path,
            config,
            ctx,
            import,
        )
    }
}

/// Shared import flow: require the file, read it through the seam, replace
/// the transcription's items, remember the mtime.
pub(crate) fn import_rows(
    transcription_id: &str,
    language: Option<&str>,
    path: &Path,
    config: &Config,
    ctx: &mut PipelineContext,
    import: &dyn SubtitleImport,
) -> Result<()> {
    if !path.exists() {
        let instruction = format!(
            "create '{}' (tab-separated: start, end, text)",
            path.display()
        );
        ctx.add_todo(&instruction);
        return Err(SubgenError::ExternalInputRequired { instruction });
    }
    let rows = match import.read(path) {
        Ok(rows) => rows,
        Err(SubgenError::ExternalInputRequired { instruction }) => {
            ctx.add_todo(&instruction);
            return Err(SubgenError::ExternalInputRequired { instruction });
        }
        Err(other) => return Err(other),
    };
    let language = language
        .map(str::to_string)
        .unwrap_or_else(|| config.source_language.clone());
    let modified = modified_ms(path);

    let t = ctx.project.ensure_transcription(transcription_id, &language);
    t.language = language;
    t.items.clear();
    for (interval, text) in rows {
        t.add_item(interval, MetadataBag::simple(KEY_VOICE_TEXT, &text));
    }
    t.job_state = modified.map(|ms| json!({ "modified_ms": ms }));
    t.can_be_updated = true;
    t.mark_finished();
    ctx.project.save()?;
    Ok(())
}

fn modified_ms(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(std::time::UNIX_EPOCH).ok()?;
    Some(since_epoch.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_tab_separated_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.timings.txt");
        fs::write(
            &path,
            "# timings\n00:00:01.000\t00:00:02.500\thello there\n\n0:05\t0:07\tsecond line\n",
        )
        .unwrap();

        let rows = DelimitedTextImport.read(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, Interval::from_secs(1.0, 2.5).unwrap());
        assert_eq!(rows[0].1, "hello there");
        assert_eq!(rows[1].0, Interval::from_secs(5.0, 7.0).unwrap());
    }

    #[test]
    fn bad_row_names_its_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.timings.txt");
        fs::write(&path, "00:00:01.000\t00:00:02.500\tok\nnot a row\n").unwrap();

        let err = DelimitedTextImport.read(&path).unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn text_may_contain_tabs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.timings.txt");
        fs::write(&path, "0:01\t0:02\tleft\tright\n").unwrap();

        let rows = DelimitedTextImport.read(&path).unwrap();
        assert_eq!(rows[0].1, "left\tright");
    }

    use crate::project::Project;
    use std::collections::BTreeMap;

    fn worker() -> ImportFileWorker {
        ImportFileWorker {
            transcription_id: "import".into(),
            suffix: ".timings.txt".into(),
            language: None,
            enabled: true,
        }
    }

    fn context(dir: &Path) -> PipelineContext {
        let project = Project::new(&dir.join("movie.subgen.json"));
        PipelineContext::new(project, BTreeMap::new())
    }

    #[test]
    fn missing_file_becomes_a_todo() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());

        let err = worker()
            .do_work(&Config::default(), &mut ctx, &DelimitedTextImport)
            .unwrap_err();
        assert!(matches!(err, SubgenError::ExternalInputRequired { .. }));
        assert_eq!(ctx.todos.len(), 1);
        assert!(ctx.todos[0].contains("movie.timings.txt"));
        assert!(ctx.project.transcription("import").is_none());
    }

    #[test]
    fn import_replaces_items_and_remembers_the_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        let file = dir.path().join("movie.timings.txt");
        fs::write(&file, "0:01\t0:02\thello\n").unwrap();

        let w = worker();
        w.do_work(&Config::default(), &mut ctx, &DelimitedTextImport)
            .unwrap();

        let t = ctx.project.transcription("import").unwrap();
        assert!(t.finished);
        assert!(t.can_be_updated);
        assert_eq!(t.items.len(), 1);
        assert_eq!(t.items[0].metadata.voice_text(), Some("hello"));
        assert!(w.needs_to_run(&ctx).is_none());

        // A touched file forces a re-import.
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(later)
            .unwrap();
        assert!(w.needs_to_run(&ctx).is_some());
    }
}
