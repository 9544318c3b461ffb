//! Mutable state threaded through one file's pipeline run.
//!
//! Everything a worker may touch lives here: the project being built, the
//! to-do and error lists for the end-of-run report, api keys from the
//! private config, and engine cooldowns. No globals anywhere.

use crate::ai::engine::CooldownTracker;
use crate::error::Result;
use crate::project::Project;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub struct PipelineContext {
    pub project: Project,
    /// To-do lines for the human, prefixed with the file label.
    pub todos: Vec<String>,
    /// Recoverable errors collected instead of aborting the file.
    pub errors: Vec<String>,
    pub api_keys: BTreeMap<String, String>,
    pub cooldowns: CooldownTracker,
    /// When set, every AI prompt and raw response is also written here.
    pub verbose_dir: Option<PathBuf>,
}

impl PipelineContext {
    pub fn new(project: Project, api_keys: BTreeMap<String, String>) -> Self {
        Self {
            project,
            todos: Vec::new(),
            errors: Vec::new(),
            api_keys,
            cooldowns: CooldownTracker::new(),
            verbose_dir: None,
        }
    }

    pub fn label(&self) -> String {
        self.project.label()
    }

    pub fn base_path(&self) -> PathBuf {
        self.project.base_path()
    }

    pub fn add_todo(&mut self, message: &str) {
        self.todos.push(format!("[{}] {message}", self.label()));
    }

    pub fn record_error(&mut self, stage: &str, message: &str) {
        self.errors
            .push(format!("[{}] {stage}: {message}", self.label()));
    }

    /// Debug dump of an AI exchange, only when a verbose dir is configured.
    pub fn write_verbose_file(&self, name: &str, contents: &str) -> Result<()> {
        let Some(dir) = &self.verbose_dir else {
            return Ok(());
        };
        fs::create_dir_all(dir)?;
        fs::write(dir.join(name), contents)?;
        Ok(())
    }

    /// Move a consumed or superseded file into `<base>_backup/` instead of
    /// deleting it. A name collision gets a numeric suffix.
    pub fn soft_delete(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let backup_dir = PathBuf::from(format!("{}_backup", self.base_path().display()));
        fs::create_dir_all(&backup_dir)?;
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        let mut target = backup_dir.join(name.as_ref());
        let mut counter = 1u32;
        while target.exists() {
            target = backup_dir.join(format!("{name}.{counter}"));
            counter += 1;
        }
        fs::rename(path, target)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(dir: &Path) -> PipelineContext {
        let project = Project::new(&dir.join("movie.subgen.json"));
        PipelineContext::new(project, BTreeMap::new())
    }

    #[test]
    fn todos_and_errors_carry_the_file_label() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        ctx.add_todo("answer TODO_full_0001.txt");
        ctx.record_error("full/en", "engine down");
        assert_eq!(ctx.todos[0], "[movie] answer TODO_full_0001.txt");
        assert!(ctx.errors[0].starts_with("[movie] full/en:"));
    }

    #[test]
    fn soft_delete_moves_into_backup_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let side = dir.path().join("movie.TODO_full_0001.txt");
        fs::write(&side, "answered").unwrap();
        ctx.soft_delete(&side).unwrap();

        assert!(!side.exists());
        let backed_up = dir.path().join("movie_backup/movie.TODO_full_0001.txt");
        assert_eq!(fs::read_to_string(backed_up).unwrap(), "answered");
    }

    #[test]
    fn soft_delete_keeps_earlier_backups() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let side = dir.path().join("movie.TODO_full_0001.txt");

        fs::write(&side, "first").unwrap();
        ctx.soft_delete(&side).unwrap();
        fs::write(&side, "second").unwrap();
        ctx.soft_delete(&side).unwrap();

        let backup = dir.path().join("movie_backup");
        assert_eq!(
            fs::read_to_string(backup.join("movie.TODO_full_0001.txt")).unwrap(),
            "first"
        );
        assert_eq!(
            fs::read_to_string(backup.join("movie.TODO_full_0001.txt.1")).unwrap(),
            "second"
        );
    }

    #[test]
    fn soft_delete_of_missing_file_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        ctx.soft_delete(&dir.path().join("nope.txt")).unwrap();
    }
}
