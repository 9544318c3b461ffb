//! The persisted project file: one JSON document per video.
//!
//! Saved after every meaningful unit of progress with a
//! write-to-temporary-then-rename pattern, so a reader (or a crashed run)
//! never observes a half-written file.

use crate::error::{Result, SubgenError};
use crate::project::transcription::{MetadataTimeline, Transcription, Translation};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: &str = "2.0";

/// Locates one collection inside a project by id, so callers can re-fetch
/// it after a save instead of holding a borrow across the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineKey {
    Transcription(String),
    Translation {
        transcription_id: String,
        translation_id: String,
    },
}

impl TimelineKey {
    pub fn full_id(&self) -> String {
        match self {
            TimelineKey::Transcription(id) => id.clone(),
            TimelineKey::Translation {
                transcription_id,
                translation_id,
            } => format!("{transcription_id}/{translation_id}"),
        }
    }
}

pub const EXTENSION: &str = ".subgen.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub format_version: String,
    #[serde(default)]
    pub transcriptions: Vec<Transcription>,
    #[serde(default)]
    pub translations: Vec<Translation>,
    #[serde(skip)]
    path: PathBuf,
}

impl Project {
    pub fn new(path: &Path) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            transcriptions: Vec::new(),
            translations: Vec::new(),
            path: path.to_path_buf(),
        }
    }

    /// Derive the project path for an input: project files are used as-is,
    /// anything else (a video path) gets the project extension appended to
    /// its stem.
    pub fn path_for(input: &Path) -> PathBuf {
        let name = input.to_string_lossy();
        if name.ends_with(EXTENSION) {
            input.to_path_buf()
        } else {
            let stem = input.file_stem().unwrap_or_default().to_string_lossy();
            input.with_file_name(format!("{stem}{EXTENSION}"))
        }
    }

    /// Load an existing project, or start an empty one if the file does not
    /// exist yet. A parse failure is never silently replaced with an empty
    /// project; that would throw away finished work.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new(path))
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut project: Project =
            serde_json::from_str(&contents).map_err(|e| SubgenError::Project {
                message: format!("error parsing '{}': {e}", path.display()),
            })?;
        if project.format_version != FORMAT_VERSION {
            return Err(SubgenError::Project {
                message: format!(
                    "'{}' uses format version {} (current is {FORMAT_VERSION}); \
                     delete or rename the file and start over",
                    path.display(),
                    project.format_version
                ),
            });
        }
        project.path = path.to_path_buf();
        Ok(project)
    }

    /// Atomic save: serialize to `<path>.tmp`, then rename over the target.
    pub fn save(&self) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base path for derived side files: the project path minus its
    /// extension (`/videos/movie` for `/videos/movie.subgen.json`).
    pub fn base_path(&self) -> PathBuf {
        let name = self.path.to_string_lossy();
        match name.strip_suffix(EXTENSION) {
            Some(stripped) => PathBuf::from(stripped),
            None => self.path.with_extension(""),
        }
    }

    /// Short human label for to-do prefixes and progress lines.
    pub fn label(&self) -> String {
        self.base_path()
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned()
    }

    pub fn timeline(&self, key: &TimelineKey) -> Option<&dyn MetadataTimeline> {
        match key {
            TimelineKey::Transcription(id) => {
                self.transcription(id).map(|t| t as &dyn MetadataTimeline)
            }
            TimelineKey::Translation {
                transcription_id,
                translation_id,
            } => self
                .translation(transcription_id, translation_id)
                .map(|t| t as &dyn MetadataTimeline),
        }
    }

    pub fn timeline_mut(&mut self, key: &TimelineKey) -> Option<&mut dyn MetadataTimeline> {
        match key {
            TimelineKey::Transcription(id) => self
                .transcription_mut(id)
                .map(|t| t as &mut dyn MetadataTimeline),
            TimelineKey::Translation {
                transcription_id,
                translation_id,
            } => self
                .translation_mut(transcription_id, translation_id)
                .map(|t| t as &mut dyn MetadataTimeline),
        }
    }

    pub fn transcription(&self, id: &str) -> Option<&Transcription> {
        self.transcriptions.iter().find(|t| t.id == id)
    }

    pub fn transcription_mut(&mut self, id: &str) -> Option<&mut Transcription> {
        self.transcriptions.iter_mut().find(|t| t.id == id)
    }

    /// Get or create the transcription record for a stage's first run.
    pub fn ensure_transcription(&mut self, id: &str, language: &str) -> &mut Transcription {
        if let Some(pos) = self.transcriptions.iter().position(|t| t.id == id) {
            &mut self.transcriptions[pos]
        } else {
            self.transcriptions.push(Transcription::new(id, language));
            self.transcriptions
                .last_mut()
                .unwrap_or_else(|| unreachable!("just pushed"))
        }
    }

    pub fn translation(&self, transcription_id: &str, translation_id: &str) -> Option<&Translation> {
        self.translations
            .iter()
            .find(|t| t.transcription_id == transcription_id && t.translation_id == translation_id)
    }

    pub fn translation_mut(
        &mut self,
        transcription_id: &str,
        translation_id: &str,
    ) -> Option<&mut Translation> {
        self.translations
            .iter_mut()
            .find(|t| t.transcription_id == transcription_id && t.translation_id == translation_id)
    }

    pub fn ensure_translation(
        &mut self,
        transcription_id: &str,
        translation_id: &str,
        language: &str,
    ) -> &mut Translation {
        if let Some(pos) = self
            .translations
            .iter()
            .position(|t| t.transcription_id == transcription_id && t.translation_id == translation_id)
        {
            &mut self.translations[pos]
        } else {
            self.translations
                .push(Translation::new(transcription_id, translation_id, language));
            self.translations
                .last_mut()
                .unwrap_or_else(|| unreachable!("just pushed"))
        }
    }
}
