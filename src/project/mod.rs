//! Persisted domain model: timeline items, stage collections, costs, and
//! the per-video project file.

pub mod cost;
pub mod item;
pub mod store;
pub mod transcription;

pub use cost::{CostRecord, CostSummary};
pub use item::{TimedItem, WordTiming};
pub use store::{EXTENSION, FORMAT_VERSION, Project, TimelineKey};
pub use transcription::{MetadataTimeline, Transcription, Translation};
