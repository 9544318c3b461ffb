//! subgen - Resumable AI subtitle pipeline
//!
//! Builds transcriptions and translations for a video through a declared
//! worker pipeline, persisting after every unit of progress so a run can be
//! interrupted, answered by a human, and resumed at any time.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod aggregate;
pub mod ai;
pub mod align;
pub mod cli;
pub mod config;
pub mod error;
pub mod metadata;
pub mod project;
pub mod report;
pub mod timing;
pub mod worker;

// Core model
pub use metadata::{MergeRules, MetadataBag};
pub use project::{CostRecord, Project, TimedItem, Transcription, Translation, WordTiming};
pub use timing::{Interval, Overlap};

// Aggregation and alignment
pub use aggregate::{Aggregation, MetadataAggregator, SourcePattern, StageDecl};
pub use align::adjust::{AdjustOptions, adjust_boundaries};
pub use align::{Alignment, align};

// Pipeline
pub use worker::{PipelineContext, SubtitleImport, Worker, run_pipeline};

// Error handling
pub use error::{Result, SubgenError};

// Config
pub use config::{Config, EngineConfig, PrivateConfig};
