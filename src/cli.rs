//! Command-line interface for subgen
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Resumable AI subtitle pipeline
#[derive(Parser, Debug)]
#[command(name = "subgen", version, about = "Resumable AI subtitle pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline over one or more videos or project files
    Run {
        /// Video files or .subgen.json project files
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,

        /// Dump every AI prompt and response next to the project
        #[arg(short, long)]
        verbose: bool,
    },

    /// Write a commented starter configuration
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
