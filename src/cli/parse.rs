//! CLI parse: clap types for examgen. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// examgen - generate exams from source documents
#[derive(Parser)]
#[command(name = "examgen")]
#[command(about = "Generate exams from source documents through a bounded generation pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (layered over the global config)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload documents and generate one exam from them
    Generate {
        /// User the job runs for
        #[arg(long)]
        user: String,
        /// Name the artifact is saved under
        #[arg(long)]
        name: String,
        /// Exam title (defaults to the name)
        #[arg(long)]
        title: Option<String>,
        /// Total number of items
        #[arg(long, default_value = "30")]
        items: u32,
        /// Extra instructions passed to the service
        #[arg(long)]
        instructions: Option<String>,
        /// Text file with a sample exam to imitate
        #[arg(long)]
        style_sample: Option<PathBuf>,
        /// Also write the exam to this file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Source documents
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Saved artifacts
    Artifacts {
        #[command(subcommand)]
        command: ArtifactCommands,
    },
    /// Generation credits
    Quota {
        #[command(subcommand)]
        command: QuotaCommands,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
pub enum ArtifactCommands {
    /// List a user's artifacts
    List {
        #[arg(long)]
        user: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print one artifact
    Show {
        #[arg(long)]
        user: String,
        id: String,
    },
    /// Delete one artifact
    Delete {
        #[arg(long)]
        user: String,
        id: String,
    },
}

#[derive(Subcommand)]
pub enum QuotaCommands {
    /// Show remaining credits
    Show {
        #[arg(long)]
        user: String,
    },
    /// Add credits
    Grant {
        #[arg(long)]
        user: String,
        /// Credits to add (defaults to quota.default_grant)
        #[arg(long)]
        credits: Option<u32>,
    },
}
