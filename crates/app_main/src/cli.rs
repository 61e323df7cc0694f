//! Command line arguments

use app_core::AppConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Browse, download and manage a sandboxed directory tree
#[derive(Parser, Debug)]
#[command(name = "browsefs")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Base directory, nothing outside it is reachable
    #[arg(short, long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Directory listed when no path is given
    #[arg(long, global = true, value_name = "DIR")]
    pub initial: Option<PathBuf>,

    /// Allow removing everything below this directory
    #[arg(long, global = true, value_name = "DIR")]
    pub removable: Option<PathBuf>,

    /// Allow uploads into this directory and below
    #[arg(long, global = true, value_name = "DIR")]
    pub upload: Option<PathBuf>,

    /// Hide paths matching this glob (repeatable)
    #[arg(long, global = true, value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Read exclude patterns from a file (repeatable)
    #[arg(long, global = true, value_name = "FILE")]
    pub exclude_from: Vec<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List a directory
    Ls {
        /// URL path relative to the base
        path: Option<String>,

        /// Sort property: name, size, modified or type, `-` prefix reverses
        #[arg(long, short, allow_hyphen_values = true)]
        sort: Option<String>,
    },

    /// Show the attributes of a file or directory
    Info {
        path: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Write a directory as a tarball
    Download {
        path: Option<String>,

        /// Output file, stdout when omitted
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Remove a file or directory
    Rm { path: String },

    /// Copy local files into a directory
    Upload {
        /// Target directory
        dir: String,

        /// Local files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Create a directory
    Mkdir { dir: String, name: String },

    /// Print the name an upload called NAME would be stored as
    Sanitize {
        name: String,

        /// Apply Windows filename rules
        #[arg(long)]
        windows: bool,
    },
}

impl Cli {
    /// Override configuration values given on the command line
    pub fn apply(&self, config: &mut AppConfig) {
        let dirs = &mut config.directory;
        if let Some(base) = &self.directory {
            dirs.base = base.clone();
        }
        if let Some(start) = &self.initial {
            dirs.start = Some(start.clone());
        }
        if let Some(remove) = &self.removable {
            dirs.remove = Some(remove.clone());
        }
        if let Some(upload) = &self.upload {
            dirs.upload = Some(upload.clone());
        }

        config.exclude.patterns.extend(self.exclude.iter().cloned());
        config.exclude.from.extend(self.exclude_from.iter().cloned());

        if self.verbose {
            config.log.level = "debug".to_string();
        }
    }
}
