use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show critical errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show encoding decisions and cache activity
    Verbose,
}

impl VerbosityLevel {
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub fn default_log_filter(self) -> &'static str {
        match self {
            VerbosityLevel::Quiet => "error",
            VerbosityLevel::Normal => "warn",
            VerbosityLevel::Verbose => "apikit_validate=debug,info",
        }
    }
}

/// Validate API request payloads against JSON Schema or XSD
#[derive(Parser, Debug, Clone)]
#[command(name = "apikit-validate")]
#[command(about = "Normalize request payload encodings and validate them against JSON Schema or XSD")]
#[command(version)]
pub struct Cli {
    /// Payload files to validate
    #[arg(required = true, help = "Payload files to validate")]
    pub payloads: Vec<PathBuf>,

    /// Schema path, relative to the schema root
    #[arg(short = 's', long = "schema")]
    pub schema: String,

    /// API definition the schema belongs to
    #[arg(long = "api", default_value = "default")]
    pub api: String,

    /// Configuration identifier; part of the schema cache key
    #[arg(long = "config-id", default_value = "cli")]
    pub config_id: String,

    /// Content-Type of every payload; inferred from the file extension if omitted
    #[arg(short = 'c', long = "content-type")]
    pub content_type: Option<String>,

    /// Directory holding schema files
    #[arg(long = "schema-root")]
    pub schema_root: Option<PathBuf>,

    /// Configuration file (TOML or JSON)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Charset used when neither the header nor the payload identifies one
    #[arg(long = "default-encoding")]
    pub default_encoding: Option<String>,

    /// Reject payloads on schema warnings
    #[arg(long = "fail-on-warning")]
    pub fail_on_warning: bool,

    /// Report every violation instead of stopping at the first
    #[arg(long = "collect-all")]
    pub collect_all: bool,

    /// Number of payloads validated concurrently
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(missing) = self.payloads.iter().find(|p| !p.is_file()) {
            return Err(format!("Payload file does not exist: {}", missing.display()));
        }
        if self.schema.trim().is_empty() {
            return Err("Schema path must not be empty".to_string());
        }
        if self.threads == Some(0) {
            return Err("Number of threads must be greater than 0".to_string());
        }
        Ok(())
    }

    /// The Content-Type for `payload`: the explicit flag, else a guess from
    /// the file extension. `None` leaves the XML default in effect.
    pub fn content_type_for(&self, payload: &Path) -> Option<String> {
        if let Some(content_type) = &self.content_type {
            return Some(content_type.clone());
        }
        match payload
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => Some("application/json".to_string()),
            Some("xml") => Some("application/xml".to_string()),
            _ => None,
        }
    }
}
