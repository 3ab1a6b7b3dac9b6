//! Human-readable reporting of payload validation outcomes.

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::VerbosityLevel;
use crate::error::ValidationError;
use crate::validator::Validated;

/// How one payload fared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadStatus {
    Accepted {
        encoding: String,
        warnings: Vec<String>,
    },
    /// The payload itself was at fault (400-class).
    Rejected { message: String },
    /// Schema, configuration or runtime failure (500-class).
    Failed { status_code: u16, message: String },
}

impl PayloadStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PayloadStatus::Accepted { .. })
    }
}

#[derive(Debug, Clone)]
pub struct PayloadOutcome {
    pub path: PathBuf,
    pub status: PayloadStatus,
    pub duration: Duration,
}

impl PayloadOutcome {
    pub fn from_result(
        path: PathBuf,
        result: Result<Validated, ValidationError>,
        duration: Duration,
    ) -> Self {
        let status = match result {
            Ok(validated) => PayloadStatus::Accepted {
                encoding: validated.payload.encoding().to_string(),
                warnings: validated
                    .report
                    .warnings()
                    .map(|entry| entry.message.clone())
                    .collect(),
            },
            Err(e) if e.is_client_error() => PayloadStatus::Rejected {
                message: e.to_string(),
            },
            Err(e) => PayloadStatus::Failed {
                status_code: e.status_code(),
                message: e.to_string(),
            },
        };

        Self {
            path,
            status,
            duration,
        }
    }
}

/// Outcomes of one run, in input order.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub outcomes: Vec<PayloadOutcome>,
    pub total_duration: Duration,
}

impl RunSummary {
    pub fn new(outcomes: Vec<PayloadOutcome>, total_duration: Duration) -> Self {
        Self {
            outcomes,
            total_duration,
        }
    }

    pub fn accepted(&self) -> usize {
        self.count(|s| matches!(s, PayloadStatus::Accepted { .. }))
    }

    pub fn rejected(&self) -> usize {
        self.count(|s| matches!(s, PayloadStatus::Rejected { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, PayloadStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&PayloadStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    /// 0 when everything was accepted, 2 on any internal failure, else 1.
    pub fn exit_code(&self) -> i32 {
        if self.failed() > 0 {
            2
        } else if self.rejected() > 0 {
            1
        } else {
            0
        }
    }
}

/// Output formatter for validation runs
pub struct Output {
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    pub fn without_colors(mut self) -> Self {
        self.show_colors = false;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_summary(&self, summary: &RunSummary) -> String {
        let mut output = String::new();

        if self.verbosity == VerbosityLevel::Quiet {
            for outcome in summary.outcomes.iter().filter(|o| !o.status.is_accepted()) {
                output.push_str(&self.format_outcome(outcome));
                output.push('\n');
            }
            return output;
        }

        for outcome in &summary.outcomes {
            output.push_str(&self.format_outcome(outcome));
            output.push('\n');
        }

        output.push_str(&format!(
            "\n{} payloads: {} accepted, {} rejected, {} failed ({})\n",
            summary.outcomes.len(),
            summary.accepted(),
            summary.rejected(),
            summary.failed(),
            format_duration(summary.total_duration)
        ));
        output
    }

    pub fn format_outcome(&self, outcome: &PayloadOutcome) -> String {
        let path = outcome.path.display();
        let duration = format_duration(outcome.duration);

        match &outcome.status {
            PayloadStatus::Accepted { encoding, warnings } => {
                let mut line = format!(
                    "{}  {} ({}, {})",
                    self.colorize("ACCEPTED", "32"),
                    path,
                    encoding,
                    duration
                );
                if self.verbosity >= VerbosityLevel::Normal {
                    for warning in warnings {
                        line.push_str(&format!("\n    warning: {}", warning));
                    }
                }
                line
            }
            PayloadStatus::Rejected { message } => format!(
                "{}  {} ({}) - {}",
                self.colorize("REJECTED", "31"),
                path,
                duration,
                message
            ),
            PayloadStatus::Failed {
                status_code,
                message,
            } => format!(
                "{}  {} ({}) - [{}] {}",
                self.colorize("ERROR", "33"),
                path,
                duration,
                status_code,
                message
            ),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
