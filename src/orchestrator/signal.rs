//! Parsing of the worker's stdout protocol.
//!
//! ```text
//! SERVER READY                      worker is serving, swap traffic to it
//! ERROR PLOT <id> <message...>      plot failed to load
//! ERROR DATASET <name> <message...> dataset failed to load
//! anything else                     informational
//! ```

use crate::orchestrator::job::JobTarget;

const READY_LINE: &str = "SERVER READY";
const PLOT_ERROR_PREFIX: &str = "ERROR PLOT ";
const DATASET_ERROR_PREFIX: &str = "ERROR DATASET ";

/// A classified line of worker output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerSignal {
    Ready,
    ArtifactError { target: JobTarget, message: String },
    Log(String),
}

impl WorkerSignal {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end();
        if line == READY_LINE {
            return Self::Ready;
        }
        if let Some(rest) = line.strip_prefix(PLOT_ERROR_PREFIX)
            && let Some((id, message)) = split_subject(rest)
        {
            return Self::ArtifactError {
                target: JobTarget::Plot(id),
                message,
            };
        }
        if let Some(rest) = line.strip_prefix(DATASET_ERROR_PREFIX)
            && let Some((name, message)) = split_subject(rest)
        {
            return Self::ArtifactError {
                target: JobTarget::Dataset(name),
                message,
            };
        }
        Self::Log(line.to_string())
    }
}

/// First space-delimited token is the subject, the remainder the message.
fn split_subject(rest: &str) -> Option<(String, String)> {
    let (subject, message) = rest.split_once(' ').unwrap_or((rest, ""));
    if subject.is_empty() {
        return None;
    }
    Some((subject.to_string(), message.to_string()))
}
