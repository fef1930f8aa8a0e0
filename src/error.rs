//! Error types for the design automation pipeline.
//!
//! Each pipeline stage has its own error enum so callers can tell exactly
//! which network interaction failed, with the HTTP status and (truncated)
//! response body preserved for diagnostics. `OrchestratorError` aggregates
//! them for the top-level `run_job` surface.
//!
//! Remote job outcomes (`failed`, `cancelled`, local `timeout`) are not
//! errors; they are terminal statuses carried in `JobOutcome`.

use std::path::PathBuf;

use thiserror::Error;

/// Credential exchange failures. Always fatal: there is no local recovery
/// from a rejected client id/secret pair.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token exchange rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("token response did not contain a usable access token")]
    MissingToken,

    #[error("token endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failures in the signed-URL object upload protocol.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("refusing to upload empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("{operation} failed (HTTP {status}): {body}")]
    RequestFailed {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid {operation} response: {reason}")]
    InvalidResponse {
        operation: &'static str,
        reason: String,
    },

    #[error("io error reading upload source: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failures registering bundles, activities, or aliases.
///
/// `Conflict` is special: the provisioner recovers from it by creating a new
/// version under the existing id, so it never reaches the caller.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("'{id}' already exists")]
    Conflict { id: String },

    #[error("{operation} failed (HTTP {status}): {body}")]
    RequestFailed {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid {operation} response: {reason}")]
    InvalidResponse {
        operation: &'static str,
        reason: String,
    },

    #[error("io error reading package archive: {0}")]
    Io(#[from] std::io::Error),

    #[error("provisioning transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Work item creation failures.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("work item rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("work item response missing 'id' field")]
    MissingId,

    #[error("invalid work item response: {reason}")]
    InvalidResponse { reason: String },

    #[error("submission transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failures while polling a submitted job.
///
/// Transport errors here abort the poll loop rather than being retried:
/// repeated transient failures against the status endpoint indicate a broken
/// session, not job latency.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("status check failed (HTTP {status}): {body}")]
    RequestFailed { status: u16, body: String },

    #[error("invalid status response: {reason}")]
    InvalidResponse { reason: String },

    #[error("polling transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failures fetching reports, derivative manifests, or model metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("{operation} failed (HTTP {status}): {body}")]
    RequestFailed {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid {operation} response: {reason}")]
    InvalidResponse {
        operation: &'static str,
        reason: String,
    },

    #[error("metadata still processing after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("translation did not reach a terminal state after {attempts} attempts")]
    TranslationTimedOut { attempts: u32 },

    #[error("object hierarchy exceeds {limit} nodes, refusing to walk further")]
    HierarchyTooLarge { limit: usize },

    #[error("report is not a flat key/value document: {reason}")]
    MalformedReport { reason: String },

    #[error("metadata transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Parameter validation failures at the report boundary.
#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("parameter '{name}' has non-numeric value '{value}'")]
    NonNumeric { name: String, value: String },

    #[error("parameter '{name}' is not finite")]
    NotFinite { name: String },
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {name}")]
    MissingVar { name: &'static str },

    #[error("invalid value for {name}: {reason}")]
    InvalidVar { name: &'static str, reason: String },
}

/// Aggregated error surface for `Orchestrator::run_job`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Truncate a response body for inclusion in error messages and debug logs.
pub(crate) fn truncate_body(body: &str, max: usize) -> String {
    if body.len() <= max {
        body.to_string()
    } else {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... ({} bytes total)", &body[..end], body.len())
    }
}
