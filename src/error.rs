use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid variant id: {0}")]
    InvalidVariantId(String),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("missing config file kira-vm.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("annotation request failed: {0}")]
    AnnotationHttp(String),

    #[error("annotation source returned status {status}: {message}")]
    AnnotationStatus { status: u16, message: String },

    #[error("annotation source kept rate limiting after {attempts} attempts")]
    RateLimited { attempts: usize },

    #[error("job deadline exceeded after {elapsed_ms} ms")]
    #[diagnostic(help("raise job_timeout_secs or lower the number of variants per job"))]
    DeadlineExceeded { elapsed_ms: u128 },

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
