use crate::auth::AuthError;
use crate::export::ExportError;
use crate::upload::UploadError;
use crate::watcher::JobError;

/// Unified application error type.
///
/// Wraps the per-module errors so command handlers can propagate with `?`
/// and `main` can map the failure class onto a process exit status.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Exit status for authentication failures (timeout, cancel, invalid token).
pub const EXIT_AUTH_FAILURE: u8 = 2;
/// Exit status for malformed input (bad descriptor or unparseable export).
pub const EXIT_MALFORMED_INPUT: u8 = 3;
/// Exit status for any other failure.
pub const EXIT_OTHER_FAILURE: u8 = 1;

impl AppError {
    /// Map the failure onto a process exit status. Callers that exit with
    /// this code let scripts distinguish auth failures from bad input.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Auth(_) => EXIT_AUTH_FAILURE,
            Self::Job(JobError::Malformed { .. })
            | Self::Job(JobError::SourceMissing(_))
            | Self::Export(ExportError::Parse { .. }) => EXIT_MALFORMED_INPUT,
            _ => EXIT_OTHER_FAILURE,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
