use thiserror::Error;

pub(crate) type Res<T> = std::result::Result<T, anyhow::Error>;
pub type Result<T> = std::result::Result<T, PipelineError>;

/// The failure classes of a pipeline run. Each variant carries the `anyhow` context chain that
/// led to it. None of them are retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Credentials are missing, unreadable, malformed, or were rejected by the token endpoint.
    #[error("Configuration error: {0:#}")]
    Configuration(anyhow::Error),

    /// The spreadsheet or worksheet could not be opened.
    #[error("Not found: {0:#}")]
    NotFound(anyhow::Error),

    /// A network failure, timeout, non-2xx status, or malformed JSON body.
    #[error("Fetch error: {0:#}")]
    Fetch(anyhow::Error),

    /// The payload did not have the expected shape or columns.
    #[error("Schema error: {0:#}")]
    Schema(anyhow::Error),

    /// Writing the local file or the remote sheet failed. This is reported but does not fail the
    /// process.
    #[error("Publish error: {0:#}")]
    Publish(anyhow::Error),
}

impl PipelineError {
    /// Whether the process should exit with a failure status. Only a `Publish` error is not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Publish(_))
    }

    pub(crate) fn configuration(e: impl Into<anyhow::Error>) -> Self {
        Self::Configuration(e.into())
    }

    pub(crate) fn not_found(e: impl Into<anyhow::Error>) -> Self {
        Self::NotFound(e.into())
    }

    pub(crate) fn fetch(e: impl Into<anyhow::Error>) -> Self {
        Self::Fetch(e.into())
    }

    pub(crate) fn schema(e: impl Into<anyhow::Error>) -> Self {
        Self::Schema(e.into())
    }

    pub(crate) fn publish(e: impl Into<anyhow::Error>) -> Self {
        Self::Publish(e.into())
    }
}
