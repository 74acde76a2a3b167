use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the Schwarz coupling components.
///
/// Overwriting an existing iterate directory is not an error; it is reported
/// through `tracing::warn!` and resolved by replacing the directory.
#[derive(Debug, Error)]
pub enum SwrError {
    /// Invalid iteration bounds, scheme, model variant or experiment setting.
    /// Raised before any external side effect.
    #[error("configuration error: {0}")]
    Config(String),

    /// An expected prior iterate, coupling file or input file is absent.
    #[error("missing input: {what} ({})", path.display())]
    MissingInput { what: String, path: PathBuf },

    /// Datasets that must be combined have incompatible dimensions.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// The external model run reported a failure.
    #[error("model run failed in iteration {iteration}: {source}")]
    ModelRun {
        iteration: usize,
        #[source]
        source: anyhow::Error,
    },

    /// The run configuration could not be rendered.
    #[error("rendering run configuration failed: {0}")]
    Render(#[source] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode or decode time series: {0}")]
    Dataset(#[from] serde_json::Error),

    #[error("failed to encode or decode experiment state: {0}")]
    State(#[from] serde_yaml::Error),

    #[error("invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl SwrError {
    pub(crate) fn missing(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        SwrError::MissingInput {
            what: what.into(),
            path: path.into(),
        }
    }
}

pub type SwrResult<T> = Result<T, SwrError>;
