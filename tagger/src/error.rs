use thiserror::Error;

/// Failures scoped to a single media item. The batch loop reports these and
/// moves on to the next item; none of them aborts the run.
#[derive(Debug, Error)]
pub(crate) enum ItemError {
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),
    #[error("failed to decode media: {0}")]
    CorruptMedia(String),
    #[error("tagging request failed: {0}")]
    Transport(String),
    /// The service replied, but without a completion payload. Carries the
    /// full response body for operator inspection.
    #[error("tagging response missing completion content: {0}")]
    MalformedResponse(String),
    #[error("failed to write output: {0}")]
    MetadataWrite(String),
}
