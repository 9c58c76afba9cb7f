/// Failure decoding a `content-encoding`d body, per spec §4.D.6.
#[derive(Debug)]
pub enum DecompressionError {
    /// `content-encoding` named an encoding this build has no decoder for.
    UnsupportedEncoding {
        requested: String,
        known: Vec<String>,
    },
    /// The decoder itself failed (corrupt stream, truncated input, ...).
    Failed(std::io::Error),
}

impl std::fmt::Display for DecompressionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecompressionError::UnsupportedEncoding { requested, known } => write!(
                f,
                "unsupported content-encoding '{}'; known: {}",
                requested,
                known.join(", ")
            ),
            DecompressionError::Failed(error) => write!(f, "decompression failed: {error}"),
        }
    }
}

impl std::error::Error for DecompressionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecompressionError::UnsupportedEncoding { .. } => None,
            DecompressionError::Failed(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for DecompressionError {
    fn from(error: std::io::Error) -> Self {
        DecompressionError::Failed(error)
    }
}

impl From<DecompressionError> for crate::error::PipelineError {
    fn from(err: DecompressionError) -> Self {
        crate::error::PipelineError::with_source(
            crate::error::ErrorKind::Protocol,
            err.to_string(),
            err,
        )
    }
}
