use thiserror::Error;

/// Failures that abort the handling of a single event.
///
/// Authorization denials and unparseable status comments are not errors: the
/// former become reply comments, the latter are treated as "no state found".
#[derive(Debug, Error)]
pub enum LgtmError {
    /// A call to the forge failed. Nothing after the failed call is attempted.
    #[error("forge call `{operation}` failed: {message}")]
    Forge {
        operation: &'static str,
        message: String,
    },
    /// The OWNERS backend could not be consulted at all.
    #[error("owners lookup failed: {message}")]
    Owners { message: String },
    /// A fetched commit has no tree to fingerprint.
    #[error("commit {sha} has no tree")]
    MissingTree { sha: String },
}

impl LgtmError {
    pub fn forge(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Forge {
            operation,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LgtmError>;
