//! Error types reported by the analysis core.

use url::Url;

/// Represents an error raised by the analysis core.
///
/// Each variant maps to a stable JSON-RPC error code so that transport layers
/// can report failures to the client without interpreting the error further.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operation referenced a URI that is not in the document store.
    #[error("unknown document `{0}`")]
    UnknownDocument(Url),
    /// A read request was made against an entry that cannot be analyzed.
    #[error("document `{0}` is not an analyzable document")]
    UnsupportedDocumentType(Url),
    /// The client requested a specific parse version that does not match the
    /// version of the current parse.
    #[error("expected parse version {expected} but the current version is {actual}")]
    MismatchedVersion {
        /// The version the client expected.
        expected: i32,
        /// The version of the current parse.
        actual: i32,
    },
    /// The parser rejected the document source.
    #[error("the document source could not be parsed")]
    BadSource,
    /// The operation was canceled by shutdown or a timeout.
    #[error("the operation was canceled")]
    Cancelled,
    /// An unexpected internal error.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Gets the stable JSON-RPC error code for this error.
    pub fn code(&self) -> i64 {
        match self {
            Self::UnknownDocument(_) => -32001,
            Self::UnsupportedDocumentType(_) => -32002,
            Self::MismatchedVersion { .. } => -32003,
            Self::BadSource => -32004,
            Self::Cancelled => -32800,
            Self::Internal(_) => -32603,
        }
    }
}

/// A specialized result type for analysis core operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn it_maps_stable_codes() {
        let uri: Url = "file:///test.py".parse().unwrap();
        assert_eq!(Error::UnknownDocument(uri.clone()).code(), -32001);
        assert_eq!(Error::UnsupportedDocumentType(uri).code(), -32002);
        assert_eq!(
            Error::MismatchedVersion {
                expected: 7,
                actual: 6
            }
            .code(),
            -32003
        );
        assert_eq!(Error::BadSource.code(), -32004);
        assert_eq!(Error::Cancelled.code(), -32800);
        assert_eq!(Error::Internal(anyhow::anyhow!("boom")).code(), -32603);
    }
}
