//! Error types for the ingestion pipeline and query service.
//!
//! Every failure is contained at single-file granularity: the watcher turns
//! an [`IngestError`] into a [`crate::ingest::FileOutcome`] and carries on.

use std::path::PathBuf;
use thiserror::Error;

/// The document bytes could not be turned into a content tree.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid DICOM file: {0}")]
    Dicom(String),

    #[error("malformed document structure: {0}")]
    Structure(String),

    #[error("document nesting exceeds {0} levels")]
    TooDeep(usize),
}

/// A single read attempt failed.
///
/// I/O and parse failures are treated alike by the reader, since the
/// producer may still be writing the file. Only excessive nesting is final.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl ReadError {
    /// Whether another read of the same file could succeed.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, ReadError::Parse(ParseError::TooDeep(_)))
    }
}

/// The reader gave up after its retry bound.
#[derive(Error, Debug)]
#[error("could not read {} after {attempts} attempt(s): {last}", path.display())]
pub struct ReadFailure {
    pub path: PathBuf,
    pub attempts: u32,
    #[source]
    pub last: ReadError,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExtractError {
    #[error("content tree deeper than {max_depth} levels")]
    DepthExceeded { max_depth: usize },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("document id must not be empty")]
    EmptyDocumentId,
}

/// Why a file left the normal archive path.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Read(#[from] ReadFailure),

    #[error("no resolvable document identifier")]
    MissingDocumentIdentifier,

    #[error("no measurements extracted")]
    NoMeasurementsExtracted,

    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("store write failed: {0}")]
    StoreWrite(#[from] StoreError),

    #[error("could not move file to archive: {0}")]
    ArchiveMove(#[source] std::io::Error),
}

impl IngestError {
    /// Short machine-readable label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Read(_) => "read_failed",
            IngestError::MissingDocumentIdentifier => "missing_document_id",
            IngestError::NoMeasurementsExtracted => "no_measurements",
            IngestError::Extract(_) => "extract_failed",
            IngestError::StoreWrite(_) => "store_failed",
            IngestError::ArchiveMove(_) => "archive_failed",
        }
    }
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("no measurements found for document: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_error_kinds_are_distinct() {
        let kinds = [
            IngestError::MissingDocumentIdentifier.kind(),
            IngestError::NoMeasurementsExtracted.kind(),
            IngestError::Extract(ExtractError::DepthExceeded { max_depth: 3 }).kind(),
            IngestError::ArchiveMove(std::io::Error::other("x")).kind(),
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_only_nesting_errors_are_final() {
        assert!(!ReadError::Parse(ParseError::TooDeep(40)).is_retriable());
        assert!(ReadError::Parse(ParseError::Structure("cut".into())).is_retriable());
        assert!(ReadError::Parse(ParseError::Dicom("eof".into())).is_retriable());
        assert!(ReadError::Io(std::io::Error::other("busy")).is_retriable());
    }

    #[test]
    fn test_read_failure_message_names_path_and_attempts() {
        let err = ReadFailure {
            path: PathBuf::from("/inbox/a.json"),
            attempts: 5,
            last: ReadError::Parse(ParseError::Structure("truncated".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("/inbox/a.json"));
        assert!(msg.contains("5 attempt"));
        assert!(msg.contains("truncated"));
    }
}
