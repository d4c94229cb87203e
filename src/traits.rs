//! Extension seams for the ingestion pipeline.
//!
//! The pipeline never touches a wire format directly: it hands raw file
//! bytes to a [`DocumentParser`] and works with the resulting
//! [`ParsedDocument`]. [`crate::dicom_file::DicomFileParser`] and
//! [`crate::dicom_json::DicomJsonParser`] are the built-in implementations;
//! other encodings plug in by implementing the trait.
//!
//! ```rust
//! use srwatch::error::ParseError;
//! use srwatch::models::{ContentNode, ParsedDocument};
//! use srwatch::traits::DocumentParser;
//!
//! struct FixedParser;
//!
//! impl DocumentParser for FixedParser {
//!     fn name(&self) -> &str { "fixed" }
//!
//!     fn parse(&self, _bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
//!         Ok(ParsedDocument {
//!             header: Default::default(),
//!             root: ContentNode::measurement("56845-4", "AVA", &["2.5"]),
//!         })
//!     }
//! }
//! ```

use crate::error::ParseError;
use crate::models::ParsedDocument;

/// Turns the raw bytes of one document into a content tree.
///
/// Implementations must be pure: the reader calls `parse` again on a fresh
/// read after every failure, and a truncated input is expected to fail
/// rather than yield a partial tree.
pub trait DocumentParser: Send + Sync {
    /// Short label used in log fields.
    fn name(&self) -> &str;

    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument, ParseError>;
}
