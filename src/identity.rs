//! Document identity and header normalization.
//!
//! A document is keyed by the first non-blank identifier found among an
//! ordered list of header attributes. Documents with none of them are
//! rejected upstream of the store.

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;

use crate::models::{DocumentHeader, DocumentMeta};

/// A header attribute that can serve as the document identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierSource {
    StudyInstanceUid,
    SopInstanceUid,
    StudyId,
}

impl IdentifierSource {
    pub const DEFAULT_ORDER: [IdentifierSource; 3] = [
        IdentifierSource::StudyInstanceUid,
        IdentifierSource::SopInstanceUid,
        IdentifierSource::StudyId,
    ];

    fn lookup(self, header: &DocumentHeader) -> Option<&str> {
        match self {
            IdentifierSource::StudyInstanceUid => header.study_instance_uid.as_deref(),
            IdentifierSource::SopInstanceUid => header.sop_instance_uid.as_deref(),
            IdentifierSource::StudyId => header.study_id.as_deref(),
        }
    }
}

/// Returns the first non-blank identifier, trimmed, trying `sources` in order.
pub fn resolve_document_id(header: &DocumentHeader, sources: &[IdentifierSource]) -> Option<String> {
    sources
        .iter()
        .filter_map(|source| source.lookup(header))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Renders ContentDate/ContentTime as ISO-8601.
///
/// DICOM dates are `YYYYMMDD`; times are `HHMMSS` with optional fraction.
/// Values that do not parse are kept verbatim.
pub fn acquisition_time(header: &DocumentHeader) -> Option<String> {
    let raw_date = header.content_date.as_deref().map(str::trim).filter(|d| !d.is_empty())?;

    let Ok(date) = NaiveDate::parse_from_str(raw_date, "%Y%m%d") else {
        return Some(raw_date.to_string());
    };

    let time = header
        .content_time
        .as_deref()
        .map(str::trim)
        .and_then(|t| t.get(..6))
        .and_then(|t| NaiveTime::parse_from_str(t, "%H%M%S").ok());

    Some(match time {
        Some(time) => date.and_time(time).format("%Y-%m-%dT%H:%M:%S").to_string(),
        None => date.format("%Y-%m-%d").to_string(),
    })
}

/// Builds the per-row document columns for a resolved document.
pub fn document_meta(document_id: String, provider: &str, header: &DocumentHeader) -> DocumentMeta {
    DocumentMeta {
        document_id,
        provider: provider.to_string(),
        patient_id: header.patient_id.clone(),
        exam_id: header.study_id.clone(),
        acquisition_time: acquisition_time(header),
    }
}
