//! Core data models used throughout srwatch.
//!
//! These types represent the content tree a structured report is parsed
//! into, the flat measurement records the extractor produces, and the rows
//! persisted by the measurement store.

use serde::Serialize;

/// The `(code, meaning)` pair naming what a content item represents.
///
/// Either half may be absent in a malformed document; the extractor decides
/// how to treat that (see [`crate::extract::UnknownConceptPolicy`]).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConceptName {
    pub code: Option<String>,
    pub meaning: Option<String>,
}

impl ConceptName {
    pub fn new(code: impl Into<String>, meaning: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            meaning: Some(meaning.into()),
        }
    }
}

/// One node of a parsed content tree.
///
/// `values` holds the raw candidate values exactly as the document encoded
/// them; numeric coercion happens during extraction so one bad value does
/// not invalidate the node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentNode {
    pub concept: Option<ConceptName>,
    pub values: Option<Vec<String>>,
    pub children: Vec<ContentNode>,
}

impl ContentNode {
    /// A node with neither concept nor values, only children.
    pub fn container(children: Vec<ContentNode>) -> Self {
        Self {
            concept: None,
            values: None,
            children,
        }
    }

    /// A leaf measurement node.
    pub fn measurement(code: &str, meaning: &str, values: &[&str]) -> Self {
        Self {
            concept: Some(ConceptName::new(code, meaning)),
            values: Some(values.iter().map(|v| v.to_string()).collect()),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<ContentNode>) -> Self {
        self.children = children;
        self
    }
}

/// Document-level attributes read alongside the content tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentHeader {
    pub study_instance_uid: Option<String>,
    pub sop_instance_uid: Option<String>,
    pub study_id: Option<String>,
    pub patient_id: Option<String>,
    pub content_date: Option<String>,
    pub content_time: Option<String>,
}

/// A fully parsed structured report: header attributes plus the root of the
/// content tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    pub header: DocumentHeader,
    pub root: ContentNode,
}

/// A single numeric finding produced by the extractor.
///
/// `result_index` is the position of `value` among the values successfully
/// read from the same concept node.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub measurement_code: String,
    pub measurement_name: String,
    pub result_index: i64,
    pub value: f64,
}

/// Per-document columns written alongside every measurement row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMeta {
    pub document_id: String,
    pub provider: String,
    pub patient_id: Option<String>,
    pub exam_id: Option<String>,
    pub acquisition_time: Option<String>,
}

/// A measurement row as persisted in SQLite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMeasurement {
    pub id: i64,
    pub document_id: String,
    pub provider: String,
    pub patient_id: Option<String>,
    pub exam_id: Option<String>,
    pub acquisition_time: Option<String>,
    pub measurement_name: String,
    pub measurement_code: String,
    pub result_index: i64,
    pub value: f64,
}
