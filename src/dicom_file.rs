//! Structured reports stored as DICOM Part 10 files (`.dcm`).
//!
//! This is the format a DICOM storage receiver writes to disk: a 128-byte
//! preamble, the `DICM` magic code, the file meta group, then the dataset.
//! Decoding is done by `dicom-object`; this module only walks the decoded
//! dataset into a [`ContentNode`] tree, with the same rules as
//! [`crate::dicom_json`].

use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::mem::InMemElement;
use dicom_object::InMemDicomObject;

use crate::error::ParseError;
use crate::models::{ConceptName, ContentNode, DocumentHeader, ParsedDocument};
use crate::traits::DocumentParser;

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";

#[derive(Debug, Clone)]
pub struct DicomFileParser {
    max_depth: usize,
}

impl DicomFileParser {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    fn node(&self, dataset: &InMemDicomObject, depth: usize) -> Result<ContentNode, ParseError> {
        if depth >= self.max_depth {
            return Err(ParseError::TooDeep(self.max_depth));
        }

        let concept = match items(dataset, tags::CONCEPT_NAME_CODE_SEQUENCE)?.first() {
            Some(code) => Some(ConceptName {
                code: match text(code, tags::CODE_VALUE)? {
                    Some(v) => Some(v),
                    None => text(code, tags::LONG_CODE_VALUE)?,
                },
                meaning: text(code, tags::CODE_MEANING)?,
            }),
            None => None,
        };

        let values = match dataset.get(tags::MEASURED_VALUE_SEQUENCE) {
            Some(_) => {
                let mut values = Vec::new();
                for item in items(dataset, tags::MEASURED_VALUE_SEQUENCE)? {
                    values.extend(multi_text(item, tags::NUMERIC_VALUE)?);
                }
                Some(values)
            }
            None => None,
        };

        let children = items(dataset, tags::CONTENT_SEQUENCE)?
            .iter()
            .map(|item| self.node(item, depth + 1))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ContentNode {
            concept,
            values,
            children,
        })
    }
}

impl Default for DicomFileParser {
    fn default() -> Self {
        Self::new(64)
    }
}

impl DocumentParser for DicomFileParser {
    fn name(&self) -> &str {
        "dicom"
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
        let body = strip_preamble(bytes)?;
        let object = dicom_object::from_reader(body).map_err(|e| ParseError::Dicom(e.to_string()))?;
        let dataset: &InMemDicomObject = &object;

        let header = DocumentHeader {
            study_instance_uid: text(dataset, tags::STUDY_INSTANCE_UID)?,
            sop_instance_uid: text(dataset, tags::SOP_INSTANCE_UID)?,
            study_id: text(dataset, tags::STUDY_ID)?,
            patient_id: text(dataset, tags::PATIENT_ID)?,
            content_date: text(dataset, tags::CONTENT_DATE)?,
            content_time: text(dataset, tags::CONTENT_TIME)?,
        };

        Ok(ParsedDocument {
            header,
            root: self.node(dataset, 0)?,
        })
    }
}

/// Positions `bytes` at the magic code. Files written without a preamble
/// are accepted as well.
fn strip_preamble(bytes: &[u8]) -> Result<&[u8], ParseError> {
    if bytes.len() >= PREAMBLE_LEN + MAGIC.len()
        && &bytes[PREAMBLE_LEN..PREAMBLE_LEN + MAGIC.len()] == MAGIC
    {
        Ok(&bytes[PREAMBLE_LEN..])
    } else if bytes.starts_with(MAGIC) {
        Ok(bytes)
    } else {
        Err(ParseError::Structure("missing DICM magic code".into()))
    }
}

fn items(dataset: &InMemDicomObject, tag: Tag) -> Result<&[InMemDicomObject], ParseError> {
    match dataset.get(tag) {
        None => Ok(&[]),
        Some(element) => element
            .items()
            .ok_or_else(|| ParseError::Structure(format!("{}: not a sequence", tag))),
    }
}

fn text(dataset: &InMemDicomObject, tag: Tag) -> Result<Option<String>, ParseError> {
    Ok(multi_text(dataset, tag)?.into_iter().next())
}

/// Every non-empty string value of `tag`, with padding removed.
fn multi_text(dataset: &InMemDicomObject, tag: Tag) -> Result<Vec<String>, ParseError> {
    let Some(element) = dataset.get(tag) else {
        return Ok(Vec::new());
    };
    strings(element, tag)
}

fn strings(element: &InMemElement, tag: Tag) -> Result<Vec<String>, ParseError> {
    if element.items().is_some() {
        return Err(ParseError::Structure(format!("{}: unexpected sequence", tag)));
    }
    let values = element
        .to_multi_str()
        .map_err(|e| ParseError::Structure(format!("{}: {}", tag, e)))?;
    Ok(values
        .iter()
        .map(|v| v.trim_matches(|c: char| c == '\0' || c.is_whitespace()))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect())
}
