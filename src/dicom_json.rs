//! Structured reports in the DICOM JSON model (PS3.18 Annex F).
//!
//! Each dataset is an object keyed by 8-hex-digit tags whose elements look
//! like `{ "vr": "SQ", "Value": [ ... ] }`. The root dataset becomes the root
//! [`ContentNode`]; ContentSequence items become its children.

use serde_json::{Map, Value};

use crate::error::ParseError;
use crate::models::{ConceptName, ContentNode, DocumentHeader, ParsedDocument};
use crate::traits::DocumentParser;

pub const STUDY_INSTANCE_UID: &str = "0020000D";
pub const SOP_INSTANCE_UID: &str = "00080018";
pub const STUDY_ID: &str = "00200010";
pub const PATIENT_ID: &str = "00100020";
pub const CONTENT_DATE: &str = "00080023";
pub const CONTENT_TIME: &str = "00080033";
pub const CONTENT_SEQUENCE: &str = "0040A730";
pub const CONCEPT_NAME_CODE_SEQUENCE: &str = "0040A043";
pub const CODE_VALUE: &str = "00080100";
pub const LONG_CODE_VALUE: &str = "00080119";
pub const CODE_MEANING: &str = "00080104";
pub const MEASURED_VALUE_SEQUENCE: &str = "0040A300";
pub const NUMERIC_VALUE: &str = "0040A30A";

/// Deepest content level this format can carry. Each level costs three JSON
/// nesting levels and a concept code five more, which must stay within
/// serde_json's recursion limit of 128.
pub const MAX_CONTENT_DEPTH: usize = 40;

type Dataset = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct DicomJsonParser {
    max_depth: usize,
}

impl DicomJsonParser {
    /// `max_depth` is capped at [`MAX_CONTENT_DEPTH`].
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.min(MAX_CONTENT_DEPTH),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn node(&self, dataset: &Dataset, depth: usize) -> Result<ContentNode, ParseError> {
        if depth >= self.max_depth {
            return Err(ParseError::TooDeep(self.max_depth));
        }

        let concept = match sequence(dataset, CONCEPT_NAME_CODE_SEQUENCE)?.first() {
            Some(code) => Some(ConceptName {
                code: match string_attr(code, CODE_VALUE)? {
                    Some(v) => Some(v),
                    None => string_attr(code, LONG_CODE_VALUE)?,
                },
                meaning: string_attr(code, CODE_MEANING)?,
            }),
            None => None,
        };

        let values = match element(dataset, MEASURED_VALUE_SEQUENCE) {
            Some(_) => {
                let mut values = Vec::new();
                for item in sequence(dataset, MEASURED_VALUE_SEQUENCE)? {
                    values.extend(raw_values(item, NUMERIC_VALUE)?);
                }
                Some(values)
            }
            None => None,
        };

        let children = sequence(dataset, CONTENT_SEQUENCE)?
            .into_iter()
            .map(|item| self.node(item, depth + 1))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ContentNode {
            concept,
            values,
            children,
        })
    }
}

impl Default for DicomJsonParser {
    fn default() -> Self {
        Self::new(64)
    }
}

impl DocumentParser for DicomJsonParser {
    fn name(&self) -> &str {
        "dicom-json"
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| {
            if e.to_string().starts_with("recursion limit exceeded") {
                ParseError::TooDeep(self.max_depth)
            } else {
                ParseError::Json(e)
            }
        })?;

        let dataset = match &value {
            Value::Object(map) => map,
            Value::Array(instances) => instances
                .first()
                .and_then(Value::as_object)
                .ok_or_else(|| ParseError::Structure("no dataset in instance array".into()))?,
            _ => {
                return Err(ParseError::Structure(
                    "top level must be a dataset object".into(),
                ))
            }
        };

        let header = DocumentHeader {
            study_instance_uid: string_attr(dataset, STUDY_INSTANCE_UID)?,
            sop_instance_uid: string_attr(dataset, SOP_INSTANCE_UID)?,
            study_id: string_attr(dataset, STUDY_ID)?,
            patient_id: string_attr(dataset, PATIENT_ID)?,
            content_date: string_attr(dataset, CONTENT_DATE)?,
            content_time: string_attr(dataset, CONTENT_TIME)?,
        };

        Ok(ParsedDocument {
            header,
            root: self.node(dataset, 0)?,
        })
    }
}

fn element<'a>(dataset: &'a Dataset, tag: &str) -> Option<&'a Dataset> {
    dataset
        .get(tag)
        .or_else(|| dataset.get(&tag.to_ascii_lowercase()))
        .and_then(Value::as_object)
}

/// The `Value` array of an element; empty when the element or its value is
/// absent, as DICOM JSON omits `Value` for zero-length attributes.
fn value_array<'a>(dataset: &'a Dataset, tag: &str) -> Result<&'a [Value], ParseError> {
    let Some(element) = element(dataset, tag) else {
        return Ok(&[]);
    };
    match element.get("Value") {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(ParseError::Structure(format!("{}: Value is not an array", tag))),
    }
}

fn sequence<'a>(dataset: &'a Dataset, tag: &str) -> Result<Vec<&'a Dataset>, ParseError> {
    value_array(dataset, tag)?
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| ParseError::Structure(format!("{}: sequence item is not a dataset", tag)))
        })
        .collect()
}

fn string_attr(dataset: &Dataset, tag: &str) -> Result<Option<String>, ParseError> {
    Ok(value_array(dataset, tag)?.first().and_then(scalar_text))
}

fn raw_values(dataset: &Dataset, tag: &str) -> Result<Vec<String>, ParseError> {
    Ok(value_array(dataset, tag)?.iter().filter_map(scalar_text).collect())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        // Person names: { "Alphabetic": "Doe^Jane" }
        Value::Object(obj) => obj.get("Alphabetic").and_then(Value::as_str).map(str::to_string),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn num_item(code: &str, meaning: &str, values: Value) -> Value {
        json!({
            "0040A040": { "vr": "CS", "Value": ["NUM"] },
            "0040A043": { "vr": "SQ", "Value": [{
                "00080100": { "vr": "SH", "Value": [code] },
                "00080104": { "vr": "LO", "Value": [meaning] }
            }]},
            "0040A300": { "vr": "SQ", "Value": [{
                "0040A30A": { "vr": "DS", "Value": values }
            }]}
        })
    }

    fn parse(value: Value) -> Result<ParsedDocument, ParseError> {
        DicomJsonParser::default().parse(value.to_string().as_bytes())
    }

    #[test]
    fn test_parses_header_and_tree() {
        let doc = parse(json!({
            "0020000D": { "vr": "UI", "Value": ["1.2.3.4"] },
            "00100020": { "vr": "LO", "Value": ["PAT-1"] },
            "00080023": { "vr": "DA", "Value": ["20250101"] },
            "0040A730": { "vr": "SQ", "Value": [
                num_item("56845-4", "AVA", json!([2.5])),
                { "0040A730": { "vr": "SQ", "Value": [ num_item("X", "x", json!(["1.5", "2"])) ] } }
            ]}
        }))
        .unwrap();

        assert_eq!(doc.header.study_instance_uid.as_deref(), Some("1.2.3.4"));
        assert_eq!(doc.header.patient_id.as_deref(), Some("PAT-1"));
        assert_eq!(doc.header.content_date.as_deref(), Some("20250101"));
        assert!(doc.root.concept.is_none());
        assert_eq!(doc.root.children.len(), 2);

        let ava = &doc.root.children[0];
        assert_eq!(ava.concept, Some(ConceptName::new("56845-4", "AVA")));
        assert_eq!(ava.values, Some(vec!["2.5".to_string()]));

        let nested = &doc.root.children[1].children[0];
        assert_eq!(nested.values, Some(vec!["1.5".to_string(), "2".to_string()]));
    }

    #[test]
    fn test_values_from_every_measured_value_item() {
        let doc = parse(json!({
            "0040A043": { "vr": "SQ", "Value": [{ "00080100": { "vr": "SH", "Value": ["C"] } }] },
            "0040A300": { "vr": "SQ", "Value": [
                { "0040A30A": { "vr": "DS", "Value": ["1"] } },
                { "0040A30A": { "vr": "DS", "Value": ["2", null, "x"] } }
            ]}
        }))
        .unwrap();
        assert_eq!(
            doc.root.values,
            Some(vec!["1".to_string(), "2".to_string(), "x".to_string()])
        );
        assert_eq!(doc.root.concept.as_ref().unwrap().meaning, None);
    }

    #[test]
    fn test_empty_elements_are_absent_values() {
        let doc = parse(json!({
            "0020000D": { "vr": "UI" },
            "0040A730": { "vr": "SQ", "Value": [] }
        }))
        .unwrap();
        assert_eq!(doc.header.study_instance_uid, None);
        assert!(doc.root.children.is_empty());
        assert_eq!(doc.root.values, None);
    }

    #[test]
    fn test_person_name_and_long_code_value() {
        let doc = parse(json!({
            "00100020": { "vr": "PN", "Value": [{ "Alphabetic": "Doe^Jane" }] },
            "0040A043": { "vr": "SQ", "Value": [{
                "00080119": { "vr": "UC", "Value": ["LONG-CODE"] }
            }]}
        }))
        .unwrap();
        assert_eq!(doc.header.patient_id.as_deref(), Some("Doe^Jane"));
        assert_eq!(
            doc.root.concept.unwrap().code.as_deref(),
            Some("LONG-CODE")
        );
    }

    #[test]
    fn test_instance_array_uses_first_dataset() {
        let doc = parse(json!([{ "0020000D": { "vr": "UI", "Value": ["9.9"] } }])).unwrap();
        assert_eq!(doc.header.study_instance_uid.as_deref(), Some("9.9"));
        assert!(parse(json!([])).is_err());
    }

    #[test]
    fn test_truncated_input_fails() {
        let full = json!({ "0020000D": { "vr": "UI", "Value": ["1.2"] } }).to_string();
        let truncated = &full.as_bytes()[..full.len() / 2];
        assert!(matches!(
            DicomJsonParser::default().parse(truncated),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn test_structural_errors() {
        assert!(matches!(parse(json!("text")), Err(ParseError::Structure(_))));
        assert!(matches!(
            parse(json!({ "0040A730": { "vr": "SQ", "Value": "oops" } })),
            Err(ParseError::Structure(_))
        ));
        assert!(matches!(
            parse(json!({ "0040A730": { "vr": "SQ", "Value": [1, 2] } })),
            Err(ParseError::Structure(_))
        ));
    }

    #[test]
    fn test_depth_bound() {
        let mut dataset = json!({});
        for _ in 0..5 {
            dataset = json!({ "0040A730": { "vr": "SQ", "Value": [dataset] } });
        }
        let bytes = dataset.to_string();
        assert!(DicomJsonParser::new(6).parse(bytes.as_bytes()).is_ok());
        assert!(matches!(
            DicomJsonParser::new(5).parse(bytes.as_bytes()),
            Err(ParseError::TooDeep(5))
        ));
    }

    #[test]
    fn test_nesting_past_json_limit_is_too_deep() {
        let parser = DicomJsonParser::new(64);
        assert_eq!(parser.max_depth(), MAX_CONTENT_DEPTH);

        // A leaf with a concept code at the deepest allowed level parses.
        let mut dataset = num_item("C", "c", json!(["1"]));
        for _ in 0..MAX_CONTENT_DEPTH - 1 {
            dataset = json!({ "0040A730": { "vr": "SQ", "Value": [dataset] } });
        }
        assert!(parser.parse(dataset.to_string().as_bytes()).is_ok());

        let mut text = "{}".to_string();
        for _ in 0..46 {
            text = format!(r#"{{"0040A730": {{"vr": "SQ", "Value": [{}]}}}}"#, text);
        }
        assert!(matches!(
            parser.parse(text.as_bytes()),
            Err(ParseError::TooDeep(MAX_CONTENT_DEPTH))
        ));
    }
}
