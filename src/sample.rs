//! Synthetic echo report generator.
//!
//! Writes a small structured report with a handful of echocardiography
//! measurements, either as a DICOM Part 10 file or in the DICOM JSON model,
//! for smoke-testing a running watcher. Files are staged under a hidden name
//! and renamed into place, so a watcher polling `dir` never sees a
//! half-written report.

use anyhow::{anyhow, Result};
use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

use crate::config::DocumentFormat;
use crate::dicom_json::{
    CODE_MEANING, CODE_VALUE, CONCEPT_NAME_CODE_SEQUENCE, CONTENT_DATE, CONTENT_SEQUENCE,
    CONTENT_TIME, MEASURED_VALUE_SEQUENCE, NUMERIC_VALUE, PATIENT_ID, SOP_INSTANCE_UID,
    STUDY_ID, STUDY_INSTANCE_UID,
};

/// `(code, meaning, values)` written by [`echo_report`].
pub const SAMPLE_MEASUREMENTS: &[(&str, &str, &[&str])] = &[
    ("56845-4", "AVA", &["2.5"]),
    ("10230-1", "LVEF", &["60"]),
    ("8867-4", "Heart rate", &["72"]),
    ("18154-5", "IVSd", &["1.1", "1.2"]),
];

/// A fresh UID in the `2.25` (UUID-derived) arc.
pub fn generate_uid() -> String {
    format!("2.25.{}", uuid::Uuid::new_v4().as_u128())
}

/// Builds the report dataset for `study_uid` in the DICOM JSON model.
pub fn echo_report(study_uid: &str) -> Value {
    let now = chrono::Local::now();

    let findings: Vec<Value> = SAMPLE_MEASUREMENTS
        .iter()
        .map(|(code, meaning, values)| {
            json!({
                "0040A040": { "vr": "CS", "Value": ["NUM"] },
                CONCEPT_NAME_CODE_SEQUENCE: { "vr": "SQ", "Value": [{
                    CODE_VALUE: { "vr": "SH", "Value": [code] },
                    CODE_MEANING: { "vr": "LO", "Value": [meaning] }
                }]},
                MEASURED_VALUE_SEQUENCE: { "vr": "SQ", "Value": [{
                    NUMERIC_VALUE: { "vr": "DS", "Value": values }
                }]}
            })
        })
        .collect();

    let mut root = Map::new();
    root.insert(STUDY_INSTANCE_UID.into(), attr("UI", study_uid));
    root.insert(SOP_INSTANCE_UID.into(), attr("UI", &generate_uid()));
    root.insert(STUDY_ID.into(), attr("SH", "ECHO-1"));
    root.insert(PATIENT_ID.into(), attr("LO", "SAMPLE-PATIENT"));
    root.insert(
        CONTENT_DATE.into(),
        attr("DA", &now.format("%Y%m%d").to_string()),
    );
    root.insert(
        CONTENT_TIME.into(),
        attr("TM", &now.format("%H%M%S").to_string()),
    );
    // One untitled container holding the findings, like vendor echo reports.
    root.insert(
        CONTENT_SEQUENCE.into(),
        json!({ "vr": "SQ", "Value": [{
            "0040A040": { "vr": "CS", "Value": ["CONTAINER"] },
            CONTENT_SEQUENCE: { "vr": "SQ", "Value": findings }
        }]}),
    );
    Value::Object(root)
}

fn attr(vr: &str, value: &str) -> Value {
    json!({ "vr": vr, "Value": [value] })
}

/// Builds the same report as [`echo_report`] as an in-memory DICOM dataset.
pub fn echo_report_dicom(study_uid: &str, sop_instance_uid: &str) -> InMemDicomObject {
    let now = chrono::Local::now();

    let findings: Vec<InMemDicomObject> = SAMPLE_MEASUREMENTS
        .iter()
        .map(|(code, meaning, values)| {
            InMemDicomObject::from_element_iter([
                text(tags::VALUE_TYPE, VR::CS, "NUM"),
                sequence(
                    tags::CONCEPT_NAME_CODE_SEQUENCE,
                    vec![InMemDicomObject::from_element_iter([
                        text(tags::CODE_VALUE, VR::SH, code),
                        text(tags::CODE_MEANING, VR::LO, meaning),
                    ])],
                ),
                sequence(
                    tags::MEASURED_VALUE_SEQUENCE,
                    vec![InMemDicomObject::from_element_iter([text(
                        tags::NUMERIC_VALUE,
                        VR::DS,
                        &values.join("\\"),
                    )])],
                ),
            ])
        })
        .collect();

    InMemDicomObject::from_element_iter([
        text(tags::SOP_CLASS_UID, VR::UI, uids::COMPREHENSIVE_SR_STORAGE),
        text(tags::SOP_INSTANCE_UID, VR::UI, sop_instance_uid),
        text(tags::CONTENT_DATE, VR::DA, &now.format("%Y%m%d").to_string()),
        text(tags::CONTENT_TIME, VR::TM, &now.format("%H%M%S").to_string()),
        text(tags::PATIENT_ID, VR::LO, "SAMPLE-PATIENT"),
        text(tags::STUDY_INSTANCE_UID, VR::UI, study_uid),
        text(tags::STUDY_ID, VR::SH, "ECHO-1"),
        text(tags::VALUE_TYPE, VR::CS, "CONTAINER"),
        sequence(
            tags::CONTENT_SEQUENCE,
            vec![InMemDicomObject::from_element_iter([
                text(tags::VALUE_TYPE, VR::CS, "CONTAINER"),
                sequence(tags::CONTENT_SEQUENCE, findings),
            ])],
        ),
    ])
}

fn text(tag: Tag, vr: VR, value: &str) -> DataElement<InMemDicomObject> {
    DataElement::new(tag, vr, PrimitiveValue::from(value))
}

fn sequence(tag: Tag, items: Vec<InMemDicomObject>) -> DataElement<InMemDicomObject> {
    DataElement::new(tag, VR::SQ, DataSetSequence::from(items))
}

/// Writes `<dir>/<study_uid>.<ext>` in `format` and returns its path.
pub fn write_sample(dir: &Path, study_uid: &str, format: DocumentFormat) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let file_name = format!("{}.{}", study_uid, format.extension());
    let staging = dir.join(format!(".{}.partial", file_name));
    let dest = dir.join(&file_name);

    match format {
        DocumentFormat::Dicom => {
            let sop_instance_uid = generate_uid();
            echo_report_dicom(study_uid, &sop_instance_uid)
                .with_meta(
                    FileMetaTableBuilder::new()
                        .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                        .media_storage_sop_class_uid(uids::COMPREHENSIVE_SR_STORAGE)
                        .media_storage_sop_instance_uid(sop_instance_uid.as_str()),
                )
                .map_err(|e| anyhow!("Failed to build file meta group: {}", e))?
                .write_to_file(&staging)
                .map_err(|e| anyhow!("Failed to write {}: {}", staging.display(), e))?;
        }
        DocumentFormat::DicomJson => {
            std::fs::write(&staging, serde_json::to_vec_pretty(&echo_report(study_uid))?)?;
        }
    }
    std::fs::rename(&staging, &dest)?;
    Ok(dest)
}

/// CLI entry point for `srwatch sample`.
pub fn run_sample(dir: &Path, study_uid: Option<&str>, format: DocumentFormat) -> Result<()> {
    let uid = study_uid.map(str::to_string).unwrap_or_else(generate_uid);
    let path = write_sample(dir, &uid, format)?;

    println!("sample");
    println!("  study_uid: {}", uid);
    println!("  measurements: {}", sample_measurement_count());
    println!("  written: {}", path.display());
    println!("ok");
    Ok(())
}

/// Number of measurement records the sample report extracts to.
pub fn sample_measurement_count() -> usize {
    SAMPLE_MEASUREMENTS.iter().map(|(_, _, v)| v.len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom_file::DicomFileParser;
    use crate::dicom_json::DicomJsonParser;
    use crate::extract::{extract, ExtractOptions};
    use crate::identity::{resolve_document_id, IdentifierSource};
    use crate::models::ParsedDocument;
    use crate::traits::DocumentParser;
    use tempfile::TempDir;

    fn write_and_parse(format: DocumentFormat, parser: &dyn DocumentParser) -> ParsedDocument {
        let tmp = TempDir::new().unwrap();
        let path = write_sample(tmp.path(), "1.2.3.4", format).unwrap();
        let name = format!("1.2.3.4.{}", format.extension());
        assert_eq!(path, tmp.path().join(&name));
        assert!(!tmp.path().join(format!(".{}.partial", name)).exists());

        parser.parse(&std::fs::read(&path).unwrap()).unwrap()
    }

    #[test]
    fn test_part10_sample_matches_json_sample() {
        let part10 = write_and_parse(DocumentFormat::Dicom, &DicomFileParser::default());
        let json = write_and_parse(DocumentFormat::DicomJson, &DicomJsonParser::default());

        assert_eq!(part10.header.study_instance_uid, json.header.study_instance_uid);
        assert_eq!(part10.header.patient_id.as_deref(), Some("SAMPLE-PATIENT"));
        assert_eq!(part10.header.study_id.as_deref(), Some("ECHO-1"));

        let options = ExtractOptions::default();
        assert_eq!(
            extract(&part10.root, &options).unwrap(),
            extract(&json.root, &options).unwrap()
        );
    }

    #[test]
    fn test_sample_parses_and_extracts() {
        let doc = write_and_parse(DocumentFormat::DicomJson, &DicomJsonParser::default());
        assert_eq!(
            resolve_document_id(&doc.header, &IdentifierSource::DEFAULT_ORDER).as_deref(),
            Some("1.2.3.4")
        );

        let records = extract(&doc.root, &ExtractOptions::default()).unwrap();
        assert_eq!(records.len(), sample_measurement_count());
        assert_eq!(records[0].measurement_code, "56845-4");
        assert_eq!(records[0].value, 2.5);
        let ivsd: Vec<i64> = records
            .iter()
            .filter(|r| r.measurement_code == "18154-5")
            .map(|r| r.result_index)
            .collect();
        assert_eq!(ivsd, vec![0, 1]);
    }

    #[test]
    fn test_generated_uids_are_distinct() {
        let a = generate_uid();
        assert!(a.starts_with("2.25."));
        assert!(a.len() <= 64);
        assert_ne!(a, generate_uid());
    }
}
