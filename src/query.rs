//! Read-only measurement lookup.
//!
//! Shared by the `srwatch get` CLI command and the HTTP query service.
//! Values are keyed `"{measurement_code}_{result_index}"`; integral values
//! are rendered as JSON integers, everything else as floats.

use serde::Serialize;
use serde_json::Number;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::QueryError;
use crate::store::MeasurementStore;

/// Static descriptor identifying this data provider to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompatibilityInfo {
    pub uid: String,
    pub version: i32,
}

pub fn compatibility(config: &Config) -> CompatibilityInfo {
    CompatibilityInfo {
        uid: config
            .server
            .compatibility_uid
            .clone()
            .unwrap_or_else(|| config.pipeline.provider.clone()),
        version: config.server.compatibility_version,
    }
}

/// Looks up every stored measurement of `document_id`.
pub async fn get_measurements(
    store: &MeasurementStore,
    document_id: &str,
) -> Result<BTreeMap<String, Number>, QueryError> {
    let rows = store.measurements_for(document_id).await?;
    if rows.is_empty() {
        return Err(QueryError::NotFound(document_id.to_string()));
    }

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let key = format!("{}_{}", row.measurement_code, row.result_index);
            render_number(row.value).map(|n| (key, n))
        })
        .collect())
}

/// Renders integral values as integers. Non-finite values have no JSON form.
pub fn render_number(value: f64) -> Option<Number> {
    const I64_BOUND: f64 = 9_223_372_036_854_775_808.0; // 2^63
    if value.fract() == 0.0 && value >= -I64_BOUND && value < I64_BOUND {
        Some(Number::from(value as i64))
    } else {
        Number::from_f64(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use crate::models::{DocumentMeta, MeasurementRecord};
    use tempfile::TempDir;

    #[test]
    fn test_render_number() {
        assert_eq!(render_number(2.5).unwrap().to_string(), "2.5");
        assert_eq!(render_number(3.0).unwrap().to_string(), "3");
        assert_eq!(render_number(-12.0).unwrap().to_string(), "-12");
        assert!(render_number(3.0).unwrap().is_i64());
        assert!(render_number(f64::NAN).is_none());
        assert!(render_number(1e300).unwrap().is_f64());
    }

    #[test]
    fn test_compatibility_defaults_to_provider() {
        let mut config = Config::default();
        config.pipeline.provider = "EchoLab".to_string();
        assert_eq!(
            compatibility(&config),
            CompatibilityInfo {
                uid: "EchoLab".into(),
                version: 1
            }
        );

        config.server.compatibility_uid = Some("Other".into());
        assert_eq!(compatibility(&config).uid, "Other");
    }

    #[tokio::test]
    async fn test_get_measurements() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("q.sqlite")).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        let store = MeasurementStore::new(pool);

        let meta = DocumentMeta {
            document_id: "1.2.3".into(),
            provider: "Echo".into(),
            patient_id: None,
            exam_id: None,
            acquisition_time: None,
        };
        let records = vec![
            MeasurementRecord {
                measurement_code: "56845-4".into(),
                measurement_name: "AVA".into(),
                result_index: 0,
                value: 2.5,
            },
            MeasurementRecord {
                measurement_code: "8867-4".into(),
                measurement_name: "Heart rate".into(),
                result_index: 0,
                value: 72.0,
            },
        ];
        store.upsert(&meta, &records).await.unwrap();

        let values = get_measurements(&store, "1.2.3").await.unwrap();
        assert_eq!(
            serde_json::to_value(&values).unwrap(),
            serde_json::json!({ "56845-4_0": 2.5, "8867-4_0": 72 })
        );

        let err = get_measurements(&store, "unknown").await.unwrap_err();
        assert!(matches!(err, QueryError::NotFound(id) if id == "unknown"));
    }
}
