//! Document lookup for the command line.
//!
//! Prints the same key/value view the query service returns, plus the
//! document metadata stored alongside each row.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::query;
use crate::store::MeasurementStore;

/// CLI entry point: prints one document's measurements to stdout.
pub async fn run_get(config: &Config, document_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = MeasurementStore::new(pool.clone());

    let values = match query::get_measurements(&store, document_id).await {
        Ok(values) => values,
        Err(e) => {
            pool.close().await;
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let rows = store.measurements_for(document_id).await?;
    pool.close().await;

    println!("--- Document ---");
    println!("document_id:      {}", document_id);
    if let Some(first) = rows.first() {
        println!("provider:         {}", first.provider);
        println!(
            "patient_id:       {}",
            first.patient_id.as_deref().unwrap_or("(none)")
        );
        println!(
            "exam_id:          {}",
            first.exam_id.as_deref().unwrap_or("(none)")
        );
        println!(
            "acquisition_time: {}",
            first.acquisition_time.as_deref().unwrap_or("(none)")
        );
    }
    println!();

    println!("--- Measurements ({}) ---", values.len());
    for row in &rows {
        let key = format!("{}_{}", row.measurement_code, row.result_index);
        if let Some(value) = values.get(&key) {
            println!("{:<24} {:<12} {}", key, value, row.measurement_name);
        }
    }

    Ok(())
}
