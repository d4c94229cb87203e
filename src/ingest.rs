//! Per-file ingestion pipeline.
//!
//! Drives one file through `Reading → Extracting → Storing → Archiving`.
//! Any failure before archiving moves the file to the rejection directory;
//! a failed archive move after a successful store leaves the file in the
//! inbox, where the next scan picks it up again (the store is idempotent).

use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::Archiver;
use crate::config::{Config, DocumentFormat};
use crate::db;
use crate::dicom_file::DicomFileParser;
use crate::dicom_json::DicomJsonParser;
use crate::error::IngestError;
use crate::extract::{extract, ExtractOptions};
use crate::identity::{document_meta, resolve_document_id, IdentifierSource};
use crate::migrate;
use crate::reader::Reader;
use crate::store::MeasurementStore;
use crate::traits::DocumentParser;

/// Lifecycle stage of a file inside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Detected,
    Reading,
    Extracting,
    Storing,
    Archiving,
    Done,
    Rejected,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Detected => "detected",
            Stage::Reading => "reading",
            Stage::Extracting => "extracting",
            Stage::Storing => "storing",
            Stage::Archiving => "archiving",
            Stage::Done => "done",
            Stage::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// How a single file left the pipeline.
#[derive(Debug)]
pub enum FileOutcome {
    /// Stored and moved to the archive.
    Archived {
        document_id: String,
        measurements: u64,
        archived_to: PathBuf,
    },
    /// Unusable. `moved_to` is `None` when the move itself failed and the
    /// file is still in the inbox.
    Rejected {
        reason: IngestError,
        failed_at: Stage,
        moved_to: Option<PathBuf>,
    },
    /// Stored, but the archive move failed; the file stays in the inbox.
    Deferred {
        document_id: String,
        measurements: u64,
        reason: IngestError,
    },
}

impl FileOutcome {
    pub fn stage(&self) -> Stage {
        match self {
            FileOutcome::Archived { .. } => Stage::Done,
            FileOutcome::Rejected { .. } => Stage::Rejected,
            FileOutcome::Deferred { .. } => Stage::Archiving,
        }
    }

    pub fn is_archived(&self) -> bool {
        matches!(self, FileOutcome::Archived { .. })
    }
}

struct Stored {
    document_id: String,
    measurements: u64,
}

pub struct Pipeline {
    reader: Reader,
    extract_options: ExtractOptions,
    identifiers: Vec<IdentifierSource>,
    provider: String,
    store: Arc<MeasurementStore>,
    archiver: Archiver,
}

impl Pipeline {
    pub fn new(
        reader: Reader,
        extract_options: ExtractOptions,
        identifiers: Vec<IdentifierSource>,
        provider: impl Into<String>,
        store: Arc<MeasurementStore>,
        archiver: Archiver,
    ) -> Self {
        Self {
            reader,
            extract_options,
            identifiers,
            provider: provider.into(),
            store,
            archiver,
        }
    }

    /// Builds the canonical pipeline: the parser for the inbox format plus
    /// configured retry, extraction, identity, and directory settings.
    pub fn from_config(config: &Config, store: Arc<MeasurementStore>) -> Self {
        Self::new(
            Reader::new(parser_for(config), config.retry_policy()),
            config.extract_options(),
            config.pipeline.identifier_fallbacks.clone(),
            config.pipeline.provider.clone(),
            store,
            Archiver::new(&config.archive.path, &config.archive.rejected_path),
        )
    }

    pub fn store(&self) -> &Arc<MeasurementStore> {
        &self.store
    }

    pub fn archiver(&self) -> &Archiver {
        &self.archiver
    }

    /// Runs one file to completion. Never fails: every error becomes an
    /// outcome.
    pub async fn process(&self, path: &Path) -> FileOutcome {
        tracing::info!(path = %path.display(), stage = %Stage::Detected, "processing file");

        let stored = match self.ingest(path).await {
            Ok(stored) => stored,
            Err((reason, failed_at)) => return self.reject(path, reason, failed_at).await,
        };

        tracing::debug!(path = %path.display(), stage = %Stage::Archiving, "archiving");
        let archiver = self.archiver.clone();
        let src = path.to_path_buf();
        let moved = tokio::task::spawn_blocking(move || archiver.archive(&src))
            .await
            .unwrap_or_else(|e| Err(std::io::Error::other(e)));

        match moved {
            Ok(archived_to) => {
                tracing::info!(
                    document_id = %stored.document_id,
                    measurements = stored.measurements,
                    archived_to = %archived_to.display(),
                    stage = %Stage::Done,
                    "stored and archived"
                );
                FileOutcome::Archived {
                    document_id: stored.document_id,
                    measurements: stored.measurements,
                    archived_to,
                }
            }
            Err(e) => {
                let reason = IngestError::ArchiveMove(e);
                tracing::warn!(
                    path = %path.display(),
                    document_id = %stored.document_id,
                    error = %reason,
                    "stored but not archived; will retry on next scan"
                );
                FileOutcome::Deferred {
                    document_id: stored.document_id,
                    measurements: stored.measurements,
                    reason,
                }
            }
        }
    }

    async fn ingest(&self, path: &Path) -> Result<Stored, (IngestError, Stage)> {
        let doc = self
            .reader
            .read(path)
            .await
            .map_err(|e| (IngestError::from(e), Stage::Reading))?;

        let document_id = resolve_document_id(&doc.header, &self.identifiers)
            .ok_or((IngestError::MissingDocumentIdentifier, Stage::Reading))?;

        let records = extract(&doc.root, &self.extract_options)
            .map_err(|e| (IngestError::from(e), Stage::Extracting))?;
        if records.is_empty() {
            return Err((IngestError::NoMeasurementsExtracted, Stage::Extracting));
        }
        tracing::debug!(
            document_id = %document_id,
            records = records.len(),
            stage = %Stage::Storing,
            "extracted measurements"
        );

        let meta = document_meta(document_id, &self.provider, &doc.header);
        let measurements = self
            .store
            .upsert(&meta, &records)
            .await
            .map_err(|e| (IngestError::from(e), Stage::Storing))?;

        Ok(Stored {
            document_id: meta.document_id,
            measurements,
        })
    }

    async fn reject(&self, path: &Path, reason: IngestError, failed_at: Stage) -> FileOutcome {
        let archiver = self.archiver.clone();
        let src = path.to_path_buf();
        let moved = tokio::task::spawn_blocking(move || archiver.reject(&src))
            .await
            .unwrap_or_else(|e| Err(std::io::Error::other(e)));

        let moved_to = match moved {
            Ok(dest) => {
                tracing::warn!(
                    path = %path.display(),
                    kind = reason.kind(),
                    failed_at = %failed_at,
                    error = %reason,
                    moved_to = %dest.display(),
                    "rejected file"
                );
                Some(dest)
            }
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    kind = reason.kind(),
                    error = %reason,
                    move_error = %e,
                    "rejected file could not be moved aside"
                );
                None
            }
        };

        FileOutcome::Rejected {
            reason,
            failed_at,
            moved_to,
        }
    }
}

fn parser_for(config: &Config) -> Arc<dyn DocumentParser> {
    let max_depth = config.pipeline.max_depth;
    match config.inbox.format {
        DocumentFormat::Dicom => Arc::new(DicomFileParser::new(max_depth)),
        DocumentFormat::DicomJson => Arc::new(DicomJsonParser::new(max_depth)),
    }
}

/// CLI entry point: runs each file through the pipeline once and prints a
/// summary.
pub async fn run_ingest(config: &Config, files: &[PathBuf]) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = Arc::new(MeasurementStore::new(pool.clone()));
    let pipeline = Pipeline::from_config(config, store);

    let mut archived = 0u64;
    let mut rejected = 0u64;
    let mut deferred = 0u64;
    let mut measurements = 0u64;

    for file in files {
        match pipeline.process(file).await {
            FileOutcome::Archived {
                document_id,
                measurements: n,
                ..
            } => {
                println!("  {} -> {} ({} measurements)", file.display(), document_id, n);
                archived += 1;
                measurements += n;
            }
            FileOutcome::Rejected { reason, .. } => {
                println!("  {} rejected: {}", file.display(), reason);
                rejected += 1;
            }
            FileOutcome::Deferred { reason, .. } => {
                println!("  {} stored, not archived: {}", file.display(), reason);
                deferred += 1;
            }
        }
    }

    println!("ingest");
    println!("  files: {}", files.len());
    println!("  archived: {}", archived);
    println!("  rejected: {}", rejected);
    println!("  deferred: {}", deferred);
    println!("  measurements written: {}", measurements);
    println!("ok");

    pool.close().await;
    Ok(())
}
