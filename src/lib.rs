//! # srwatch
//!
//! Measurement ingestion for structured-report documents.
//!
//! srwatch watches an inbox directory for structured reports (DICOM Part 10
//! files, or the DICOM JSON model), flattens each report's content tree into
//! numeric measurement records, upserts them idempotently into SQLite,
//! archives the source file with a retention window, and serves the stored
//! values over a small HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌────────┐   ┌───────────┐   ┌────────┐   ┌──────────┐
//! │  Inbox  │──▶│ Reader │──▶│ Extractor │──▶│ Store  │──▶│ Archiver │
//! │ (poll)  │   │ +retry │   │ pre-order │   │ SQLite │   │ +purge   │
//! └─────────┘   └────────┘   └───────────┘   └───┬────┘   └──────────┘
//!                                                │
//!                                  ┌─────────────┤
//!                                  ▼             ▼
//!                             ┌─────────┐   ┌─────────┐
//!                             │   CLI   │   │  HTTP   │
//!                             │  (get)  │   │ (query) │
//!                             └─────────┘   └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! srwatch init                       # create database
//! srwatch sample ./inbox             # drop a synthetic report
//! srwatch run                        # watch the inbox and serve queries
//! srwatch get 2.25.1234              # inspect one document
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and env overrides |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`traits`] | Document parser extension point |
//! | [`dicom_file`] | DICOM Part 10 structured-report parser |
//! | [`dicom_json`] | DICOM JSON structured-report parser |
//! | [`reader`] | Bounded-retry document reads |
//! | [`extract`] | Content tree flattening |
//! | [`identity`] | Document identifier and metadata resolution |
//! | [`store`] | Idempotent measurement upserts |
//! | [`archive`] | Archive, reject, and retention purge |
//! | [`ingest`] | Per-file pipeline |
//! | [`watcher`] | Inbox polling and worker pool |
//! | [`query`] | Measurement lookup |
//! | [`server`] | Query HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod archive;
pub mod config;
pub mod db;
pub mod dicom_file;
pub mod dicom_json;
pub mod error;
pub mod extract;
pub mod get;
pub mod identity;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod query;
pub mod reader;
pub mod sample;
pub mod server;
pub mod store;
pub mod traits;
pub mod watcher;
