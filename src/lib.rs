//! # Heimdall-RS: Performance-Regression Sentinel
//!
//! A Rust implementation of a step-level performance-regression sentinel for
//! behaviour-driven test telemetry, designed for deterministic analysis and
//! safe coordination across parallel CI jobs. This library provides:
//!
//! - **Statistical Analysis**: rolling baselines, regression classification,
//!   and windowed trend (drift) detection per test step
//! - **Suite Intelligence**: suite roll-ups, health scoring, and suite-level
//!   regression detection against historical averages
//! - **Layered Configuration**: defaults, user files, environments, profiles,
//!   CLI overrides, and environment-variable interpolation
//! - **Pluggable Storage**: filesystem, object-store, and document-database
//!   adapters behind one contract, with job coordination and retention
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        CLI Layer                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Core Engine   │   Config     │         Storage             │
//! │                │              │                             │
//! │ • Stats        │ • Layering   │ • Filesystem adapter        │
//! │ • Classifier   │ • Profiles   │ • Object-store adapter      │
//! │ • Engine       │ • Effective  │ • Document-store adapter    │
//! │ • Reports      │   resolution │ • Service / Coordinator     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use heimdall_rs::core::config::HeimdallConfig;
//! use heimdall_rs::core::engine::AnalysisEngine;
//! use heimdall_rs::core::history::HistoryDocument;
//!
//! let config = HeimdallConfig::default();
//! let engine = AnalysisEngine::new(&config);
//! let outcome = engine.analyze(&[], &HistoryDocument::default(), chrono::Utc::now());
//! println!("overall health: {}", outcome.report.metadata.overall_health);
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

// Core analysis modules
pub mod core {
    //! Core analysis algorithms and data structures.

    pub mod classify;
    pub mod config;
    pub mod engine;
    pub mod errors;
    pub mod history;
    pub mod report;
    pub mod stats;
    pub mod telemetry;
}

// Storage adapters and job coordination
pub mod storage {
    //! Storage contract, concrete adapters, and multi-job coordination.

    pub mod coordinator;
    pub mod document;
    pub mod filesystem;
    pub mod object;
    pub mod retention;
    pub mod service;

    mod contract;

    pub use contract::{
        AdapterKind, AggregatedResults, HealthState, HealthStatus, JobRecord, JobStatus,
        JobStatusSnapshot, RunDocument, StorageAdapter, WaitOptions, WaitOutcome,
    };
}

// Re-export primary types for convenience
pub use crate::core::config::HeimdallConfig;
pub use crate::core::engine::{AnalysisEngine, AnalysisOutcome};
pub use crate::core::errors::{HeimdallError, Result, ResultExt};
pub use crate::core::report::Report;
pub use crate::storage::service::StorageService;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
