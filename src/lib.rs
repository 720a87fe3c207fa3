//! # PharmaGuard
//!
//! A deterministic pharmacogenomic decision pipeline. Variant calls from a VCF
//! file are turned into star alleles, diplotypes and metabolizer phenotypes, and
//! every requested drug is resolved to a risk label, severity and dosing
//! recommendation from static lookup tables.
//!
//! ## Features
//!
//! - VCF extraction for CYP2C19, CYP2C9, CYP2D6, DPYD, SLCO1B1 and TPMT
//! - Most-specific star-allele matching and CPIC-style diplotype composition
//! - CYP2D6 activity-score phenotyping with coverage-based confidence
//! - Optional narrative generation and literature search behind traits, with
//!   a deterministic fallback
//! - Multi-threaded batch analysis with JSON, CSV, TSV and HTML reports

pub mod analysis;
pub mod config;
pub mod discovery;
pub mod error;
pub mod narrative;
pub mod output;
pub mod parsers;
pub mod tables;
pub mod types;

// Re-export key types
pub use analysis::{AnalysisReport, DrugFailure, PharmacogenomicAnalyzer};
pub use config::Settings;
pub use discovery::FileDiscovery;
pub use error::{AnalysisError, InputError, TableError};
pub use narrative::{ContextSearch, NarrativeGenerator, Narrator};
pub use output::{ReportFormat, ReportGenerator};
pub use parsers::VcfParser;
pub use tables::KnowledgeBase;
pub use types::*;
