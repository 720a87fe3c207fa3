use std::path::PathBuf;
use thiserror::Error;

/// Failures while loading the lookup tables. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {table} table: {source}")]
    Json {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{table} table names unsupported gene '{gene}'")]
    UnknownGene { table: &'static str, gene: String },

    #[error("{table} table: allele label '{label}' for {gene} does not start with '*'")]
    InvalidAlleleLabel {
        table: &'static str,
        gene: String,
        label: String,
    },

    #[error("{table} table: {detail}")]
    InvalidEntry { table: &'static str, detail: String },

    #[error("phenotype table has no activity_scores block for CYP2D6")]
    MissingActivityScores,

    #[error("activity score for {allele} is negative ({score})")]
    NegativeActivityScore { allele: String, score: f64 },

    #[error("drug rule table lists '{drug}' more than once under {gene}")]
    DuplicateDrug { gene: String, drug: String },

    #[error("drug rule table is empty")]
    EmptyDrugRules,
}

/// Boundary validation failures for an uploaded variant file or drug list
#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("Invalid file type: {0} must have a .vcf extension")]
    InvalidFileType(String),

    #[error("File size exceeds limit: {size} bytes (maximum {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("File encoding error: file must be UTF-8 encoded")]
    InvalidEncoding,

    #[error("Invalid VCF format: no ##fileformat=VCF header in the first {0} lines")]
    InvalidVcfFormat(usize),

    #[error("Drug name is required")]
    InvalidDrug,
}

impl InputError {
    pub fn code(&self) -> &'static str {
        match self {
            InputError::InvalidFileType(_) => "INVALID_FILE_TYPE",
            InputError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            InputError::InvalidEncoding => "INVALID_ENCODING",
            InputError::InvalidVcfFormat(_) => "INVALID_VCF_FORMAT",
            InputError::InvalidDrug => "INVALID_DRUG",
        }
    }
}

/// Per-drug analysis failures. One failing drug never aborts its siblings.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    #[error("Drug '{drug}' is not supported")]
    UnsupportedDrug { drug: String, supported: Vec<String> },
}

impl AnalysisError {
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::UnsupportedDrug { .. } => "UNSUPPORTED_DRUG",
        }
    }

    pub fn details(&self) -> String {
        match self {
            AnalysisError::UnsupportedDrug { supported, .. } => {
                format!("Supported drugs: {}", supported.join(", "))
            }
        }
    }
}
