use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid taxonomy id: {0}")]
    InvalidTaxonId(String),

    #[error("invalid taxonomy rank: {0}")]
    InvalidRank(String),

    #[error("invalid taxonomy tree: {0}")]
    InvalidTaxonomyTree(String),

    #[error("invalid accession pattern: {0}")]
    InvalidAccessionPattern(String),

    #[error("missing config file kira-mp.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read input file {path}: {message}")]
    InputRead { path: String, message: String },

    #[error("failed to parse input file {path}: {message}")]
    InputParse { path: String, message: String },

    #[error("no db search or de novo data supplied")]
    #[diagnostic(help("add at least one db search or de novo file to the import"))]
    NoMetaproteomicsData,

    #[error("no annotation source supplied, missing: {}", .missing.join(", "))]
    #[diagnostic(help("add a taxonomy map, a function map or enable global sequence lookup"))]
    MissingAnnotationSource { missing: Vec<String> },

    #[error("{component} format {found} conflicts with project format {established}")]
    FormatIncompatible {
        component: String,
        established: String,
        found: String,
    },

    #[error("sample not found in project: {0}")]
    SampleNotFound(String),

    #[error("sequence lookup failed: {0}")]
    LookupFailed(String),

    #[error("project table lock poisoned")]
    ProjectLock,
}
