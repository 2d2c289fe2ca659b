use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GexError {
    #[error("invalid identifier: {0}")]
    InvalidXref(String),

    #[error("sample name can't be longer than {max} chars: {name}")]
    InvalidSampleName { name: String, max: usize },

    #[error("unknown sample data type: {0}")]
    UnknownSampleType(i64),

    #[error("failed to create expression store schema: {0}")]
    Schema(String),

    #[error("expression store query failed: {0}")]
    StoreQuery(String),

    #[error("identifier mapping failed: {0}")]
    IdMapping(String),

    #[error("missing config file kira-gex.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("store archive error: {0}")]
    Archive(String),

    #[error("import failed: {0}")]
    Import(String),
}

impl GexError {
    pub(crate) fn query(err: rusqlite::Error) -> Self {
        GexError::StoreQuery(err.to_string())
    }

    pub(crate) fn schema(err: rusqlite::Error) -> Self {
        GexError::Schema(err.to_string())
    }
}
