use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::GexError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-gex.json";

/// Import job description as written in `kira-gex.json`.
///
/// Rows are 1-based, columns 0-based.
#[derive(Debug, Deserialize, Serialize)]
pub struct ImportConfig {
    pub source: String,
    pub store: String,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub header_row: Option<usize>,
    #[serde(default)]
    pub first_data_row: Option<usize>,
    #[serde(default)]
    pub no_header: bool,
    #[serde(default)]
    pub id_column: Option<usize>,
    #[serde(default)]
    pub code_column: Option<usize>,
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub string_columns: Vec<usize>,
    #[serde(default)]
    pub archive: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedImport {
    pub source: Utf8PathBuf,
    pub store: Utf8PathBuf,
    pub delimiter: String,
    pub header_row: usize,
    pub first_data_row: usize,
    pub no_header: bool,
    pub id_column: usize,
    /// False when `id_column` fell back to its default and may be guessed.
    pub id_column_configured: bool,
    pub code_column: Option<usize>,
    pub data_source: Option<String>,
    pub string_columns: BTreeSet<usize>,
    pub archive: bool,
}

impl ResolvedImport {
    pub fn is_string_column(&self, column: usize) -> bool {
        self.string_columns.contains(&column)
    }

    /// Whether `column` holds sample data rather than the identifier or code.
    pub fn is_data_column(&self, column: usize) -> bool {
        column != self.id_column && Some(column) != self.code_column
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedImport, GexError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(GexError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GexError::ConfigRead(config_path.clone()))?;
        let config: ImportConfig =
            serde_json::from_str(&content).map_err(|err| GexError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: ImportConfig) -> Result<ResolvedImport, GexError> {
        let delimiter = config.delimiter.unwrap_or_else(|| "\t".to_string());
        if delimiter.is_empty() {
            return Err(GexError::ConfigParse("delimiter must not be empty".to_string()));
        }

        let header_row = config.header_row.unwrap_or(1);
        let first_data_row = config
            .first_data_row
            .unwrap_or(if config.no_header { 1 } else { header_row + 1 });
        if header_row == 0 || first_data_row == 0 {
            return Err(GexError::ConfigParse("rows are numbered from 1".to_string()));
        }
        if !config.no_header && first_data_row <= header_row {
            return Err(GexError::ConfigParse(format!(
                "first data row {first_data_row} must come after header row {header_row}"
            )));
        }

        let id_column = config.id_column.unwrap_or(0);
        if config.code_column == Some(id_column) {
            return Err(GexError::ConfigParse(
                "identifier and system code must be different columns".to_string(),
            ));
        }

        let data_source = config
            .data_source
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty());

        Ok(ResolvedImport {
            source: Utf8PathBuf::from(config.source),
            store: Utf8PathBuf::from(config.store),
            delimiter,
            header_row,
            first_data_row,
            no_header: config.no_header,
            id_column,
            id_column_configured: config.id_column.is_some(),
            code_column: config.code_column,
            data_source,
            string_columns: config.string_columns.into_iter().collect(),
            archive: config.archive,
        })
    }
}
