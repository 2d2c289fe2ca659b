use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::GexError;

/// Maximum length of a sample name. Longer names are rejected.
pub const SAMPLE_NAME_LEN: usize = 50;

/// Maximum length of a stored data value. Longer values are truncated.
pub const DATA_VALUE_LEN: usize = 50;

/// An identifier paired with the system code of the datasource it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Xref {
    id: String,
    code: String,
}

impl Xref {
    pub fn new(id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for Xref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.code)
    }
}

impl FromStr for Xref {
    type Err = GexError;

    // Identifiers may carry their own colons (CHEBI:15377), so the code is the
    // last segment.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (id, code) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| GexError::InvalidXref(value.to_string()))?;
        let id = id.trim();
        let code = code.trim();
        if id.is_empty() || code.is_empty() {
            return Err(GexError::InvalidXref(value.to_string()));
        }
        Ok(Self::new(id, code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    Numeric,
    Text,
}

impl SampleType {
    // Stored codes follow the JDBC type constants older stores were written with.
    const REAL: i64 = 7;
    const CHAR: i64 = 1;

    pub fn code(self) -> i64 {
        match self {
            SampleType::Numeric => Self::REAL,
            SampleType::Text => Self::CHAR,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, GexError> {
        match code {
            Self::REAL => Ok(SampleType::Numeric),
            Self::CHAR => Ok(SampleType::Text),
            other => Err(GexError::UnknownSampleType(other)),
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleType::Numeric => write!(f, "numeric"),
            SampleType::Text => write!(f, "text"),
        }
    }
}

/// One experimental condition, i.e. one data column of the imported file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Sample {
    pub id: i32,
    pub name: String,
    pub data_type: SampleType,
}

impl Sample {
    pub fn new(id: i32, name: impl Into<String>, data_type: SampleType) -> Self {
        Self {
            id,
            name: name.into(),
            data_type,
        }
    }
}

/// A measurement as read back from the store: numeric when the raw text parses
/// as a number, text otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SampleValue {
    Number(f64),
    Text(String),
}

impl SampleValue {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(number) => SampleValue::Number(number),
            Err(_) => SampleValue::Text(raw.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            SampleValue::Number(number) => Some(*number),
            SampleValue::Text(_) => None,
        }
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleValue::Number(number) => write!(f, "{number}"),
            SampleValue::Text(text) => write!(f, "{text}"),
        }
    }
}

/// Cuts `value` down to at most `max` characters, respecting char boundaries.
pub fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
