use std::collections::{HashMap, HashSet};
use std::fs;

use camino::Utf8Path;
use tracing::{debug, warn};

use crate::domain::Xref;
use crate::error::GexError;
use crate::resolver::IdMapper;

/// Id mapper backed by a text file of equivalence classes.
///
/// Each non-empty line lists mutually equivalent identifiers as tab-separated
/// `id:code` tokens. Lines starting with `#` are ignored. Identifiers on
/// several lines end up equivalent to the union of those lines.
#[derive(Debug, Clone, Default)]
pub struct TsvIdMapper {
    classes: Vec<Vec<Xref>>,
    index: HashMap<Xref, Vec<usize>>,
}

impl TsvIdMapper {
    pub fn load(path: &Utf8Path) -> Result<Self, GexError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| GexError::Filesystem(format!("read mapping {path}: {err}")))?;
        let mapper = Self::parse(&content);
        debug!(path = %path, classes = mapper.classes.len(), "loaded identifier mapping");
        Ok(mapper)
    }

    pub fn parse(content: &str) -> Self {
        let mut mapper = Self::default();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut class = Vec::new();
            for token in line.split('\t').filter(|token| !token.trim().is_empty()) {
                match token.parse::<Xref>() {
                    Ok(xref) => class.push(xref),
                    Err(err) => warn!(line = line_no + 1, %err, "skipping mapping token"),
                }
            }
            let idx = mapper.classes.len();
            for xref in &class {
                mapper.index.entry(xref.clone()).or_default().push(idx);
            }
            mapper.classes.push(class);
        }
        mapper
    }
}

impl IdMapper for TsvIdMapper {
    fn is_connected(&self) -> bool {
        true
    }

    fn map_id(&self, xref: &Xref) -> Result<HashSet<Xref>, GexError> {
        let mut result = HashSet::new();
        for &idx in self.index.get(xref).into_iter().flatten() {
            result.extend(self.classes[idx].iter().filter(|other| *other != xref).cloned());
        }
        Ok(result)
    }
}

/// Stand-in when no mapping service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisconnectedMapper;

impl IdMapper for DisconnectedMapper {
    fn is_connected(&self) -> bool {
        false
    }

    fn map_id(&self, _xref: &Xref) -> Result<HashSet<Xref>, GexError> {
        Ok(HashSet::new())
    }
}
