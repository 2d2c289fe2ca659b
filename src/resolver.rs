use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use crate::domain::Xref;
use crate::error::GexError;

/// Datasource codes that actually occur in a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasourceFilter(BTreeSet<String>);

impl DatasourceFilter {
    pub fn new(codes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(codes.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Cross-reference lookup service.
///
/// `map_id` returns identifiers equivalent to `xref` in other datasources.
pub trait IdMapper {
    fn is_connected(&self) -> bool;
    fn map_id(&self, xref: &Xref) -> Result<HashSet<Xref>, GexError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing worth querying for this identifier. Not an error.
    Skip,
    Targets(BTreeSet<Xref>),
}

/// Picks the identifiers worth querying for `source`: the source itself when
/// its datasource is in the store, plus every mapped identifier whose
/// datasource is.
pub fn resolve(
    source: &Xref,
    filter: &DatasourceFilter,
    mapper: &dyn IdMapper,
) -> Result<Resolution, GexError> {
    let mut targets = BTreeSet::new();
    if filter.contains(source.code()) {
        targets.insert(source.clone());
    }

    if mapper.is_connected() {
        targets.extend(
            mapper
                .map_id(source)?
                .into_iter()
                .filter(|xref| filter.contains(xref.code())),
        );
    }

    if targets.is_empty() {
        Ok(Resolution::Skip)
    } else {
        Ok(Resolution::Targets(targets))
    }
}
