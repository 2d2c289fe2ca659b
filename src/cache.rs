use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{Sample, Xref};
use crate::error::GexError;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::reporter::ReporterData;
use crate::resolver::{DatasourceFilter, IdMapper, Resolution, resolve};
use crate::samples::Samples;
use crate::store::{ExpressionStore, GroupScan};

/// Reporter records per source identifier.
///
/// An entry with an empty list means the identifier was resolved and nothing in
/// the store matched it.
#[derive(Debug, Clone, Default)]
pub struct DataCache {
    entries: HashMap<Xref, Vec<ReporterData>>,
}

impl DataCache {
    pub fn has_data(&self, xref: &Xref) -> bool {
        self.entries.contains_key(xref)
    }

    /// Whether several reporters in the store map to this identifier.
    pub fn has_multiple_data(&self, xref: &Xref) -> bool {
        self.entries.get(xref).is_some_and(|rows| rows.len() > 1)
    }

    pub fn get(&self, xref: &Xref) -> Option<&[ReporterData]> {
        self.entries.get(xref).map(Vec::as_slice)
    }

    pub fn single_data(&self, xref: &Xref) -> Option<&ReporterData> {
        self.entries.get(xref).and_then(|rows| rows.first())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn insert(&mut self, xref: Xref, rows: Vec<ReporterData>) {
        self.entries.insert(xref, rows);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop the batch on the first failing identifier.
    #[default]
    Abort,
    /// Log the failure, leave the identifier uncached and go on.
    Continue,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoaderOptions {
    pub on_error: ErrorPolicy,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheReport {
    pub processed: usize,
    pub loaded: usize,
    pub skipped: usize,
    pub unresolved: Vec<Xref>,
    pub failed: Vec<Xref>,
    pub cancelled: bool,
}

/// A store together with the reporter cache built on top of it.
///
/// The context borrows its store, so switching stores means building a new
/// context, which drops the cache along with the old registry and filter.
/// Not internally synchronized: drive it from one task at a time.
pub struct CacheContext<'s> {
    store: &'s ExpressionStore,
    cache: DataCache,
    options: LoaderOptions,
}

impl<'s> CacheContext<'s> {
    pub fn new(store: &'s ExpressionStore) -> Self {
        Self::with_options(store, LoaderOptions::default())
    }

    pub fn with_options(store: &'s ExpressionStore, options: LoaderOptions) -> Self {
        Self {
            store,
            cache: DataCache::default(),
            options,
        }
    }

    pub fn store(&self) -> &'s ExpressionStore {
        self.store
    }

    pub fn cache(&self) -> &DataCache {
        &self.cache
    }

    pub fn samples(&self) -> Result<&'s Samples, GexError> {
        self.store.samples()
    }

    pub fn ordered_samples(&self) -> Result<Vec<&'s Sample>, GexError> {
        self.store.ordered_samples()
    }

    pub fn used_datasources(&self) -> Result<&'s DatasourceFilter, GexError> {
        self.store.used_datasources()
    }

    pub fn data<'a>(
        &self,
        dest_refs: impl IntoIterator<Item = &'a Xref>,
    ) -> Result<Vec<ReporterData>, GexError> {
        self.store.data(dest_refs)
    }

    pub fn scan(&self) -> Result<GroupScan<'s>, GexError> {
        self.store.scan()
    }

    pub fn cached_data(&self, xref: &Xref) -> Option<&[ReporterData]> {
        self.cache.get(xref)
    }

    /// One summary record over all cached reporters of `xref`.
    pub fn averaged(&self, xref: &Xref) -> Result<Option<ReporterData>, GexError> {
        let Some(rows) = self.cache.get(xref) else {
            return Ok(None);
        };
        Ok(ReporterData::summarize(rows, self.store.samples()?))
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Resolves and caches the reporter records of each source identifier.
    ///
    /// Identifiers already in the cache are not looked up again. Records are
    /// stored under the source identifier, whichever datasource matched. One
    /// unit of progress is reported per identifier, and cancellation is checked
    /// after each; a cancelled batch returns `Ok` with the cache holding what
    /// was loaded so far.
    pub fn cache_data(
        &mut self,
        source_refs: &[Xref],
        sink: &dyn ProgressSink,
        mapper: &dyn IdMapper,
    ) -> Result<CacheReport, GexError> {
        let started = Instant::now();
        let store = self.store;
        store.samples()?;
        let filter = store.used_datasources()?;

        let total = source_refs.len();
        let per_identifier = if total == 0 {
            0
        } else {
            sink.total_work() / total as u64
        };
        sink.event(ProgressEvent {
            message: format!("phase=Cache; loading {total} identifiers"),
            elapsed: None,
        });
        info!(identifiers = total, "cache started");

        let mut report = CacheReport::default();
        for source in source_refs {
            if self.cache.has_data(source) {
                report.skipped += 1;
            } else {
                match self.load(source, filter, mapper) {
                    Ok(Some(rows)) => {
                        debug!(source = %source, records = rows.len(), "cached expression data");
                        report.loaded += 1;
                        self.cache.insert(source.clone(), rows);
                    }
                    Ok(None) => {
                        debug!(source = %source, "no relevant identifiers");
                        report.unresolved.push(source.clone());
                        self.cache.insert(source.clone(), Vec::new());
                    }
                    Err(err) => match self.options.on_error {
                        ErrorPolicy::Abort => return Err(err),
                        ErrorPolicy::Continue => {
                            warn!(source = %source, %err, "while caching expression data");
                            report.failed.push(source.clone());
                        }
                    },
                }
            }
            report.processed += 1;
            sink.worked(per_identifier);

            if sink.is_cancelled() {
                report.cancelled = true;
                info!(
                    processed = report.processed,
                    total,
                    "cache cancelled"
                );
                return Ok(report);
            }
        }

        let elapsed = started.elapsed();
        sink.event(ProgressEvent {
            message: format!("phase=Cache; cached {} identifiers", report.processed),
            elapsed: Some(elapsed),
        });
        sink.finished();
        info!(
            identifiers = total,
            loaded = report.loaded,
            elapsed_ms = elapsed.as_millis() as u64,
            "cache stopped"
        );
        Ok(report)
    }

    fn load(
        &self,
        source: &Xref,
        filter: &DatasourceFilter,
        mapper: &dyn IdMapper,
    ) -> Result<Option<Vec<ReporterData>>, GexError> {
        match resolve(source, filter, mapper)? {
            Resolution::Skip => Ok(None),
            Resolution::Targets(targets) => self.store.data(&targets).map(Some),
        }
    }
}
