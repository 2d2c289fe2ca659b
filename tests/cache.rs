use std::cell::Cell;
use std::collections::HashSet;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_expression_cache::cache::{CacheContext, ErrorPolicy, LoaderOptions};
use kira_expression_cache::connector::SqliteConnector;
use kira_expression_cache::domain::{SampleType, SampleValue, Xref};
use kira_expression_cache::error::GexError;
use kira_expression_cache::mapping::{DisconnectedMapper, TsvIdMapper};
use kira_expression_cache::progress::{ProgressEvent, ProgressKeeper, ProgressSink};
use kira_expression_cache::resolver::IdMapper;
use kira_expression_cache::store::ExpressionStore;

struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

/// Cancels once `limit` identifiers have reported progress.
struct CancelAfter {
    limit: usize,
    calls: Cell<usize>,
}

impl ProgressSink for CancelAfter {
    fn event(&self, _event: ProgressEvent) {}

    fn worked(&self, _units: u64) {
        self.calls.set(self.calls.get() + 1);
    }

    fn is_cancelled(&self) -> bool {
        self.calls.get() >= self.limit
    }
}

#[derive(Default)]
struct CountingMapper {
    calls: Cell<usize>,
    asked: std::cell::RefCell<Vec<Xref>>,
}

impl IdMapper for CountingMapper {
    fn is_connected(&self) -> bool {
        true
    }

    fn map_id(&self, xref: &Xref) -> Result<HashSet<Xref>, GexError> {
        self.calls.set(self.calls.get() + 1);
        self.asked.borrow_mut().push(xref.clone());
        Ok(HashSet::from([
            Xref::new(format!("ENSG{}", xref.id()), "En"),
            Xref::new(format!("OX{}", xref.id()), "Ox"),
            Xref::new(format!("UN{}", xref.id()), "Un"),
        ]))
    }
}

struct FailingMapper {
    failing: Xref,
}

impl IdMapper for FailingMapper {
    fn is_connected(&self) -> bool {
        true
    }

    fn map_id(&self, xref: &Xref) -> Result<HashSet<Xref>, GexError> {
        if *xref == self.failing {
            return Err(GexError::IdMapping("connection reset".to_string()));
        }
        Ok(HashSet::from([Xref::new(format!("ENSG{}", xref.id()), "En")]))
    }
}

/// A finalized store keyed by Ensembl ids `ENSG<n>` for the given gene numbers.
/// Gene 2 has two reporters.
fn ensembl_store(temp: &tempfile::TempDir, genes: &[u32]) -> ExpressionStore {
    let path = Utf8PathBuf::from_path_buf(temp.path().join("data.sqlite")).unwrap();
    let mut store = ExpressionStore::create(path, SqliteConnector).unwrap();
    store.add_sample(0, "ratio", SampleType::Numeric).unwrap();
    store.add_sample(1, "call", SampleType::Text).unwrap();
    let mut group = 0;
    for gene in genes {
        let xref = Xref::new(format!("ENSG{gene}"), "En");
        let copies = if *gene == 2 { 2 } else { 1 };
        for copy in 0..copies {
            store
                .add_row(&xref, 0, &format!("{}.0", gene * 2 + copy * 2), group)
                .unwrap();
            store.add_row(&xref, 1, &format!("p{copy}"), group).unwrap();
            group += 1;
        }
    }
    let location = store.finalize().unwrap();
    ExpressionStore::open(location, SqliteConnector).unwrap()
}

#[test]
fn cached_under_source_identifier() {
    let temp = tempfile::tempdir().unwrap();
    let store = ensembl_store(&temp, &[1, 2, 3]);
    let mut context = CacheContext::new(&store);
    let mapper = CountingMapper::default();
    let source = Xref::new("2", "L");

    let report = context.cache_data(&[source.clone()], &NoopSink, &mapper).unwrap();
    assert_eq!(report.loaded, 1);
    assert!(!report.cancelled);

    let rows = context.cached_data(&source).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(context.cache().has_multiple_data(&source));
    assert!(context.cached_data(&Xref::new("ENSG2", "En")).is_none());
}

#[test]
fn only_used_datasources_are_queried() {
    let temp = tempfile::tempdir().unwrap();
    let store = ensembl_store(&temp, &[1, 2, 3]);
    assert_eq!(
        store.used_datasources().unwrap().codes().collect::<Vec<_>>(),
        vec!["En"]
    );
    let mut context = CacheContext::new(&store);
    let mapper = CountingMapper::default();
    let source = Xref::new("1", "L");

    context.cache_data(&[source.clone()], &NoopSink, &mapper).unwrap();

    let rows = context.cached_data(&source).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].xref(), Some(&Xref::new("ENSG1", "En")));
}

#[test]
fn repeated_batches_do_no_redundant_work() {
    let temp = tempfile::tempdir().unwrap();
    let store = ensembl_store(&temp, &[1, 2, 3]);
    let mut context = CacheContext::new(&store);
    let mapper = CountingMapper::default();
    let x = Xref::new("1", "L");
    let y = Xref::new("3", "L");

    context.cache_data(&[x.clone()], &NoopSink, &mapper).unwrap();
    let report = context.cache_data(&[x.clone()], &NoopSink, &mapper).unwrap();
    assert_eq!(mapper.calls.get(), 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.loaded, 0);

    context
        .cache_data(&[x.clone(), y.clone(), x.clone()], &NoopSink, &mapper)
        .unwrap();
    assert_eq!(mapper.calls.get(), 2);
    assert_eq!(*mapper.asked.borrow(), vec![x, y]);
}

#[test]
fn unresolved_identifiers_are_not_errors() {
    let temp = tempfile::tempdir().unwrap();
    let store = ensembl_store(&temp, &[1]);
    let mut context = CacheContext::new(&store);
    let source = Xref::new("1", "L");

    let report = context
        .cache_data(&[source.clone()], &NoopSink, &DisconnectedMapper)
        .unwrap();
    assert_eq!(report.unresolved, vec![source.clone()]);
    assert_eq!(context.cached_data(&source).map(<[_]>::len), Some(0));
}

#[test]
fn source_in_store_namespace_needs_no_mapping() {
    let temp = tempfile::tempdir().unwrap();
    let store = ensembl_store(&temp, &[1, 2]);
    let mut context = CacheContext::new(&store);
    let source = Xref::new("ENSG2", "En");

    context
        .cache_data(&[source.clone()], &NoopSink, &DisconnectedMapper)
        .unwrap();
    assert_eq!(context.cached_data(&source).unwrap().len(), 2);
}

#[test]
fn cancellation_leaves_partial_cache() {
    let temp = tempfile::tempdir().unwrap();
    let store = ensembl_store(&temp, &[1, 2, 3, 4, 5]);
    let mut context = CacheContext::new(&store);
    let sources: Vec<Xref> = (1..=5).map(|n| Xref::new(n.to_string(), "L")).collect();
    let sink = CancelAfter {
        limit: 2,
        calls: Cell::new(0),
    };

    let report = context
        .cache_data(&sources, &sink, &CountingMapper::default())
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.processed, 2);
    assert_eq!(context.cache().len(), 2);
    assert!(context.cached_data(&sources[0]).is_some());
    assert!(context.cached_data(&sources[1]).is_some());
    assert!(context.cached_data(&sources[2]).is_none());

    // Resuming picks up where the cancelled batch stopped.
    let mapper = CountingMapper::default();
    let report = context.cache_data(&sources, &NoopSink, &mapper).unwrap();
    assert_eq!(report.skipped, 2);
    assert_eq!(mapper.calls.get(), 3);
    assert_eq!(context.cache().len(), 5);
}

#[test]
fn progress_is_split_across_identifiers() {
    let temp = tempfile::tempdir().unwrap();
    let store = ensembl_store(&temp, &[1, 2, 3, 4]);
    let mut context = CacheContext::new(&store);
    let sources: Vec<Xref> = (1..=4).map(|n| Xref::new(n.to_string(), "L")).collect();
    let keeper = ProgressKeeper::new(100);

    context
        .cache_data(&sources, &keeper, &CountingMapper::default())
        .unwrap();
    assert_eq!(keeper.progress(), 100);
    assert!(keeper.is_finished());
}

#[test]
fn mapping_failure_aborts_by_default() {
    let temp = tempfile::tempdir().unwrap();
    let store = ensembl_store(&temp, &[1, 2, 3]);
    let mut context = CacheContext::new(&store);
    let sources: Vec<Xref> = (1..=3).map(|n| Xref::new(n.to_string(), "L")).collect();
    let mapper = FailingMapper {
        failing: sources[1].clone(),
    };

    let err = context.cache_data(&sources, &NoopSink, &mapper).unwrap_err();
    assert_matches!(err, GexError::IdMapping(_));
    assert_eq!(context.cache().len(), 1);
}

#[test]
fn mapping_failure_can_be_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let store = ensembl_store(&temp, &[1, 2, 3]);
    let mut context = CacheContext::with_options(
        &store,
        LoaderOptions {
            on_error: ErrorPolicy::Continue,
        },
    );
    let sources: Vec<Xref> = (1..=3).map(|n| Xref::new(n.to_string(), "L")).collect();
    let mapper = FailingMapper {
        failing: sources[1].clone(),
    };

    let report = context.cache_data(&sources, &NoopSink, &mapper).unwrap();
    assert_eq!(report.failed, vec![sources[1].clone()]);
    assert_eq!(report.loaded, 2);
    assert!(context.cached_data(&sources[1]).is_none());
}

#[test]
fn averaged_duplicate_reporters() {
    let temp = tempfile::tempdir().unwrap();
    let store = ensembl_store(&temp, &[2]);
    let mut context = CacheContext::new(&store);
    let source = Xref::new("2", "L");
    context
        .cache_data(&[source.clone()], &NoopSink, &CountingMapper::default())
        .unwrap();

    // Reporters of gene 2 carry 4.0 and 6.0.
    let summary = context.averaged(&source).unwrap().unwrap();
    assert_eq!(summary.value(0), Some(&SampleValue::Number(5.0)));
    assert_eq!(
        summary.value(1),
        Some(&SampleValue::Text("p0, p1".to_string()))
    );
}

#[test]
fn file_mapper_resolves_through_equivalences() {
    let temp = tempfile::tempdir().unwrap();
    let store = ensembl_store(&temp, &[7157]);
    let mapper = TsvIdMapper::parse("7157:L\tENSG7157:En\tP04637:S\n");
    let mut context = CacheContext::new(&store);
    let source = Xref::new("P04637", "S");

    context.cache_data(&[source.clone()], &NoopSink, &mapper).unwrap();
    assert_eq!(context.cached_data(&source).unwrap().len(), 1);
}
