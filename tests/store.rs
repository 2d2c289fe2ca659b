use camino::Utf8PathBuf;

use kira_expression_cache::connector::{ArchiveConnector, SqliteConnector};
use kira_expression_cache::domain::{SampleType, SampleValue, Xref};
use kira_expression_cache::store::ExpressionStore;

fn scratch_path(temp: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().join(name)).unwrap()
}

/// Writes `groups` reporters, each measured in every one of `samples` samples.
fn fill(store: &mut ExpressionStore, samples: i32, groups: i64) {
    for sample in 0..samples {
        store
            .add_sample(sample, &format!("sample {sample}"), SampleType::Numeric)
            .unwrap();
    }
    for group in 0..groups {
        let xref = Xref::new(format!("{}", 1000 + group), "L");
        for sample in 0..samples {
            store
                .add_row(&xref, sample, &format!("{}.5", group + sample as i64), group)
                .unwrap();
        }
    }
    store.commit().unwrap();
}

#[test]
fn full_scan_round_trip() {
    for (samples, groups) in [(1, 1), (3, 4), (5, 1203)] {
        let temp = tempfile::tempdir().unwrap();
        let path = scratch_path(&temp, "data.sqlite");
        let mut store = ExpressionStore::create(path, SqliteConnector).unwrap();
        fill(&mut store, samples, groups);
        let location = store.finalize().unwrap();

        let store = ExpressionStore::open(location, SqliteConnector).unwrap();
        let mut scan = store.scan().unwrap();
        let reporters: Vec<_> = scan.groups().unwrap().collect();
        assert_eq!(reporters.len() as i64, groups);
        for (idx, reporter) in reporters.iter().enumerate() {
            assert_eq!(reporter.group_id(), idx as i64);
            assert_eq!(reporter.values().len(), samples as usize);
            assert_eq!(
                reporter.xref(),
                Some(&Xref::new(format!("{}", 1000 + idx), "L"))
            );
        }

        // A second pass restarts from the first group.
        assert_eq!(scan.groups().unwrap().count() as i64, groups);
    }
}

#[test]
fn groups_follow_group_order_not_insert_order() {
    let temp = tempfile::tempdir().unwrap();
    let path = scratch_path(&temp, "data.sqlite");
    let mut store = ExpressionStore::create(path, SqliteConnector).unwrap();
    store.add_sample(0, "a", SampleType::Numeric).unwrap();
    store.add_sample(1, "b", SampleType::Numeric).unwrap();
    store.add_sample(2, "c", SampleType::Numeric).unwrap();
    let xref = Xref::new("1234", "L");
    for (group, sample) in [(3, 0), (1, 0), (2, 0), (1, 1), (1, 2), (2, 1)] {
        store.add_row(&xref, sample, "1.0", group).unwrap();
    }
    store.commit().unwrap();

    let mut scan = store.scan().unwrap();
    let counts: Vec<(i64, usize)> = scan
        .groups()
        .unwrap()
        .map(|reporter| (reporter.group_id(), reporter.values().len()))
        .collect();
    assert_eq!(counts, vec![(1, 3), (2, 2), (3, 1)]);
}

#[test]
fn point_query_merges_by_group() {
    let temp = tempfile::tempdir().unwrap();
    let path = scratch_path(&temp, "data.sqlite");
    let mut store = ExpressionStore::create(path, SqliteConnector).unwrap();
    store.add_sample(0, "expr", SampleType::Numeric).unwrap();
    store.add_sample(1, "call", SampleType::Text).unwrap();
    let gene = Xref::new("ENSG00000141510", "En");
    let other = Xref::new("ENSG00000012048", "En");
    store.add_row(&gene, 0, "1.5", 0).unwrap();
    store.add_row(&gene, 1, "present", 0).unwrap();
    store.add_row(&other, 0, "0.2", 1).unwrap();
    store.add_row(&gene, 0, "2.5", 2).unwrap();
    store.add_row(&gene, 1, "absent", 2).unwrap();
    let location = store.finalize().unwrap();

    let store = ExpressionStore::open(location, SqliteConnector).unwrap();
    let data = store.data([&gene]).unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0].group_id(), 0);
    assert_eq!(data[1].group_id(), 2);
    assert_eq!(data[0].value(0), Some(&SampleValue::Number(1.5)));
    assert_eq!(
        data[1].value(1),
        Some(&SampleValue::Text("absent".to_string()))
    );

    let filter = store.used_datasources().unwrap();
    assert_eq!(filter.codes().collect::<Vec<_>>(), vec!["En"]);
    assert_eq!(store.row_count().unwrap(), 3);
}

#[test]
fn sample_registry_after_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let path = scratch_path(&temp, "data.sqlite");
    let mut store = ExpressionStore::create(path, SqliteConnector).unwrap();
    store.add_sample(2, "treated", SampleType::Numeric).unwrap();
    store.add_sample(0, "control", SampleType::Numeric).unwrap();
    store.add_sample(1, "call", SampleType::Text).unwrap();
    let location = store.finalize().unwrap();

    let store = ExpressionStore::open(location, SqliteConnector).unwrap();
    let ordered: Vec<&str> = store
        .ordered_samples()
        .unwrap()
        .iter()
        .map(|sample| sample.name.as_str())
        .collect();
    assert_eq!(ordered, vec!["control", "call", "treated"]);
    assert_eq!(
        store.find_sample("call").unwrap().map(|s| s.data_type),
        Some(SampleType::Text)
    );
    assert!(store.sample(7).unwrap().is_none());
}

#[test]
fn sqlite_finalize_keeps_location() {
    let temp = tempfile::tempdir().unwrap();
    let path = scratch_path(&temp, "data.sqlite");
    let mut store = ExpressionStore::create(path.clone(), SqliteConnector).unwrap();
    fill(&mut store, 2, 3);
    assert_eq!(store.finalize().unwrap(), path);
}

#[test]
fn archive_finalize_changes_location() {
    let temp = tempfile::tempdir().unwrap();
    let path = scratch_path(&temp, "dataset");
    let mut store = ExpressionStore::create(path.clone(), ArchiveConnector).unwrap();
    fill(&mut store, 2, 10);
    let location = store.finalize().unwrap();

    assert_eq!(location, ArchiveConnector::archive_path(&path));
    assert!(location.as_std_path().is_file());
    assert!(!path.as_std_path().exists());

    let store = ExpressionStore::open(location, ArchiveConnector).unwrap();
    assert_eq!(store.samples().unwrap().len(), 2);
    let mut scan = store.scan().unwrap();
    assert_eq!(scan.groups().unwrap().count(), 10);
}

#[test]
fn finalized_store_allows_independent_cursors() {
    let temp = tempfile::tempdir().unwrap();
    let path = scratch_path(&temp, "data.sqlite");
    let mut store = ExpressionStore::create(path, SqliteConnector).unwrap();
    fill(&mut store, 2, 6);
    let location = store.finalize().unwrap();

    let first = ExpressionStore::open(location.clone(), SqliteConnector).unwrap();
    let second = ExpressionStore::open(location, SqliteConnector).unwrap();
    let mut a = first.scan().unwrap();
    let mut b = second.scan().unwrap();
    let mut left = a.groups().unwrap();
    let mut right = b.groups().unwrap();
    for _ in 0..6 {
        assert_eq!(
            left.next().map(|r| r.group_id()),
            right.next().map(|r| r.group_id())
        );
    }
    assert!(left.next().is_none());
}

#[test]
fn opening_a_missing_store_fails() {
    let temp = tempfile::tempdir().unwrap();
    let path = scratch_path(&temp, "missing.sqlite");
    assert!(ExpressionStore::open(path, SqliteConnector).is_err());
}
