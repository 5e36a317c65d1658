use std::sync::Arc;

use deltalake_scan::multi_file::FileExpandResult;
use deltalake_scan::{col, lit, DefaultEngine, DeltaTableError, DeltaTableSnapshot};
use deltalake_scan_test::{id_value_batch, TestResult, TestTable};
use pretty_assertions::assert_eq;

async fn open(table: &TestTable, version: Option<i64>) -> TestResult<DeltaTableSnapshot> {
    Ok(DeltaTableSnapshot::open(Arc::new(DefaultEngine::new()), &table.uri(), version).await?)
}

fn file_names(paths: &[String]) -> Vec<&str> {
    paths
        .iter()
        .map(|p| p.rsplit('/').next().unwrap_or(p))
        .collect()
}

#[tokio::test]
async fn test_files_follow_log_replay_order() -> TestResult {
    let mut table = TestTable::simple()?;
    table.append("a.parquet", &id_value_batch(&[1, 2, 3]), &[])?;
    table.append("b.parquet", &id_value_batch(&[4, 5]), &[])?;

    let snapshot = open(&table, None).await?;
    assert_eq!(snapshot.version(), 2);
    let files = snapshot.all_files().await?;
    assert_eq!(file_names(&files), vec!["b.parquet", "a.parquet"]);
    assert_eq!(snapshot.metadata(0).delta_snapshot_version, 2);
    assert_eq!(snapshot.metadata(1).delta_snapshot_version, 1);
    assert_eq!(snapshot.metadata(1).file_number, 1);
    assert_eq!(snapshot.file(2).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_file_paths_are_host_paths() -> TestResult {
    let mut table = TestTable::simple()?;
    table.append("nested/a.parquet", &id_value_batch(&[1]), &[])?;

    let snapshot = open(&table, None).await?;
    let root = std::fs::canonicalize(table.path())?;
    let path = snapshot.file(0).await?.unwrap();
    assert_eq!(path, root.join("nested/a.parquet").to_string_lossy());
    assert_eq!(snapshot.table_root().scheme(), "file");
    assert!(snapshot.table_root().path().ends_with('/'));
    Ok(())
}

#[tokio::test]
async fn test_time_travel() -> TestResult {
    let mut table = TestTable::simple()?;
    table.append("a.parquet", &id_value_batch(&[1]), &[])?;
    table.append("b.parquet", &id_value_batch(&[2]), &[])?;
    table.remove("a.parquet")?;

    let latest = open(&table, None).await?;
    assert_eq!(file_names(&latest.all_files().await?), vec!["b.parquet"]);

    let v1 = open(&table, Some(1)).await?;
    assert_eq!(v1.version(), 1);
    assert_eq!(file_names(&v1.all_files().await?), vec!["a.parquet"]);

    let v0 = open(&table, Some(0)).await?;
    assert_eq!(v0.expand_result().await?, FileExpandResult::NoFiles);
    Ok(())
}

#[tokio::test]
async fn test_missing_version() -> TestResult {
    let table = TestTable::simple()?;
    let err = open(&table, Some(9)).await.unwrap_err();
    match err.downcast_ref::<DeltaTableError>() {
        Some(DeltaTableError::VersionNotFound { path, version }) => {
            assert_eq!(path, &table.uri());
            assert_eq!(*version, 9);
        }
        other => panic!("unexpected error {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_not_a_table() -> TestResult {
    let dir = tempfile::tempdir()?;
    let err = DeltaTableSnapshot::open(
        Arc::new(DefaultEngine::new()),
        &dir.path().to_string_lossy(),
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DeltaTableError::EngineOpen { .. }), "{err}");

    let err = DeltaTableSnapshot::open(
        Arc::new(DefaultEngine::new()),
        "/this/path/does/not/exist",
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DeltaTableError::EngineOpen { .. }), "{err}");
    Ok(())
}

#[tokio::test]
async fn test_checkpoint_replay() -> TestResult {
    let mut table = TestTable::simple()?;
    table.append("a.parquet", &id_value_batch(&[1]), &[])?;
    table.append("b.parquet", &id_value_batch(&[2]), &[])?;
    table.checkpoint()?;
    table.append("c.parquet", &id_value_batch(&[3]), &[])?;
    for version in 0..=2 {
        table.remove_commit(version)?;
    }

    let snapshot = open(&table, None).await?;
    assert_eq!(snapshot.version(), 3);
    let files = snapshot.all_files().await?;
    assert_eq!(file_names(&files), vec!["c.parquet", "a.parquet", "b.parquet"]);
    // files from the checkpoint carry its version
    assert_eq!(snapshot.metadata(1).delta_snapshot_version, 2);

    let err = open(&table, Some(1)).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DeltaTableError>(),
        Some(DeltaTableError::VersionNotFound { version: 1, .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_partition_pruning() -> TestResult {
    let mut table = TestTable::builder()
        .with_column("id", "long")
        .with_column("part", "string")
        .with_partition_columns(&["part"])
        .create()?;
    let ids = arrow_array::RecordBatch::try_from_iter(vec![(
        "id",
        Arc::new(arrow_array::Int64Array::from(vec![1, 2])) as arrow_array::ArrayRef,
    )])?;
    table.append("part=x/a.parquet", &ids, &[("part", Some("x"))])?;
    table.append("part=y/b.parquet", &ids, &[("part", Some("y"))])?;
    table.append("part=__null/c.parquet", &ids, &[("part", None)])?;

    let snapshot = open(&table, None).await?;
    snapshot.apply_predicates(&[col("part").eq(lit("x"))])?;
    assert!(snapshot.pushed_predicate().is_some());
    let files = snapshot.all_files().await?;
    assert_eq!(file_names(&files), vec!["a.parquet"]);
    assert_eq!(
        snapshot.metadata(0).partition_map.get("part"),
        Some(&Some("x".to_string()))
    );

    let snapshot = open(&table, None).await?;
    snapshot.apply_predicates(&[col("part").is_null()])?;
    assert_eq!(file_names(&snapshot.all_files().await?), vec!["c.parquet"]);

    // predicates without a file level translation prune nothing
    let snapshot = open(&table, None).await?;
    snapshot.apply_predicates(&[col("id").eq(col("part"))])?;
    assert!(snapshot.pushed_predicate().is_none());
    assert_eq!(snapshot.total_file_count().await?, 3);
    Ok(())
}

#[tokio::test]
async fn test_deletion_vectors_are_loaded() -> TestResult {
    let mut table = TestTable::simple()?;
    table.append("a.parquet", &id_value_batch(&[10, 11, 12, 13, 14]), &[])?;
    table.append("b.parquet", &id_value_batch(&[20]), &[])?;
    table.delete_rows("a.parquet", &[1, 4])?;

    let snapshot = open(&table, None).await?;
    let files = snapshot.all_files().await?;
    assert_eq!(file_names(&files), vec!["a.parquet", "b.parquet"]);

    let a = snapshot.metadata(0);
    assert_eq!(a.delta_snapshot_version, 3);
    let selection = a.selection_vector.as_ref().expect("selection vector");
    let visible: Vec<_> = (0..5).filter(|row| selection.is_selected(*row)).collect();
    assert_eq!(visible, vec![0, 2, 3]);
    assert!(snapshot.metadata(1).selection_vector.is_none());
    Ok(())
}

#[tokio::test]
async fn test_filter_pushdown_after_listing_keeps_version() -> TestResult {
    let mut table = TestTable::builder()
        .with_column("id", "long")
        .with_column("part", "string")
        .with_partition_columns(&["part"])
        .create()?;
    let ids = arrow_array::RecordBatch::try_from_iter(vec![(
        "id",
        Arc::new(arrow_array::Int64Array::from(vec![1])) as arrow_array::ArrayRef,
    )])?;
    table.append("x.parquet", &ids, &[("part", Some("x"))])?;
    table.append("y.parquet", &ids, &[("part", Some("y"))])?;

    let snapshot = open(&table, Some(2)).await?;
    assert!(snapshot.file(0).await?.is_some());
    table.append("z.parquet", &ids, &[("part", Some("x"))])?;

    let narrowed = snapshot
        .complex_filter_pushdown(&[col("part").eq(lit("x"))])
        .await?
        .expect("a new snapshot");
    assert_eq!(narrowed.version(), 2);
    assert_eq!(file_names(&narrowed.all_files().await?), vec!["x.parquet"]);
    Ok(())
}
