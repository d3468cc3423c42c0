use anyhow::Result;
use std::time::Duration;
use utterance_loader::testing::{row, synthetic_rows, write_raw_shard, write_shard};
use utterance_loader::{
    FakeDatabaseIO, FileOutcome, FileTask, FileWorker, LoadConfig, MetricsCollector, Stage, TABLE,
    TailPolicy,
};

fn config(dir: &std::path::Path, batch_size: usize) -> LoadConfig {
    LoadConfig::new("test-db", dir, 1).with_batch_size(batch_size)
}

#[test]
fn three_row_file_with_capacity_one() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    write_raw_shard(
        tmp.path(),
        0,
        "keyword,keyword_id,utterance\nhello,12,hello world\nbye,-3,see you\n",
    )?;
    let db = FakeDatabaseIO::new();
    let cfg = config(tmp.path(), 1);

    let report = FileWorker::new(FileTask::new(tmp.path(), 0), &db, &cfg).run();
    assert!(report.outcome.is_completed());

    let calls = db.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.mutations.len() == 1));
    assert_eq!(calls[0].mutations[0].keyword, "hello");
    assert_eq!(calls[0].mutations[0].keyword_id, 12);
    assert_eq!(calls[0].mutations[0].utterance, "hello world");
    assert_eq!(calls[1].mutations[0].keyword_id, -3);
    assert_eq!(report.stats.batches_written, 2);
    assert_eq!(report.stats.mutations_applied, 2);
    Ok(())
}

#[test]
fn write_attempts_include_the_tail_by_default() -> Result<()> {
    for rows in [0usize, 1, 9, 10, 11, 25] {
        let tmp = tempfile::tempdir()?;
        write_shard(tmp.path(), 0, &synthetic_rows("t", rows))?;
        let db = FakeDatabaseIO::new();
        let cfg = config(tmp.path(), 10);

        let report = FileWorker::new(FileTask::new(tmp.path(), 0), &db, &cfg).run();
        assert!(report.outcome.is_completed());
        assert_eq!(db.calls().len(), rows.div_ceil(10), "rows={rows}");
        assert_eq!(db.rows(TABLE).len(), rows, "rows={rows}");
    }
    Ok(())
}

#[test]
fn drop_policy_writes_only_full_batches() -> Result<()> {
    for rows in [0usize, 1, 9, 10, 11, 25] {
        let tmp = tempfile::tempdir()?;
        write_shard(tmp.path(), 0, &synthetic_rows("t", rows))?;
        let db = FakeDatabaseIO::new();
        let cfg = config(tmp.path(), 10).with_tail_policy(TailPolicy::Drop);

        let report = FileWorker::new(FileTask::new(tmp.path(), 0), &db, &cfg).run();
        assert!(report.outcome.is_completed());
        assert_eq!(db.calls().len(), rows / 10, "rows={rows}");
        assert_eq!(report.stats.dropped_tail, (rows % 10) as u64, "rows={rows}");
    }
    Ok(())
}

#[test]
fn failed_batch_does_not_stop_the_file() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    write_shard(tmp.path(), 0, &synthetic_rows("f", 9))?;
    let db = FakeDatabaseIO::new().fail_call(1);
    let cfg = config(tmp.path(), 3);
    let metrics = MetricsCollector::with_builtin();

    let report = FileWorker::new(FileTask::new(tmp.path(), 0), &db, &cfg)
        .with_metrics(metrics.clone())
        .run();

    assert!(report.outcome.is_completed());
    assert_eq!(db.calls().len(), 3);
    assert_eq!(report.stats.batches_written, 2);
    assert_eq!(report.stats.batches_failed, 1);
    assert_eq!(report.stats.mutations_applied, 6);

    let mut ids: Vec<i64> = db.rows(TABLE).iter().map(|m| m.keyword_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 6, 7, 8]);

    assert_eq!(metrics.counter("batches_failed"), Some(1));
    assert_eq!(metrics.counter("batches_written"), Some(2));
    assert_eq!(metrics.counter("rows_read"), Some(9));
    assert_eq!(metrics.counter("files_completed"), Some(1));
    Ok(())
}

#[test]
fn invalid_rows_are_counted_not_fatal() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    write_shard(
        tmp.path(),
        0,
        &[row("a", "1", "x"), row("b", "two", "y"), row("c", "3", "z")],
    )?;
    let db = FakeDatabaseIO::new();
    let cfg = config(tmp.path(), 10);

    let report = FileWorker::new(FileTask::new(tmp.path(), 0), &db, &cfg).run();
    assert!(report.outcome.is_completed());
    assert_eq!(report.stats.rows_read, 3);
    assert_eq!(report.stats.rows_skipped, 1);
    assert_eq!(db.rows(TABLE).len(), 2);
    Ok(())
}

#[test]
fn missing_file_fails_only_this_task() {
    let tmp = tempfile::tempdir().unwrap();
    let db = FakeDatabaseIO::new();
    let cfg = config(tmp.path(), 10);

    let report = FileWorker::new(FileTask::new(tmp.path(), 7), &db, &cfg).run();
    match report.outcome {
        FileOutcome::Failed { stage, .. } => assert_eq!(stage, Stage::Opening),
        FileOutcome::Completed => panic!("missing file should fail"),
    }
    assert!(db.calls().is_empty());
}

#[test]
fn refused_connection_fails_before_opening() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    write_shard(tmp.path(), 0, &synthetic_rows("r", 3))?;
    let db = FakeDatabaseIO::new().refuse_connections();
    let cfg = config(tmp.path(), 10);

    let report = FileWorker::new(FileTask::new(tmp.path(), 0), &db, &cfg).run();
    match report.outcome {
        FileOutcome::Failed { stage, error } => {
            assert_eq!(stage, Stage::Connecting);
            assert!(error.to_string().contains("refused"));
        }
        FileOutcome::Completed => panic!("connection should be refused"),
    }
    assert_eq!(report.stats.rows_read, 0);
    Ok(())
}

#[test]
fn malformed_row_keeps_earlier_batches() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    write_raw_shard(
        tmp.path(),
        0,
        "h1,h2,h3\na,1,x\nb,2,y\nc,3,z\nd,4\ne,5,w\n",
    )?;
    let db = FakeDatabaseIO::new();
    let cfg = config(tmp.path(), 2);

    let report = FileWorker::new(FileTask::new(tmp.path(), 0), &db, &cfg).run();
    match &report.outcome {
        FileOutcome::Failed { stage, .. } => assert_eq!(*stage, Stage::Streaming),
        FileOutcome::Completed => panic!("ragged row should fail the file"),
    }
    assert_eq!(db.calls().len(), 1);
    assert_eq!(db.rows(TABLE).len(), 2);
    Ok(())
}

#[test]
fn non_utf8_row_does_not_stop_the_file() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut contents = b"h1,h2,h3\na,1,x\nb,2,y\nc,3,\xff\xfe\n".to_vec();
    for i in 10..15 {
        contents.extend_from_slice(format!("r{i},{i},ok\n").as_bytes());
    }
    write_raw_shard(tmp.path(), 0, contents)?;
    let db = FakeDatabaseIO::new();
    let cfg = config(tmp.path(), 2);

    let report = FileWorker::new(FileTask::new(tmp.path(), 0), &db, &cfg).run();
    assert!(report.outcome.is_completed());
    assert_eq!(report.stats.rows_read, 8);
    assert_eq!(report.stats.rows_skipped, 1);
    assert_eq!(report.stats.batches_written, 4);

    let mut ids: Vec<i64> = db.rows(TABLE).iter().map(|m| m.keyword_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 10, 11, 12, 13, 14]);
    Ok(())
}

#[test]
fn expired_deadline_stops_the_task() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    write_shard(tmp.path(), 0, &synthetic_rows("d", 5))?;
    let db = FakeDatabaseIO::new();
    let cfg = config(tmp.path(), 2).with_timeout(Duration::ZERO);

    let report = FileWorker::new(FileTask::new(tmp.path(), 0), &db, &cfg).run();
    match report.outcome {
        FileOutcome::Failed { stage, .. } => assert_eq!(stage, Stage::Deadline),
        FileOutcome::Completed => panic!("zero timeout should expire"),
    }
    assert!(db.calls().is_empty());
    Ok(())
}

#[test]
fn closures_work_as_connectors() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    write_shard(tmp.path(), 0, &synthetic_rows("c", 4))?;
    let db = FakeDatabaseIO::new();
    let seen = std::sync::Mutex::new(Vec::new());
    let connector = |database: &str| {
        seen.lock().unwrap().push(database.to_string());
        Ok::<_, utterance_loader::CloudIOError>(db.clone())
    };
    let cfg = config(tmp.path(), 3);

    let report = FileWorker::new(FileTask::new(tmp.path(), 0), &connector, &cfg).run();
    assert!(report.outcome.is_completed());
    assert_eq!(seen.lock().unwrap().as_slice(), ["test-db".to_string()]);
    assert_eq!(db.rows(TABLE).len(), 4);
    Ok(())
}
