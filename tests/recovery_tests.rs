use rmdb::common::{ColType, Result, Value};
use rmdb::execution::{self, Executor, SeqScanExec};
use rmdb::{ColumnMeta, Database, DatabaseConfig};

fn create_t(db: &Database) -> Result<()> {
    db.create_table(
        "t",
        vec![
            ColumnMeta {
                name: "a".to_string(),
                ty: ColType::Int,
                len: 4,
            },
            ColumnMeta {
                name: "b".to_string(),
                ty: ColType::Str,
                len: 8,
            },
        ],
    )
}

fn row(db: &Database, a: i32, b: &str) -> Result<Vec<u8>> {
    let schema = db.catalog().schema("t")?;
    schema.encode_tuple(&[Value::Int(a), Value::Str(b.to_string())])
}

fn scan_a_values(db: &Database) -> Result<Vec<i32>> {
    let schema = db.catalog().schema("t")?;
    let txn = db.begin()?;
    let heap = db.registry().heap("t")?;
    let mut scan = SeqScanExec::new(heap, schema.clone(), txn.clone());
    let rows = execution::run(&mut scan)?;
    db.commit(&txn)?;
    let mut out = Vec::new();
    for r in rows {
        match schema.value_at(&r.data, 0) {
            Value::Int(v) => out.push(v),
            other => panic!("unexpected value {:?}", other),
        }
    }
    out.sort_unstable();
    Ok(out)
}

#[test]
fn test_committed_changes_survive_crash() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let db = Database::open(dir.path(), DatabaseConfig::default())?;
        create_t(&db)?;
        let heap = db.registry().heap("t")?;
        let txn = db.begin()?;
        heap.insert(&txn, &row(&db, 5, "e")?)?;
        db.commit(&txn)?;
        // Crash: no close(), no buffer flush.
    }

    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    assert_eq!(scan_a_values(&db)?, vec![5]);
    db.close()?;
    Ok(())
}

#[test]
fn test_uncommitted_changes_rolled_back_on_recovery() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let db = Database::open(dir.path(), DatabaseConfig::default())?;
        create_t(&db)?;
        let heap = db.registry().heap("t")?;

        // Loser first so the winner's commit flushes both sets of records.
        let loser = db.begin()?;
        heap.insert(&loser, &row(&db, 6, "f")?)?;

        let winner = db.begin()?;
        heap.insert(&winner, &row(&db, 5, "e")?)?;
        db.commit(&winner)?;
        // Crash with `loser` still active.
    }

    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    assert_eq!(scan_a_values(&db)?, vec![5]);
    db.close()?;
    Ok(())
}

#[test]
fn test_runtime_abort_rolls_back() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    create_t(&db)?;
    let heap = db.registry().heap("t")?;

    let pages_before = heap.total_pages()?;

    let txn = db.begin()?;
    let rid = heap.insert(&txn, &row(&db, 9, "x")?)?;
    db.abort(&txn)?;

    assert!(!heap.slot_occupied(rid)?);
    assert_eq!(scan_a_values(&db)?, Vec::<i32>::new());
    // The file may have grown a page, but the row is gone.
    assert!(heap.total_pages()? >= pages_before);
    db.close()?;
    Ok(())
}

#[test]
fn test_abort_restores_updates_and_deletes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    create_t(&db)?;
    let heap = db.registry().heap("t")?;

    let setup = db.begin()?;
    let r1 = heap.insert(&setup, &row(&db, 1, "one")?)?;
    let r2 = heap.insert(&setup, &row(&db, 2, "two")?)?;
    db.commit(&setup)?;

    let txn = db.begin()?;
    heap.update(&txn, r1, &row(&db, 10, "ten")?)?;
    heap.delete(&txn, r2)?;
    db.abort(&txn)?;

    let check = db.begin()?;
    assert_eq!(heap.get(&check, r1)?, row(&db, 1, "one")?);
    assert_eq!(heap.get(&check, r2)?, row(&db, 2, "two")?);
    db.commit(&check)?;
    db.close()?;
    Ok(())
}

#[test]
fn test_recovery_after_checkpoint() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let db = Database::open(dir.path(), DatabaseConfig::default())?;
        create_t(&db)?;
        let heap = db.registry().heap("t")?;

        let txn = db.begin()?;
        heap.insert(&txn, &row(&db, 1, "a")?)?;
        db.commit(&txn)?;

        db.checkpoint()?;

        let txn2 = db.begin()?;
        heap.insert(&txn2, &row(&db, 2, "b")?)?;
        db.commit(&txn2)?;
        // Crash after the checkpoint.
    }

    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    assert_eq!(scan_a_values(&db)?, vec![1, 2]);
    db.close()?;
    Ok(())
}

#[test]
fn test_recovery_rebuilds_indexes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let db = Database::open(dir.path(), DatabaseConfig::default())?;
        create_t(&db)?;
        db.create_index("t", "t_a", vec!["a".to_string()], false)?;

        let heap = db.registry().heap("t")?;
        let txn = db.begin()?;
        let tuple = row(&db, 33, "idx")?;
        let rid = heap.insert(&txn, &tuple)?;
        let index = db.registry().index("t", "t_a")?;
        index.insert_with_txn(&txn, &tuple, rid)?;
        db.commit(&txn)?;
        // Crash without flushing index pages.
    }

    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    let index = db.registry().index("t", "t_a")?;
    let key = index.key_from_values(&[Value::Int(33)])?;
    assert!(index.lookup(&key)?.is_some());
    db.close()?;
    Ok(())
}

#[test]
fn test_clean_restart_after_close() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let db = Database::open(dir.path(), DatabaseConfig::default())?;
        create_t(&db)?;
        let heap = db.registry().heap("t")?;
        let txn = db.begin()?;
        heap.insert(&txn, &row(&db, 7, "seven")?)?;
        db.commit(&txn)?;
        db.close()?;
    }

    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    assert_eq!(scan_a_values(&db)?, vec![7]);
    db.close()?;
    Ok(())
}
