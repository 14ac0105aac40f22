use std::sync::Arc;

use rand::Rng;

use rmdb::common::{ColType, DbError, Result, Value};
use rmdb::{ColumnMeta, Database, DatabaseConfig};

fn open_db(dir: &tempfile::TempDir) -> Result<Database> {
    Database::open(dir.path(), DatabaseConfig::default())
}

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

#[test]
fn test_insert_and_get_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = open_db(&dir)?;
    create_t(&db)?;

    let heap = db.registry().heap("t")?;
    let txn = db.begin()?;
    let tuple = row(&db, 1, "hello")?;
    let rid = heap.insert(&txn, &tuple)?;
    let back = heap.get(&txn, rid)?;
    assert_eq!(back, tuple);
    db.commit(&txn)?;

    // Visible to a later transaction.
    let txn2 = db.begin()?;
    assert_eq!(heap.get(&txn2, rid)?, tuple);
    db.commit(&txn2)?;
    Ok(())
}

#[test]
fn test_get_missing_record() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = open_db(&dir)?;
    create_t(&db)?;

    let heap = db.registry().heap("t")?;
    let txn = db.begin()?;
    let rid = heap.insert(&txn, &row(&db, 1, "x")?)?;
    heap.delete(&txn, rid)?;
    match heap.get(&txn, rid) {
        Err(DbError::RecordNotFound(_)) => {}
        other => panic!("expected RecordNotFound, got {:?}", other),
    }
    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_insert_then_delete_restores_header_and_bitmap() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = open_db(&dir)?;
    create_t(&db)?;

    let heap = db.registry().heap("t")?;
    let pages_before = heap.total_pages()?;

    let txn = db.begin()?;
    let rid = heap.insert(&txn, &row(&db, 7, "gone")?)?;
    heap.delete(&txn, rid)?;
    db.commit(&txn)?;

    assert_eq!(heap.total_pages()?, pages_before.max(2));
    assert!(!heap.slot_occupied(rid)?);
    Ok(())
}

#[test]
fn test_update_in_place() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = open_db(&dir)?;
    create_t(&db)?;

    let heap = db.registry().heap("t")?;
    let txn = db.begin()?;
    let rid = heap.insert(&txn, &row(&db, 1, "old")?)?;
    let newer = row(&db, 1, "new")?;
    heap.update(&txn, rid, &newer)?;
    assert_eq!(heap.get(&txn, rid)?, newer);
    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_page_fill_spills_to_new_page() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = open_db(&dir)?;
    create_t(&db)?;

    let heap = db.registry().heap("t")?;
    let per_page = rmdb::HeapFile::slots_per_page_for(heap.tuple_size());

    let txn = db.begin()?;
    let mut last_rid = None;
    for i in 0..per_page {
        last_rid = Some(heap.insert(&txn, &row(&db, i as i32, "fill")?)?);
    }
    let full_page = last_rid.map(|r| r.page_no).unwrap_or(1);

    // The page is exactly full; the next insert must land on a new page.
    let overflow = heap.insert(&txn, &row(&db, -1, "over")?)?;
    assert_ne!(overflow.page_no, full_page);
    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_scan_in_page_slot_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = open_db(&dir)?;
    create_t(&db)?;

    let heap = db.registry().heap("t")?;
    let txn = db.begin()?;
    let mut rids = Vec::new();
    for i in 0..10 {
        rids.push(heap.insert(&txn, &row(&db, i, "scan")?)?);
    }

    let mut cursor = heap.scan(&txn)?;
    let mut seen = Vec::new();
    while let Some((rid, _tuple)) = cursor.next()? {
        seen.push(rid);
    }
    let mut expected = rids.clone();
    expected.sort();
    assert_eq!(seen, expected);
    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_concurrent_inserts_all_land() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Arc::new(open_db(&dir)?);
    create_t(&db)?;

    let threads = 4;
    let per_thread = 25usize;
    let mut handles = Vec::new();
    for _ in 0..threads {
        let db = Arc::clone(&db);
        handles.push(std::thread::spawn(move || -> Result<()> {
            let heap = db.registry().heap("t")?;
            let schema = db.catalog().schema("t")?;
            let mut rng = rand::thread_rng();
            for _ in 0..per_thread {
                let txn = db.begin()?;
                let v: i32 = rng.gen_range(0..1000);
                let tuple =
                    schema.encode_tuple(&[Value::Int(v), Value::Str("mt".to_string())])?;
                heap.insert(&txn, &tuple)?;
                db.commit(&txn)?;
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle
            .join()
            .map_err(|_| DbError::Other("thread panicked".to_string()))??;
    }

    let heap = db.registry().heap("t")?;
    let txn = db.begin()?;
    let mut cursor = heap.scan(&txn)?;
    let mut count = 0;
    while cursor.next()?.is_some() {
        count += 1;
    }
    db.commit(&txn)?;
    assert_eq!(count, threads * per_thread);
    Ok(())
}

#[test]
fn test_deleted_slot_not_reused_before_commit() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = open_db(&dir)?;
    create_t(&db)?;

    let heap = db.registry().heap("t")?;

    let setup = db.begin()?;
    let rid = heap.insert(&setup, &row(&db, 1, "victim")?)?;
    db.commit(&setup)?;

    let deleter = db.begin()?;
    heap.delete(&deleter, rid)?;

    // Another transaction inserting now must not take the freed slot: the
    // deleter still holds its X row lock until commit.
    let inserter = db.begin()?;
    let new_rid = heap.insert(&inserter, &row(&db, 2, "new")?)?;
    assert_ne!(new_rid, rid);
    db.commit(&inserter)?;
    db.commit(&deleter)?;

    // After the deleter commits the slot is free again.
    let last = db.begin()?;
    let reused = heap.insert(&last, &row(&db, 3, "reuse")?)?;
    assert_eq!(reused, rid);
    db.commit(&last)?;
    Ok(())
}
