use rmdb::common::{ColType, DbError, Result, Rid, Value};
use rmdb::index::BTreeScan;
use rmdb::{ColumnMeta, Database, DatabaseConfig};

fn open_with_table(dir: &tempfile::TempDir) -> Result<Database> {
    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    db.create_table(
        "t",
        vec![
            ColumnMeta {
                name: "k".to_string(),
                ty: ColType::Int,
                len: 4,
            },
            ColumnMeta {
                name: "v".to_string(),
                ty: ColType::Str,
                len: 8,
            },
        ],
    )?;
    Ok(db)
}

fn tuple_for(db: &Database, k: i32) -> Result<Vec<u8>> {
    let schema = db.catalog().schema("t")?;
    schema.encode_tuple(&[Value::Int(k), Value::Str("v".to_string())])
}

#[test]
fn test_insert_and_lookup() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = open_with_table(&dir)?;
    db.create_index("t", "t_k", vec!["k".to_string()], false)?;
    let index = db.registry().index("t", "t_k")?;

    for i in 0..100 {
        index.insert_for_tuple(&tuple_for(&db, i)?, Rid::new(1, i as u32))?;
    }
    for i in 0..100 {
        let key = index.key_from_values(&[Value::Int(i)])?;
        let rid = index.lookup(&key)?;
        assert_eq!(rid, Some(Rid::new(1, i as u32)));
    }
    let missing = index.key_from_values(&[Value::Int(1000)])?;
    assert_eq!(index.lookup(&missing)?, None);
    Ok(())
}

#[test]
fn test_many_inserts_force_splits() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = open_with_table(&dir)?;
    db.create_index("t", "t_k", vec!["k".to_string()], false)?;
    let index = db.registry().index("t", "t_k")?;

    // Far beyond one node's order: several levels of splits.
    let n = 2000i32;
    for i in 0..n {
        // Shuffled-ish order so splits hit middles as well as edges.
        let k = (i * 7919) % n;
        index.insert_for_tuple(&tuple_for(&db, k)?, Rid::new(2, k as u32))?;
    }

    // Every key still findable and the leaf chain is sorted.
    let txn = db.begin()?;
    let mut scan = BTreeScan::open(index.clone(), &txn, None, true, None, true)?;
    let mut count = 0;
    let mut last: Option<i32> = None;
    while let Some((key, rid)) = scan.next()? {
        let k = i32::from_le_bytes([key[0], key[1], key[2], key[3]]);
        if let Some(prev) = last {
            assert!(prev < k, "keys out of order: {} then {}", prev, k);
        }
        assert_eq!(rid, Rid::new(2, k as u32));
        last = Some(k);
        count += 1;
    }
    assert_eq!(count, n);
    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_duplicate_keys_tie_break_on_rid() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = open_with_table(&dir)?;
    db.create_index("t", "t_k", vec!["k".to_string()], false)?;
    let index = db.registry().index("t", "t_k")?;

    let t = tuple_for(&db, 42)?;
    index.insert_for_tuple(&t, Rid::new(1, 3))?;
    index.insert_for_tuple(&t, Rid::new(1, 1))?;
    index.insert_for_tuple(&t, Rid::new(1, 2))?;

    let txn = db.begin()?;
    let low = vec![Value::Int(42)];
    let high = vec![Value::Int(42)];
    let mut scan = BTreeScan::open(index, &txn, Some(&low), true, Some(&high), true)?;
    let mut rids = Vec::new();
    while let Some((_key, rid)) = scan.next()? {
        rids.push(rid);
    }
    assert_eq!(rids, vec![Rid::new(1, 1), Rid::new(1, 2), Rid::new(1, 3)]);
    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_unique_index_rejects_duplicates() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = open_with_table(&dir)?;
    db.create_index("t", "t_k", vec!["k".to_string()], true)?;
    let index = db.registry().index("t", "t_k")?;

    index.insert_for_tuple(&tuple_for(&db, 5)?, Rid::new(1, 0))?;
    match index.insert_for_tuple(&tuple_for(&db, 5)?, Rid::new(1, 1)) {
        Err(DbError::DuplicateKey(_)) => {}
        other => panic!("expected DuplicateKey, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_range_scan_bounds() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = open_with_table(&dir)?;
    db.create_index("t", "t_k", vec!["k".to_string()], false)?;
    let index = db.registry().index("t", "t_k")?;

    for i in 0..50 {
        index.insert_for_tuple(&tuple_for(&db, i)?, Rid::new(1, i as u32))?;
    }

    let txn = db.begin()?;
    let low = vec![Value::Int(10)];
    let high = vec![Value::Int(20)];
    let mut scan = BTreeScan::open(index.clone(), &txn, Some(&low), true, Some(&high), false)?;
    let mut keys = Vec::new();
    while let Some((key, _)) = scan.next()? {
        keys.push(i32::from_le_bytes([key[0], key[1], key[2], key[3]]));
    }
    assert_eq!(keys, (10..20).collect::<Vec<_>>());
    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_remove_with_underflow() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = open_with_table(&dir)?;
    db.create_index("t", "t_k", vec!["k".to_string()], false)?;
    let index = db.registry().index("t", "t_k")?;

    let n = 1500i32;
    for i in 0..n {
        index.insert_for_tuple(&tuple_for(&db, i)?, Rid::new(1, i as u32))?;
    }
    // Remove most entries; merges and redistributions must keep the
    // remainder reachable.
    for i in 0..n {
        if i % 10 != 0 {
            index.delete_for_tuple(&tuple_for(&db, i)?, Rid::new(1, i as u32))?;
        }
    }

    let txn = db.begin()?;
    let mut scan = BTreeScan::open(index.clone(), &txn, None, true, None, true)?;
    let mut keys = Vec::new();
    while let Some((key, _)) = scan.next()? {
        keys.push(i32::from_le_bytes([key[0], key[1], key[2], key[3]]));
    }
    let expected: Vec<i32> = (0..n).filter(|i| i % 10 == 0).collect();
    assert_eq!(keys, expected);
    db.commit(&txn)?;

    // And the removed keys are gone.
    let gone = index.key_from_values(&[Value::Int(11)])?;
    assert_eq!(index.lookup(&gone)?, None);
    Ok(())
}
