use std::sync::{Arc, Barrier};

use rmdb::common::{ColType, DbError, Result, Value};
use rmdb::execution::{
    self, AggFunc, AggregateExec, CompOp, Condition, Executor, FilterExec, IndexScanExec,
    InsertExec, MergeJoinExec, NestedLoopJoinExec, Operand, SeqScanExec, SortExec, SortKey,
    ValuesExec,
};
use rmdb::{ColumnMeta, Database, DatabaseConfig};

fn int_col(name: &str) -> ColumnMeta {
    ColumnMeta {
        name: name.to_string(),
        ty: ColType::Int,
        len: 4,
    }
}

fn str_col(name: &str, len: usize) -> ColumnMeta {
    ColumnMeta {
        name: name.to_string(),
        ty: ColType::Str,
        len,
    }
}

fn insert_rows(db: &Database, table: &str, rows: Vec<Vec<Value>>) -> Result<()> {
    let schema = db.catalog().schema(table)?;
    let txn = db.begin()?;
    let source = ValuesExec::new(schema, rows);
    let mut insert = InsertExec::new(db.registry(), table, Box::new(source), txn.clone())?;
    execution::run(&mut insert)?;
    db.commit(&txn)?;
    Ok(())
}

fn ints(schema: &rmdb::Schema, row: &execution::Tuple) -> Vec<i32> {
    (0..schema.columns().len())
        .filter_map(|i| match schema.value_at(&row.data, i) {
            Value::Int(v) => Some(v),
            _ => None,
        })
        .collect()
}

#[test]
fn test_insert_and_scan_order_by_desc() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    db.create_table("t", vec![int_col("a"), str_col("b", 8)])?;
    insert_rows(
        &db,
        "t",
        vec![
            vec![Value::Int(1), Value::Str("hello".to_string())],
            vec![Value::Int(2), Value::Str("world".to_string())],
        ],
    )?;

    let schema = db.catalog().schema("t")?;
    let txn = db.begin()?;
    let scan = SeqScanExec::new(db.registry().heap("t")?, schema.clone(), txn.clone());
    let mut sorted = SortExec::new(
        Box::new(scan),
        vec![SortKey { col: 0, desc: true }],
        1024,
        8,
    );
    let rows = execution::run(&mut sorted)?;
    db.commit(&txn)?;

    assert_eq!(rows.len(), 2);
    assert_eq!(schema.value_at(&rows[0].data, 0), Value::Int(2));
    assert_eq!(
        schema.value_at(&rows[0].data, 1),
        Value::Str("world".to_string())
    );
    assert_eq!(schema.value_at(&rows[1].data, 0), Value::Int(1));
    assert_eq!(
        schema.value_at(&rows[1].data, 1),
        Value::Str("hello".to_string())
    );
    Ok(())
}

fn setup_join_tables(db: &Database) -> Result<()> {
    db.create_table("l", vec![int_col("k"), int_col("v")])?;
    db.create_table("r", vec![int_col("k"), int_col("w")])?;
    insert_rows(
        db,
        "l",
        vec![
            vec![Value::Int(1), Value::Int(10)],
            vec![Value::Int(2), Value::Int(20)],
            vec![Value::Int(2), Value::Int(21)],
            vec![Value::Int(3), Value::Int(30)],
        ],
    )?;
    insert_rows(
        db,
        "r",
        vec![
            vec![Value::Int(2), Value::Int(200)],
            vec![Value::Int(2), Value::Int(201)],
            vec![Value::Int(4), Value::Int(400)],
        ],
    )?;
    Ok(())
}

#[test]
fn test_sort_merge_join() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    setup_join_tables(&db)?;

    let txn = db.begin()?;
    let l_schema = db.catalog().schema("l")?;
    let r_schema = db.catalog().schema("r")?;

    let l_scan = SeqScanExec::new(db.registry().heap("l")?, l_schema, txn.clone());
    let r_scan = SeqScanExec::new(db.registry().heap("r")?, r_schema, txn.clone());
    let l_sorted = SortExec::new(
        Box::new(l_scan),
        vec![SortKey { col: 0, desc: false }],
        1024,
        8,
    );
    let r_sorted = SortExec::new(
        Box::new(r_scan),
        vec![SortKey { col: 0, desc: false }],
        1024,
        8,
    );
    let mut join = MergeJoinExec::new(
        Box::new(l_sorted),
        Box::new(r_sorted),
        0,
        0,
        Vec::new(),
    );
    let rows = execution::run(&mut join)?;
    db.commit(&txn)?;

    let schema = join.schema().clone();
    let got: Vec<Vec<i32>> = rows.iter().map(|r| ints(&schema, r)).collect();
    assert_eq!(
        got,
        vec![
            vec![2, 20, 2, 200],
            vec![2, 20, 2, 201],
            vec![2, 21, 2, 200],
            vec![2, 21, 2, 201],
        ]
    );
    Ok(())
}

#[test]
fn test_nested_loop_join_matches_merge_join() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    setup_join_tables(&db)?;

    let txn = db.begin()?;
    let l_schema = db.catalog().schema("l")?;
    let r_schema = db.catalog().schema("r")?;

    let l_scan = SeqScanExec::new(db.registry().heap("l")?, l_schema, txn.clone());
    let r_scan = SeqScanExec::new(db.registry().heap("r")?, r_schema, txn.clone());
    // l.k = r.k resolved against the joined layout (l cols then r cols).
    let cond = Condition::new(0, CompOp::Eq, Operand::Col(2));
    let mut join = NestedLoopJoinExec::new(Box::new(l_scan), Box::new(r_scan), vec![cond]);
    let rows = execution::run(&mut join)?;
    db.commit(&txn)?;
    assert_eq!(rows.len(), 4);
    Ok(())
}

#[test]
fn test_grouped_aggregation() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    setup_join_tables(&db)?;

    let txn = db.begin()?;
    let schema = db.catalog().schema("l")?;
    let scan = SeqScanExec::new(db.registry().heap("l")?, schema, txn.clone());
    let mut agg = AggregateExec::new(
        Box::new(scan),
        vec![0],
        vec![AggFunc::Sum(1), AggFunc::CountStar],
        Vec::new(),
        false,
        4096,
    );
    let rows = execution::run(&mut agg)?;
    db.commit(&txn)?;

    let schema = agg.schema().clone();
    let got: Vec<Vec<i32>> = rows.iter().map(|r| ints(&schema, r)).collect();
    assert_eq!(got, vec![vec![1, 10, 1], vec![2, 41, 2], vec![3, 30, 1]]);
    Ok(())
}

#[test]
fn test_streaming_aggregation_over_sorted_input() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    setup_join_tables(&db)?;

    let txn = db.begin()?;
    let schema = db.catalog().schema("l")?;
    let scan = SeqScanExec::new(db.registry().heap("l")?, schema, txn.clone());
    // Sorted on the group key: the aggregate streams one group at a time.
    let sorted = SortExec::new(
        Box::new(scan),
        vec![SortKey { col: 0, desc: false }],
        1024,
        8,
    );
    let mut agg = AggregateExec::new(
        Box::new(sorted),
        vec![0],
        vec![AggFunc::Sum(1), AggFunc::CountStar],
        Vec::new(),
        true,
        4096,
    );
    let rows = execution::run(&mut agg)?;
    db.commit(&txn)?;

    // Parity with the hashed path.
    let schema = agg.schema().clone();
    let got: Vec<Vec<i32>> = rows.iter().map(|r| ints(&schema, r)).collect();
    assert_eq!(got, vec![vec![1, 10, 1], vec![2, 41, 2], vec![3, 30, 1]]);
    Ok(())
}

#[test]
fn test_streaming_count_over_empty_input() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    db.create_table("e", vec![int_col("x")])?;

    let txn = db.begin()?;
    let schema = db.catalog().schema("e")?;

    // COUNT(*) with no GROUP BY over zero rows: exactly one row with 0,
    // in streaming mode as well as hashed mode.
    let scan = SeqScanExec::new(db.registry().heap("e")?, schema.clone(), txn.clone());
    let mut streaming = AggregateExec::new(
        Box::new(scan),
        Vec::new(),
        vec![AggFunc::CountStar],
        Vec::new(),
        true,
        4096,
    );
    let rows = execution::run(&mut streaming)?;
    assert_eq!(rows.len(), 1);
    let out_schema = streaming.schema().clone();
    assert_eq!(out_schema.value_at(&rows[0].data, 0), Value::Int(0));

    let scan = SeqScanExec::new(db.registry().heap("e")?, schema.clone(), txn.clone());
    let mut hashed = AggregateExec::new(
        Box::new(scan),
        Vec::new(),
        vec![AggFunc::CountStar],
        Vec::new(),
        false,
        4096,
    );
    let rows = execution::run(&mut hashed)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(
        hashed.schema().value_at(&rows[0].data, 0),
        Value::Int(0)
    );

    // A non-COUNT aggregate over the same empty input emits nothing.
    let scan = SeqScanExec::new(db.registry().heap("e")?, schema, txn.clone());
    let mut sums = AggregateExec::new(
        Box::new(scan),
        Vec::new(),
        vec![AggFunc::Sum(0)],
        Vec::new(),
        true,
        4096,
    );
    let rows = execution::run(&mut sums)?;
    assert!(rows.is_empty());
    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_aggregation_having_filter() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    setup_join_tables(&db)?;

    let txn = db.begin()?;
    let schema = db.catalog().schema("l")?;
    let scan = SeqScanExec::new(db.registry().heap("l")?, schema, txn.clone());
    // HAVING count(*) > 1 over output columns (k, sum, count).
    let having = Condition::new(2, CompOp::Gt, Operand::Const(Value::Int(1)));
    let mut agg = AggregateExec::new(
        Box::new(scan),
        vec![0],
        vec![AggFunc::Sum(1), AggFunc::CountStar],
        vec![having],
        false,
        4096,
    );
    let rows = execution::run(&mut agg)?;
    db.commit(&txn)?;

    let schema = agg.schema().clone();
    let got: Vec<Vec<i32>> = rows.iter().map(|r| ints(&schema, r)).collect();
    assert_eq!(got, vec![vec![2, 41, 2]]);
    Ok(())
}

#[test]
fn test_aggregation_spills_past_memory_budget() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    db.create_table("n", vec![int_col("g"), int_col("v")])?;
    let rows: Vec<Vec<Value>> = (0..200)
        .map(|i| vec![Value::Int(i % 50), Value::Int(1)])
        .collect();
    insert_rows(&db, "n", rows)?;

    let txn = db.begin()?;
    let schema = db.catalog().schema("n")?;
    let scan = SeqScanExec::new(db.registry().heap("n")?, schema, txn.clone());
    // Budget far below the 50 distinct groups: the overflow spills.
    let mut agg = AggregateExec::new(
        Box::new(scan),
        vec![0],
        vec![AggFunc::CountStar],
        Vec::new(),
        false,
        8,
    );
    let rows = execution::run(&mut agg)?;
    db.commit(&txn)?;

    assert_eq!(rows.len(), 50);
    let schema = agg.schema().clone();
    for row in &rows {
        assert_eq!(schema.value_at(&row.data, 1), Value::Int(4));
    }
    Ok(())
}

#[test]
fn test_external_sort_with_spill() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    db.create_table("s", vec![int_col("x")])?;
    let rows: Vec<Vec<Value>> = (0..300)
        .map(|i| vec![Value::Int((i * 7717) % 300)])
        .collect();
    insert_rows(&db, "s", rows)?;

    let txn = db.begin()?;
    let schema = db.catalog().schema("s")?;
    let scan = SeqScanExec::new(db.registry().heap("s")?, schema.clone(), txn.clone());
    // Tiny run budget and fan-in to force spilling and a multi-pass merge.
    let mut sorted = SortExec::new(
        Box::new(scan),
        vec![SortKey { col: 0, desc: false }],
        16,
        3,
    );
    let rows = execution::run(&mut sorted)?;
    db.commit(&txn)?;

    let got: Vec<i32> = rows
        .iter()
        .map(|r| match schema.value_at(&r.data, 0) {
            Value::Int(v) => v,
            _ => unreachable!(),
        })
        .collect();
    let expected: Vec<i32> = (0..300).collect();
    assert_eq!(got, expected);
    Ok(())
}

#[test]
fn test_abort_discards_inserted_rows() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    db.create_table("t", vec![int_col("a"), str_col("b", 8)])?;

    let heap = db.registry().heap("t")?;
    let pages_before = heap.total_pages()?;

    let txn_a = db.begin()?;
    let schema = db.catalog().schema("t")?;
    let source = ValuesExec::new(
        schema.clone(),
        vec![vec![Value::Int(9), Value::Str("x".to_string())]],
    );
    let mut insert = InsertExec::new(db.registry(), "t", Box::new(source), txn_a.clone())?;
    execution::run(&mut insert)?;
    db.abort(&txn_a)?;

    let txn_b = db.begin()?;
    let mut scan = SeqScanExec::new(heap.clone(), schema, txn_b.clone());
    let rows = execution::run(&mut scan)?;
    db.commit(&txn_b)?;
    assert!(rows.is_empty());
    // Heap file page count unchanged from before the aborted transaction
    // (the abort leaves the slot free; the allocated page remains).
    assert!(heap.total_pages()? >= pages_before);
    Ok(())
}

#[test]
fn test_filter_with_in_list() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    setup_join_tables(&db)?;

    let txn = db.begin()?;
    let schema = db.catalog().schema("l")?;
    let scan = SeqScanExec::new(db.registry().heap("l")?, schema, txn.clone());
    let cond = Condition::new(
        0,
        CompOp::In,
        Operand::ConstList(vec![Value::Int(1), Value::Int(3)]),
    );
    let mut filter = FilterExec::new(Box::new(scan), vec![cond]);
    let rows = execution::run(&mut filter)?;
    db.commit(&txn)?;
    assert_eq!(rows.len(), 2);
    Ok(())
}

#[test]
fn test_index_scan_returns_ordered_range() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), DatabaseConfig::default())?;
    db.create_table("t", vec![int_col("a"), str_col("b", 8)])?;
    db.create_index("t", "t_a", vec!["a".to_string()], false)?;

    let rows: Vec<Vec<Value>> = [5, 1, 9, 3, 7]
        .iter()
        .map(|&i| vec![Value::Int(i), Value::Str("r".to_string())])
        .collect();
    insert_rows(&db, "t", rows)?;

    let txn = db.begin()?;
    let schema = db.catalog().schema("t")?;
    let mut scan = IndexScanExec::new(
        db.registry().index("t", "t_a")?,
        db.registry().heap("t")?,
        schema.clone(),
        txn.clone(),
        Some(vec![Value::Int(3)]),
        true,
        Some(vec![Value::Int(7)]),
        true,
    );
    let rows = execution::run(&mut scan)?;
    db.commit(&txn)?;

    let got: Vec<i32> = rows
        .iter()
        .map(|r| match schema.value_at(&r.data, 0) {
            Value::Int(v) => v,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(got, vec![3, 5, 7]);
    Ok(())
}

#[test]
fn test_deadlock_one_transaction_wins() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Arc::new(Database::open(dir.path(), DatabaseConfig::default())?);
    db.create_table("t", vec![int_col("a"), str_col("b", 8)])?;

    let heap = db.registry().heap("t")?;
    let schema = db.catalog().schema("t")?;
    let setup = db.begin()?;
    let r1 = heap.insert(
        &setup,
        &schema.encode_tuple(&[Value::Int(1), Value::Str("r1".to_string())])?,
    )?;
    let r2 = heap.insert(
        &setup,
        &schema.encode_tuple(&[Value::Int(2), Value::Str("r2".to_string())])?,
    )?;
    db.commit(&setup)?;

    let txn_a = db.begin()?;
    let txn_b = db.begin()?;

    let row_a1 = schema.encode_tuple(&[Value::Int(10), Value::Str("a1".to_string())])?;
    let row_a2 = schema.encode_tuple(&[Value::Int(11), Value::Str("a2".to_string())])?;
    let row_b1 = schema.encode_tuple(&[Value::Int(20), Value::Str("b1".to_string())])?;
    let row_b2 = schema.encode_tuple(&[Value::Int(21), Value::Str("b2".to_string())])?;

    heap.update(&txn_a, r1, &row_a1)?;
    heap.update(&txn_b, r2, &row_b2)?;

    let barrier = Arc::new(Barrier::new(2));
    let barrier_a = Arc::clone(&barrier);
    let db_a = Arc::clone(&db);
    let heap_a = heap.clone();
    let txn_a_thread = txn_a.clone();
    let handle = std::thread::spawn(move || -> std::result::Result<bool, DbError> {
        barrier_a.wait();
        match heap_a.update(&txn_a_thread, r2, &row_a2) {
            Ok(()) => {
                db_a.commit(&txn_a_thread)?;
                Ok(true)
            }
            Err(DbError::DeadlockVictim) | Err(DbError::LockTimeout) => {
                db_a.abort(&txn_a_thread)?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    });

    barrier.wait();
    let b_won = match heap.update(&txn_b, r1, &row_b1) {
        Ok(()) => {
            db.commit(&txn_b)?;
            true
        }
        Err(DbError::DeadlockVictim) | Err(DbError::LockTimeout) => {
            db.abort(&txn_b)?;
            false
        }
        Err(e) => return Err(e),
    };

    let a_won = handle
        .join()
        .map_err(|_| DbError::Other("thread panicked".to_string()))??;

    // Exactly one of the two survives the cycle.
    assert!(a_won ^ b_won, "a_won={} b_won={}", a_won, b_won);
    db.close()?;
    Ok(())
}
