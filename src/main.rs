use env_logger::Builder;
use log::{info, LevelFilter};

use rmdb::common::{ColType, Value};
use rmdb::execution::{self, Executor, SeqScanExec, SortExec, SortKey, ValuesExec};
use rmdb::execution::InsertExec;
use rmdb::{ColumnMeta, Database, DatabaseConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Builder::new().filter_level(LevelFilter::Info).init();

    let dir = tempfile::tempdir()?;
    let db = Database::open(dir.path(), DatabaseConfig::default())?;

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
    )?;

    let schema = db.catalog().schema("t")?;
    let txn = db.begin()?;

    let source = ValuesExec::new(
        schema.clone(),
        vec![
            vec![Value::Int(1), Value::Str("hello".to_string())],
            vec![Value::Int(2), Value::Str("world".to_string())],
        ],
    );
    let mut insert = InsertExec::new(db.registry(), "t", Box::new(source), txn.clone())?;
    execution::run(&mut insert)?;

    let heap = db.registry().heap("t")?;
    let scan = SeqScanExec::new(heap, schema.clone(), txn.clone());
    let mut sorted = SortExec::new(
        Box::new(scan),
        vec![SortKey {
            col: 0,
            desc: true,
        }],
        db.config().sort_memory_tuples,
        db.config().sort_merge_fanin,
    );
    let rows = execution::run(&mut sorted)?;
    for row in &rows {
        let a = sorted.schema().value_at(&row.data, 0);
        let b = sorted.schema().value_at(&row.data, 1);
        info!("row: a={} b={}", a, b);
    }

    db.commit(&txn)?;
    db.close()?;
    Ok(())
}
