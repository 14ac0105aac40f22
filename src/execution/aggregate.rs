use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use crate::catalog::Schema;
use crate::common::{ColType, DbError, Result, Value};
use crate::execution::{BoxedExecutor, Condition, Executor, Tuple};

const SPILL_PARTITIONS: usize = 8;

/// Supported aggregate functions, referencing child columns by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    CountStar,
    Count(usize),
    Sum(usize),
    Avg(usize),
    Min(usize),
    Max(usize),
}

impl AggFunc {
    fn arg(&self) -> Option<usize> {
        match self {
            AggFunc::CountStar => None,
            AggFunc::Count(c) | AggFunc::Sum(c) | AggFunc::Avg(c) | AggFunc::Min(c)
            | AggFunc::Max(c) => Some(*c),
        }
    }

    fn is_count(&self) -> bool {
        matches!(self, AggFunc::CountStar | AggFunc::Count(_))
    }

    fn output_column(&self, input: &Schema) -> (String, ColType, usize) {
        let named = |prefix: &str, col: usize| {
            format!("{}({})", prefix, input.columns()[col].name)
        };
        match self {
            AggFunc::CountStar => ("count(*)".to_string(), ColType::Int, 4),
            AggFunc::Count(c) => (named("count", *c), ColType::Int, 4),
            AggFunc::Sum(c) => {
                let col = &input.columns()[*c];
                (named("sum", *c), col.ty, col.len)
            }
            AggFunc::Avg(c) => (named("avg", *c), ColType::Float, 4),
            AggFunc::Min(c) => {
                let col = &input.columns()[*c];
                (named("min", *c), col.ty, col.len)
            }
            AggFunc::Max(c) => {
                let col = &input.columns()[*c];
                (named("max", *c), col.ty, col.len)
            }
        }
    }
}

/// Running state for one aggregate within one group. SUM and count are
/// carried separately for AVG.
#[derive(Debug, Clone)]
enum Acc {
    Count(i32),
    SumInt(i32),
    SumFloat(f32),
    Avg { sum: f32, count: i32 },
    Min(Option<Value>),
    Max(Option<Value>),
}

impl Acc {
    fn new(func: &AggFunc, input: &Schema) -> Acc {
        match func {
            AggFunc::CountStar | AggFunc::Count(_) => Acc::Count(0),
            AggFunc::Sum(c) => match input.columns()[*c].ty {
                ColType::Float => Acc::SumFloat(0.0),
                _ => Acc::SumInt(0),
            },
            AggFunc::Avg(_) => Acc::Avg { sum: 0.0, count: 0 },
            AggFunc::Min(_) => Acc::Min(None),
            AggFunc::Max(_) => Acc::Max(None),
        }
    }

    fn update(&mut self, value: Option<Value>) {
        match self {
            Acc::Count(n) => *n += 1,
            Acc::SumInt(total) => {
                if let Some(Value::Int(v)) = value {
                    *total += v;
                }
            }
            Acc::SumFloat(total) => match value {
                Some(Value::Float(v)) => *total += v,
                Some(Value::Int(v)) => *total += v as f32,
                _ => {}
            },
            Acc::Avg { sum, count } => {
                match value {
                    Some(Value::Float(v)) => *sum += v,
                    Some(Value::Int(v)) => *sum += v as f32,
                    _ => return,
                }
                *count += 1;
            }
            Acc::Min(best) => {
                if let Some(v) = value {
                    let replace = match best {
                        Some(b) => matches!(
                            v.compare(b),
                            Ok(std::cmp::Ordering::Less)
                        ),
                        None => true,
                    };
                    if replace {
                        *best = Some(v);
                    }
                }
            }
            Acc::Max(best) => {
                if let Some(v) = value {
                    let replace = match best {
                        Some(b) => matches!(
                            v.compare(b),
                            Ok(std::cmp::Ordering::Greater)
                        ),
                        None => true,
                    };
                    if replace {
                        *best = Some(v);
                    }
                }
            }
        }
    }

    fn finish(&self) -> Option<Value> {
        match self {
            Acc::Count(n) => Some(Value::Int(*n)),
            Acc::SumInt(total) => Some(Value::Int(*total)),
            Acc::SumFloat(total) => Some(Value::Float(*total)),
            Acc::Avg { sum, count } => {
                if *count == 0 {
                    None
                } else {
                    Some(Value::Float(*sum / *count as f32))
                }
            }
            Acc::Min(best) | Acc::Max(best) => best.clone(),
        }
    }
}

/// Grouped aggregation. A sorted input streams one group at a time; an
/// unsorted input builds an in-memory hash table and spills overflow groups
/// to hash partitions that are aggregated after the resident ones.
pub struct AggregateExec {
    child: BoxedExecutor,
    group_by: Vec<usize>,
    aggs: Vec<AggFunc>,
    having: Vec<Condition>,
    input_sorted: bool,
    memory_groups: usize,
    schema: Schema,
    output: VecDeque<Tuple>,
    stream_group: Option<(Vec<Value>, Vec<Acc>)>,
    stream_saw_input: bool,
    stream_finished: bool,
    opened: bool,
    hashed: bool,
}

impl AggregateExec {
    pub fn new(
        child: BoxedExecutor,
        group_by: Vec<usize>,
        aggs: Vec<AggFunc>,
        having: Vec<Condition>,
        input_sorted: bool,
        memory_groups: usize,
    ) -> Self {
        let input = child.schema();
        let mut cols: Vec<(String, ColType, usize)> = group_by
            .iter()
            .map(|&i| {
                let c = &input.columns()[i];
                (c.name.clone(), c.ty, c.len)
            })
            .collect();
        for agg in &aggs {
            cols.push(agg.output_column(input));
        }
        let schema = Schema::new(cols);
        Self {
            child,
            group_by,
            aggs,
            having,
            input_sorted,
            memory_groups: memory_groups.max(1),
            schema,
            output: VecDeque::new(),
            stream_group: None,
            stream_saw_input: false,
            stream_finished: false,
            opened: false,
            hashed: false,
        }
    }

    fn group_key(&self, tuple: &Tuple) -> Vec<Value> {
        let input = self.child.schema();
        self.group_by
            .iter()
            .map(|&i| input.value_at(&tuple.data, i))
            .collect()
    }

    fn new_accs(&self) -> Vec<Acc> {
        self.aggs
            .iter()
            .map(|f| Acc::new(f, self.child.schema()))
            .collect()
    }

    fn update_accs(&self, accs: &mut [Acc], tuple: &Tuple) {
        let input = self.child.schema();
        for (func, acc) in self.aggs.iter().zip(accs.iter_mut()) {
            let value = func.arg().map(|c| input.value_at(&tuple.data, c));
            acc.update(value);
        }
    }

    /// Encodes one output row, applying HAVING. Returns None for a filtered
    /// row or a group whose aggregates are all absent.
    fn emit(&self, key: &[Value], accs: &[Acc]) -> Result<Option<Tuple>> {
        let mut values: Vec<Value> = key.to_vec();
        for acc in accs {
            match acc.finish() {
                Some(v) => values.push(v),
                None => return Ok(None), // empty-group non-COUNT aggregate
            }
        }
        let data = self.schema.encode_tuple(&values)?;
        if !Condition::eval_all(&self.having, &self.schema, &data)? {
            return Ok(None);
        }
        Ok(Some(Tuple::new(data)))
    }

    fn next_streaming(&mut self) -> Result<Option<Tuple>> {
        if self.stream_finished {
            return Ok(None);
        }
        loop {
            match self.child.next()? {
                Some(tuple) => {
                    self.stream_saw_input = true;
                    let key = self.group_key(&tuple);
                    let same_group =
                        matches!(&self.stream_group, Some((current, _)) if *current == key);
                    if same_group {
                        if let Some((k, mut accs)) = self.stream_group.take() {
                            self.update_accs(&mut accs, &tuple);
                            self.stream_group = Some((k, accs));
                        }
                    } else {
                        let finished = self.stream_group.take();
                        let mut accs = self.new_accs();
                        self.update_accs(&mut accs, &tuple);
                        self.stream_group = Some((key, accs));
                        if let Some((done_key, done_accs)) = finished {
                            if let Some(row) = self.emit(&done_key, &done_accs)? {
                                return Ok(Some(row));
                            }
                        }
                    }
                }
                None => {
                    if let Some((key, accs)) = self.stream_group.take() {
                        if let Some(row) = self.emit(&key, &accs)? {
                            return Ok(Some(row));
                        }
                        continue;
                    }
                    self.stream_finished = true;
                    // Same empty-input rule as the hashed path: with no
                    // GROUP BY, a row comes out only when every aggregate is
                    // a COUNT.
                    if self.group_by.is_empty()
                        && !self.stream_saw_input
                        && !self.aggs.is_empty()
                        && self.aggs.iter().all(|a| a.is_count())
                    {
                        let accs = self.new_accs();
                        return self.emit(&[], &accs);
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Consumes the whole child into the hash table, spilling overflow to
    /// partitions by group-key hash and aggregating those afterwards.
    fn build_hashed(&mut self) -> Result<()> {
        let mut groups: HashMap<Vec<Value>, Vec<Acc>> = HashMap::new();
        let mut partitions: Option<Vec<BufWriter<File>>> = None;
        let mut spilled = 0usize;
        let mut saw_input = false;

        while let Some(tuple) = self.child.next()? {
            saw_input = true;
            let key = self.group_key(&tuple);
            if groups.contains_key(&key) || groups.len() < self.memory_groups {
                let accs = groups.entry(key).or_insert_with(|| self.new_accs());
                self.update_accs(accs, &tuple);
            } else {
                if partitions.is_none() {
                    let mut files = Vec::with_capacity(SPILL_PARTITIONS);
                    for _ in 0..SPILL_PARTITIONS {
                        files.push(BufWriter::new(tempfile::tempfile()?));
                    }
                    partitions = Some(files);
                }
                if let Some(parts) = partitions.as_mut() {
                    let mut hasher = DefaultHasher::new();
                    key.hash(&mut hasher);
                    let slot = (hasher.finish() as usize) % SPILL_PARTITIONS;
                    let w = &mut parts[slot];
                    w.write_all(&(tuple.data.len() as u32).to_le_bytes())?;
                    w.write_all(&tuple.data)?;
                    spilled += 1;
                }
            }
        }

        let mut emitted: Vec<(Vec<Value>, Vec<Acc>)> = groups.into_iter().collect();
        // Deterministic output order for tests and stable clients.
        emitted.sort_by(|a, b| cmp_keys(&a.0, &b.0));
        for (key, accs) in &emitted {
            if let Some(row) = self.emit(key, accs)? {
                self.output.push_back(row);
            }
        }

        if let Some(parts) = partitions {
            log::debug!("aggregation spilled {} tuples to partitions", spilled);
            for writer in parts {
                let mut file = writer
                    .into_inner()
                    .map_err(|e| DbError::Other(format!("Spill flush failed: {}", e)))?;
                file.seek(SeekFrom::Start(0))?;
                self.aggregate_partition(file)?;
            }
        }

        // A global aggregate over an empty input emits a row only when every
        // aggregate is a COUNT.
        if self.group_by.is_empty() && !saw_input {
            if !self.aggs.is_empty() && self.aggs.iter().all(|a| a.is_count()) {
                let accs = self.new_accs();
                let key: Vec<Value> = Vec::new();
                if let Some(row) = self.emit(&key, &accs)? {
                    self.output.push_back(row);
                }
            }
        }
        Ok(())
    }

    fn aggregate_partition(&mut self, file: File) -> Result<()> {
        let mut reader = BufReader::new(file);
        let mut groups: HashMap<Vec<Value>, Vec<Acc>> = HashMap::new();
        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut data = vec![0u8; len];
            reader.read_exact(&mut data)?;
            let tuple = Tuple::new(data);
            let key = self.group_key(&tuple);
            let mut accs = groups
                .remove(&key)
                .unwrap_or_else(|| self.new_accs());
            self.update_accs(&mut accs, &tuple);
            groups.insert(key, accs);
        }
        let mut emitted: Vec<(Vec<Value>, Vec<Acc>)> = groups.into_iter().collect();
        emitted.sort_by(|a, b| cmp_keys(&a.0, &b.0));
        for (key, accs) in &emitted {
            if let Some(row) = self.emit(key, accs)? {
                self.output.push_back(row);
            }
        }
        Ok(())
    }
}

fn cmp_keys(a: &[Value], b: &[Value]) -> std::cmp::Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.compare(y) {
            Ok(ord) if ord != std::cmp::Ordering::Equal => return ord,
            _ => {}
        }
    }
    std::cmp::Ordering::Equal
}

impl Executor for AggregateExec {
    fn open(&mut self) -> Result<()> {
        self.child.open()?;
        self.output.clear();
        self.stream_group = None;
        self.stream_saw_input = false;
        self.stream_finished = false;
        self.hashed = false;
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if !self.opened {
            return Err(DbError::Other("Aggregate used before open".to_string()));
        }
        if self.input_sorted {
            return self.next_streaming();
        }
        if !self.hashed {
            self.build_hashed()?;
            self.hashed = true;
        }
        Ok(self.output.pop_front())
    }

    fn close(&mut self) -> Result<()> {
        self.output.clear();
        self.stream_group = None;
        self.stream_saw_input = false;
        self.stream_finished = false;
        self.opened = false;
        self.child.close()
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
