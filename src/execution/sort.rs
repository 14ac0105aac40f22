use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use crate::catalog::Schema;
use crate::common::{DbError, Result};
use crate::execution::{BoxedExecutor, Executor, Tuple};

#[derive(Debug, Clone, Copy)]
pub struct SortKey {
    pub col: usize,
    pub desc: bool,
}

/// External sort. Phase 1 drains the child into sorted runs of at most the
/// working-memory budget, spilled to owned temp files. Phase 2 merges with a
/// bounded fan-in, multi-pass when the run count exceeds it. Ties keep input
/// order: the stable in-run sort plus run-creation order break them.
pub struct SortExec {
    child: BoxedExecutor,
    keys: Vec<SortKey>,
    memory_tuples: usize,
    fan_in: usize,
    runs: Vec<RunCursor>,
    /// In-memory path when everything fits in the budget.
    resident: Vec<Tuple>,
    resident_pos: usize,
    opened: bool,
}

impl SortExec {
    pub fn new(
        child: BoxedExecutor,
        keys: Vec<SortKey>,
        memory_tuples: usize,
        fan_in: usize,
    ) -> Self {
        Self {
            child,
            keys,
            memory_tuples: memory_tuples.max(1),
            fan_in: fan_in.max(2),
            runs: Vec::new(),
            resident: Vec::new(),
            resident_pos: 0,
            opened: false,
        }
    }

    fn compare(schema: &Schema, keys: &[SortKey], a: &Tuple, b: &Tuple) -> Ordering {
        for key in keys {
            let va = schema.value_at(&a.data, key.col);
            let vb = schema.value_at(&b.data, key.col);
            let ord = va.compare(&vb).unwrap_or(Ordering::Equal);
            let ord = if key.desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn spill_run(&mut self, tuples: &mut Vec<Tuple>) -> Result<()> {
        let schema = self.child.schema().clone();
        let keys = self.keys.clone();
        tuples.sort_by(|a, b| Self::compare(&schema, &keys, a, b));
        let mut writer = BufWriter::new(tempfile::tempfile()?);
        for tuple in tuples.drain(..) {
            write_frame(&mut writer, &tuple.data)?;
        }
        let mut file = writer
            .into_inner()
            .map_err(|e| DbError::Other(format!("Spill flush failed: {}", e)))?;
        file.seek(SeekFrom::Start(0))?;
        self.runs.push(RunCursor::new(file)?);
        Ok(())
    }

    /// Merges the first `fan_in` runs into one new run.
    fn merge_pass(&mut self) -> Result<()> {
        let take = self.fan_in.min(self.runs.len());
        let mut inputs: Vec<RunCursor> = self.runs.drain(..take).collect();
        let schema = self.child.schema().clone();
        let keys = self.keys.clone();

        let mut writer = BufWriter::new(tempfile::tempfile()?);
        loop {
            let mut best: Option<usize> = None;
            for (i, run) in inputs.iter().enumerate() {
                let candidate = match run.peek() {
                    Some(t) => t,
                    None => continue,
                };
                best = match best {
                    None => Some(i),
                    // Earlier run wins ties, preserving stability.
                    Some(j) => match inputs[j].peek() {
                        Some(current)
                            if Self::compare(&schema, &keys, candidate, current)
                                != Ordering::Less =>
                        {
                            Some(j)
                        }
                        _ => Some(i),
                    },
                };
            }
            let i = match best {
                Some(i) => i,
                None => break,
            };
            let tuple = inputs[i]
                .advance()?
                .ok_or_else(|| DbError::Other("Run cursor lost its head".to_string()))?;
            write_frame(&mut writer, &tuple.data)?;
        }
        let mut file = writer
            .into_inner()
            .map_err(|e| DbError::Other(format!("Spill flush failed: {}", e)))?;
        file.seek(SeekFrom::Start(0))?;
        self.runs.insert(0, RunCursor::new(file)?);
        Ok(())
    }

    /// Smallest head among the final runs, ties to the earliest run.
    fn pop_min(&mut self) -> Result<Option<Tuple>> {
        let schema = self.child.schema().clone();
        let keys = self.keys.clone();
        let mut best: Option<usize> = None;
        for i in 0..self.runs.len() {
            let candidate = match self.runs[i].peek() {
                Some(t) => t,
                None => continue,
            };
            best = match best {
                None => Some(i),
                Some(j) => match self.runs[j].peek() {
                    Some(current)
                        if Self::compare(&schema, &keys, candidate, current)
                            != Ordering::Less =>
                    {
                        Some(j)
                    }
                    _ => Some(i),
                },
            };
        }
        match best {
            Some(i) => self.runs[i].advance(),
            None => Ok(None),
        }
    }
}

impl Executor for SortExec {
    fn open(&mut self) -> Result<()> {
        self.child.open()?;
        self.runs.clear();
        self.resident.clear();
        self.resident_pos = 0;

        let mut buffer: Vec<Tuple> = Vec::with_capacity(self.memory_tuples);
        while let Some(tuple) = self.child.next()? {
            buffer.push(tuple);
            if buffer.len() >= self.memory_tuples {
                self.spill_run(&mut buffer)?;
            }
        }

        if self.runs.is_empty() {
            // Everything fit: sort in place, no temp files.
            let schema = self.child.schema().clone();
            let keys = self.keys.clone();
            buffer.sort_by(|a, b| Self::compare(&schema, &keys, a, b));
            self.resident = buffer;
        } else {
            if !buffer.is_empty() {
                self.spill_run(&mut buffer)?;
            }
            while self.runs.len() > self.fan_in {
                self.merge_pass()?;
            }
        }
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if !self.opened {
            return Err(DbError::Other("Sort used before open".to_string()));
        }
        if !self.resident.is_empty() || self.runs.is_empty() {
            if self.resident_pos >= self.resident.len() {
                return Ok(None);
            }
            let tuple = self.resident[self.resident_pos].clone();
            self.resident_pos += 1;
            return Ok(Some(tuple));
        }
        self.pop_min()
    }

    fn close(&mut self) -> Result<()> {
        self.runs.clear();
        self.resident.clear();
        self.opened = false;
        self.child.close()
    }

    fn schema(&self) -> &Schema {
        self.child.schema()
    }
}

fn write_frame(writer: &mut BufWriter<File>, data: &[u8]) -> Result<()> {
    writer.write_all(&(data.len() as u32).to_le_bytes())?;
    writer.write_all(data)?;
    Ok(())
}

/// A spilled sorted run with one buffered lookahead tuple.
struct RunCursor {
    reader: BufReader<File>,
    head: Option<Tuple>,
}

impl RunCursor {
    fn new(file: File) -> Result<Self> {
        let mut cursor = Self {
            reader: BufReader::new(file),
            head: None,
        };
        cursor.head = cursor.read_frame()?;
        Ok(cursor)
    }

    fn peek(&self) -> Option<&Tuple> {
        self.head.as_ref()
    }

    fn advance(&mut self) -> Result<Option<Tuple>> {
        let current = self.head.take();
        self.head = self.read_frame()?;
        Ok(current)
    }

    fn read_frame(&mut self) -> Result<Option<Tuple>> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut data = vec![0u8; len];
        self.reader.read_exact(&mut data)?;
        Ok(Some(Tuple::new(data)))
    }
}
