//! In-process table, used by tests and by embedders that already hold their rows.

use super::{Row, RowUpdate, TableStore};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct Record {
    row: Row,
    value: String,
    status: String,
}

/// A table held in memory. Every `batch_write` call is recorded.
#[derive(Debug, Default)]
pub struct MemoryTable {
    records: Mutex<Vec<Record>>,
    writes: Mutex<Vec<Vec<RowUpdate>>>,
    fail_writes: Mutex<usize>,
}

impl MemoryTable {
    /// Build a table from rows; row indices are reassigned to their position.
    pub fn new(rows: Vec<Row>) -> Self {
        let records = rows
            .into_iter()
            .enumerate()
            .map(|(i, mut row)| {
                row.row_index = i;
                Record {
                    row,
                    value: String::new(),
                    status: String::new(),
                }
            })
            .collect();

        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    /// Mark a row as already processed.
    pub fn with_value(self, row_index: usize, value: &str) -> Self {
        {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(record) = records.get_mut(row_index) {
                record.value = value.to_string();
            }
        }
        self
    }

    /// Make the next `count` batch writes fail.
    pub fn fail_next_writes(&self, count: usize) {
        *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) = count;
    }

    /// Output value and status currently stored for a row.
    pub fn cell(&self, row_index: usize) -> Option<(String, String)> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .get(row_index)
            .map(|r| (r.value.clone(), r.status.clone()))
    }

    /// Every successful batch write, in call order.
    pub fn writes(&self) -> Vec<Vec<RowUpdate>> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl TableStore for MemoryTable {
    async fn fetch_unprocessed(&self) -> Result<Vec<Row>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .iter()
            .filter(|r| r.value.trim().is_empty())
            .map(|r| r.row.clone())
            .collect())
    }

    async fn batch_write(&self, updates: &[RowUpdate]) -> Result<()> {
        {
            let mut remaining = self.fail_writes.lock().unwrap_or_else(|e| e.into_inner());
            if *remaining > 0 {
                *remaining -= 1;
                anyhow::bail!("simulated batch write failure");
            }
        }

        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        for update in updates {
            let record = records
                .get_mut(update.row_index)
                .ok_or_else(|| anyhow::anyhow!("Row {} out of range", update.row_index))?;
            record.value = update.value.clone();
            record.status = update.status.clone();
        }
        drop(records);

        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(updates.to_vec());
        Ok(())
    }
}
