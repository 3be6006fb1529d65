//! Tabular address records and the store they are read from and written back to.
//!
//! Rows keep their position among *all* data rows of the table, so an
//! update computed from a filtered subset still lands on the right row.

mod memory;
mod sheets;

pub use memory::MemoryTable;
pub use sheets::{column_letter, SheetsTable};

use anyhow::Result;
use async_trait::async_trait;

/// One address record read from the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 0-based position among all data rows (header excluded)
    pub row_index: usize,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl Row {
    pub fn new(
        row_index: usize,
        street: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        postal_code: impl Into<String>,
    ) -> Self {
        Self {
            row_index,
            street: street.into(),
            city: city.into(),
            state: state.into(),
            postal_code: postal_code.into(),
        }
    }

    /// Full address for geocoding: `street, city, state postal`.
    pub fn full_address(&self) -> String {
        format!(
            "{}, {}, {} {}",
            self.street.trim(),
            self.city.trim(),
            self.state.trim(),
            self.postal_code.trim()
        )
    }
}

/// Value and status to write back for one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowUpdate {
    pub row_index: usize,
    pub value: String,
    pub status: String,
}

/// Source of unprocessed rows and sink for their results.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// All rows whose output field is still empty, in table order.
    async fn fetch_unprocessed(&self) -> Result<Vec<Row>>;

    /// Write every update in a single call.
    async fn batch_write(&self, updates: &[RowUpdate]) -> Result<()>;
}
