//! Spreadsheet backends.
//!
//! The reconciler only needs four operations from a spreadsheet: read a
//! range, append a row, write one cell and write many cells. [`SheetBackend`]
//! captures exactly those; [`Sheet`] binds a backend to one tab and bounds
//! every call with a timeout.

pub mod google;
pub mod memory;

use crate::a1::{CellAddress, RangeRef};
use crate::metrics_defs::BACKEND_CALL_DURATION;
use async_trait::async_trait;
use shared::histogram;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Key column of the sheet. Holds the summary each row was created for.
pub const KEY_COLUMN: u32 = 1;
pub const HEADER_ROW: u32 = 1;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("spreadsheet backend unavailable: {0}")]
    Unavailable(String),

    #[error("spreadsheet call timed out: {0}")]
    Timeout(&'static str),

    #[error("spreadsheet backend rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected spreadsheet response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_) | BackendError::Timeout(_))
    }
}

/// Result of one cell within a batch write.
pub type CellOutcome = Result<(), BackendError>;

#[async_trait]
pub trait SheetBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reads a range as rows of display strings. Trailing blank rows and
    /// trailing blank cells within a row may be omitted.
    async fn read_range(&self, range: &RangeRef) -> Result<Vec<Vec<String>>, BackendError>;

    /// Appends a row after the last row of the table found at `range` and
    /// returns the row number it landed on.
    async fn append_row(&self, range: &RangeRef, values: Vec<String>)
    -> Result<u32, BackendError>;

    /// Overwrites a single cell.
    async fn write_cell(&self, range: &RangeRef, value: String) -> Result<(), BackendError>;

    /// Overwrites many cells. The outer error means the call as a whole
    /// failed; otherwise one outcome is returned per write, in order.
    async fn batch_write(
        &self,
        writes: Vec<(RangeRef, String)>,
    ) -> Result<Vec<CellOutcome>, BackendError>;
}

/// One tab of a spreadsheet, reached through a backend.
#[derive(Clone)]
pub struct Sheet {
    backend: Arc<dyn SheetBackend>,
    name: String,
    call_timeout: Duration,
}

impl Sheet {
    pub fn new(backend: Arc<dyn SheetBackend>, name: String, call_timeout: Duration) -> Self {
        Self {
            backend,
            name,
            call_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Header labels of row 1, in column order.
    pub async fn read_header_row(&self) -> Result<Vec<String>, BackendError> {
        let range = RangeRef::row(&self.name, HEADER_ROW);
        let rows = self
            .bounded("read_headers", self.backend.read_range(&range))
            .await?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    /// Raw key-column values of rows 2..N. Blank cells read as `""`.
    pub async fn read_key_column(&self) -> Result<Vec<String>, BackendError> {
        let range = RangeRef::column_from(&self.name, KEY_COLUMN, HEADER_ROW + 1);
        let rows = self
            .bounded("read_keys", self.backend.read_range(&range))
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().next().unwrap_or_default())
            .collect())
    }

    /// Appends a row holding `summary` in the key column; returns its number.
    pub async fn append_key_row(&self, summary: &str) -> Result<u32, BackendError> {
        let range = RangeRef::column_from(&self.name, KEY_COLUMN, HEADER_ROW + 1);
        let row = self
            .bounded(
                "append_row",
                self.backend.append_row(&range, vec![summary.to_string()]),
            )
            .await?;

        if row <= HEADER_ROW {
            return Err(BackendError::InvalidResponse(format!(
                "row appended at {row}, inside the header"
            )));
        }
        Ok(row)
    }

    pub async fn write_cell(&self, address: CellAddress, value: &str) -> Result<(), BackendError> {
        let range = RangeRef::cell(&self.name, address);
        self.bounded(
            "write_cell",
            self.backend.write_cell(&range, value.to_string()),
        )
        .await
    }

    pub async fn batch_write(
        &self,
        writes: &[(CellAddress, String)],
    ) -> Result<Vec<CellOutcome>, BackendError> {
        let ranges = writes
            .iter()
            .map(|(address, value)| (RangeRef::cell(&self.name, *address), value.clone()))
            .collect();

        let outcomes = self
            .bounded("batch_write", self.backend.batch_write(ranges))
            .await?;

        if outcomes.len() != writes.len() {
            return Err(BackendError::InvalidResponse(format!(
                "batch write returned {} outcomes for {} cells",
                outcomes.len(),
                writes.len()
            )));
        }
        Ok(outcomes)
    }

    async fn bounded<T, F>(&self, op: &'static str, call: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        let started = Instant::now();
        let result = tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| BackendError::Timeout(op))
            .and_then(|result| result);

        histogram!(BACKEND_CALL_DURATION, "op" => op, "backend" => self.backend.name())
            .record(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            tracing::warn!(op, sheet = %self.name, error = %e, "Spreadsheet call failed");
        }
        result
    }
}
