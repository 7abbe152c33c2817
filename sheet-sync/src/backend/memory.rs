//! In-process sheet, used by tests and by the `memory` backend for dry runs.
//!
//! Behaves like the Sheets values API where it matters to the reconciler:
//! reads drop trailing blank rows and cells, appends land after the last
//! non-blank row, writes grow the grid as needed. Faults and latency can be
//! injected to exercise timeouts, retries and partial writes.

use crate::a1::{CellAddress, RangeRef, Span};
use crate::backend::{BackendError, CellOutcome, SheetBackend};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Faults {
    /// The next N calls fail as a whole
    failing_calls: u32,
    /// Cell writes still allowed before every further cell write fails
    cell_write_budget: Option<usize>,
}

pub struct InMemorySheet {
    name: String,
    grid: Mutex<Vec<Vec<String>>>,
    faults: Mutex<Faults>,
    latency: Mutex<Duration>,
}

impl InMemorySheet {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            grid: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    pub fn with_rows(name: &str, rows: &[&[&str]]) -> Self {
        let sheet = Self::new(name);
        *sheet.grid.lock() = rows
            .iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect();
        sheet
    }

    pub fn with_headers(name: &str, headers: &[String]) -> Self {
        let sheet = Self::new(name);
        if !headers.is_empty() {
            sheet.grid.lock().push(headers.to_vec());
        }
        sheet
    }

    /// Delay applied to every call before it touches the grid.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Makes the next `calls` backend calls fail with `Unavailable`.
    pub fn fail_next_calls(&self, calls: u32) {
        self.faults.lock().failing_calls = calls;
    }

    /// Lets `cells` more cell writes succeed, then fails each one after.
    pub fn fail_writes_after(&self, cells: usize) {
        self.faults.lock().cell_write_budget = Some(cells);
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    /// Current content of a cell, `""` when blank.
    pub fn cell(&self, address: CellAddress) -> String {
        let grid = self.grid.lock();
        grid.get(address.row as usize - 1)
            .and_then(|row| row.get(address.column as usize - 1))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of rows up to the last non-blank one, header included.
    pub fn row_count(&self) -> usize {
        last_used_row(&self.grid.lock())
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.grid.lock().clone()
    }

    async fn enter(&self, range: &RangeRef) -> Result<(), BackendError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if range.sheet != self.name {
            return Err(BackendError::Rejected {
                status: 400,
                message: format!("Unable to parse range: {range}"),
            });
        }

        let mut faults = self.faults.lock();
        if faults.failing_calls > 0 {
            faults.failing_calls -= 1;
            return Err(BackendError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    fn take_write_permit(&self) -> CellOutcome {
        let mut faults = self.faults.lock();
        match faults.cell_write_budget.as_mut() {
            Some(0) => Err(BackendError::Unavailable("injected write failure".into())),
            Some(budget) => {
                *budget -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn set_cell(&self, address: CellAddress, value: String) {
        let mut grid = self.grid.lock();
        let row = address.row as usize - 1;
        let column = address.column as usize - 1;

        if grid.len() <= row {
            grid.resize(row + 1, Vec::new());
        }
        if grid[row].len() <= column {
            grid[row].resize(column + 1, String::new());
        }
        grid[row][column] = value;
    }
}

fn last_used_row(grid: &[Vec<String>]) -> usize {
    grid.iter()
        .rposition(|row| row.iter().any(|cell| !cell.is_empty()))
        .map_or(0, |index| index + 1)
}

fn single_cell(range: &RangeRef) -> Result<CellAddress, BackendError> {
    match &range.span {
        Span::Cell(address) => Ok(*address),
        _ => Err(BackendError::Rejected {
            status: 400,
            message: format!("expected a single cell, got {range}"),
        }),
    }
}

// Inclusive bounds of a span; `None` means open-ended.
fn bounds(span: &Span) -> (u32, u32, Option<u32>, Option<u32>) {
    match span {
        Span::Cell(cell) => (cell.column, cell.row, Some(cell.column), Some(cell.row)),
        Span::Area { start, end } => (start.column, start.row, Some(end.column), Some(end.row)),
        Span::Rows { first, last } => (1, *first, None, Some(*last)),
        Span::Columns { start, last_column } => (start.column, start.row, Some(*last_column), None),
    }
}

#[async_trait]
impl SheetBackend for InMemorySheet {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn read_range(&self, range: &RangeRef) -> Result<Vec<Vec<String>>, BackendError> {
        self.enter(range).await?;

        let (first_column, first_row, last_column, last_row) = bounds(&range.span);
        let grid = self.grid.lock();
        let last_row = last_row
            .map_or(grid.len(), |r| r as usize)
            .min(grid.len());

        let mut rows: Vec<Vec<String>> = (first_row as usize..=last_row)
            .map(|r| {
                let row = &grid[r - 1];
                let end = last_column.map_or(row.len(), |c| c as usize).min(row.len());
                let mut cells: Vec<String> = row
                    .get(first_column as usize - 1..end)
                    .map(<[String]>::to_vec)
                    .unwrap_or_default();
                while cells.last().is_some_and(String::is_empty) {
                    cells.pop();
                }
                cells
            })
            .collect();

        while rows.last().is_some_and(Vec::is_empty) {
            rows.pop();
        }
        Ok(rows)
    }

    async fn append_row(
        &self,
        range: &RangeRef,
        values: Vec<String>,
    ) -> Result<u32, BackendError> {
        self.enter(range).await?;

        // Sheets may fill a blank row inside the table instead; neither
        // variant moves existing rows.
        let (first_column, first_row, _, _) = bounds(&range.span);
        // Find the slot and fill it under one lock so concurrent appends
        // never share a row
        let mut grid = self.grid.lock();
        let row = (last_used_row(&grid) + 1).max(first_row as usize);
        if grid.len() < row {
            grid.resize(row, Vec::new());
        }
        let cells = &mut grid[row - 1];
        let needed = first_column as usize - 1 + values.len();
        if cells.len() < needed {
            cells.resize(needed, String::new());
        }
        for (offset, value) in values.into_iter().enumerate() {
            cells[first_column as usize - 1 + offset] = value;
        }

        Ok(row as u32)
    }

    async fn write_cell(&self, range: &RangeRef, value: String) -> Result<(), BackendError> {
        self.enter(range).await?;
        let address = single_cell(range)?;
        self.take_write_permit()?;
        self.set_cell(address, value);
        Ok(())
    }

    async fn batch_write(
        &self,
        writes: Vec<(RangeRef, String)>,
    ) -> Result<Vec<CellOutcome>, BackendError> {
        let Some((first, _)) = writes.first() else {
            return Ok(Vec::new());
        };
        self.enter(first).await?;

        let outcomes = writes
            .into_iter()
            .map(|(range, value)| {
                if range.sheet != self.name {
                    return Err(BackendError::Rejected {
                        status: 400,
                        message: format!("Unable to parse range: {range}"),
                    });
                }
                let address = single_cell(&range)?;
                self.take_write_permit()?;
                self.set_cell(address, value);
                Ok(())
            })
            .collect();

        Ok(outcomes)
    }
}
