//! Executes an [`UpdatePlan`] against a sheet.
//!
//! Both write modes overwrite the same cells with the same values; they only
//! differ in how many calls are made and in how much is known after a
//! failure. A plan that was only partly written is an error, never success.

use crate::a1::CellAddress;
use crate::backend::{BackendError, Sheet};
use crate::metrics_defs::{CELLS_WRITTEN, PARTIAL_WRITES};
use crate::planner::UpdatePlan;
use serde::Deserialize;
use shared::counter;
use std::fmt;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// One batch call for the whole plan
    #[default]
    Batched,
    /// One call per cell, stopping at the first failure
    PerCell,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyReport {
    pub row: u32,
    pub cells_written: usize,
}

/// Addresses rendered as `B2, C2`.
pub struct Addresses<'a>(pub &'a [CellAddress]);

impl fmt::Display for Addresses<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, address) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{address}")?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ApplyError {
    #[error("no cell of row {row} was written: {source}")]
    Failed {
        row: u32,
        uncertain: Vec<CellAddress>,
        source: BackendError,
    },

    #[error(
        "row {row} partially written ({} written, {} uncertain): {source}",
        .written.len(),
        .uncertain.len()
    )]
    PartialWrite {
        row: u32,
        written: Vec<CellAddress>,
        uncertain: Vec<CellAddress>,
        source: BackendError,
    },
}

impl ApplyError {
    pub fn is_transient(&self) -> bool {
        match self {
            ApplyError::Failed { source, .. } | ApplyError::PartialWrite { source, .. } => {
                source.is_transient()
            }
        }
    }
}

pub async fn apply(
    sheet: &Sheet,
    plan: &UpdatePlan,
    mode: WriteMode,
) -> Result<ApplyReport, ApplyError> {
    if plan.is_empty() {
        return Ok(ApplyReport {
            row: plan.row,
            cells_written: 0,
        });
    }

    let result = match mode {
        WriteMode::Batched => apply_batched(sheet, plan).await,
        WriteMode::PerCell => apply_per_cell(sheet, plan).await,
    };

    match &result {
        Ok(report) => {
            counter!(CELLS_WRITTEN).increment(report.cells_written as u64);
        }
        Err(ApplyError::PartialWrite {
            row,
            written,
            uncertain,
            source,
        }) => {
            counter!(CELLS_WRITTEN).increment(written.len() as u64);
            counter!(PARTIAL_WRITES).increment(1);
            tracing::error!(
                sheet = %sheet.name(),
                row,
                written = %Addresses(written),
                uncertain = %Addresses(uncertain),
                error = %source,
                "Row partially written"
            );
        }
        Err(ApplyError::Failed { .. }) => {}
    }
    result
}

async fn apply_batched(sheet: &Sheet, plan: &UpdatePlan) -> Result<ApplyReport, ApplyError> {
    let writes: Vec<(CellAddress, String)> = plan
        .writes
        .iter()
        .map(|w| (w.address, w.value.clone()))
        .collect();

    let outcomes = sheet
        .batch_write(&writes)
        .await
        .map_err(|source| ApplyError::Failed {
            row: plan.row,
            uncertain: addresses(plan),
            source,
        })?;

    let mut written = Vec::new();
    let mut uncertain = Vec::new();
    let mut first_error = None;
    for ((address, _), outcome) in writes.iter().zip(outcomes) {
        match outcome {
            Ok(()) => written.push(*address),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
                uncertain.push(*address);
            }
        }
    }

    settle(plan.row, written, uncertain, first_error)
}

async fn apply_per_cell(sheet: &Sheet, plan: &UpdatePlan) -> Result<ApplyReport, ApplyError> {
    let mut written = Vec::with_capacity(plan.writes.len());

    for (i, write) in plan.writes.iter().enumerate() {
        if let Err(e) = sheet.write_cell(write.address, &write.value).await {
            let uncertain = plan.writes[i..].iter().map(|w| w.address).collect();
            return settle(plan.row, written, uncertain, Some(e));
        }
        written.push(write.address);
    }

    settle(plan.row, written, Vec::new(), None)
}

fn settle(
    row: u32,
    written: Vec<CellAddress>,
    uncertain: Vec<CellAddress>,
    error: Option<BackendError>,
) -> Result<ApplyReport, ApplyError> {
    match error {
        None => Ok(ApplyReport {
            row,
            cells_written: written.len(),
        }),
        Some(source) if written.is_empty() => Err(ApplyError::Failed {
            row,
            uncertain,
            source,
        }),
        Some(source) => Err(ApplyError::PartialWrite {
            row,
            written,
            uncertain,
            source,
        }),
    }
}

fn addresses(plan: &UpdatePlan) -> Vec<CellAddress> {
    plan.writes.iter().map(|w| w.address).collect()
}
