//! One event in, one row updated.
//!
//! Every run re-reads the header row and the key column, so decisions are
//! always made against the live sheet. The per-key lock covers the whole
//! locate, create and write sequence.

use crate::applier::{ApplyError, WriteMode, apply};
use crate::backend::{BackendError, Sheet};
use crate::config::ReconcileConfig;
use crate::event::IssueEvent;
use crate::key_lock::KeyLocks;
use crate::mapping::FieldMapping;
use crate::metrics_defs::{ROWS_CREATED, ROWS_SKIPPED};
use crate::normalize::KeyPolicy;
use crate::planner::{RowMissPolicy, UpdatePlanner};
use crate::rows::{RowLookup, canonical_keys, locate_row};
use serde::Serialize;
use shared::counter;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Applied {
        row: u32,
        /// The row was appended by this run
        created: bool,
        cells: usize,
    },
    /// No row matched and row creation is disabled
    #[serde(rename = "row_not_found")]
    Skipped,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

impl ReconcileError {
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Backend(e) => e.is_transient(),
            ReconcileError::Apply(e) => e.is_transient(),
        }
    }
}

pub struct Reconciler {
    sheet: Sheet,
    planner: UpdatePlanner,
    key_policy: KeyPolicy,
    on_missing_row: RowMissPolicy,
    write_mode: WriteMode,
    key_locks: KeyLocks,
}

impl Reconciler {
    pub fn new(sheet: Sheet, mapping: FieldMapping, config: ReconcileConfig) -> Self {
        Self {
            sheet,
            planner: UpdatePlanner::new(mapping, config.columns),
            key_policy: config.key_policy,
            on_missing_row: config.on_missing_row,
            write_mode: config.write_mode,
            key_locks: KeyLocks::new(),
        }
    }

    pub fn key_policy(&self) -> &KeyPolicy {
        &self.key_policy
    }

    pub async fn reconcile(&self, event: &IssueEvent) -> Result<Outcome, ReconcileError> {
        let key = self.key_policy.canonicalize(&event.summary);
        let _guard = self.key_locks.lock(&key).await;

        let headers = if self.planner.strategy().needs_headers() {
            self.sheet.read_header_row().await?
        } else {
            Vec::new()
        };

        let existing = canonical_keys(&self.key_policy, &self.sheet.read_key_column().await?);

        let (row, created) = match locate_row(&key, &existing) {
            RowLookup::Found(row) => (row, false),
            RowLookup::NotFound => match self.on_missing_row {
                RowMissPolicy::Skip => {
                    counter!(ROWS_SKIPPED).increment(1);
                    tracing::info!(
                        key,
                        issue = event.issue_key.as_deref(),
                        "No row for summary, skipping"
                    );
                    return Ok(Outcome::Skipped);
                }
                RowMissPolicy::Create => {
                    let row = self.sheet.append_key_row(&event.summary).await?;
                    counter!(ROWS_CREATED).increment(1);
                    tracing::info!(
                        key,
                        row,
                        issue = event.issue_key.as_deref(),
                        "Created row for summary"
                    );
                    (row, true)
                }
            },
        };

        let plan = self.planner.plan(event, &headers, row);
        let report = apply(&self.sheet, &plan, self.write_mode).await?;

        tracing::debug!(key, row, cells = report.cells_written, "Row updated");
        Ok(Outcome::Applied {
            row,
            created,
            cells: report.cells_written,
        })
    }
}
