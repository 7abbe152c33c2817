use shared::metrics_defs::{MetricDef, MetricType};

pub const WEBHOOKS_RECEIVED: MetricDef = MetricDef {
    name: "webhooks.received",
    metric_type: MetricType::Counter,
    description: "Webhook requests received. Tagged with result.",
};

pub const BACKEND_CALL_DURATION: MetricDef = MetricDef {
    name: "backend.call.duration",
    metric_type: MetricType::Histogram,
    description: "Spreadsheet call duration in seconds. Tagged with op, backend.",
};

pub const ROWS_CREATED: MetricDef = MetricDef {
    name: "rows.created",
    metric_type: MetricType::Counter,
    description: "Rows appended for summaries that had no row yet",
};

pub const ROWS_SKIPPED: MetricDef = MetricDef {
    name: "rows.skipped",
    metric_type: MetricType::Counter,
    description: "Events dropped because no row matched and creation is disabled",
};

pub const CELLS_WRITTEN: MetricDef = MetricDef {
    name: "cells.written",
    metric_type: MetricType::Counter,
    description: "Cells written to the sheet",
};

pub const PARTIAL_WRITES: MetricDef = MetricDef {
    name: "writes.partial",
    metric_type: MetricType::Counter,
    description: "Update plans where some but not all cells were written",
};

pub const JOB_DURATION: MetricDef = MetricDef {
    name: "jobs.duration",
    metric_type: MetricType::Histogram,
    description: "Time spent on one job attempt in seconds. Tagged with result.",
};

pub const JOBS_COMPLETED: MetricDef = MetricDef {
    name: "jobs.completed",
    metric_type: MetricType::Counter,
    description: "Jobs that finished successfully",
};

pub const JOBS_FAILED: MetricDef = MetricDef {
    name: "jobs.failed",
    metric_type: MetricType::Counter,
    description: "Jobs that exhausted their attempts or failed permanently",
};

pub const JOB_RETRIES: MetricDef = MetricDef {
    name: "jobs.retries",
    metric_type: MetricType::Counter,
    description: "Job attempts scheduled for retry after a transient failure",
};

pub const QUEUE_WAITING: MetricDef = MetricDef {
    name: "queue.waiting",
    metric_type: MetricType::Gauge,
    description: "Jobs waiting for a worker",
};

pub const ALL_METRICS: &[MetricDef] = &[
    WEBHOOKS_RECEIVED,
    BACKEND_CALL_DURATION,
    ROWS_CREATED,
    ROWS_SKIPPED,
    CELLS_WRITTEN,
    PARTIAL_WRITES,
    JOB_DURATION,
    JOBS_COMPLETED,
    JOBS_FAILED,
    JOB_RETRIES,
    QUEUE_WAITING,
];
