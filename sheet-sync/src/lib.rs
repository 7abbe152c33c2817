pub mod a1;
pub mod applier;
pub mod backend;
pub mod columns;
pub mod config;
pub mod errors;
pub mod event;
pub mod key_lock;
pub mod mapping;
pub mod metrics_defs;
pub mod normalize;
pub mod planner;
pub mod queue;
pub mod reconciler;
pub mod rows;
pub mod service;

use crate::backend::google::{DEFAULT_API_URL, GoogleSheetsClient};
use crate::backend::memory::InMemorySheet;
use crate::backend::{Sheet, SheetBackend};
use crate::config::{BackendConfig, Config, IntakeMode, SpreadsheetConfig};
use crate::errors::BridgeError;
use crate::queue::{JobQueue, spawn_pruner};
use crate::reconciler::Reconciler;
use crate::service::{Intake, WebhookService};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use url::Url;

/// Serves the bridge until ctrl-c. `config` must already have passed
/// [`Config::validate`].
pub async fn run(config: Config) -> Result<(), BridgeError> {
    let backend = build_backend(&config.spreadsheet)?;
    let sheet = Sheet::new(
        backend,
        config.spreadsheet.sheet_name.clone(),
        config.timeouts.backend_call(),
    );
    let reconciler = Arc::new(Reconciler::new(
        sheet,
        config.field_mapping.clone(),
        config.reconcile.clone(),
    ));

    let queue = match config.intake.mode {
        IntakeMode::Queue => Some(JobQueue::new(config.intake.queue_options())),
        IntakeMode::Direct => None,
    };

    let mut workers = Vec::new();
    let mut pruner = None;
    let intake = match &queue {
        Some(queue) => {
            workers = queue.spawn_workers(config.intake.workers, reconciler.clone());
            pruner = Some(spawn_pruner(queue.clone(), config.intake.prune_interval()));
            tracing::info!(workers = config.intake.workers, "Queue workers started");
            Intake::Queue(queue.clone())
        }
        None => Intake::Direct(reconciler.clone()),
    };

    let webhook_service = WebhookService::new(intake, config.reconcile.key_policy);
    let ready_queue = queue.clone();
    let admin_service: AdminService<_, BridgeError> =
        AdminService::new(move || ready_queue.as_ref().is_none_or(JobQueue::is_running));

    let webhook_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        webhook_service,
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::select! {
        result = async { tokio::try_join!(webhook_task, admin_task) } => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    if let Some(queue) = queue {
        queue.shutdown();
        if let Some(pruner) = pruner {
            pruner.abort();
        }
        // Workers exit once the waiting list is drained
        for worker in workers {
            let _ = worker.await;
        }
    }
    Ok(())
}

fn build_backend(config: &SpreadsheetConfig) -> Result<Arc<dyn SheetBackend>, BridgeError> {
    match &config.backend {
        BackendConfig::GoogleSheets {
            spreadsheet_id,
            api_url,
            access_token_env,
        } => {
            let access_token = std::env::var(access_token_env)
                .map_err(|_| BridgeError::MissingCredentials(access_token_env.clone()))?;
            let api_url = match api_url {
                Some(url) => url.clone(),
                None => Url::parse(DEFAULT_API_URL)?,
            };
            tracing::info!(%api_url, spreadsheet_id, "Using Google Sheets backend");
            Ok(Arc::new(GoogleSheetsClient::new(
                api_url,
                spreadsheet_id.clone(),
                access_token,
            )))
        }
        BackendConfig::Memory { headers } => {
            tracing::warn!("Using in-memory sheet, nothing is persisted");
            Ok(Arc::new(InMemorySheet::with_headers(
                &config.sheet_name,
                headers,
            )))
        }
    }
}
