//! Webhook listener.
//!
//! `POST /jira-flow-b` takes a Jira issue event. In queue mode the event is
//! validated, enqueued and acknowledged with its job id; in direct mode it is
//! reconciled before responding. `/jobs` exposes queue counts and per-job
//! status and cancellation.

use crate::errors::BridgeError;
use crate::event::IssueEvent;
use crate::metrics_defs::WEBHOOKS_RECEIVED;
use crate::normalize::KeyPolicy;
use crate::queue::{CancelError, JobId, JobQueue};
use crate::reconciler::Reconciler;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Limited};
use hyper::body::{Body, Bytes};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use shared::counter;
use shared::http::{make_error_response, make_json_response};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

pub const WEBHOOK_PATH: &str = "/jira-flow-b";
const JOBS_PATH: &str = "/jobs";

/// Jira issue payloads are small; anything larger is not an issue event.
const MAX_BODY_BYTES: usize = 1024 * 1024;

type ServiceResponse = Response<BoxBody<Bytes, BridgeError>>;

/// Where accepted events go.
#[derive(Clone)]
pub enum Intake {
    Queue(JobQueue),
    Direct(Arc<Reconciler>),
}

pub struct WebhookService<B> {
    intake: Intake,
    key_policy: KeyPolicy,
    _body: PhantomData<fn(B)>,
}

impl<B> WebhookService<B> {
    pub fn new(intake: Intake, key_policy: KeyPolicy) -> Self {
        Self {
            intake,
            key_policy,
            _body: PhantomData,
        }
    }
}

impl<B> Service<Request<B>> for WebhookService<B>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = ServiceResponse;
    type Error = BridgeError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let intake = self.intake.clone();
        let key_policy = self.key_policy;

        Box::pin(async move {
            let path = req.uri().path().to_string();
            let method = req.method().clone();

            let response = match path.as_str() {
                WEBHOOK_PATH if method == Method::POST => {
                    receive_webhook(intake, key_policy, req.into_body()).await
                }
                WEBHOOK_PATH => make_error_response(StatusCode::METHOD_NOT_ALLOWED),
                JOBS_PATH => match (&intake, method) {
                    (Intake::Queue(queue), Method::GET) => json_response(StatusCode::OK, &queue.counts()),
                    (Intake::Queue(_), _) => make_error_response(StatusCode::METHOD_NOT_ALLOWED),
                    (Intake::Direct(_), _) => make_error_response(StatusCode::NOT_FOUND),
                },
                _ => match (path.strip_prefix("/jobs/"), &intake) {
                    (Some(id), Intake::Queue(queue)) => job_request(queue, id, method),
                    _ => make_error_response(StatusCode::NOT_FOUND),
                },
            };
            Ok(response)
        })
    }
}

async fn receive_webhook<B>(intake: Intake, key_policy: KeyPolicy, body: B) -> ServiceResponse
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let bytes = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            counter!(WEBHOOKS_RECEIVED, "result" => "rejected").increment(1);
            return if e.is::<http_body_util::LengthLimitError>() {
                make_error_response(StatusCode::PAYLOAD_TOO_LARGE)
            } else {
                tracing::debug!(error = %e, "Failed to read request body");
                make_error_response(StatusCode::BAD_REQUEST)
            };
        }
    };

    let event = match IssueEvent::from_slice(&bytes, &key_policy) {
        Ok(event) => event,
        Err(e) => {
            counter!(WEBHOOKS_RECEIVED, "result" => "rejected").increment(1);
            tracing::warn!(error = %e, "Rejected malformed webhook");
            return json_response(
                StatusCode::BAD_REQUEST,
                &json!({"status": "rejected", "error": e.to_string()}),
            );
        }
    };

    match intake {
        Intake::Queue(queue) => match queue.enqueue(event) {
            Ok(job_id) => {
                counter!(WEBHOOKS_RECEIVED, "result" => "accepted").increment(1);
                json_response(
                    StatusCode::OK,
                    &json!({"status": "accepted", "job_id": job_id}),
                )
            }
            Err(e) => {
                counter!(WEBHOOKS_RECEIVED, "result" => "unavailable").increment(1);
                tracing::warn!(error = %e, "Webhook refused");
                make_error_response(StatusCode::SERVICE_UNAVAILABLE)
            }
        },
        Intake::Direct(reconciler) => match reconciler.reconcile(&event).await {
            Ok(outcome) => {
                counter!(WEBHOOKS_RECEIVED, "result" => "applied").increment(1);
                json_response(StatusCode::OK, &outcome)
            }
            Err(e) => {
                counter!(WEBHOOKS_RECEIVED, "result" => "failed").increment(1);
                tracing::error!(
                    summary = %event.summary,
                    issue = event.issue_key.as_deref(),
                    error = %e,
                    "Failed to update sheet"
                );
                make_error_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        },
    }
}

fn job_request(queue: &JobQueue, id: &str, method: Method) -> ServiceResponse {
    let Ok(id) = id.parse::<JobId>() else {
        return make_error_response(StatusCode::NOT_FOUND);
    };

    match method {
        Method::GET => match queue.status(id) {
            Some(status) => json_response(StatusCode::OK, &status),
            None => make_error_response(StatusCode::NOT_FOUND),
        },
        Method::DELETE => match queue.cancel(id) {
            Ok(()) => json_response(
                StatusCode::OK,
                &json!({"status": "cancelled", "job_id": id}),
            ),
            Err(CancelError::NotFound(_)) => make_error_response(StatusCode::NOT_FOUND),
            Err(CancelError::AlreadyStarted(_)) => make_error_response(StatusCode::CONFLICT),
        },
        _ => make_error_response(StatusCode::METHOD_NOT_ALLOWED),
    }
}

fn json_response(status: StatusCode, body: &impl Serialize) -> ServiceResponse {
    match serde_json::to_vec(body) {
        Ok(body) => make_json_response(status, body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response");
            make_error_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
