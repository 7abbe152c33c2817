//! Google Sheets v4 values API.
//!
//! Only the four calls the reconciler needs are implemented. All writes use
//! `valueInputOption=RAW` so cell text is stored exactly as cleaned. The
//! bearer token is obtained elsewhere and handed in at construction.

use crate::a1::RangeRef;
use crate::backend::{BackendError, CellOutcome, SheetBackend};
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://sheets.googleapis.com/";

const VALUE_INPUT_OPTION: &str = "RAW";
// INSERT_ROWS would shift rows below a blank gap, invalidating row numbers
// other jobs have already located
const INSERT_DATA_OPTION: &str = "OVERWRITE_ROWS";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRangeBody {
    range: String,
    major_dimension: &'static str,
    values: Vec<Vec<String>>,
}

impl ValueRangeBody {
    fn rows(range: &RangeRef, values: Vec<Vec<String>>) -> Self {
        Self {
            range: range.to_string(),
            major_dimension: "ROWS",
            values,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateBody {
    value_input_option: &'static str,
    data: Vec<ValueRangeBody>,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateValuesResponse {
    updated_range: String,
}

#[derive(Deserialize)]
struct AppendValuesResponse {
    updates: UpdateValuesResponse,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateResponse {
    #[serde(default)]
    total_updated_cells: u64,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

pub struct GoogleSheetsClient {
    client: reqwest::Client,
    api_url: Url,
    spreadsheet_id: String,
    access_token: String,
}

impl GoogleSheetsClient {
    pub fn new(api_url: Url, spreadsheet_id: String, access_token: String) -> Self {
        GoogleSheetsClient {
            client: reqwest::Client::new(),
            api_url,
            spreadsheet_id,
            access_token,
        }
    }

    /// `{api_url}/v4/spreadsheets/{id}/{tail...}`
    fn url(&self, tail: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidResponse(format!("invalid API URL {}", self.api_url)))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str()])
            .extend(tail);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| BackendError::InvalidResponse(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.error.message)
            .unwrap_or(body);

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(BackendError::Unavailable(format!("{status}: {message}")))
        } else {
            Err(BackendError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SheetBackend for GoogleSheetsClient {
    fn name(&self) -> &'static str {
        "google_sheets"
    }

    async fn read_range(&self, range: &RangeRef) -> Result<Vec<Vec<String>>, BackendError> {
        let url = self.url(&["values", &range.to_string()])?;
        let request = self.client.get(url).query(&[
            ("majorDimension", "ROWS"),
            ("valueRenderOption", "FORMATTED_VALUE"),
        ]);

        let body: ValueRange = self.send(request).await?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn append_row(
        &self,
        range: &RangeRef,
        values: Vec<String>,
    ) -> Result<u32, BackendError> {
        let url = self.url(&["values", &format!("{range}:append")])?;
        let request = self
            .client
            .post(url)
            .query(&[
                ("valueInputOption", VALUE_INPUT_OPTION),
                ("insertDataOption", INSERT_DATA_OPTION),
            ])
            .json(&ValueRangeBody::rows(range, vec![values]));

        let body: AppendValuesResponse = self.send(request).await?;
        let updated = RangeRef::parse(&body.updates.updated_range)
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(updated.first_row())
    }

    async fn write_cell(&self, range: &RangeRef, value: String) -> Result<(), BackendError> {
        let url = self.url(&["values", &range.to_string()])?;
        let request = self
            .client
            .put(url)
            .query(&[("valueInputOption", VALUE_INPUT_OPTION)])
            .json(&ValueRangeBody::rows(range, vec![vec![value]]));

        let _: UpdateValuesResponse = self.send(request).await?;
        Ok(())
    }

    async fn batch_write(
        &self,
        writes: Vec<(RangeRef, String)>,
    ) -> Result<Vec<CellOutcome>, BackendError> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }

        let count = writes.len();
        let url = self.url(&["values:batchUpdate"])?;
        let body = BatchUpdateBody {
            value_input_option: VALUE_INPUT_OPTION,
            data: writes
                .into_iter()
                .map(|(range, value)| ValueRangeBody::rows(&range, vec![vec![value]]))
                .collect(),
        };

        // batchUpdate applies all ranges or none
        let response: BatchUpdateResponse = self.send(self.client.post(url).json(&body)).await?;
        tracing::debug!(
            cells = count,
            updated = response.total_updated_cells,
            "Batch update applied"
        );
        Ok(vec![Ok(()); count])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a1::CellAddress;
    use http_body_util::{BodyExt, Full};
    use hyper::body::{Bytes, Incoming};
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use parking_lot::Mutex;
    use std::convert::Infallible;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[derive(Debug, Clone)]
    struct Recorded {
        method: String,
        path: String,
        query: String,
        authorization: String,
        body: Value,
    }

    fn reply(status: u16, body: Value) -> Response<Full<Bytes>> {
        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    // Mimics the handful of Sheets endpoints the client uses
    async fn sheets_api(
        req: Request<Incoming>,
        log: Arc<Mutex<Vec<Recorded>>>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let (parts, body) = req.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        let path = parts.uri.path().to_string();
        log.lock().push(Recorded {
            method: parts.method.to_string(),
            path: path.clone(),
            query: parts.uri.query().unwrap_or_default().to_string(),
            authorization: parts
                .headers
                .get("authorization")
                .map(|v| v.to_str().unwrap().to_string())
                .unwrap_or_default(),
            body: serde_json::from_slice(&bytes).unwrap_or(Value::Null),
        });

        let response = if path.contains("Unavailable") {
            reply(503, serde_json::json!({"error": {"code": 503, "message": "backend down"}}))
        } else if path.contains("Missing") {
            reply(
                400,
                serde_json::json!({"error": {"code": 400, "message": "Unable to parse range"}}),
            )
        } else if path.ends_with(":append") {
            reply(200, serde_json::json!({"updates": {"updatedRange": "Orders!A3"}}))
        } else if path.ends_with("values:batchUpdate") {
            reply(200, serde_json::json!({"totalUpdatedCells": 2, "responses": []}))
        } else if parts.method == hyper::Method::PUT {
            reply(200, serde_json::json!({"updatedRange": "Orders!B2", "updatedCells": 1}))
        } else if path.ends_with("1:1") {
            reply(
                200,
                serde_json::json!({"range": "Orders!A1:Z1", "values": [["OrderID", "Vendor", 12]]}),
            )
        } else {
            reply(200, serde_json::json!({"range": "Orders!A2:A1000"}))
        };
        Ok(response)
    }

    async fn start_mock_api() -> (Url, Arc<Mutex<Vec<Recorded>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_clone = log.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                let log = log_clone.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req| sheets_api(req, log.clone()));
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        let url = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
        (url, log)
    }

    fn client(url: Url) -> GoogleSheetsClient {
        GoogleSheetsClient::new(url, "sheet-id".into(), "token-123".into())
    }

    #[tokio::test]
    async fn test_read_range() {
        let (url, log) = start_mock_api().await;
        let client = client(url);

        let rows = client.read_range(&RangeRef::row("Orders", 1)).await.unwrap();
        assert_eq!(rows, vec![vec!["OrderID", "Vendor", "12"]]);

        // A range with no values has no `values` key at all
        let rows = client
            .read_range(&RangeRef::column_from("Orders", 1, 2))
            .await
            .unwrap();
        assert!(rows.is_empty());

        let log = log.lock();
        assert_eq!(log[0].method, "GET");
        assert_eq!(log[0].path, "/v4/spreadsheets/sheet-id/values/'Orders'!1:1");
        assert!(log[0].query.contains("majorDimension=ROWS"));
        assert_eq!(log[0].authorization, "Bearer token-123");
    }

    #[tokio::test]
    async fn test_append_row_reports_row() {
        let (url, log) = start_mock_api().await;
        let client = client(url);

        let row = client
            .append_row(&RangeRef::column_from("Orders", 1, 1), vec!["ORD-100".into()])
            .await
            .unwrap();
        assert_eq!(row, 3);

        let log = log.lock();
        assert_eq!(log[0].method, "POST");
        assert!(log[0].query.contains("valueInputOption=RAW"));
        assert!(log[0].query.contains("insertDataOption=OVERWRITE_ROWS"));
        assert!(!log[0].query.contains("INSERT_ROWS"));
        assert_eq!(log[0].body["values"], serde_json::json!([["ORD-100"]]));
    }

    #[tokio::test]
    async fn test_writes() {
        let (url, log) = start_mock_api().await;
        let client = client(url);

        client
            .write_cell(&RangeRef::cell("Orders", CellAddress::new(2, 2)), "Acme".into())
            .await
            .unwrap();

        let outcomes = client
            .batch_write(vec![
                (RangeRef::cell("Orders", CellAddress::new(2, 2)), "Acme".into()),
                (RangeRef::cell("Orders", CellAddress::new(3, 2)), "250".into()),
            ])
            .await
            .unwrap();
        assert_eq!(outcomes, vec![Ok(()), Ok(())]);

        let log = log.lock();
        assert_eq!(log[0].method, "PUT");
        assert_eq!(log[0].body["values"], serde_json::json!([["Acme"]]));
        assert_eq!(log[1].path, "/v4/spreadsheets/sheet-id/values:batchUpdate");
        assert_eq!(log[1].body["valueInputOption"], "RAW");
        assert_eq!(log[1].body["data"][1]["range"], "'Orders'!C2");
        assert_eq!(log[1].body["data"][1]["values"], serde_json::json!([["250"]]));
    }

    #[tokio::test]
    async fn test_error_classification() {
        let (url, _log) = start_mock_api().await;
        let client = client(url);

        let err = client
            .read_range(&RangeRef::row("Unavailable", 1))
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let err = client
            .read_range(&RangeRef::row("Missing", 1))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::Rejected {
                status: 400,
                message: "Unable to parse range".into()
            }
        );
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = client(Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap());
        let err = client.read_range(&RangeRef::row("Orders", 1)).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }
}
