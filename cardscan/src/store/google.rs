//! Google Sheets v4 `spreadsheets.values` client.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, instrument};
use url::Url;

use super::{SheetsApi, StoreError, TokenSource};
use crate::http::ensure_slash;

/// Values are written as typed by a user (the header row)
const USER_ENTERED: &str = "USER_ENTERED";
/// Values are stored verbatim (data rows)
const RAW: &str = "RAW";

pub struct GoogleSheets {
    client: Client,
    base_url: Url,
    tokens: Arc<dyn TokenSource>,
    request_timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ValueRange {
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRangeBody<'a> {
    range: &'a str,
    major_dimension: &'static str,
    values: Vec<Vec<String>>,
}

impl GoogleSheets {
    pub fn new(base_url: Url, tokens: Arc<dyn TokenSource>, timeout: Duration) -> Result<Self, StoreError> {
        Ok(Self {
            client: crate::http::client(timeout)?,
            base_url,
            tokens,
            request_timeout: timeout,
        })
    }

    /// `{base}/v4/spreadsheets/{id}/values/{range}{suffix}`, with the range percent-encoded as a
    /// single path segment.
    fn values_url(&self, spreadsheet_id: &str, range: &str, suffix: &str) -> Result<Url, StoreError> {
        let mut url = ensure_slash(&self.base_url);
        url.path_segments_mut()
            .map_err(|_| StoreError::Decode(format!("spreadsheet base URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", spreadsheet_id, "values"])
            .push(&format!("{range}{suffix}"));
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, StoreError> {
        let token = self.tokens.access_token().await?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder, range: &str) -> Result<Response, StoreError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout(self.request_timeout)
            } else {
                StoreError::Request(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if is_missing_target(status, &body) {
            return Err(StoreError::NotFound(range.to_string()));
        }

        tracing::error!(status = status.as_u16(), range, "Sheets API returned an error");
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// A 404 means the spreadsheet is missing; a 400 complaining about the range means the sheet is.
fn is_missing_target(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_FOUND || (status == StatusCode::BAD_REQUEST && body.contains("Unable to parse range"))
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SheetsApi for GoogleSheets {
    #[instrument(skip(self), err)]
    async fn get_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let url = self.values_url(spreadsheet_id, range, "")?;
        let request = self.request(Method::GET, url).await?;
        let response = self.send(request, range).await?;

        let body: ValueRange = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        debug!(rows = body.values.len(), "Read spreadsheet values");
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    #[instrument(skip(self, rows), err)]
    async fn update_values(&self, spreadsheet_id: &str, range: &str, rows: Vec<Vec<String>>) -> Result<(), StoreError> {
        let mut url = self.values_url(spreadsheet_id, range, "")?;
        url.query_pairs_mut().append_pair("valueInputOption", USER_ENTERED);

        let body = ValueRangeBody {
            range,
            major_dimension: "ROWS",
            values: rows,
        };
        let request = self.request(Method::PUT, url).await?.json(&body);
        self.send(request, range).await?;
        Ok(())
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()), err)]
    async fn append_values(&self, spreadsheet_id: &str, range: &str, rows: Vec<Vec<String>>) -> Result<(), StoreError> {
        let mut url = self.values_url(spreadsheet_id, range, ":append")?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", RAW)
            .append_pair("insertDataOption", "INSERT_ROWS");

        let body = ValueRangeBody {
            range,
            major_dimension: "ROWS",
            values: rows,
        };
        let request = self.request(Method::POST, url).await?.json(&body);
        self.send(request, range).await?;
        Ok(())
    }
}
