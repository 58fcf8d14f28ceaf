//! Google Sheets v4 REST client

use super::{Row, SheetSource};
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct GoogleSheetsConfig {
    pub base_url: String,
    /// Sent as the `key` query parameter
    pub api_key: Option<String>,
    /// Sent as a bearer token
    pub access_token: Option<String>,
    pub timeout: Duration,
}

impl Default for GoogleSheetsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sheets.googleapis.com/v4".to_string(),
            api_key: None,
            access_token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct GoogleSheetsClient {
    config: GoogleSheetsConfig,
    base_url: Url,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMetadata {
    #[serde(default)]
    sheets: Vec<SheetMetadata>,
}

#[derive(Debug, Deserialize)]
struct SheetMetadata {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Row>,
}

impl GoogleSheetsClient {
    pub fn new(config: GoogleSheetsConfig) -> PipelineResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            PipelineError::validation(format!("invalid sheets base url '{}': {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(PipelineError::validation(format!(
                "sheets base url '{}' cannot carry a path",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::validation(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            base_url,
            client,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
        context: &str,
    ) -> PipelineResult<T> {
        let mut request = self.client.get(url).query(query);
        if let Some(key) = &self.config.api_key {
            request = request.query(&[("key", key.as_str())]);
        }
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::parse_failure(format!("{context}: request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::parse_failure(format!(
                "{context}: sheets API error: {status} - {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PipelineError::parse_failure(format!("{context}: unexpected response: {e}")))
    }

    async fn first_sheet_title(&self, spreadsheet_id: &str) -> PipelineResult<String> {
        let metadata: SpreadsheetMetadata = self
            .get_json(
                self.endpoint(&["spreadsheets", spreadsheet_id]),
                &[("fields", "sheets.properties.title")],
                "unable to get spreadsheet metadata",
            )
            .await?;

        metadata
            .sheets
            .into_iter()
            .next()
            .map(|sheet| sheet.properties.title)
            .ok_or_else(|| PipelineError::parse_failure("no sheets found in spreadsheet"))
    }

    async fn fetch_range(&self, spreadsheet_id: &str, range: &str) -> PipelineResult<Vec<Row>> {
        let values: ValueRange = self
            .get_json(
                self.endpoint(&["spreadsheets", spreadsheet_id, "values", range]),
                &[],
                range,
            )
            .await?;
        Ok(values.values)
    }
}

/// Ranges tried in order for a sheet title
pub fn candidate_ranges(title: &str) -> Vec<String> {
    let qualified = if title.contains(' ') || title.contains('\'') {
        format!("'{}'!A:Z", title.replace('\'', "''"))
    } else {
        format!("{title}!A:Z")
    };
    vec![qualified, "A:Z".to_string(), title.to_string()]
}

#[async_trait]
impl SheetSource for GoogleSheetsClient {
    async fn fetch_rows(&self, spreadsheet_id: &str) -> PipelineResult<Vec<Row>> {
        let title = self.first_sheet_title(spreadsheet_id).await?;
        let ranges = candidate_ranges(&title);

        let mut last_error = None;
        for range in &ranges {
            match self.fetch_range(spreadsheet_id, range).await {
                Ok(rows) => {
                    debug!(spreadsheet_id, range = %range, rows = rows.len(), "Fetched sheet range");
                    return Ok(rows);
                }
                Err(e) => {
                    warn!(spreadsheet_id, range = %range, error = %e, "Sheet range fetch failed");
                    last_error = Some(e);
                }
            }
        }

        let last_error = match last_error {
            Some(PipelineError::ParseFailure { message }) => message,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        Err(PipelineError::parse_failure(format!(
            "unable to retrieve data from sheet (tried ranges: {}): {last_error}",
            ranges.join(", ")
        )))
    }
}
