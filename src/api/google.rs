//! Implements the `SheetService` trait against Google Sheets. Values are cleared and written with
//! the `sheets::Client`; the structural calls it does not cover (finding a spreadsheet by name,
//! creating spreadsheets and tabs, resizing) go straight to the REST endpoints.

use crate::api::{CredentialSource, SheetService, TokenProvider, Worksheet};
use crate::error::Res;
use anyhow::{bail, Context};
use serde_json::{json, Value};
use sheets::types::{
    BatchClearValuesRequest, BatchUpdateValuesRequest, Dimension, ValueInputOption, ValueRange,
};
use sheets::ClientError;
use tracing::{debug, trace, warn};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_FILES_API: &str = "https://www.googleapis.com/drive/v3/files";
const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";

/// Implements the `SheetService` trait for Google Sheets. It takes a `TokenProvider`, which it
/// asks for a fresh token before every call.
pub struct GoogleSheets {
    http: reqwest::Client,
    token_provider: TokenProvider,
    client: sheets::Client,
}

impl GoogleSheets {
    /// Loads the service account key from `source` and authorizes a client with it.
    pub async fn connect(source: &CredentialSource) -> Res<Self> {
        let http = reqwest::Client::new();
        let mut token_provider = TokenProvider::authenticate(http.clone(), source).await?;
        let client = create_sheets_client(&mut token_provider).await?;
        debug!("Authorized as {}", token_provider.account().client_email());
        Ok(Self {
            http,
            token_provider,
            client,
        })
    }

    /// Refreshes the sheets client with a new access token if needed
    async fn refresh_client(&mut self) -> Res<()> {
        self.client = create_sheets_client(&mut self.token_provider).await?;
        Ok(())
    }

    async fn get_json(&mut self, url: &str, query: &[(&str, &str)]) -> Res<Value> {
        let token = self.token_provider.token().await?;
        let response = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {url}"))?;
        read_json(response, url).await
    }

    async fn post_json(&mut self, url: &str, body: &Value) -> Res<Value> {
        let token = self.token_provider.token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {url}"))?;
        read_json(response, url).await
    }

    /// Sends `requests` to `spreadsheets.batchUpdate` and returns the replies.
    async fn batch_update(&mut self, spreadsheet_id: &str, requests: Value) -> Res<Vec<Value>> {
        let url = format!("{SHEETS_API}/{spreadsheet_id}:batchUpdate");
        let response = self.post_json(&url, &json!({ "requests": requests })).await?;
        Ok(response
            .get("replies")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn write_values(
        &mut self,
        spreadsheet_id: &str,
        request: BatchUpdateValuesRequest,
    ) -> Res<()> {
        self.refresh_client().await?;
        let ranges: Vec<&str> = request.data.iter().map(|r| r.range.as_str()).collect();
        let ranges = ranges.join(", ");
        self.client
            .spreadsheets()
            .values_batch_update(spreadsheet_id, &request)
            .await
            .map_err(map_client_error)
            .with_context(|| format!("Failed to write {ranges}"))?;
        Ok(())
    }
}

/// Builds a values write of `values` at `range`. Data rows use `ValueInputOption::Raw` so that
/// the sheet stores them as fetched; only the refresh stamp is parsed as user input.
fn values_request(
    range: String,
    values: Vec<Vec<String>>,
    input: ValueInputOption,
) -> BatchUpdateValuesRequest {
    BatchUpdateValuesRequest {
        data: vec![ValueRange {
            major_dimension: Some(Dimension::Rows),
            range,
            values,
        }],
        include_values_in_response: Some(false),
        response_date_time_render_option: None,
        response_value_render_option: None,
        value_input_option: Some(input),
    }
}

/// The request `update` sends: every row from A1, stored verbatim.
fn data_request(worksheet: &Worksheet, values: &[Vec<String>]) -> BatchUpdateValuesRequest {
    values_request(worksheet.cell_range(1, 1), values.to_vec(), ValueInputOption::Raw)
}

/// The request `update_cell` sends: one cell, parsed as if typed by a user.
fn cell_request(
    worksheet: &Worksheet,
    row: usize,
    col: usize,
    value: &str,
) -> BatchUpdateValuesRequest {
    values_request(
        worksheet.cell_range(row, col),
        vec![vec![value.to_string()]],
        ValueInputOption::UserEntered,
    )
}

#[async_trait::async_trait]
impl SheetService for GoogleSheets {
    async fn find_spreadsheet(&mut self, name: &str) -> Res<Option<String>> {
        let q = format!(
            "name = '{}' and mimeType = '{SPREADSHEET_MIME_TYPE}' and trashed = false",
            name.replace('\\', "\\\\").replace('\'', "\\'")
        );
        trace!("Drive query: {q}");
        let response = self
            .get_json(
                DRIVE_FILES_API,
                &[
                    ("q", q.as_str()),
                    ("fields", "files(id,name)"),
                    ("supportsAllDrives", "true"),
                    ("includeItemsFromAllDrives", "true"),
                ],
            )
            .await
            .with_context(|| format!("Failed to search for spreadsheet '{name}'"))?;

        let ids: Vec<String> = response
            .get("files")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(|f| f.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if ids.len() > 1 {
            warn!(
                "{} spreadsheets are named '{name}', using the first one ({})",
                ids.len(),
                ids[0]
            );
        }
        Ok(ids.into_iter().next())
    }

    async fn create_spreadsheet(&mut self, name: &str) -> Res<String> {
        let response = self
            .post_json(SHEETS_API, &json!({ "properties": { "title": name } }))
            .await
            .with_context(|| format!("Failed to create spreadsheet '{name}'"))?;
        response
            .get("spreadsheetId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("Google Sheets API response missing 'spreadsheetId' field")
    }

    async fn find_worksheet(
        &mut self,
        spreadsheet_id: &str,
        title: &str,
    ) -> Res<Option<Worksheet>> {
        let url = format!("{SHEETS_API}/{spreadsheet_id}");
        let response = self
            .get_json(&url, &[("fields", "sheets.properties(sheetId,title)")])
            .await
            .with_context(|| format!("Failed to list the tabs of spreadsheet {spreadsheet_id}"))?;

        let found = response
            .get("sheets")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|sheet| sheet.get("properties"))
            .find(|p| p.get("title").and_then(Value::as_str) == Some(title))
            .map(|p| {
                let sheet_id = p.get("sheetId").and_then(Value::as_i64).unwrap_or(0);
                Worksheet::new(spreadsheet_id, sheet_id, title)
            });
        Ok(found)
    }

    async fn add_worksheet(
        &mut self,
        spreadsheet_id: &str,
        title: &str,
        rows: usize,
        cols: usize,
    ) -> Res<Worksheet> {
        let replies = self
            .batch_update(
                spreadsheet_id,
                json!([{
                    "addSheet": {
                        "properties": {
                            "title": title,
                            "gridProperties": { "rowCount": rows, "columnCount": cols },
                        }
                    }
                }]),
            )
            .await
            .with_context(|| format!("Failed to add tab '{title}'"))?;

        let sheet_id = replies
            .first()
            .and_then(|r| r.pointer("/addSheet/properties/sheetId"))
            .and_then(Value::as_i64)
            .context("Google Sheets API response missing the new sheetId")?;
        Ok(Worksheet::new(spreadsheet_id, sheet_id, title))
    }

    async fn resize(&mut self, worksheet: &Worksheet, rows: usize, cols: usize) -> Res<()> {
        self.batch_update(
            worksheet.spreadsheet_id(),
            json!([{
                "updateSheetProperties": {
                    "properties": {
                        "sheetId": worksheet.sheet_id(),
                        "gridProperties": { "rowCount": rows, "columnCount": cols },
                    },
                    "fields": "gridProperties(rowCount,columnCount)",
                }
            }]),
        )
        .await
        .with_context(|| format!("Failed to resize '{}' to {rows}x{cols}", worksheet.title()))?;
        Ok(())
    }

    async fn clear(&mut self, worksheet: &Worksheet) -> Res<()> {
        self.refresh_client().await?;
        let request = BatchClearValuesRequest {
            ranges: vec![worksheet.whole_range()],
        };
        self.client
            .spreadsheets()
            .values_batch_clear(worksheet.spreadsheet_id(), &request)
            .await
            .map_err(map_client_error)
            .with_context(|| format!("Failed to clear '{}'", worksheet.title()))?;
        Ok(())
    }

    async fn update(&mut self, worksheet: &Worksheet, values: &[Vec<String>]) -> Res<()> {
        let request = data_request(worksheet, values);
        self.write_values(worksheet.spreadsheet_id(), request).await
    }

    async fn update_cell(
        &mut self,
        worksheet: &Worksheet,
        row: usize,
        col: usize,
        value: &str,
    ) -> Res<()> {
        let request = cell_request(worksheet, row, col, value);
        self.write_values(worksheet.spreadsheet_id(), request).await
    }
}

/// Returns the JSON body of a successful response, or an error carrying the status and body.
async fn read_json(response: reqwest::Response, url: &str) -> Res<Value> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        bail!("Request to {url} failed with status {status}: {body}");
    }
    response
        .json()
        .await
        .with_context(|| format!("Failed to parse the response from {url}"))
}

/// Creates a new sheets client with a refreshed access token.
async fn create_sheets_client(token_provider: &mut TokenProvider) -> Res<sheets::Client> {
    let access_token = token_provider.token().await?;

    // The sheets crate requires client_id, client_secret, and redirect_uri, but API calls only
    // use the access token.
    Ok(sheets::Client::new(
        String::new(), // client_id
        String::new(), // client_secret
        String::new(), // redirect_uri
        access_token,
        String::new(), // refresh_token (we refresh ourselves)
    ))
}

fn map_client_error(e: ClientError) -> anyhow::Error {
    let error_name = match &e {
        ClientError::EmptyRefreshToken => "EmptyRefreshToken".to_string(),
        ClientError::FromUtf8Error(inner) => format!("FromUtf8Error {inner}"),
        ClientError::UrlParserError(inner) => format!("UrlParserError {inner}"),
        ClientError::SerdeJsonError(inner) => format!("SerdeJsonError {inner}"),
        ClientError::ReqwestError(inner) => format!("ReqwestError {inner}"),
        ClientError::InvalidHeaderValue(inner) => format!("InvalidHeaderValue {inner}"),
        ClientError::ReqwestMiddleWareError(inner) => format!("ReqwestMiddleWareError {inner}"),
        ClientError::HttpError { .. } => "HttpError".to_string(),
        ClientError::Other(_) => "Other".to_string(),
    };
    anyhow::Error::new(e).context(error_name)
}
