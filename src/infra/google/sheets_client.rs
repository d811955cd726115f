// =============================================================================
// GOOGLE SHEETS / DRIVE CLIENT
// =============================================================================
//
// `SpreadsheetApi` over the Sheets v4 and Drive v3 REST APIs. Each method is a
// single HTTP exchange (list_spreadsheets may page). Failures are mapped to
// `SheetsError` kinds by `classify_status`; retrying is the service's job.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::credentials::{CredentialContext, CredentialError};
use crate::core::sheets::{
    AppendSummary, CreatedFile, Rows, SheetProperties, SheetsError, SpreadsheetApi,
    SpreadsheetSummary, UpdateSummary, ValueRange,
};

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";

/// Drive returns at most this many files per page.
const DRIVE_PAGE_SIZE: &str = "100";
const MAX_DRIVE_PAGES: usize = 10;

// =============================================================================
// API RESPONSE STRUCTURES
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    spreadsheet_id: String,
    #[serde(default)]
    table_range: Option<String>,
    #[serde(default)]
    updates: UpdateSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct SheetList {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct BatchUpdateResponse {
    #[serde(default)]
    replies: Vec<Value>,
}

/// Google's error envelope: `{"error": {"code", "message", "status", "errors": [...]}}`.
#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    errors: Vec<ErrorReason>,
    #[serde(default)]
    details: Vec<ErrorReason>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorReason {
    #[serde(default)]
    reason: String,
}

// =============================================================================
// ERROR CLASSIFICATION
// =============================================================================

const RATE_LIMIT_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "RATE_LIMIT_EXCEEDED",
];
const QUOTA_REASONS: &[&str] = &[
    "quotaExceeded",
    "dailyLimitExceeded",
    "storageQuotaExceeded",
];

const MISSING_SHEET_PREFIX: &str = "Unable to parse range";

/// Maps a non-success response to an error kind.
pub fn classify_status(status: u16, body: &str) -> SheetsError {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let error = envelope.error;
    let message = if error.message.is_empty() {
        format!("HTTP {}: {}", status, body.trim())
    } else {
        error.message.clone()
    };
    let has_reason = |wanted: &[&str]| {
        error
            .errors
            .iter()
            .chain(error.details.iter())
            .any(|r| wanted.contains(&r.reason.as_str()))
    };

    match status {
        400 if message.to_lowercase().contains("already exists") => {
            SheetsError::AlreadyExists(message)
        }
        // A1 is validated before any call, so an unparseable range names a missing tab.
        400 if message.starts_with(MISSING_SHEET_PREFIX) => SheetsError::NotFound(message),
        400 => SheetsError::InvalidArgument(message),
        401 => SheetsError::PermissionDenied(message),
        403 if has_reason(RATE_LIMIT_REASONS) => SheetsError::rate_limited(message),
        403 if has_reason(QUOTA_REASONS) || error.status == "RESOURCE_EXHAUSTED" => {
            SheetsError::QuotaExceeded(message)
        }
        403 => SheetsError::PermissionDenied(message),
        404 => SheetsError::NotFound(message),
        409 => SheetsError::AlreadyExists(message),
        429 => SheetsError::rate_limited(message),
        408 | 500..=599 => SheetsError::transient(message),
        _ => SheetsError::InvalidArgument(message),
    }
}

fn credential_error(err: CredentialError) -> SheetsError {
    if err.is_transient() {
        SheetsError::transient(err.to_string())
    } else {
        SheetsError::PermissionDenied(err.to_string())
    }
}

fn network_error(err: reqwest::Error) -> SheetsError {
    if err.is_timeout() {
        SheetsError::transient(format!("Request to Google timed out: {}", err))
    } else {
        SheetsError::transient(format!("Could not reach Google: {}", err))
    }
}

/// Follows Drive page tokens until they run out or the page budget is spent.
struct DrivePager {
    pages_left: usize,
    token: Option<String>,
    more: bool,
}

impl DrivePager {
    fn new(max_pages: usize) -> Self {
        Self {
            pages_left: max_pages,
            token: None,
            more: true,
        }
    }

    fn has_next(&self) -> bool {
        self.more && self.pages_left > 0
    }

    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn record(&mut self, next_page_token: Option<String>) {
        self.pages_left = self.pages_left.saturating_sub(1);
        self.token = next_page_token.filter(|t| !t.is_empty());
        self.more = self.token.is_some();
    }

    /// Drive still had pages when the budget ran out.
    fn truncated(&self) -> bool {
        self.more
    }
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct GoogleSheetsClient {
    http: Client,
    credentials: Arc<CredentialContext>,
}

impl GoogleSheetsClient {
    pub fn new(http: Client, credentials: Arc<CredentialContext>) -> Self {
        tracing::debug!(credentials = credentials.describe(), "Google Sheets client ready");
        Self { http, credentials }
    }

    /// `base/segment/segment...`, each segment percent-encoded. Sheet-qualified
    /// ranges contain quotes, spaces and `!`, so they can't be formatted in.
    fn endpoint(base: &str, segments: &[&str]) -> Result<Url, SheetsError> {
        let invalid = || SheetsError::InvalidArgument(format!("Invalid API base URL: {}", base));
        let mut url = Url::parse(base).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn spreadsheet_url(&self, spreadsheet_id: &str, rest: &[&str]) -> Result<Url, SheetsError> {
        let mut segments = vec!["spreadsheets", spreadsheet_id];
        segments.extend_from_slice(rest);
        Self::endpoint(SHEETS_API_BASE, &segments)
    }

    /// Attaches the bearer token, sends, and decodes a success body.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SheetsError> {
        let token = self
            .credentials
            .access_token()
            .await
            .map_err(credential_error)?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                SheetsError::transient(format!("Malformed response from Google: {}", e))
            });
        }

        if status == StatusCode::UNAUTHORIZED {
            // The cached token was revoked or expired early.
            self.credentials.invalidate().await;
        }
        let body = response.text().await.unwrap_or_default();
        let error = classify_status(status.as_u16(), &body);
        tracing::debug!(status = status.as_u16(), kind = error.kind().as_str(), "Google API error");
        Err(error)
    }

    async fn batch_update(
        &self,
        spreadsheet_id: &str,
        requests: Value,
    ) -> Result<BatchUpdateResponse, SheetsError> {
        let url = Self::endpoint(
            SHEETS_API_BASE,
            &["spreadsheets", &format!("{}:batchUpdate", spreadsheet_id)],
        )?;
        self.send(self.http.post(url).json(&json!({ "requests": requests })))
            .await
    }
}

#[async_trait]
impl SpreadsheetApi for GoogleSheetsClient {
    async fn get_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<ValueRange, SheetsError> {
        let url = self.spreadsheet_url(spreadsheet_id, &["values", range])?;
        self.send(self.http.get(url)).await
    }

    async fn get_grid(&self, spreadsheet_id: &str, range: &str) -> Result<Value, SheetsError> {
        let url = self.spreadsheet_url(spreadsheet_id, &[])?;
        self.send(
            self.http
                .get(url)
                .query(&[("ranges", range), ("includeGridData", "true")]),
        )
        .await
    }

    async fn update_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &Rows,
    ) -> Result<UpdateSummary, SheetsError> {
        let url = self.spreadsheet_url(spreadsheet_id, &["values", range])?;
        let body = json!({ "range": range, "majorDimension": "ROWS", "values": values });
        self.send(
            self.http
                .put(url)
                .query(&[("valueInputOption", "USER_ENTERED")])
                .json(&body),
        )
        .await
    }

    async fn append_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &Rows,
    ) -> Result<AppendSummary, SheetsError> {
        let append = format!("{}:append", range);
        let url = self.spreadsheet_url(spreadsheet_id, &["values", &append])?;
        let body = json!({ "majorDimension": "ROWS", "values": values });
        let response: AppendResponse = self
            .send(
                self.http
                    .post(url)
                    .query(&[("valueInputOption", "USER_ENTERED")])
                    .json(&body),
            )
            .await?;

        Ok(AppendSummary {
            spreadsheet_id: response.spreadsheet_id,
            table_range: response.table_range,
            updated_range: response.updates.updated_range,
            updated_rows: response.updates.updated_rows,
            updated_cells: response.updates.updated_cells,
        })
    }

    async fn create_spreadsheet(
        &self,
        title: &str,
        folder_id: Option<&str>,
    ) -> Result<CreatedFile, SheetsError> {
        let url = Self::endpoint(DRIVE_API_BASE, &["files"])?;
        let mut body = json!({ "name": title, "mimeType": SPREADSHEET_MIME_TYPE });
        if let Some(folder) = folder_id {
            body["parents"] = json!([folder]);
        }

        self.send(
            self.http
                .post(url)
                .query(&[("supportsAllDrives", "true"), ("fields", "id,name,parents")])
                .json(&body),
        )
        .await
    }

    async fn list_spreadsheets(
        &self,
        folder_id: Option<&str>,
    ) -> Result<Vec<SpreadsheetSummary>, SheetsError> {
        let url = Self::endpoint(DRIVE_API_BASE, &["files"])?;
        let mut query = format!("mimeType='{}'", SPREADSHEET_MIME_TYPE);
        if let Some(folder) = folder_id {
            query.push_str(&format!(" and '{}' in parents", folder.replace('\'', "\\'")));
        }

        let mut spreadsheets = Vec::new();
        let mut pager = DrivePager::new(MAX_DRIVE_PAGES);

        while pager.has_next() {
            let page: FileList = {
                let mut params = vec![
                    ("q", query.as_str()),
                    ("spaces", "drive"),
                    ("includeItemsFromAllDrives", "true"),
                    ("supportsAllDrives", "true"),
                    ("orderBy", "modifiedTime desc"),
                    ("pageSize", DRIVE_PAGE_SIZE),
                    ("fields", "nextPageToken,files(id,name)"),
                ];
                if let Some(token) = pager.token() {
                    params.push(("pageToken", token));
                }
                self.send(self.http.get(url.clone()).query(&params)).await?
            };

            spreadsheets.extend(page.files.into_iter().map(|f| SpreadsheetSummary {
                id: f.id,
                title: f.name,
            }));
            pager.record(page.next_page_token);
        }

        if pager.truncated() {
            tracing::warn!(
                folder = folder_id.unwrap_or("My Drive"),
                returned = spreadsheets.len(),
                max_pages = MAX_DRIVE_PAGES,
                "Spreadsheet listing truncated; more files exist than were returned"
            );
        }
        Ok(spreadsheets)
    }

    async fn list_sheets(
        &self,
        spreadsheet_id: &str,
    ) -> Result<Vec<SheetProperties>, SheetsError> {
        let url = self.spreadsheet_url(spreadsheet_id, &[])?;
        let list: SheetList = self
            .send(self.http.get(url).query(&[("fields", "sheets.properties")]))
            .await?;
        Ok(list.sheets.into_iter().map(|s| s.properties).collect())
    }

    async fn add_sheet(
        &self,
        spreadsheet_id: &str,
        title: &str,
    ) -> Result<SheetProperties, SheetsError> {
        let response = self
            .batch_update(
                spreadsheet_id,
                json!([{ "addSheet": { "properties": { "title": title } } }]),
            )
            .await?;

        let properties = response
            .replies
            .into_iter()
            .next()
            .and_then(|mut reply| {
                reply
                    .get_mut("addSheet")?
                    .get_mut("properties")
                    .map(Value::take)
            })
            .ok_or_else(|| SheetsError::transient("addSheet reply missing sheet properties"))?;

        serde_json::from_value(properties)
            .map_err(|e| SheetsError::transient(format!("Malformed addSheet reply: {}", e)))
    }

    async fn rename_sheet(
        &self,
        spreadsheet_id: &str,
        sheet_id: i64,
        title: &str,
    ) -> Result<(), SheetsError> {
        self.batch_update(
            spreadsheet_id,
            json!([{
                "updateSheetProperties": {
                    "properties": { "sheetId": sheet_id, "title": title },
                    "fields": "title"
                }
            }]),
        )
        .await?;
        Ok(())
    }
}
