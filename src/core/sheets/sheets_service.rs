// The spreadsheet adapter's business logic.
//
// Every tool maps to exactly one method here. The service validates inputs,
// builds sheet-qualified ranges, runs each upstream call through the retry
// policy and shapes the result. It knows nothing about HTTP or MCP.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use super::a1::{qualify, A1Range};
use super::sheets_models::{
    AppendSummary, CreatedSheet, CreatedSpreadsheet, HealthStatus, Rows, SheetData, SheetValues,
    SheetsError, SpreadsheetSummary, UpdateSummary, ValueRange,
};
use super::spreadsheet_api::SpreadsheetApi;
use crate::core::retry::{RetryPolicy, Retryable, Sleeper, TokioSleeper};

pub const SERVICE_NAME: &str = "Google Sheets MCP Server";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

impl Retryable for SheetsError {
    fn should_retry(&self, idempotent: bool) -> bool {
        self.is_rate_limited() || (idempotent && self.is_transient())
    }
}

pub struct SheetsService<A: SpreadsheetApi> {
    api: A,
    /// Default Drive folder for creating and listing spreadsheets.
    folder_id: Option<String>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<A: SpreadsheetApi> SheetsService<A> {
    pub fn new(api: A, folder_id: Option<String>) -> Self {
        Self {
            api,
            folder_id,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry = retry;
        self.sleeper = sleeper;
        self
    }

    #[cfg(test)]
    pub fn api(&self) -> &A {
        &self.api
    }

    pub async fn get_sheet_data(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        range: Option<&str>,
        include_grid_data: bool,
    ) -> Result<SheetData, SheetsError> {
        let spreadsheet_id = require(spreadsheet_id, "spreadsheet_id")?;
        let sheet = require(sheet, "sheet")?;
        let range = range.map(str::trim).filter(|r| !r.is_empty());
        if let Some(range) = range {
            A1Range::parse(range)?;
        }
        let full_range = qualify(sheet, range);

        let data = if include_grid_data {
            let grid = self
                .retry
                .run(&*self.sleeper, "get_grid", true, || {
                    self.api.get_grid(spreadsheet_id, &full_range)
                })
                .await?;
            SheetData::Grid(grid)
        } else {
            let values = self
                .retry
                .run(&*self.sleeper, "get_values", true, || {
                    self.api.get_values(spreadsheet_id, &full_range)
                })
                .await?;
            SheetData::Values(SheetValues {
                spreadsheet_id: spreadsheet_id.to_string(),
                value_ranges: vec![ValueRange {
                    range: full_range.clone(),
                    values: values.values,
                }],
            })
        };

        tracing::info!(
            spreadsheet_id,
            range = %full_range,
            include_grid_data,
            "Retrieved sheet data"
        );
        Ok(data)
    }

    pub async fn update_cells(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        range: &str,
        data: &Rows,
    ) -> Result<UpdateSummary, SheetsError> {
        let spreadsheet_id = require(spreadsheet_id, "spreadsheet_id")?;
        let sheet = require(sheet, "sheet")?;
        let range = require(range, "range")?;
        validate_rows(data)?;
        A1Range::parse(range)?.check_fits(data)?;
        let full_range = qualify(sheet, Some(range));

        // Writing the same values twice is harmless, so plain transient errors retry too.
        let summary = self
            .retry
            .run(&*self.sleeper, "update_values", true, || {
                self.api.update_values(spreadsheet_id, &full_range, data)
            })
            .await?;

        tracing::info!(
            spreadsheet_id,
            range = %full_range,
            cells = summary.updated_cells,
            "Updated cells"
        );
        Ok(summary)
    }

    pub async fn create_spreadsheet(
        &self,
        title: &str,
        sheet_names: &[String],
    ) -> Result<CreatedSpreadsheet, SheetsError> {
        let title = require(title, "title")?;
        validate_sheet_names(sheet_names)?;
        let folder_id = self.folder_id.as_deref();

        let file = self
            .retry
            .run(&*self.sleeper, "create_spreadsheet", false, || {
                self.api.create_spreadsheet(title, folder_id)
            })
            .await?;
        let spreadsheet_id = file.id.as_str();

        // The file exists from here on, so any failure has to name it.
        let sheets = self
            .apply_sheet_names(spreadsheet_id, sheet_names)
            .await
            .map_err(|e| {
                tracing::warn!(spreadsheet_id, "Spreadsheet created but sheet setup failed: {}", e);
                e.with_context(&format!(
                    "Spreadsheet '{}' was created but setting up its sheets failed",
                    spreadsheet_id
                ))
            })?;

        tracing::info!(
            spreadsheet_id,
            folder = folder_id.unwrap_or("root"),
            "Created spreadsheet '{}'",
            title
        );

        Ok(CreatedSpreadsheet {
            spreadsheet_id: file.id.clone(),
            title: file.name,
            folder: file
                .parents
                .into_iter()
                .next()
                .unwrap_or_else(|| "root".to_string()),
            sheets,
        })
    }

    /// Renames the default sheet to the first name and adds the rest. With no
    /// names the spreadsheet keeps whatever sheets it was created with.
    async fn apply_sheet_names(
        &self,
        spreadsheet_id: &str,
        sheet_names: &[String],
    ) -> Result<Vec<String>, SheetsError> {
        let existing = self
            .retry
            .run(&*self.sleeper, "list_sheets", true, || {
                self.api.list_sheets(spreadsheet_id)
            })
            .await?;

        let (first, rest, default_id) = match (sheet_names.split_first(), existing.first()) {
            (Some((first, rest)), Some(default_sheet)) => (first, rest, default_sheet.sheet_id),
            _ => return Ok(existing.into_iter().map(|s| s.title).collect()),
        };

        self.retry
            .run(&*self.sleeper, "rename_sheet", true, || {
                self.api.rename_sheet(spreadsheet_id, default_id, first)
            })
            .await?;
        for name in rest {
            self.retry
                .run(&*self.sleeper, "add_sheet", false, || {
                    self.api.add_sheet(spreadsheet_id, name)
                })
                .await?;
        }
        Ok(sheet_names.to_vec())
    }

    /// Lists spreadsheets in `folder_id`, falling back to the configured folder
    /// and then to everything visible in My Drive.
    pub async fn list_spreadsheets(
        &self,
        folder_id: Option<&str>,
    ) -> Result<Vec<SpreadsheetSummary>, SheetsError> {
        let folder = folder_id
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .or(self.folder_id.as_deref());

        let spreadsheets = self
            .retry
            .run(&*self.sleeper, "list_spreadsheets", true, || {
                self.api.list_spreadsheets(folder)
            })
            .await?;

        tracing::info!(
            folder = folder.unwrap_or("My Drive"),
            count = spreadsheets.len(),
            "Listed spreadsheets"
        );
        Ok(spreadsheets)
    }

    pub async fn add_rows(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        data: &Rows,
    ) -> Result<AppendSummary, SheetsError> {
        let spreadsheet_id = require(spreadsheet_id, "spreadsheet_id")?;
        let sheet = require(sheet, "sheet")?;
        validate_rows(data)?;
        let full_range = qualify(sheet, None);

        // An append that landed but timed out would duplicate rows on retry,
        // so only rate-limit rejections are retried here.
        let summary = self
            .retry
            .run(&*self.sleeper, "append_values", false, || {
                self.api.append_values(spreadsheet_id, &full_range, data)
            })
            .await?;

        tracing::info!(
            spreadsheet_id,
            sheet,
            rows = data.len(),
            "Appended rows"
        );
        Ok(summary)
    }

    pub async fn list_sheets(&self, spreadsheet_id: &str) -> Result<Vec<String>, SheetsError> {
        let spreadsheet_id = require(spreadsheet_id, "spreadsheet_id")?;

        let sheets = self
            .retry
            .run(&*self.sleeper, "list_sheets", true, || {
                self.api.list_sheets(spreadsheet_id)
            })
            .await?;

        tracing::info!(spreadsheet_id, count = sheets.len(), "Listed sheets");
        Ok(sheets.into_iter().map(|s| s.title).collect())
    }

    pub async fn create_sheet(
        &self,
        spreadsheet_id: &str,
        title: &str,
    ) -> Result<CreatedSheet, SheetsError> {
        let spreadsheet_id = require(spreadsheet_id, "spreadsheet_id")?;
        let title = require(title, "title")?;

        let properties = self
            .retry
            .run(&*self.sleeper, "add_sheet", false, || {
                self.api.add_sheet(spreadsheet_id, title)
            })
            .await?;

        tracing::info!(
            spreadsheet_id,
            sheet_id = properties.sheet_id,
            "Created sheet '{}'",
            title
        );

        Ok(CreatedSheet {
            sheet_id: properties.sheet_id,
            title: properties.title,
            index: properties.index,
            spreadsheet_id: spreadsheet_id.to_string(),
        })
    }

    /// Liveness only. Never touches the upstream API.
    pub fn health_check(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy",
            service: SERVICE_NAME,
            version: SERVICE_VERSION,
        }
    }
}

/// Rejects blank values. The value itself is passed through untouched so
/// every call sees the same name the caller sent.
fn require<'a>(value: &'a str, field: &str) -> Result<&'a str, SheetsError> {
    if value.trim().is_empty() {
        Err(SheetsError::InvalidArgument(format!(
            "'{}' must not be empty",
            field
        )))
    } else {
        Ok(value)
    }
}

fn validate_rows(rows: &Rows) -> Result<(), SheetsError> {
    if rows.is_empty() {
        return Err(SheetsError::InvalidArgument(
            "'data' must contain at least one row".to_string(),
        ));
    }

    for (r, row) in rows.iter().enumerate() {
        if let Some(c) = row
            .iter()
            .position(|cell| matches!(cell, Value::Array(_) | Value::Object(_)))
        {
            return Err(SheetsError::InvalidArgument(format!(
                "Cell at row {}, column {} must be a string, number, boolean or null",
                r + 1,
                c + 1
            )));
        }
    }

    Ok(())
}

fn validate_sheet_names(names: &[String]) -> Result<(), SheetsError> {
    // Sheet names are unique per spreadsheet, ignoring case.
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(SheetsError::InvalidArgument(
                "Sheet names must not be empty".to_string(),
            ));
        }
        if !seen.insert(name.to_lowercase()) {
            return Err(SheetsError::InvalidArgument(format!(
                "Duplicate sheet name '{}'",
                name
            )));
        }
    }
    Ok(())
}
