use async_trait::async_trait;
use serde_json::Value;

use super::sheets_models::{
    AppendSummary, CreatedFile, Rows, SheetProperties, SheetsError, SpreadsheetSummary,
    UpdateSummary, ValueRange,
};

/// The outbound port: one method per upstream call.
///
/// Each call is a single attempt. Retrying, validation and result shaping
/// happen in `SheetsService`, so implementations stay thin translations of the
/// Sheets v4 / Drive v3 REST surface. Ranges are always sheet-qualified.
#[async_trait]
pub trait SpreadsheetApi: Send + Sync {
    async fn get_values(&self, spreadsheet_id: &str, range: &str)
        -> Result<ValueRange, SheetsError>;

    /// Full grid payload including formatting.
    async fn get_grid(&self, spreadsheet_id: &str, range: &str) -> Result<Value, SheetsError>;

    /// Writes with user-entered semantics (formulas evaluated, numbers parsed).
    async fn update_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &Rows,
    ) -> Result<UpdateSummary, SheetsError>;

    /// Appends after the last row with data in the table found at `range`.
    async fn append_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &Rows,
    ) -> Result<AppendSummary, SheetsError>;

    async fn create_spreadsheet(
        &self,
        title: &str,
        folder_id: Option<&str>,
    ) -> Result<CreatedFile, SheetsError>;

    /// Most recently modified first.
    async fn list_spreadsheets(
        &self,
        folder_id: Option<&str>,
    ) -> Result<Vec<SpreadsheetSummary>, SheetsError>;

    /// Tabs in display order.
    async fn list_sheets(&self, spreadsheet_id: &str) -> Result<Vec<SheetProperties>, SheetsError>;

    async fn add_sheet(
        &self,
        spreadsheet_id: &str,
        title: &str,
    ) -> Result<SheetProperties, SheetsError>;

    async fn rename_sheet(
        &self,
        spreadsheet_id: &str,
        sheet_id: i64,
        title: &str,
    ) -> Result<(), SheetsError>;
}
