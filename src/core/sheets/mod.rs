pub mod a1;
pub mod sheets_models;
pub mod sheets_service;
pub mod spreadsheet_api;

pub use sheets_models::{
    AppendSummary, CreatedFile, ErrorKind, Rows, SheetProperties, SheetsError, SpreadsheetSummary,
    UpdateSummary, ValueRange,
};
pub use sheets_service::SheetsService;
pub use spreadsheet_api::SpreadsheetApi;
