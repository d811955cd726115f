use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A grid of cell values, row-major. Cells are plain JSON scalars
/// (strings, numbers, booleans or null) exactly as the Sheets API returns them.
pub type Rows = Vec<Vec<Value>>;

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRange {
    pub range: String,
    #[serde(default)]
    pub values: Rows,
}

/// Values-only read of a sheet. Mirrors the `valueRanges` shape of a batch get
/// so clients can treat both read modes the same way.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetValues {
    pub spreadsheet_id: String,
    pub value_ranges: Vec<ValueRange>,
}

/// Result of `get_sheet_data`: plain values, or the full grid payload
/// (formatting, metadata) when the caller asked for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SheetData {
    Values(SheetValues),
    Grid(Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    pub spreadsheet_id: String,
    #[serde(default)]
    pub updated_range: String,
    #[serde(default)]
    pub updated_rows: u32,
    #[serde(default)]
    pub updated_columns: u32,
    #[serde(default)]
    pub updated_cells: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendSummary {
    pub spreadsheet_id: String,
    /// The table the rows were appended to, absent when the sheet was empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_range: Option<String>,
    pub updated_range: String,
    pub updated_rows: u32,
    pub updated_cells: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadsheetSummary {
    pub id: String,
    pub title: String,
}

/// A spreadsheet file as Drive reports it right after creation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSpreadsheet {
    pub spreadsheet_id: String,
    pub title: String,
    /// Parent folder id, or `"root"` for My Drive.
    pub folder: String,
    pub sheets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProperties {
    pub sheet_id: i64,
    pub title: String,
    #[serde(default)]
    pub index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSheet {
    pub sheet_id: i64,
    pub title: String,
    pub index: Option<u32>,
    pub spreadsheet_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

// ============================================================================
// ERRORS
// ============================================================================

/// Distinguishable failure kinds, stable across transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    InvalidArgument,
    AlreadyExists,
    QuotaExceeded,
    Transient,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::Transient => "transient",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SheetsError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// `rate_limited` means the upstream rejected the call before doing any work,
    /// so even non-idempotent calls are safe to repeat.
    #[error("Transient upstream error: {message}")]
    Transient { message: String, rate_limited: bool },
}

impl SheetsError {
    pub fn transient(message: impl Into<String>) -> Self {
        SheetsError::Transient {
            message: message.into(),
            rate_limited: false,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        SheetsError::Transient {
            message: message.into(),
            rate_limited: true,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SheetsError::NotFound(_) => ErrorKind::NotFound,
            SheetsError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            SheetsError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SheetsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            SheetsError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            SheetsError::Transient { .. } => ErrorKind::Transient,
        }
    }

    /// Prefixes the message, keeping the error kind.
    pub fn with_context(self, context: &str) -> Self {
        let wrap = |message: String| format!("{}: {}", context, message);
        match self {
            SheetsError::NotFound(m) => SheetsError::NotFound(wrap(m)),
            SheetsError::PermissionDenied(m) => SheetsError::PermissionDenied(wrap(m)),
            SheetsError::InvalidArgument(m) => SheetsError::InvalidArgument(wrap(m)),
            SheetsError::AlreadyExists(m) => SheetsError::AlreadyExists(wrap(m)),
            SheetsError::QuotaExceeded(m) => SheetsError::QuotaExceeded(wrap(m)),
            SheetsError::Transient {
                message,
                rate_limited,
            } => SheetsError::Transient {
                message: wrap(message),
                rate_limited,
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SheetsError::Transient { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            SheetsError::Transient {
                rate_limited: true,
                ..
            }
        )
    }
}
