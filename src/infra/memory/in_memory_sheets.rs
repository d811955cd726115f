// In-memory implementation of SpreadsheetApi.
//
// Behaves like the real API for the calls the service makes: sheet-qualified
// ranges, anchored writes, appends after the last row with data, duplicate
// tab names rejected. Tests can queue failures to exercise retry paths.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::core::sheets::a1::{column_letters, qualify, split_qualified, A1Range};
use crate::core::sheets::{
    AppendSummary, CreatedFile, Rows, SheetProperties, SheetsError, SpreadsheetApi,
    SpreadsheetSummary, UpdateSummary, ValueRange,
};

#[derive(Debug, Clone)]
struct StoredSheet {
    sheet_id: i64,
    title: String,
    cells: Rows,
}

#[derive(Debug, Clone)]
struct StoredSpreadsheet {
    title: String,
    parent: Option<String>,
    /// Logical clock value of the last write.
    modified: u64,
    sheets: Vec<StoredSheet>,
}

impl StoredSpreadsheet {
    fn sheet(&self, title: &str) -> Result<&StoredSheet, SheetsError> {
        self.sheets
            .iter()
            .find(|s| s.title == title)
            .ok_or_else(|| missing_sheet(title))
    }

    fn sheet_mut(&mut self, title: &str) -> Result<&mut StoredSheet, SheetsError> {
        self.sheets
            .iter_mut()
            .find(|s| s.title == title)
            .ok_or_else(|| missing_sheet(title))
    }

    fn has_title(&self, title: &str) -> bool {
        self.sheets
            .iter()
            .any(|s| s.title.to_lowercase() == title.to_lowercase())
    }
}

/// The API reports an unknown tab as an unparseable range.
fn missing_sheet(sheet: &str) -> SheetsError {
    SheetsError::NotFound(format!("Unable to parse range: {}", qualify(sheet, None)))
}

fn is_blank(cell: &Value) -> bool {
    match cell {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Number of rows up to and including the last one holding data.
fn used_rows(cells: &Rows) -> usize {
    cells
        .iter()
        .rposition(|row| row.iter().any(|c| !is_blank(c)))
        .map(|i| i + 1)
        .unwrap_or(0)
}

fn used_columns(cells: &Rows) -> usize {
    cells
        .iter()
        .map(|row| {
            row.iter()
                .rposition(|c| !is_blank(c))
                .map(|i| i + 1)
                .unwrap_or(0)
        })
        .max()
        .unwrap_or(0)
}

/// Writes `values` with their top-left corner at the 0-based (`row`, `column`).
fn write_block(cells: &mut Rows, row: usize, column: usize, values: &Rows) {
    for (r, values_row) in values.iter().enumerate() {
        let target_row = row + r;
        if cells.len() <= target_row {
            cells.resize(target_row + 1, Vec::new());
        }
        let target = &mut cells[target_row];
        for (c, value) in values_row.iter().enumerate() {
            let target_col = column + c;
            if target.len() <= target_col {
                target.resize(target_col + 1, Value::Null);
            }
            target[target_col] = value.clone();
        }
    }
}

/// `A1:C3` style label for a block of `rows` x `columns` at 1-based (`row`, `column`).
fn block_label(row: usize, column: usize, rows: usize, columns: usize) -> String {
    format!(
        "{}{}:{}{}",
        column_letters(column as u32),
        row,
        column_letters((column + columns.max(1) - 1) as u32),
        row + rows.max(1) - 1
    )
}

pub struct InMemorySpreadsheetApi {
    spreadsheets: DashMap<String, StoredSpreadsheet>,
    next_id: AtomicU64,
    clock: AtomicU64,
    calls: AtomicUsize,
    failures: Mutex<VecDeque<SheetsError>>,
    /// Failures pinned to a call number (1-based, counting every call).
    scheduled: Mutex<HashMap<usize, SheetsError>>,
}

impl Default for InMemorySpreadsheetApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySpreadsheetApi {
    pub fn new() -> Self {
        Self {
            spreadsheets: DashMap::new(),
            next_id: AtomicU64::new(1),
            clock: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            scheduled: Mutex::new(HashMap::new()),
        }
    }

    /// Total calls made through the port, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Makes the next call fail with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, error: SheetsError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error);
        }
    }

    /// Lets the next `successes` calls through, then fails the one after with `error`.
    pub fn fail_after(&self, successes: usize, error: SheetsError) {
        let call = self.call_count() + successes + 1;
        if let Ok(mut scheduled) = self.scheduled.lock() {
            scheduled.insert(call, error);
        }
    }

    fn begin_call(&self) -> Result<(), SheetsError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let pinned = self
            .scheduled
            .lock()
            .ok()
            .and_then(|mut scheduled| scheduled.remove(&call));
        if let Some(error) = pinned {
            return Err(error);
        }
        let queued = self
            .failures
            .lock()
            .ok()
            .and_then(|mut failures| failures.pop_front());
        match queued {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn with_spreadsheet<T>(
        &self,
        spreadsheet_id: &str,
        f: impl FnOnce(&StoredSpreadsheet) -> Result<T, SheetsError>,
    ) -> Result<T, SheetsError> {
        let entry = self
            .spreadsheets
            .get(spreadsheet_id)
            .ok_or_else(|| not_found(spreadsheet_id))?;
        f(entry.value())
    }

    fn with_spreadsheet_mut<T>(
        &self,
        spreadsheet_id: &str,
        f: impl FnOnce(&mut StoredSpreadsheet) -> Result<T, SheetsError>,
    ) -> Result<T, SheetsError> {
        let modified = self.tick();
        let mut entry = self
            .spreadsheets
            .get_mut(spreadsheet_id)
            .ok_or_else(|| not_found(spreadsheet_id))?;
        let result = f(entry.value_mut())?;
        entry.modified = modified;
        Ok(result)
    }
}

fn not_found(spreadsheet_id: &str) -> SheetsError {
    SheetsError::NotFound(format!("Requested entity was not found: {}", spreadsheet_id))
}

#[async_trait]
impl SpreadsheetApi for InMemorySpreadsheetApi {
    async fn get_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<ValueRange, SheetsError> {
        self.begin_call()?;
        let (sheet_name, a1) = split_qualified(range)?;

        self.with_spreadsheet(spreadsheet_id, |spreadsheet| {
            let sheet = spreadsheet.sheet(&sheet_name)?;
            let (row0, col0, rows, columns) = match a1.as_deref() {
                None => (0, 0, used_rows(&sheet.cells), used_columns(&sheet.cells)),
                Some(a1) => {
                    let parsed = A1Range::parse(a1)?;
                    let row0 = parsed.first_row() as usize - 1;
                    let col0 = parsed.first_column() as usize - 1;
                    // A lone cell reads just that cell; open sides run to the data edge.
                    let (rows, columns) = match parsed.end {
                        None => (
                            if parsed.start.row.is_some() { 1 } else { usize::MAX },
                            if parsed.start.column.is_some() { 1 } else { usize::MAX },
                        ),
                        Some(_) => (
                            parsed.row_count().map(|n| n as usize).unwrap_or(usize::MAX),
                            parsed.column_count().map(|n| n as usize).unwrap_or(usize::MAX),
                        ),
                    };
                    (row0, col0, rows, columns)
                }
            };

            let mut values: Rows = sheet
                .cells
                .iter()
                .skip(row0)
                .take(rows)
                .map(|row| row.iter().skip(col0).take(columns).cloned().collect::<Vec<_>>())
                .collect();

            // The API omits trailing empty cells and rows.
            for row in values.iter_mut() {
                while row.last().map(is_blank).unwrap_or(false) {
                    row.pop();
                }
            }
            while values.last().map(Vec::is_empty).unwrap_or(false) {
                values.pop();
            }

            Ok(ValueRange {
                range: range.to_string(),
                values,
            })
        })
    }

    async fn get_grid(&self, spreadsheet_id: &str, range: &str) -> Result<Value, SheetsError> {
        self.begin_call()?;
        let (sheet_name, _) = split_qualified(range)?;

        self.with_spreadsheet(spreadsheet_id, |spreadsheet| {
            let sheet = spreadsheet.sheet(&sheet_name)?;
            let row_data: Vec<Value> = sheet
                .cells
                .iter()
                .map(|row| {
                    let values: Vec<Value> = row
                        .iter()
                        .map(|cell| json!({ "userEnteredValue": cell }))
                        .collect();
                    json!({ "values": values })
                })
                .collect();

            Ok(json!({
                "spreadsheetId": spreadsheet_id,
                "properties": { "title": spreadsheet.title },
                "sheets": [{
                    "properties": { "sheetId": sheet.sheet_id, "title": sheet.title },
                    "data": [{ "rowData": row_data }]
                }]
            }))
        })
    }

    async fn update_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &Rows,
    ) -> Result<UpdateSummary, SheetsError> {
        self.begin_call()?;
        let (sheet_name, a1) = split_qualified(range)?;
        let anchor = A1Range::parse(a1.as_deref().unwrap_or("A1"))?;
        anchor.check_fits(values)?;

        self.with_spreadsheet_mut(spreadsheet_id, |spreadsheet| {
            let sheet = spreadsheet.sheet_mut(&sheet_name)?;
            let row = anchor.first_row() as usize;
            let column = anchor.first_column() as usize;
            write_block(&mut sheet.cells, row - 1, column - 1, values);

            let rows = values.len();
            let columns = values.iter().map(Vec::len).max().unwrap_or(0);
            Ok(UpdateSummary {
                spreadsheet_id: spreadsheet_id.to_string(),
                updated_range: qualify(
                    &sheet.title,
                    Some(&block_label(row, column, rows, columns)),
                ),
                updated_rows: rows as u32,
                updated_columns: columns as u32,
                updated_cells: values.iter().map(Vec::len).sum::<usize>() as u32,
            })
        })
    }

    async fn append_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &Rows,
    ) -> Result<AppendSummary, SheetsError> {
        self.begin_call()?;
        let (sheet_name, _) = split_qualified(range)?;

        self.with_spreadsheet_mut(spreadsheet_id, |spreadsheet| {
            let sheet = spreadsheet.sheet_mut(&sheet_name)?;
            let existing_rows = used_rows(&sheet.cells);
            let existing_columns = used_columns(&sheet.cells);
            let table_range = (existing_rows > 0).then(|| {
                qualify(
                    &sheet.title,
                    Some(&block_label(1, 1, existing_rows, existing_columns)),
                )
            });

            write_block(&mut sheet.cells, existing_rows, 0, values);

            let columns = values.iter().map(Vec::len).max().unwrap_or(0);
            Ok(AppendSummary {
                spreadsheet_id: spreadsheet_id.to_string(),
                table_range,
                updated_range: qualify(
                    &sheet.title,
                    Some(&block_label(existing_rows + 1, 1, values.len(), columns)),
                ),
                updated_rows: values.len() as u32,
                updated_cells: values.iter().map(Vec::len).sum::<usize>() as u32,
            })
        })
    }

    async fn create_spreadsheet(
        &self,
        title: &str,
        folder_id: Option<&str>,
    ) -> Result<CreatedFile, SheetsError> {
        self.begin_call()?;
        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let parent = folder_id.map(String::from);

        self.spreadsheets.insert(
            id.clone(),
            StoredSpreadsheet {
                title: title.to_string(),
                parent: parent.clone(),
                modified: self.tick(),
                sheets: vec![StoredSheet {
                    sheet_id: 0,
                    title: "Sheet1".to_string(),
                    cells: Vec::new(),
                }],
            },
        );

        Ok(CreatedFile {
            id,
            name: title.to_string(),
            parents: parent.into_iter().collect(),
        })
    }

    async fn list_spreadsheets(
        &self,
        folder_id: Option<&str>,
    ) -> Result<Vec<SpreadsheetSummary>, SheetsError> {
        self.begin_call()?;
        let mut matching: Vec<(u64, SpreadsheetSummary)> = self
            .spreadsheets
            .iter()
            .filter(|entry| folder_id.is_none() || entry.parent.as_deref() == folder_id)
            .map(|entry| {
                (
                    entry.modified,
                    SpreadsheetSummary {
                        id: entry.key().clone(),
                        title: entry.title.clone(),
                    },
                )
            })
            .collect();

        matching.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(matching.into_iter().map(|(_, summary)| summary).collect())
    }

    async fn list_sheets(
        &self,
        spreadsheet_id: &str,
    ) -> Result<Vec<SheetProperties>, SheetsError> {
        self.begin_call()?;
        self.with_spreadsheet(spreadsheet_id, |spreadsheet| {
            Ok(spreadsheet
                .sheets
                .iter()
                .enumerate()
                .map(|(index, sheet)| SheetProperties {
                    sheet_id: sheet.sheet_id,
                    title: sheet.title.clone(),
                    index: Some(index as u32),
                })
                .collect())
        })
    }

    async fn add_sheet(
        &self,
        spreadsheet_id: &str,
        title: &str,
    ) -> Result<SheetProperties, SheetsError> {
        self.begin_call()?;
        self.with_spreadsheet_mut(spreadsheet_id, |spreadsheet| {
            if spreadsheet.has_title(title) {
                return Err(SheetsError::AlreadyExists(format!(
                    "A sheet with the name \"{}\" already exists. Please enter another name.",
                    title
                )));
            }

            let sheet_id = spreadsheet
                .sheets
                .iter()
                .map(|s| s.sheet_id)
                .max()
                .unwrap_or(0)
                + 1;
            spreadsheet.sheets.push(StoredSheet {
                sheet_id,
                title: title.to_string(),
                cells: Vec::new(),
            });

            Ok(SheetProperties {
                sheet_id,
                title: title.to_string(),
                index: Some(spreadsheet.sheets.len() as u32 - 1),
            })
        })
    }

    async fn rename_sheet(
        &self,
        spreadsheet_id: &str,
        sheet_id: i64,
        title: &str,
    ) -> Result<(), SheetsError> {
        self.begin_call()?;
        self.with_spreadsheet_mut(spreadsheet_id, |spreadsheet| {
            let clashes = spreadsheet
                .sheets
                .iter()
                .any(|s| s.sheet_id != sheet_id && s.title.to_lowercase() == title.to_lowercase());
            if clashes {
                return Err(SheetsError::AlreadyExists(format!(
                    "A sheet with the name \"{}\" already exists. Please enter another name.",
                    title
                )));
            }

            let sheet = spreadsheet
                .sheets
                .iter_mut()
                .find(|s| s.sheet_id == sheet_id)
                .ok_or_else(|| SheetsError::NotFound(format!("No sheet with id {}", sheet_id)))?;
            sheet.title = title.to_string();
            Ok(())
        })
    }
}
