use serde_json::{json, Map, Value};

use super::tool_catalog::ToolName;
use crate::core::sheets::{Rows, SheetsError, SheetsService, SpreadsheetApi};

/// A validated tool invocation. One variant per tool, so dispatch is an
/// exhaustive match rather than a lookup in a table of closures.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    GetSheetData {
        spreadsheet_id: String,
        sheet: String,
        range: Option<String>,
        include_grid_data: bool,
    },
    UpdateCells {
        spreadsheet_id: String,
        sheet: String,
        range: String,
        data: Rows,
    },
    CreateSpreadsheet {
        title: String,
        sheet_names: Vec<String>,
    },
    ListSpreadsheets {
        folder_id: Option<String>,
    },
    AddRows {
        spreadsheet_id: String,
        sheet: String,
        data: Rows,
    },
    ListSheets {
        spreadsheet_id: String,
    },
    CreateSheet {
        spreadsheet_id: String,
        title: String,
    },
    HealthCheck,
}

/// Typed accessors over arguments that already passed `ToolRegistry` checks.
struct Args<'a>(&'a Map<String, Value>);

impl<'a> Args<'a> {
    fn opt_str(&self, name: &str) -> Option<String> {
        self.0.get(name).and_then(Value::as_str).map(String::from)
    }

    fn str(&self, name: &str) -> String {
        self.opt_str(name).unwrap_or_default()
    }

    fn flag(&self, name: &str) -> bool {
        self.0.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    fn rows(&self, name: &str) -> Rows {
        self.0
            .get(name)
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .map(|row| row.as_array().cloned().unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn strings(&self, name: &str) -> Vec<String> {
        self.0
            .get(name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ToolCall {
    pub(super) fn from_validated(tool: ToolName, args: &Map<String, Value>) -> Self {
        let args = Args(args);
        match tool {
            ToolName::GetSheetData => ToolCall::GetSheetData {
                spreadsheet_id: args.str("spreadsheet_id"),
                sheet: args.str("sheet"),
                range: args.opt_str("range"),
                include_grid_data: args.flag("include_grid_data"),
            },
            ToolName::UpdateCells => ToolCall::UpdateCells {
                spreadsheet_id: args.str("spreadsheet_id"),
                sheet: args.str("sheet"),
                range: args.str("range"),
                data: args.rows("data"),
            },
            ToolName::CreateSpreadsheet => ToolCall::CreateSpreadsheet {
                title: args.str("title"),
                sheet_names: args.strings("sheet_names"),
            },
            ToolName::ListSpreadsheets => ToolCall::ListSpreadsheets {
                folder_id: args.opt_str("folder_id"),
            },
            ToolName::AddRows => ToolCall::AddRows {
                spreadsheet_id: args.str("spreadsheet_id"),
                sheet: args.str("sheet"),
                data: args.rows("data"),
            },
            ToolName::ListSheets => ToolCall::ListSheets {
                spreadsheet_id: args.str("spreadsheet_id"),
            },
            ToolName::CreateSheet => ToolCall::CreateSheet {
                spreadsheet_id: args.str("spreadsheet_id"),
                title: args.str("title"),
            },
            ToolName::HealthCheck => ToolCall::HealthCheck,
        }
    }

    pub fn name(&self) -> ToolName {
        match self {
            ToolCall::GetSheetData { .. } => ToolName::GetSheetData,
            ToolCall::UpdateCells { .. } => ToolName::UpdateCells,
            ToolCall::CreateSpreadsheet { .. } => ToolName::CreateSpreadsheet,
            ToolCall::ListSpreadsheets { .. } => ToolName::ListSpreadsheets,
            ToolCall::AddRows { .. } => ToolName::AddRows,
            ToolCall::ListSheets { .. } => ToolName::ListSheets,
            ToolCall::CreateSheet { .. } => ToolName::CreateSheet,
            ToolCall::HealthCheck => ToolName::HealthCheck,
        }
    }

    /// Runs the call against the adapter and returns the tool's JSON result.
    pub async fn invoke<A: SpreadsheetApi>(
        self,
        service: &SheetsService<A>,
    ) -> Result<Value, SheetsError> {
        let result = match self {
            ToolCall::GetSheetData {
                spreadsheet_id,
                sheet,
                range,
                include_grid_data,
            } => json!(
                service
                    .get_sheet_data(&spreadsheet_id, &sheet, range.as_deref(), include_grid_data)
                    .await?
            ),
            ToolCall::UpdateCells {
                spreadsheet_id,
                sheet,
                range,
                data,
            } => json!(
                service
                    .update_cells(&spreadsheet_id, &sheet, &range, &data)
                    .await?
            ),
            ToolCall::CreateSpreadsheet { title, sheet_names } => {
                json!(service.create_spreadsheet(&title, &sheet_names).await?)
            }
            ToolCall::ListSpreadsheets { folder_id } => {
                json!(service.list_spreadsheets(folder_id.as_deref()).await?)
            }
            ToolCall::AddRows {
                spreadsheet_id,
                sheet,
                data,
            } => json!(service.add_rows(&spreadsheet_id, &sheet, &data).await?),
            ToolCall::ListSheets { spreadsheet_id } => {
                json!(service.list_sheets(&spreadsheet_id).await?)
            }
            ToolCall::CreateSheet {
                spreadsheet_id,
                title,
            } => json!(service.create_sheet(&spreadsheet_id, &title).await?),
            ToolCall::HealthCheck => json!(service.health_check()),
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tools::ToolRegistry;
    use crate::infra::memory::InMemorySpreadsheetApi;

    fn parse(name: &str, args: Value) -> ToolCall {
        ToolRegistry::new().parse_call(name, Some(&args)).unwrap()
    }

    #[test]
    fn optional_params_take_defaults() {
        let call = parse(
            "get_sheet_data",
            json!({ "spreadsheet_id": "abc", "sheet": "Sheet1" }),
        );
        assert_eq!(
            call,
            ToolCall::GetSheetData {
                spreadsheet_id: "abc".into(),
                sheet: "Sheet1".into(),
                range: None,
                include_grid_data: false,
            }
        );

        let call = parse("create_spreadsheet", json!({ "title": "Plan" }));
        assert_eq!(
            call,
            ToolCall::CreateSpreadsheet {
                title: "Plan".into(),
                sheet_names: vec![],
            }
        );
    }

    #[test]
    fn cell_values_keep_their_json_types() {
        let call = parse(
            "add_rows",
            json!({ "spreadsheet_id": "abc", "sheet": "S", "data": [["a", 1, true, null]] }),
        );
        match call {
            ToolCall::AddRows { data, .. } => {
                assert_eq!(data, vec![vec![json!("a"), json!(1), json!(true), Value::Null]]);
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn invoke_serializes_results_in_api_shape() {
        let service = SheetsService::new(InMemorySpreadsheetApi::new(), None);

        let created = parse("create_spreadsheet", json!({ "title": "Plan" }))
            .invoke(&service)
            .await
            .unwrap();
        assert_eq!(created["title"], "Plan");
        assert_eq!(created["folder"], "root");
        let id = created["spreadsheetId"].as_str().unwrap().to_string();

        let sheets = parse("list_sheets", json!({ "spreadsheet_id": id }))
            .invoke(&service)
            .await
            .unwrap();
        assert_eq!(sheets, json!(["Sheet1"]));

        let health = ToolCall::HealthCheck.invoke(&service).await.unwrap();
        assert_eq!(health["status"], "healthy");
    }
}
