// The fixed set of tools this server exposes.
//
// Descriptors are static data. `ToolRegistry::parse_call` is the only way to
// turn an untrusted `tools/call` into a `ToolCall`, so nothing reaches the
// spreadsheet adapter without passing validation here first.

use serde_json::{json, Map, Value};
use thiserror::Error;

use super::tool_call::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    GetSheetData,
    UpdateCells,
    CreateSpreadsheet,
    ListSpreadsheets,
    AddRows,
    ListSheets,
    CreateSheet,
    HealthCheck,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::GetSheetData => "get_sheet_data",
            ToolName::UpdateCells => "update_cells",
            ToolName::CreateSpreadsheet => "create_spreadsheet",
            ToolName::ListSpreadsheets => "list_spreadsheets",
            ToolName::AddRows => "add_rows",
            ToolName::ListSheets => "list_sheets",
            ToolName::CreateSheet => "create_sheet",
            ToolName::HealthCheck => "health_check",
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Boolean,
    /// Rows of cells.
    Array2D,
    StringArray,
}

impl ParamKind {
    fn expected(&self) -> &'static str {
        match self {
            ParamKind::String => "a string",
            ParamKind::Boolean => "a boolean",
            ParamKind::Array2D => "an array of arrays of scalar cells",
            ParamKind::StringArray => "an array of strings",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array2D => value
                .as_array()
                .map(|rows| rows.iter().all(is_scalar_row))
                .unwrap_or(false),
            ParamKind::StringArray => value
                .as_array()
                .map(|items| items.iter().all(Value::is_string))
                .unwrap_or(false),
        }
    }

    fn schema(&self) -> Value {
        match self {
            ParamKind::String => json!({ "type": "string" }),
            ParamKind::Boolean => json!({ "type": "boolean" }),
            ParamKind::Array2D => json!({
                "type": "array",
                "items": {
                    "type": "array",
                    "items": { "type": ["string", "number", "boolean", "null"] }
                }
            }),
            ParamKind::StringArray => json!({
                "type": "array",
                "items": { "type": "string" }
            }),
        }
    }
}

/// A row of plain cells; nested arrays and objects are not cell values.
fn is_scalar_row(row: &Value) -> bool {
    row.as_array()
        .map(|cells| cells.iter().all(|c| !c.is_array() && !c.is_object()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolDescriptor {
    pub name: ToolName,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
}

impl ToolDescriptor {
    /// JSON Schema for the tool's arguments, as advertised by `tools/list`.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in self.params {
            let mut schema = param.kind.schema();
            if let Value::Object(ref mut fields) = schema {
                fields.insert("description".to_string(), json!(param.description));
            }
            properties.insert(param.name.to_string(), schema);
        }

        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name.as_str(),
            "description": self.description,
            "inputSchema": self.input_schema(),
        })
    }
}

const fn param(
    name: &'static str,
    kind: ParamKind,
    required: bool,
    description: &'static str,
) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required,
        description,
    }
}

const SPREADSHEET_ID: ParamSpec = param(
    "spreadsheet_id",
    ParamKind::String,
    true,
    "The ID of the spreadsheet (found in its URL)",
);
const SHEET: ParamSpec = param("sheet", ParamKind::String, true, "The name of the sheet tab");

static TOOLS: [ToolDescriptor; 8] = [
    ToolDescriptor {
        name: ToolName::GetSheetData,
        description: "Get data from a specific sheet in a Google Spreadsheet. Returns cell values \
                      only unless include_grid_data is set.",
        params: &[
            SPREADSHEET_ID,
            SHEET,
            param(
                "range",
                ParamKind::String,
                false,
                "Optional cell range in A1 notation (e.g. 'A1:C10'). Defaults to the whole sheet.",
            ),
            param(
                "include_grid_data",
                ParamKind::Boolean,
                false,
                "Include cell formatting and metadata. Much larger responses. Defaults to false.",
            ),
        ],
    },
    ToolDescriptor {
        name: ToolName::UpdateCells,
        description: "Update cells in a Google Spreadsheet. Values are interpreted as if typed \
                      by a user, so formulas are evaluated.",
        params: &[
            SPREADSHEET_ID,
            SHEET,
            param(
                "range",
                ParamKind::String,
                true,
                "Cell range in A1 notation (e.g. 'A1:C10')",
            ),
            param("data", ParamKind::Array2D, true, "2D array of values to write"),
        ],
    },
    ToolDescriptor {
        name: ToolName::CreateSpreadsheet,
        description: "Create a new Google Spreadsheet in the configured Drive folder.",
        params: &[
            param("title", ParamKind::String, true, "The title of the new spreadsheet"),
            param(
                "sheet_names",
                ParamKind::StringArray,
                false,
                "Optional names for the initial sheet tabs",
            ),
        ],
    },
    ToolDescriptor {
        name: ToolName::ListSpreadsheets,
        description: "List spreadsheets in a Drive folder, most recently modified first. \
                      Defaults to the configured folder, or My Drive when none is configured.",
        params: &[param(
            "folder_id",
            ParamKind::String,
            false,
            "Drive folder to list instead of the configured one",
        )],
    },
    ToolDescriptor {
        name: ToolName::AddRows,
        description: "Append rows after the last row with data in a sheet.",
        params: &[
            SPREADSHEET_ID,
            SHEET,
            param("data", ParamKind::Array2D, true, "2D array of rows to append"),
        ],
    },
    ToolDescriptor {
        name: ToolName::ListSheets,
        description: "List the names of all sheet tabs in a Google Spreadsheet.",
        params: &[SPREADSHEET_ID],
    },
    ToolDescriptor {
        name: ToolName::CreateSheet,
        description: "Create a new sheet tab in an existing Google Spreadsheet.",
        params: &[
            SPREADSHEET_ID,
            param("title", ParamKind::String, true, "The title for the new sheet"),
        ],
    },
    ToolDescriptor {
        name: ToolName::HealthCheck,
        description: "Report server status. Does not contact Google.",
        params: &[],
    },
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidRequest {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing required parameter '{param}' for tool '{tool}'")]
    MissingParam { tool: ToolName, param: &'static str },

    #[error("Parameter '{param}' for tool '{tool}' must be {expected}")]
    WrongType {
        tool: ToolName,
        param: &'static str,
        expected: &'static str,
    },

    #[error("Unknown parameter '{param}' for tool '{tool}'")]
    UnknownParam { tool: ToolName, param: String },

    #[error("Arguments for tool '{0}' must be a JSON object")]
    ArgumentsNotObject(ToolName),
}

/// Read-only view over the static tool table.
#[derive(Debug, Clone, Copy)]
pub struct ToolRegistry {
    tools: &'static [ToolDescriptor],
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: &TOOLS }
    }

    pub fn list(&self) -> &'static [ToolDescriptor] {
        self.tools
    }

    pub fn lookup(&self, name: &str) -> Option<&'static ToolDescriptor> {
        self.tools.iter().find(|t| t.name.as_str() == name)
    }

    /// Validates `arguments` against the named tool and builds a typed call.
    /// Missing arguments and explicit nulls both count as "not supplied".
    pub fn parse_call(
        &self,
        name: &str,
        arguments: Option<&Value>,
    ) -> Result<ToolCall, InvalidRequest> {
        let descriptor = self
            .lookup(name)
            .ok_or_else(|| InvalidRequest::UnknownTool(name.to_string()))?;
        let tool = descriptor.name;

        let empty = Map::new();
        let args = match arguments {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(map)) => map,
            Some(_) => return Err(InvalidRequest::ArgumentsNotObject(tool)),
        };

        if let Some(unknown) = args
            .keys()
            .find(|key| !descriptor.params.iter().any(|p| p.name == key.as_str()))
        {
            return Err(InvalidRequest::UnknownParam {
                tool,
                param: unknown.clone(),
            });
        }

        for param_spec in descriptor.params {
            match args.get(param_spec.name).filter(|v| !v.is_null()) {
                None if param_spec.required => {
                    return Err(InvalidRequest::MissingParam {
                        tool,
                        param: param_spec.name,
                    })
                }
                Some(value) if !param_spec.kind.matches(value) => {
                    return Err(InvalidRequest::WrongType {
                        tool,
                        param: param_spec.name,
                        expected: param_spec.kind.expected(),
                    })
                }
                _ => {}
            }
        }

        Ok(ToolCall::from_validated(tool, args))
    }
}
