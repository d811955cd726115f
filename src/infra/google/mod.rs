// Google API integration.
//
// `credentials` turns the configured auth mode into a `CredentialContext`;
// `sheets_client` implements the `SpreadsheetApi` port over Sheets v4 and Drive v3.

pub mod credentials;
pub mod sheets_client;

pub use credentials::CredentialContext;
pub use sheets_client::GoogleSheetsClient;
