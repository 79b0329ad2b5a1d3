//! The remote spreadsheet: the `SheetService` trait, its Google and in-memory implementations,
//! the credentials that authorize the Google one, and the resolver that finds the worksheet.

mod credentials;
mod google;
mod resolver;
mod test_service;

use crate::error::{PipelineError, Res, Result};
use crate::Config;
use anyhow::Context;
use tracing::debug;

pub use credentials::{AccessToken, CredentialSource, ServiceAccount, DEFAULT_CREDENTIALS_PATH};
pub(crate) use credentials::TokenProvider;
pub use google::GoogleSheets;
pub use resolver::{resolve, DEFAULT_TAB_COLS, DEFAULT_TAB_ROWS};
pub use test_service::{Call, TestSheetService};

// OAuth scopes required to find spreadsheets by name (Drive) and to edit them (Sheets).
const OAUTH_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];

/// Names one tab of one spreadsheet.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Worksheet {
    spreadsheet_id: String,
    sheet_id: i64,
    title: String,
}

impl Worksheet {
    pub fn new(spreadsheet_id: impl Into<String>, sheet_id: i64, title: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            sheet_id,
            title: title.into(),
        }
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    pub fn sheet_id(&self) -> i64 {
        self.sheet_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// The A1 range covering the whole tab, e.g. `'Promotors'`.
    pub(crate) fn whole_range(&self) -> String {
        quote_title(&self.title)
    }

    /// The A1 notation of one cell. `row` and `col` are 1-based.
    pub(crate) fn cell_range(&self, row: usize, col: usize) -> String {
        format!("{}!{}{row}", quote_title(&self.title), column_letters(col))
    }
}

fn quote_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

/// Converts a 1-based column number to its letters: 1 -> A, 26 -> Z, 27 -> AA.
pub(crate) fn column_letters(mut col: usize) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// The remote spreadsheet operations the pipeline needs. Rows and columns are 1-based.
#[async_trait::async_trait]
pub trait SheetService: Send {
    /// Returns the ID of a spreadsheet named `name`, if one exists.
    async fn find_spreadsheet(&mut self, name: &str) -> Res<Option<String>>;

    /// Creates a spreadsheet named `name` and returns its ID.
    async fn create_spreadsheet(&mut self, name: &str) -> Res<String>;

    /// Returns the tab named `title` in the spreadsheet, if it exists.
    async fn find_worksheet(&mut self, spreadsheet_id: &str, title: &str)
        -> Res<Option<Worksheet>>;

    /// Adds a tab named `title` with the given grid size.
    async fn add_worksheet(
        &mut self,
        spreadsheet_id: &str,
        title: &str,
        rows: usize,
        cols: usize,
    ) -> Res<Worksheet>;

    /// Sets the grid size of the tab, dropping anything outside of it.
    async fn resize(&mut self, worksheet: &Worksheet, rows: usize, cols: usize) -> Res<()>;

    /// Removes every value from the tab.
    async fn clear(&mut self, worksheet: &Worksheet) -> Res<()>;

    /// Writes `values` as rows starting at A1.
    async fn update(&mut self, worksheet: &Worksheet, values: &[Vec<String>]) -> Res<()>;

    /// Writes a single cell.
    async fn update_cell(
        &mut self,
        worksheet: &Worksheet,
        row: usize,
        col: usize,
        value: &str,
    ) -> Res<()>;
}

/// Whether to talk to Google or to keep the sheet in memory.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum Mode {
    #[default]
    Google,
    Test,
}

/// When this environment variable is set and non-empty the program runs in `Mode::Test`.
pub const TEST_MODE_ENV: &str = "PROMOTER_SYNC_IN_TEST_MODE";

impl Mode {
    pub fn from_env() -> Self {
        match std::env::var(TEST_MODE_ENV) {
            Ok(value) if !value.is_empty() => Mode::Test,
            _ => Mode::Google,
        }
    }
}

/// Creates an authorized `SheetService`. In `Mode::Google` this loads the service account key
/// and fetches the first access token; in `Mode::Test` it returns an empty in-memory service that
/// already contains the configured spreadsheet.
pub async fn sheet_service(config: &Config, mode: Mode) -> Result<Box<dyn SheetService>> {
    match mode {
        Mode::Google => {
            let source = CredentialSource::from_setting(config.credentials())
                .map_err(PipelineError::configuration)?;
            debug!("Using credentials from {source:?}");
            let sheets = GoogleSheets::connect(&source)
                .await
                .context("Unable to authorize the Google Sheets client")
                .map_err(PipelineError::configuration)?;
            Ok(Box::new(sheets))
        }
        Mode::Test => {
            debug!("{TEST_MODE_ENV} is set, using an in-memory sheet");
            Ok(Box::new(TestSheetService::with_spreadsheet(
                config.spreadsheet(),
            )))
        }
    }
}
