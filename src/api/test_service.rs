//! Implements the `SheetService` trait using in-memory data for testing purposes.
//!
//! Note: this is compiled even in the "production" version of this app so that we can run the whole
//! app, top-to-bottom, without using Google Sheets.

use crate::api::{SheetService, Worksheet};
use crate::error::Res;
use anyhow::{anyhow, bail};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The grid size Google gives a new spreadsheet's first tab.
const NEW_SPREADSHEET_ROWS: usize = 1000;
const NEW_SPREADSHEET_COLS: usize = 26;
const FIRST_TAB: &str = "Sheet1";

/// One recorded `SheetService` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FindSpreadsheet(String),
    CreateSpreadsheet(String),
    FindWorksheet(String),
    AddWorksheet {
        title: String,
        rows: usize,
        cols: usize,
    },
    Resize {
        rows: usize,
        cols: usize,
    },
    Clear,
    Update {
        rows: usize,
    },
    UpdateCell {
        row: usize,
        col: usize,
        value: String,
    },
}

impl Call {
    /// True for calls that change the remote spreadsheet's values or size.
    pub fn is_publish(&self) -> bool {
        matches!(
            self,
            Call::Resize { .. } | Call::Clear | Call::Update { .. } | Call::UpdateCell { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct Tab {
    sheet_id: i64,
    title: String,
    rows: usize,
    cols: usize,
    grid: Vec<Vec<String>>,
}

impl Tab {
    fn new(sheet_id: i64, title: &str, rows: usize, cols: usize) -> Self {
        Self {
            sheet_id,
            title: title.to_string(),
            rows,
            cols,
            grid: vec![vec![String::new(); cols]; rows],
        }
    }

    fn resize(&mut self, rows: usize, cols: usize) {
        self.grid.resize(rows, vec![String::new(); cols]);
        for row in &mut self.grid {
            row.resize(cols, String::new());
        }
        self.rows = rows;
        self.cols = cols;
    }

    fn set(&mut self, row: usize, col: usize, value: &str) -> Res<()> {
        if row == 0 || col == 0 || row > self.rows || col > self.cols {
            bail!(
                "Cell ({row}, {col}) exceeds the grid limits of '{}' ({}x{})",
                self.title,
                self.rows,
                self.cols
            );
        }
        self.grid[row - 1][col - 1] = value.to_string();
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Spreadsheet {
    id: String,
    name: String,
    tabs: Vec<Tab>,
}

#[derive(Default)]
struct State {
    spreadsheets: Vec<Spreadsheet>,
    calls: Vec<Call>,
    next_id: i64,
    fail_when: Option<fn(&Call) -> bool>,
}

impl State {
    fn add_spreadsheet(&mut self, name: &str) -> String {
        self.next_id += 1;
        let id = format!("test-spreadsheet-{}", self.next_id);
        let tab = Tab::new(0, FIRST_TAB, NEW_SPREADSHEET_ROWS, NEW_SPREADSHEET_COLS);
        self.spreadsheets.push(Spreadsheet {
            id: id.clone(),
            name: name.to_string(),
            tabs: vec![tab],
        });
        id
    }

    /// Logs the call and fails it if the failure predicate matches.
    fn record(&mut self, call: Call) -> Res<()> {
        let fail = self.fail_when.is_some_and(|f| f(&call));
        let description = format!("{call:?}");
        self.calls.push(call);
        if fail {
            bail!("Injected failure for {description}");
        }
        Ok(())
    }

    fn spreadsheet_mut(&mut self, id: &str) -> Res<&mut Spreadsheet> {
        self.spreadsheets
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| anyhow!("Spreadsheet {id} not found"))
    }

    fn tab_mut(&mut self, worksheet: &Worksheet) -> Res<&mut Tab> {
        self.spreadsheet_mut(worksheet.spreadsheet_id())?
            .tabs
            .iter_mut()
            .find(|t| t.sheet_id == worksheet.sheet_id())
            .ok_or_else(|| anyhow!("Tab '{}' not found", worksheet.title()))
    }

    fn tab(&self, spreadsheet: &str, title: &str) -> Option<&Tab> {
        self.spreadsheets
            .iter()
            .find(|s| s.name == spreadsheet)?
            .tabs
            .iter()
            .find(|t| t.title == title)
    }
}

/// An implementation of the `SheetService` trait that does not use Google Sheets. Clones share the
/// same spreadsheets, so a test can hand one clone to the pipeline and inspect another.
#[derive(Clone, Default)]
pub struct TestSheetService {
    state: Arc<Mutex<State>>,
}

impl TestSheetService {
    /// Creates a service holding no spreadsheets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a service holding one empty spreadsheet named `name`.
    pub fn with_spreadsheet(name: &str) -> Self {
        let service = Self::new();
        service.lock().add_spreadsheet(name);
        service
    }

    /// Makes every call for which `predicate` returns true fail after being recorded.
    pub fn fail_when(self, predicate: fn(&Call) -> bool) -> Self {
        self.lock().fail_when = Some(predicate);
        self
    }

    /// The calls made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// The number of spreadsheets named `name`.
    pub fn spreadsheet_count(&self, name: &str) -> usize {
        self.lock()
            .spreadsheets
            .iter()
            .filter(|s| s.name == name)
            .count()
    }

    /// The grid size of a tab as (rows, cols).
    pub fn size(&self, spreadsheet: &str, tab: &str) -> Option<(usize, usize)> {
        self.lock()
            .tab(spreadsheet, tab)
            .map(|t| (t.rows, t.cols))
    }

    /// The whole grid of a tab.
    pub fn values(&self, spreadsheet: &str, tab: &str) -> Option<Vec<Vec<String>>> {
        self.lock().tab(spreadsheet, tab).map(|t| t.grid.clone())
    }

    /// The value of one cell; `row` and `col` are 1-based.
    pub fn cell(&self, spreadsheet: &str, tab: &str, row: usize, col: usize) -> Option<String> {
        self.lock()
            .tab(spreadsheet, tab)?
            .grid
            .get(row.checked_sub(1)?)?
            .get(col.checked_sub(1)?)
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl SheetService for TestSheetService {
    async fn find_spreadsheet(&mut self, name: &str) -> Res<Option<String>> {
        let mut state = self.lock();
        state.record(Call::FindSpreadsheet(name.to_string()))?;
        Ok(state
            .spreadsheets
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.id.clone()))
    }

    async fn create_spreadsheet(&mut self, name: &str) -> Res<String> {
        let mut state = self.lock();
        state.record(Call::CreateSpreadsheet(name.to_string()))?;
        Ok(state.add_spreadsheet(name))
    }

    async fn find_worksheet(
        &mut self,
        spreadsheet_id: &str,
        title: &str,
    ) -> Res<Option<Worksheet>> {
        let mut state = self.lock();
        state.record(Call::FindWorksheet(title.to_string()))?;
        let spreadsheet = state.spreadsheet_mut(spreadsheet_id)?;
        Ok(spreadsheet
            .tabs
            .iter()
            .find(|t| t.title == title)
            .map(|t| Worksheet::new(spreadsheet_id, t.sheet_id, &t.title)))
    }

    async fn add_worksheet(
        &mut self,
        spreadsheet_id: &str,
        title: &str,
        rows: usize,
        cols: usize,
    ) -> Res<Worksheet> {
        let mut state = self.lock();
        state.record(Call::AddWorksheet {
            title: title.to_string(),
            rows,
            cols,
        })?;
        state.next_id += 1;
        let sheet_id = state.next_id;
        let spreadsheet = state.spreadsheet_mut(spreadsheet_id)?;
        if spreadsheet.tabs.iter().any(|t| t.title == title) {
            bail!("A sheet with the name '{title}' already exists");
        }
        spreadsheet.tabs.push(Tab::new(sheet_id, title, rows, cols));
        Ok(Worksheet::new(spreadsheet_id, sheet_id, title))
    }

    async fn resize(&mut self, worksheet: &Worksheet, rows: usize, cols: usize) -> Res<()> {
        let mut state = self.lock();
        state.record(Call::Resize { rows, cols })?;
        state.tab_mut(worksheet)?.resize(rows, cols);
        Ok(())
    }

    async fn clear(&mut self, worksheet: &Worksheet) -> Res<()> {
        let mut state = self.lock();
        state.record(Call::Clear)?;
        let tab = state.tab_mut(worksheet)?;
        for row in &mut tab.grid {
            row.iter_mut().for_each(String::clear);
        }
        Ok(())
    }

    async fn update(&mut self, worksheet: &Worksheet, values: &[Vec<String>]) -> Res<()> {
        let mut state = self.lock();
        state.record(Call::Update { rows: values.len() })?;
        let tab = state.tab_mut(worksheet)?;
        for (r, row) in values.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                tab.set(r + 1, c + 1, value)?;
            }
        }
        Ok(())
    }

    async fn update_cell(
        &mut self,
        worksheet: &Worksheet,
        row: usize,
        col: usize,
        value: &str,
    ) -> Res<()> {
        let mut state = self.lock();
        state.record(Call::UpdateCell {
            row,
            col,
            value: value.to_string(),
        })?;
        state.tab_mut(worksheet)?.set(row, col, value)
    }
}
