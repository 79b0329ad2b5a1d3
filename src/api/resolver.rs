use crate::api::{SheetService, Worksheet};
use crate::config::MissingSpreadsheet;
use crate::error::{PipelineError, Result};
use anyhow::{anyhow, Context};
use tracing::{debug, info};

/// The grid size of a tab created by `resolve`.
pub const DEFAULT_TAB_ROWS: usize = 100;
pub const DEFAULT_TAB_COLS: usize = 20;

/// Finds the tab named `tab` in the spreadsheet named `spreadsheet`, creating the tab if it is
/// missing. A missing spreadsheet is handled according to `policy`. Calling this again returns the
/// same tab without creating anything new.
pub async fn resolve(
    service: &mut dyn SheetService,
    spreadsheet: &str,
    tab: &str,
    policy: MissingSpreadsheet,
) -> Result<Worksheet> {
    let spreadsheet_id = match service
        .find_spreadsheet(spreadsheet)
        .await
        .map_err(PipelineError::not_found)?
    {
        Some(id) => id,
        None => match policy {
            MissingSpreadsheet::Fail => {
                return Err(PipelineError::not_found(anyhow!(
                    "No spreadsheet named '{spreadsheet}' is shared with the service account"
                )))
            }
            MissingSpreadsheet::Create => {
                info!("Creating spreadsheet '{spreadsheet}'");
                service
                    .create_spreadsheet(spreadsheet)
                    .await
                    .map_err(PipelineError::not_found)?
            }
        },
    };
    debug!("Spreadsheet '{spreadsheet}' has ID {spreadsheet_id}");

    if let Some(worksheet) = service
        .find_worksheet(&spreadsheet_id, tab)
        .await
        .map_err(PipelineError::not_found)?
    {
        return Ok(worksheet);
    }

    info!("Adding tab '{tab}' to '{spreadsheet}'");
    service
        .add_worksheet(&spreadsheet_id, tab, DEFAULT_TAB_ROWS, DEFAULT_TAB_COLS)
        .await
        .with_context(|| format!("Unable to add tab '{tab}' to '{spreadsheet}'"))
        .map_err(PipelineError::not_found)
}
