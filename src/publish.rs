//! Writes the filtered table to the local CSV snapshot and to the remote worksheet.

use crate::api::{SheetService, Worksheet};
use crate::error::{PipelineError, Res, Result};
use crate::table::Table;
use crate::utils;
use anyhow::Context;
use chrono::NaiveDateTime;
use std::path::Path;
use tracing::{debug, info};

/// The header of the column holding the refresh time.
pub const LAST_UPDATED: &str = "Last Updated";

/// The format of the refresh time written below `LAST_UPDATED`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Writes `table` to `path` and then replaces the contents of `worksheet` with it, followed by a
/// `Last Updated` column stamped with `now`. An unwritable `path` is a configuration error and
/// leaves the sheet untouched. If the remote write fails the local file is kept.
pub async fn publish(
    table: &Table,
    service: &mut dyn SheetService,
    worksheet: &Worksheet,
    path: &Path,
    now: NaiveDateTime,
) -> Result<()> {
    write_csv(table, path)
        .await
        .map_err(PipelineError::configuration)?;
    info!("Wrote {} rows to {}", table.row_count(), path.display());

    write_sheet(table, service, worksheet, now)
        .await
        .with_context(|| format!("Unable to update the '{}' tab", worksheet.title()))
        .map_err(PipelineError::publish)?;
    info!(
        "Published {} rows to the '{}' tab",
        table.row_count(),
        worksheet.title()
    );
    Ok(())
}

/// Writes `table` as CSV, header first, replacing `path` if it exists.
pub async fn write_csv(table: &Table, path: &Path) -> Res<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in table.to_strings() {
        writer
            .write_record(&record)
            .context("Unable to serialize a CSV record")?;
    }
    let bytes = writer
        .into_inner()
        .context("Unable to finish the CSV output")?;
    utils::make_parent_dir(path).await?;
    utils::write(path, bytes).await
}

async fn write_sheet(
    table: &Table,
    service: &mut dyn SheetService,
    worksheet: &Worksheet,
    now: NaiveDateTime,
) -> Res<()> {
    let rows = table.row_count() + 1;
    let cols = table.column_count() + 2;
    let stamp_col = table.column_count() + 1;

    debug!("Resizing '{}' to {rows}x{cols}", worksheet.title());
    service.resize(worksheet, rows, cols).await?;
    service.clear(worksheet).await?;
    service.update(worksheet, &table.to_strings()).await?;
    service
        .update_cell(worksheet, 1, stamp_col, LAST_UPDATED)
        .await?;
    service
        .update_cell(worksheet, 2, stamp_col, &now.format(TIMESTAMP_FORMAT).to_string())
        .await?;
    Ok(())
}
