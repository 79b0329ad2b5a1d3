//! Sequences one run: authorize, resolve the worksheet, fetch, filter and publish.
//!
//! The run is a forward-only state machine. Each stage either advances the state or stops the run
//! in `State::Failed` with the `PipelineError` that caused it.

use crate::api::{self, resolve, Mode, SheetService};
use crate::dates::DateRange;
use crate::error::{PipelineError, Result};
use crate::fetch::Fetcher;
use crate::publish::publish;
use crate::table;
use crate::Config;
use anyhow::anyhow;
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};

/// The states of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Init,
    Authenticated,
    SheetResolved,
    Fetched,
    Filtered,
    Published,
    Skipped,
    Failed,
}

serde_plain::derive_display_from_serialize!(State);

impl State {
    /// True for the states a run ends in.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Published | State::Skipped | State::Failed)
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    from_date: String,
    to_date: String,
    fetched: usize,
    kept: usize,
    columns: usize,
    output: PathBuf,
    spreadsheet: String,
    tab: String,
}

impl Summary {
    /// The number of records in the downloaded payload.
    pub fn fetched(&self) -> usize {
        self.fetched
    }

    /// The number of rows that passed the filter.
    pub fn kept(&self) -> usize {
        self.kept
    }

    pub fn columns(&self) -> usize {
        self.columns
    }
}

/// The result of a run that did not fail: either `State::Published` or `State::Skipped`.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    state: State,
    message: String,
    summary: Summary,
}

impl Outcome {
    pub fn state(&self) -> State {
        self.state
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    /// Print the message to `info!` and the summary as JSON to `debug!`.
    pub fn print(&self) {
        info!("{}", self.message);
        if let Ok(json) = serde_json::to_string_pretty(&self.summary) {
            debug!("Run summary:\n\n{json}\n\n");
        }
    }
}

/// Everything a run needs, passed explicitly from stage to stage.
pub struct PipelineContext {
    config: Config,
    fetcher: Fetcher,
    sheets: Box<dyn SheetService>,
    now: Option<NaiveDateTime>,
    state: State,
}

impl PipelineContext {
    /// Authorizes a `SheetService` for `mode` and builds the context around it.
    pub async fn new(config: Config, mode: Mode) -> Result<Self> {
        let sheets = api::sheet_service(&config, mode).await?;
        Self::with_service(config, sheets)
    }

    /// Builds the context around an already authorized `SheetService`.
    pub fn with_service(config: Config, sheets: Box<dyn SheetService>) -> Result<Self> {
        let fetcher = Fetcher::new(config.fetch().clone())?;
        let mut context = Self {
            config,
            fetcher,
            sheets,
            now: None,
            state: State::Init,
        };
        context.advance(State::Authenticated);
        Ok(context)
    }

    /// Pins the clock used for the date range and the `Last Updated` stamp.
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs the remaining stages. On error the context is left in `State::Failed`.
    pub async fn run(&mut self) -> Result<Outcome> {
        match self.run_stages().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.advance(State::Failed);
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self) -> Result<Outcome> {
        let worksheet = resolve(
            self.sheets.as_mut(),
            self.config.spreadsheet(),
            self.config.tab(),
            self.config.missing_spreadsheet(),
        )
        .await?;
        self.advance(State::SheetResolved);

        let now = self.now.unwrap_or_else(|| Local::now().naive_local());
        let days = self.config.lookback_days();
        let range = DateRange::lookback(now.date(), days).ok_or_else(|| {
            PipelineError::configuration(anyhow!("A lookback of {days} days is out of range"))
        })?;
        info!("Fetching promoter transactions for {range}");
        let payload = self.fetcher.fetch(&range).await?;
        self.advance(State::Fetched);

        let normalized = table::normalize(&payload)?;
        debug!("Columns: {:?}", normalized.columns());
        let fetched = normalized.row_count();
        let table = table::filter_table(&normalized, self.config.criteria())?;
        info!("{} of {fetched} transactions matched", table.row_count());
        self.advance(State::Filtered);

        let summary = Summary {
            from_date: range.from_param(),
            to_date: range.to_param(),
            fetched,
            kept: table.row_count(),
            columns: table.column_count(),
            output: self.config.output().to_path_buf(),
            spreadsheet: self.config.spreadsheet().to_string(),
            tab: worksheet.title().to_string(),
        };

        if table.is_empty() {
            self.advance(State::Skipped);
            return Ok(Outcome {
                state: State::Skipped,
                message: format!("No matching transactions for {range}, nothing was written"),
                summary,
            });
        }

        publish(
            &table,
            self.sheets.as_mut(),
            &worksheet,
            self.config.output(),
            now,
        )
        .await?;
        self.advance(State::Published);
        Ok(Outcome {
            state: State::Published,
            message: format!(
                "Published {} transactions to '{}' / '{}'",
                table.row_count(),
                self.config.spreadsheet(),
                worksheet.title()
            ),
            summary,
        })
    }

    fn advance(&mut self, next: State) {
        debug_assert!(next > self.state, "{} -> {next}", self.state);
        info!("{} -> {next}", self.state);
        self.state = next;
    }
}

/// Runs the whole pipeline once.
pub async fn run(config: Config, mode: Mode) -> Result<Outcome> {
    let mut context = match PipelineContext::new(config, mode).await {
        Ok(context) => context,
        Err(e) => {
            info!("{} -> {}", State::Init, State::Failed);
            return Err(e);
        }
    };
    context.run().await
}
