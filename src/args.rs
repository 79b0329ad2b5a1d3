//! These structs provide the CLI interface for the promoter-sync CLI.

use crate::config::{MissingSpreadsheet, DEFAULT_OUTPUT, DEFAULT_SPREADSHEET, DEFAULT_TAB};
use crate::dates::LOOKBACK_DAYS;
use crate::fetch::DEFAULT_BASE_URL;
use crate::table::DEFAULT_THRESHOLD;
use clap::Parser;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use tracing_subscriber::filter::LevelFilter;
use url::Url;

/// promoter-sync: Publish large NSE promoter transactions to a Google sheet.
///
/// Each run downloads the insider trading (PIT) disclosures of the last 120 days from NSE, keeps
/// the buy and sell transactions above the quantity threshold, writes them to a local CSV file
/// and replaces the contents of the configured Google sheet tab with them, followed by a
/// "Last Updated" timestamp.
///
/// Google access uses a service account key. Share the spreadsheet with the service account's
/// email address before the first run. A `.env` file in the working directory is loaded first.
#[derive(Debug, Parser, Clone)]
#[command(version)]
pub struct Args {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The service account key: either a path to the key file or the key JSON itself. Defaults
    /// to credentials/credentials.json when that file exists.
    #[arg(long, env = "GOOGLE_SHEETS_CREDENTIALS", hide_env_values = true)]
    credentials: Option<String>,

    /// The name of the Google spreadsheet to publish to.
    #[arg(long, env = "PROMOTER_SYNC_SPREADSHEET", default_value = DEFAULT_SPREADSHEET)]
    spreadsheet: String,

    /// The name of the tab within the spreadsheet. It is created if it does not exist.
    #[arg(long, env = "PROMOTER_SYNC_TAB", default_value = DEFAULT_TAB)]
    tab: String,

    /// Where to write the filtered CSV file. Any existing file is overwritten.
    #[arg(long, env = "PROMOTER_SYNC_OUTPUT", default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// What to do when no spreadsheet has the configured name.
    #[arg(
        long,
        env = "PROMOTER_SYNC_MISSING_SPREADSHEET",
        value_enum,
        default_value_t = MissingSpreadsheet::Fail
    )]
    missing_spreadsheet: MissingSpreadsheet,

    /// The NSE site root. The session cookie is taken from here and the API lives below it.
    #[arg(long, env = "PROMOTER_SYNC_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: Url,

    /// How many days before today the query window starts, at most 36500.
    #[arg(
        long,
        default_value_t = LOOKBACK_DAYS,
        value_parser = clap::value_parser!(u32).range(1..=36500)
    )]
    lookback_days: u32,

    /// Transactions must acquire more than this many securities to be kept.
    #[arg(long, default_value_t = Decimal::from(DEFAULT_THRESHOLD))]
    threshold: Decimal,
}

impl Args {
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn credentials(&self) -> Option<&str> {
        self.credentials.as_deref()
    }

    pub fn spreadsheet(&self) -> &str {
        &self.spreadsheet
    }

    pub fn tab(&self) -> &str {
        &self.tab
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn missing_spreadsheet(&self) -> MissingSpreadsheet {
        self.missing_spreadsheet
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn lookback_days(&self) -> u32 {
        self.lookback_days
    }

    pub fn threshold(&self) -> Decimal {
        self.threshold
    }
}
