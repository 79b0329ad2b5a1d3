//! Run configuration for promoter-sync.
//!
//! Settings come from command line flags with environment variable fallbacks (see `Args`). The
//! `Config` object is the resolved form that the pipeline stages read from.

use crate::args::Args;
use crate::dates::LOOKBACK_DAYS;
use crate::fetch::FetchSettings;
use crate::table::Criteria;
use std::path::{Path, PathBuf};

pub const DEFAULT_SPREADSHEET: &str = "Pankaj_Power";
pub const DEFAULT_TAB: &str = "Promotors";
pub const DEFAULT_OUTPUT: &str = "data/nse_filtered_data.csv";

/// What the sheet resolver does when no spreadsheet has the configured name.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    serde::Serialize,
    serde::Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum MissingSpreadsheet {
    /// Stop the run with a not-found error.
    #[default]
    Fail,
    /// Create a new spreadsheet with the configured name.
    Create,
}

serde_plain::derive_display_from_serialize!(MissingSpreadsheet);
serde_plain::derive_fromstr_from_deserialize!(MissingSpreadsheet);

/// The `Config` object represents the configuration of one run. Build it from parsed `Args`, or
/// with `Config::new` and the `with_*` methods.
#[derive(Debug, Clone)]
pub struct Config {
    credentials: Option<String>,
    spreadsheet: String,
    tab: String,
    output: PathBuf,
    missing_spreadsheet: MissingSpreadsheet,
    fetch: FetchSettings,
    criteria: Criteria,
    lookback_days: u32,
}

impl Config {
    /// Creates a configuration with default settings for everything except the names of the
    /// spreadsheet, the tab and the output file.
    pub fn new(
        spreadsheet: impl Into<String>,
        tab: impl Into<String>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            credentials: None,
            spreadsheet: spreadsheet.into(),
            tab: tab.into(),
            output: output.into(),
            missing_spreadsheet: MissingSpreadsheet::default(),
            fetch: FetchSettings::default(),
            criteria: Criteria::default(),
            lookback_days: LOOKBACK_DAYS,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<String>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_missing_spreadsheet(mut self, policy: MissingSpreadsheet) -> Self {
        self.missing_spreadsheet = policy;
        self
    }

    pub fn with_fetch(mut self, fetch: FetchSettings) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    /// The raw credential setting: a key file path or inline key JSON.
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

    pub fn fetch(&self) -> &FetchSettings {
        &self.fetch
    }

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    pub fn lookback_days(&self) -> u32 {
        self.lookback_days
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_SPREADSHEET, DEFAULT_TAB, DEFAULT_OUTPUT)
    }
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self::new(args.spreadsheet(), args.tab(), args.output())
            .with_credentials(args.credentials().map(str::to_string))
            .with_missing_spreadsheet(args.missing_spreadsheet())
            .with_fetch(FetchSettings::new(args.base_url().clone()))
            .with_criteria(Criteria::with_threshold(args.threshold()))
            .with_lookback_days(args.lookback_days())
    }
}
