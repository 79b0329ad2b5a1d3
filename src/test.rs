//! Shared test utilities for creating test environments.
//!
//! This module is only compiled when running tests (`#[cfg(test)]`).

use crate::api::TestSheetService;
use crate::fetch::FetchSettings;
use crate::pipeline::PipelineContext;
use crate::Config;
use chrono::{NaiveDate, NaiveDateTime};
use httpmock::{Method::GET, Mock, MockServer};
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

/// Wraps `rows` the way the PIT endpoint does.
pub fn pit_payload(rows: Vec<Value>) -> Value {
    json!({ "data": rows })
}

/// A PIT record with the given transaction type and acquired quantity.
pub fn pit_row(kind: &str, quantity: Value) -> Value {
    json!({
        "symbol": "ABCLTD",
        "company": "ABC Limited",
        "acqName": "Promoter Holdings Pvt Ltd",
        "personCategory": "Promoter Group",
        "secAcq": quantity,
        "tdpTransactionType": kind,
        "acqfromDt": "15-Feb-2024",
    })
}

/// Test environment with a mock NSE site, an in-memory spreadsheet named `Pankaj_Power`, and an
/// output path in a temporary directory. Holds the TempDir to keep it alive for the test.
pub struct TestEnv {
    _temp_dir: TempDir,
    server: MockServer,
    sheets: TestSheetService,
    config: Config,
}

impl TestEnv {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let server = MockServer::start_async().await;
        let fetch = FetchSettings::new(Url::parse(&server.base_url()).unwrap())
            .with_courtesy_delay(Duration::ZERO);
        let config = Config::default()
            .with_output(temp_dir.path().join("data").join("nse_filtered_data.csv"))
            .with_fetch(fetch);
        let sheets = TestSheetService::with_spreadsheet(config.spreadsheet());
        Self {
            _temp_dir: temp_dir,
            server,
            sheets,
            config,
        }
    }

    /// Serves the session bootstrap and answers the PIT request with `status` and `body`.
    pub async fn serve(&self, status: u16, body: Value) -> Mock<'_> {
        self.server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200).header("set-cookie", "nsit=test; Path=/");
            })
            .await;
        self.server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/corporates-pit")
                    .query_param("index", "equities");
                then.status(status)
                    .header("content-type", "application/json")
                    .json_body(body);
            })
            .await
    }

    pub fn config(&self) -> Config {
        self.config.clone()
    }

    /// A handle sharing state with the sheet service given to `context`.
    pub fn sheets(&self) -> TestSheetService {
        self.sheets.clone()
    }

    /// The pinned clock: 2024-03-01 09:30:00.
    pub fn now(&self) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    /// A pipeline context over this environment's config and sheets, with the clock pinned.
    pub fn context(&self) -> PipelineContext {
        PipelineContext::with_service(self.config(), Box::new(self.sheets()))
            .unwrap()
            .with_now(self.now())
    }
}
