//! Downloads the PIT disclosures from the NSE API.
//!
//! The API rejects requests that do not carry the cookies handed out by the site root, so every
//! fetch first bootstraps a session against the root, waits a moment, and then requests the data
//! with browser-like headers.

use crate::dates::DateRange;
use crate::error::{PipelineError, Result};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER, USER_AGENT};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, trace};
use url::Url;

/// The NSE site root.
pub const DEFAULT_BASE_URL: &str = "https://www.nseindia.com";

/// The PIT endpoint, relative to the site root.
const PIT_PATH: &str = "/api/corporates-pit";

const BROWSER_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) ",
    "AppleWebKit/537.36 (KHTML, like Gecko) ",
    "Chrome/89.0.4389.82 Safari/537.36"
);
const ACCEPT_JSON: &str = "application/json, text/javascript, */*; q=0.01";
const X_REQUESTED_WITH: &str = "x-requested-with";
const XML_HTTP_REQUEST: &str = "XMLHttpRequest";

const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(5);
const DATA_TIMEOUT: Duration = Duration::from_secs(10);
const COURTESY_DELAY: Duration = Duration::from_secs(1);

/// Where and how patiently to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    base_url: Url,
    courtesy_delay: Duration,
    bootstrap_timeout: Duration,
    data_timeout: Duration,
}

impl FetchSettings {
    /// Default delays and timeouts against `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            courtesy_delay: COURTESY_DELAY,
            bootstrap_timeout: BOOTSTRAP_TIMEOUT,
            data_timeout: DATA_TIMEOUT,
        }
    }

    /// Replaces the pause between the session bootstrap and the data request.
    pub fn with_courtesy_delay(mut self, delay: Duration) -> Self {
        self.courtesy_delay = delay;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self::new(Url::parse(DEFAULT_BASE_URL).expect("default base URL"))
    }
}

/// A cookie-keeping HTTP session against the NSE site.
#[derive(Debug, Clone)]
pub struct Fetcher {
    http: reqwest::Client,
    settings: FetchSettings,
}

impl Fetcher {
    pub fn new(settings: FetchSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(default_headers(&settings.base_url)?)
            .build()
            .context("Unable to build the HTTP client")
            .map_err(PipelineError::fetch)?;
        Ok(Self { http, settings })
    }

    /// The data URL for `range`. The earlier date is `from_date`.
    pub fn data_url(&self, range: &DateRange) -> Result<Url> {
        let mut url = self
            .settings
            .base_url
            .join(PIT_PATH)
            .context("Unable to build the PIT URL")
            .map_err(PipelineError::fetch)?;
        url.query_pairs_mut()
            .append_pair("index", "equities")
            .append_pair("from_date", &range.from_param())
            .append_pair("to_date", &range.to_param());
        Ok(url)
    }

    /// Bootstraps the session, pauses, and downloads the disclosures for `range`.
    pub async fn fetch(&self, range: &DateRange) -> Result<Value> {
        self.bootstrap().await?;
        trace!("Sleeping {:?} before the data request", self.settings.courtesy_delay);
        tokio::time::sleep(self.settings.courtesy_delay).await;
        let url = self.data_url(range)?;
        self.get_json(url).await.map_err(PipelineError::fetch)
    }

    /// Visits the site root to collect the session cookies. Only transport failures matter here;
    /// the root often answers with an error page while still setting the cookies.
    async fn bootstrap(&self) -> Result<()> {
        let url = self.settings.base_url.clone();
        debug!("Initializing session against {url}");
        let response = self
            .http
            .get(url.clone())
            .timeout(self.settings.bootstrap_timeout)
            .send()
            .await
            .with_context(|| format!("Failed to initialize session against {url}"))
            .map_err(PipelineError::fetch)?;
        trace!("Session bootstrap answered {}", response.status());
        Ok(())
    }

    async fn get_json(&self, url: Url) -> anyhow::Result<Value> {
        info!("Requesting {url}");
        let response = self
            .http
            .get(url.clone())
            .timeout(self.settings.data_timeout)
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Request to {url} failed with status {status}");
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("Unable to read the response body from {url}"))?;
        serde_json::from_str(&body).context("Failed to parse JSON")
    }
}

fn default_headers(base_url: &Url) -> Result<HeaderMap> {
    let referer = base_url.as_str().trim_end_matches('/');
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_JSON));
    headers.insert(
        REFERER,
        HeaderValue::from_str(referer)
            .context("The base URL is not a valid Referer header")
            .map_err(PipelineError::fetch)?,
    );
    headers.insert(X_REQUESTED_WITH, HeaderValue::from_static(XML_HTTP_REQUEST));
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use httpmock::{Method::GET, MockServer};
    use serde_json::json;

    fn range() -> DateRange {
        DateRange::ending(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
    }

    fn fetcher(server: &MockServer) -> Fetcher {
        let settings = FetchSettings::new(Url::parse(&server.base_url()).unwrap())
            .with_courtesy_delay(Duration::ZERO);
        Fetcher::new(settings).unwrap()
    }

    #[test]
    fn test_data_url() {
        let fetcher = Fetcher::new(FetchSettings::default()).unwrap();
        let url = fetcher.data_url(&range()).unwrap();
        assert_eq!(
            "https://www.nseindia.com/api/corporates-pit?index=equities&from_date=02-11-2023&to_date=01-03-2024",
            url.as_str()
        );
    }

    #[test]
    fn test_default_settings() {
        let settings = FetchSettings::default();
        assert_eq!(Duration::from_secs(1), settings.courtesy_delay);
        assert_eq!(Duration::from_secs(5), settings.bootstrap_timeout);
        assert_eq!(Duration::from_secs(10), settings.data_timeout);
    }

    #[tokio::test]
    async fn test_fetch_sends_session_cookie_and_headers() {
        let server = MockServer::start_async().await;
        let root = server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200).header("set-cookie", "nsit=abc123; Path=/");
            })
            .await;
        let data = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/corporates-pit")
                    .query_param("index", "equities")
                    .query_param("from_date", "02-11-2023")
                    .query_param("to_date", "01-03-2024")
                    .header("cookie", "nsit=abc123")
                    .header("accept", ACCEPT_JSON)
                    .header("x-requested-with", XML_HTTP_REQUEST)
                    .header("user-agent", BROWSER_USER_AGENT);
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({"data": [{"symbol": "ABC"}]}));
            })
            .await;

        let payload = fetcher(&server).fetch(&range()).await.unwrap();

        root.assert_async().await;
        data.assert_async().await;
        assert_eq!(json!({"data": [{"symbol": "ABC"}]}), payload);
    }

    #[tokio::test]
    async fn test_fetch_ignores_bootstrap_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(403);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/corporates-pit");
                then.status(200).json_body(json!({"data": []}));
            })
            .await;

        let payload = fetcher(&server).fetch(&range()).await.unwrap();
        assert_eq!(json!({"data": []}), payload);
    }

    #[tokio::test]
    async fn test_fetch_non_success_status_is_fetch_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/corporates-pit");
                then.status(401).body("Unauthorized");
            })
            .await;

        let err = fetcher(&server).fetch(&range()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Fetch(_)), "{err}");
        assert!(err.to_string().contains("401"), "{err}");
    }

    #[tokio::test]
    async fn test_fetch_malformed_json_is_fetch_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/corporates-pit");
                then.status(200).body("<html>Access Denied</html>");
            })
            .await;

        let err = fetcher(&server).fetch(&range()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Fetch(_)), "{err}");
        assert!(err.to_string().contains("Failed to parse JSON"), "{err}");
    }

    #[tokio::test]
    async fn test_unreachable_site_is_fetch_error() {
        // Nothing listens on the discard port.
        let settings = FetchSettings::new(Url::parse("http://127.0.0.1:9").unwrap())
            .with_courtesy_delay(Duration::ZERO);
        let err = Fetcher::new(settings)
            .unwrap()
            .fetch(&range())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Fetch(_)), "{err}");
        assert!(err.to_string().contains("initialize session"), "{err}");
    }
}
