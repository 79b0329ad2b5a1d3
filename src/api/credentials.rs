//! Service account credentials and the OAuth 2.0 JWT-bearer grant used to turn them into access
//! tokens for the Sheets and Drive APIs.

use crate::api::OAUTH_SCOPES;
use crate::error::Res;
use crate::utils;
use anyhow::{anyhow, bail, Context};
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
use ring::signature::RsaKeyPair;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Used when no credential setting is given and this file exists.
pub const DEFAULT_CREDENTIALS_PATH: &str = "credentials/credentials.json";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;

/// Tokens are refreshed this many seconds before they expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Where the service account key comes from.
#[derive(Clone, Eq, PartialEq)]
pub enum CredentialSource {
    /// A path to the key file downloaded from the Google Cloud console.
    File(PathBuf),
    /// The key JSON itself, e.g. from an environment variable.
    Inline(String),
}

impl CredentialSource {
    /// Interprets the credential setting. Text that starts with `{` is inline JSON, anything else
    /// is a path. Without a setting, `credentials/credentials.json` is used if it exists.
    pub fn from_setting(setting: Option<&str>) -> Res<Self> {
        Self::from_setting_or(setting, Path::new(DEFAULT_CREDENTIALS_PATH))
    }

    fn from_setting_or(setting: Option<&str>, default_path: &Path) -> Res<Self> {
        match setting.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) if s.starts_with('{') => Ok(Self::Inline(s.to_string())),
            Some(s) => Ok(Self::File(PathBuf::from(s))),
            None if default_path.is_file() => Ok(Self::File(default_path.to_path_buf())),
            None => bail!(
                "No credentials found. Set GOOGLE_SHEETS_CREDENTIALS to the path of a service \
                account key file or to the key JSON itself."
            ),
        }
    }

    /// Reads and parses the service account key.
    pub async fn load(&self) -> Res<ServiceAccount> {
        match self {
            Self::File(path) => {
                let json = utils::read(path).await?;
                ServiceAccount::try_from_str(&json)
                    .with_context(|| format!("Invalid service account key in {}", path.display()))
            }
            Self::Inline(json) => ServiceAccount::try_from_str(json)
                .context("Invalid service account key in GOOGLE_SHEETS_CREDENTIALS"),
        }
    }
}

impl Debug for CredentialSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "File({})", path.display()),
            Self::Inline(_) => write!(f, "Inline(..)"),
        }
    }
}

/// The fields of a service account key file that the token exchange needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccount {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl Debug for ServiceAccount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: &'static str,
    typ: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
}

/// The token endpoint's answer.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_in: i64,
}

impl ServiceAccount {
    pub fn try_from_str(input: &str) -> Res<Self> {
        serde_json::from_str(input).context("Failed to deserialize JSON service account key")
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Builds and signs the RS256 JWT assertion for `scope`, issued at `now`.
    fn assertion(&self, scope: &str, now: DateTime<Utc>) -> Res<String> {
        let header = JwtHeader {
            alg: "RS256",
            typ: "JWT",
            kid: self.private_key_id.as_deref(),
        };
        let claims = JwtClaims {
            iss: &self.client_email,
            scope,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: (now + TimeDelta::seconds(TOKEN_LIFETIME_SECS)).timestamp(),
        };

        let header_b64 = BASE64_URL_SAFE_NO_PAD
            .encode(serde_json::to_string(&header).context("Failed to encode JWT header")?);
        let claims_b64 = BASE64_URL_SAFE_NO_PAD
            .encode(serde_json::to_string(&claims).context("Failed to encode JWT claims")?);
        let signing_input = format!("{header_b64}.{claims_b64}");

        let key_pair = self.key_pair()?;
        let mut signature = vec![0; key_pair.public().modulus_len()];
        key_pair
            .sign(
                &ring::signature::RSA_PKCS1_SHA256,
                &ring::rand::SystemRandom::new(),
                signing_input.as_bytes(),
                &mut signature,
            )
            .map_err(|e| anyhow!("Failed to sign the JWT assertion: {e}"))?;

        Ok(format!(
            "{signing_input}.{}",
            BASE64_URL_SAFE_NO_PAD.encode(&signature)
        ))
    }

    fn key_pair(&self) -> Res<RsaKeyPair> {
        let mut reader = std::io::Cursor::new(self.private_key.as_bytes());
        let item = rustls_pemfile::read_one(&mut reader).context("Invalid PEM private key")?;
        match item {
            Some(rustls_pemfile::Item::Pkcs8Key(der)) => {
                RsaKeyPair::from_pkcs8(der.secret_pkcs8_der())
                    .map_err(|e| anyhow!("Failed to create RSA key pair from PKCS#8 key: {e}"))
            }
            Some(rustls_pemfile::Item::Pkcs1Key(der)) => {
                RsaKeyPair::from_der(der.secret_pkcs1_der())
                    .map_err(|e| anyhow!("Failed to create RSA key pair from PKCS#1 key: {e}"))
            }
            _ => bail!("The service account key has no RSA private key"),
        }
    }

    /// Exchanges a signed assertion for an access token.
    pub async fn fetch_access_token(
        &self,
        http: &reqwest::Client,
        scopes: &[&str],
    ) -> Res<AccessToken> {
        let scope = scopes.join(" ");
        let jwt = self.assertion(&scope, Utc::now())?;
        let params = [("grant_type", JWT_BEARER), ("assertion", jwt.as_str())];

        trace!("Requesting an access token from {}", self.token_uri);
        let response = http
            .post(&self.token_uri)
            .form(&params)
            .send()
            .await
            .with_context(|| format!("Failed to reach the token endpoint {}", self.token_uri))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            bail!("The token endpoint rejected the service account with status {status}: {body}");
        }

        response
            .json()
            .await
            .context("Failed to parse the token endpoint response")
    }
}

/// Holds a service account and the most recent access token, fetching a new token when the
/// current one is about to expire.
#[derive(Debug, Clone)]
pub(crate) struct TokenProvider {
    http: reqwest::Client,
    account: ServiceAccount,
    token: Option<(String, DateTime<Utc>)>,
}

impl TokenProvider {
    pub(crate) fn new(http: reqwest::Client, account: ServiceAccount) -> Self {
        Self {
            http,
            account,
            token: None,
        }
    }

    /// Loads the key from `source` and fetches the first token, so that bad credentials fail
    /// before anything else happens.
    pub(crate) async fn authenticate(
        http: reqwest::Client,
        source: &CredentialSource,
    ) -> Res<Self> {
        let account = source.load().await?;
        debug!("Authenticating as {}", account.client_email());
        let mut provider = Self::new(http, account);
        let _ = provider.token().await?;
        Ok(provider)
    }

    pub(crate) fn account(&self) -> &ServiceAccount {
        &self.account
    }

    /// Returns a valid access token, refreshing it if needed.
    pub(crate) async fn token(&mut self) -> Res<String> {
        if let Some((token, expires_at)) = &self.token {
            if Utc::now() + TimeDelta::seconds(EXPIRY_MARGIN_SECS) < *expires_at {
                return Ok(token.clone());
            }
        }
        let fresh = self
            .account
            .fetch_access_token(&self.http, OAUTH_SCOPES)
            .await?;
        let expires_at = Utc::now() + TimeDelta::seconds(fresh.expires_in);
        trace!("Access token valid until {expires_at}");
        self.token = Some((fresh.access_token.clone(), expires_at));
        Ok(fresh.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use ring::signature::{UnparsedPublicKey, RSA_PKCS1_2048_8192_SHA256};
    use serde_json::json;
    use tempfile::TempDir;

    const TEST_KEY: &str = include_str!("testdata/test_key.pem");

    fn key_json(token_uri: &str) -> String {
        json!({
            "type": "service_account",
            "project_id": "promoter-sync-test",
            "private_key_id": "0123456789abcdef",
            "private_key": TEST_KEY,
            "client_email": "sync@promoter-sync-test.iam.gserviceaccount.com",
            "token_uri": token_uri,
        })
        .to_string()
    }

    #[test]
    fn test_source_inline_json() {
        let source = CredentialSource::from_setting(Some("  {\"a\": 1}")).unwrap();
        assert_eq!(CredentialSource::Inline("{\"a\": 1}".to_string()), source);
    }

    #[test]
    fn test_source_path() {
        let source = CredentialSource::from_setting(Some("/keys/sa.json")).unwrap();
        assert_eq!(CredentialSource::File(PathBuf::from("/keys/sa.json")), source);
    }

    #[test]
    fn test_source_default_path() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("credentials.json");
        let err = CredentialSource::from_setting_or(None, &missing).unwrap_err();
        assert!(err.to_string().contains("No credentials found"));
        let err = CredentialSource::from_setting_or(Some("   "), &missing).unwrap_err();
        assert!(err.to_string().contains("No credentials found"));

        std::fs::write(&missing, "{}").unwrap();
        let source = CredentialSource::from_setting_or(None, &missing).unwrap();
        assert_eq!(CredentialSource::File(missing), source);
    }

    #[test]
    fn test_source_debug_hides_json() {
        let source = CredentialSource::Inline(key_json(DEFAULT_TOKEN_URI));
        assert_eq!("Inline(..)", format!("{source:?}"));
    }

    #[tokio::test]
    async fn test_load_from_file_and_inline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sa.json");
        std::fs::write(&path, key_json(DEFAULT_TOKEN_URI)).unwrap();

        let from_file = CredentialSource::File(path).load().await.unwrap();
        let inline = CredentialSource::Inline(key_json(DEFAULT_TOKEN_URI))
            .load()
            .await
            .unwrap();
        assert_eq!(from_file.client_email(), inline.client_email());
        assert!(!format!("{inline:?}").contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn test_load_malformed_json() {
        let err = CredentialSource::Inline("{not json".to_string())
            .load()
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("GOOGLE_SHEETS_CREDENTIALS"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = CredentialSource::File(PathBuf::from("/nonexistent/sa.json"))
            .load()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read file"));
    }

    #[test]
    fn test_token_uri_defaults() {
        let account = ServiceAccount::try_from_str(
            r#"{"client_email": "a@b.c", "private_key": "x"}"#,
        )
        .unwrap();
        assert_eq!(DEFAULT_TOKEN_URI, account.token_uri);
    }

    #[test]
    fn test_assertion_is_signed_rs256_jwt() {
        let account = ServiceAccount::try_from_str(&key_json(DEFAULT_TOKEN_URI)).unwrap();
        let now = Utc::now();
        let jwt = account.assertion("scope-a scope-b", now).unwrap();

        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(3, parts.len());

        let header: serde_json::Value =
            serde_json::from_slice(&BASE64_URL_SAFE_NO_PAD.decode(parts[0]).unwrap()).unwrap();
        assert_eq!(json!({"alg": "RS256", "typ": "JWT", "kid": "0123456789abcdef"}), header);

        let claims: serde_json::Value =
            serde_json::from_slice(&BASE64_URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        assert_eq!(account.client_email(), claims["iss"]);
        assert_eq!("scope-a scope-b", claims["scope"]);
        assert_eq!(DEFAULT_TOKEN_URI, claims["aud"]);
        assert_eq!(now.timestamp() + 3600, claims["exp"].as_i64().unwrap());

        let key_pair = account.key_pair().unwrap();
        let public_key =
            UnparsedPublicKey::new(&RSA_PKCS1_2048_8192_SHA256, key_pair.public().as_ref());
        let signature = BASE64_URL_SAFE_NO_PAD.decode(parts[2]).unwrap();
        let signed = format!("{}.{}", parts[0], parts[1]);
        public_key.verify(signed.as_bytes(), &signature).unwrap();
    }

    #[test]
    fn test_bad_private_key() {
        let account = ServiceAccount::try_from_str(
            r#"{"client_email": "a@b.c", "private_key": "not a pem"}"#,
        )
        .unwrap();
        assert!(account.assertion("s", Utc::now()).is_err());
    }

    #[tokio::test]
    async fn test_token_exchange_and_caching() {
        let server = MockServer::start_async().await;
        let token = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/token")
                    .body_includes("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer")
                    .body_includes("assertion=");
                then.status(200).json_body(json!({
                    "access_token": "ya29.test-token",
                    "expires_in": 3599,
                    "token_type": "Bearer",
                }));
            })
            .await;

        let source = CredentialSource::Inline(key_json(&server.url("/token")));
        let mut provider = TokenProvider::authenticate(reqwest::Client::new(), &source)
            .await
            .unwrap();
        assert_eq!("ya29.test-token", provider.token().await.unwrap());
        assert_eq!("ya29.test-token", provider.token().await.unwrap());

        // One exchange during authenticate, then the cached token.
        token.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_token_exchange_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(400).json_body(json!({"error": "invalid_grant"}));
            })
            .await;

        let source = CredentialSource::Inline(key_json(&server.url("/token")));
        let err = TokenProvider::authenticate(reqwest::Client::new(), &source)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid_grant"), "{err}");
    }
}
