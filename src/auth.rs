//! Credential storage and resolution
//!
//! The access token and its expiry live in a small persisted key/value
//! file. Only the hub session's credential resolver reads it, and it does
//! so on every connection attempt.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const EXPIRES_AT_KEY: &str = "expiresAt";

const STORE_FILE: &str = "credentials.json";

/// Supplies a bearer token for each connection attempt
pub trait CredentialResolver: Send + Sync {
    /// Current token, or `None` when the user is not signed in
    fn bearer_token(&self) -> Option<String>;
}

impl<F> CredentialResolver for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn bearer_token(&self) -> Option<String> {
        self()
    }
}

/// A fixed token, e.g. from an environment variable
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl CredentialResolver for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Persisted key/value store for the client's credentials
///
/// Every read goes to disk so a token refreshed by another process is
/// picked up on the next connection attempt.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the platform data directory
    pub fn default_location() -> Option<Self> {
        crate::utils::data_dir().map(|dir| Self::new(dir.join(STORE_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> BTreeMap<String, String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring unreadable credential store {:?}: {}", self.path, e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, content)
            .with_context(|| format!("writing {}", self.path.display()))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.read_all().remove(key)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.read_all();
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    /// Save a token returned by the login endpoint
    pub fn save_login(&self, token: &str, expires_at: &str) -> Result<()> {
        let mut entries = self.read_all();
        entries.insert(ACCESS_TOKEN_KEY.to_string(), token.to_string());
        entries.insert(EXPIRES_AT_KEY.to_string(), expires_at.to_string());
        self.write_all(&entries)
    }

    /// Forget the stored login
    pub fn clear(&self) -> Result<()> {
        let mut entries = self.read_all();
        entries.remove(ACCESS_TOKEN_KEY);
        entries.remove(EXPIRES_AT_KEY);
        self.write_all(&entries)
    }

    pub fn access_token(&self) -> Option<String> {
        self.get(ACCESS_TOKEN_KEY).filter(|t| !t.is_empty())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.get(EXPIRES_AT_KEY).and_then(|raw| parse_expiry(&raw))
    }

    /// Token present and not yet expired
    pub fn is_auth_valid(&self) -> bool {
        self.is_auth_valid_at(Utc::now())
    }

    fn is_auth_valid_at(&self, now: DateTime<Utc>) -> bool {
        let entries = self.read_all();
        let (Some(token), Some(raw_expiry)) =
            (entries.get(ACCESS_TOKEN_KEY), entries.get(EXPIRES_AT_KEY))
        else {
            return false;
        };
        if token.is_empty() {
            return false;
        }
        parse_expiry(raw_expiry).is_some_and(|expiry| now < expiry)
    }

    /// Claims of the stored token, for display
    pub fn claims(&self) -> Option<TokenClaims> {
        self.access_token()
            .and_then(|token| TokenClaims::decode(&token).ok())
    }
}

impl CredentialResolver for TokenStore {
    fn bearer_token(&self) -> Option<String> {
        if !self.is_auth_valid() {
            debug!("No valid access token in {:?}", self.path);
            return None;
        }
        self.access_token()
    }
}

/// Parse a stored expiry: epoch seconds, epoch milliseconds or an ISO date
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(number) = raw.parse::<f64>() {
        if !number.is_finite() || number <= 0.0 {
            return None;
        }
        // Values below 1e12 are seconds; anything larger is milliseconds
        let millis = if number < 1e12 { number * 1000.0 } else { number };
        return Utc.timestamp_millis_opt(millis as i64).single();
    }
    crate::utils::parse_timestamp(raw)
}

/// Identity claims carried by the access token
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TokenClaims {
    #[serde(rename = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier")]
    pub user_id: Option<String>,
    #[serde(rename = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name")]
    pub name: Option<String>,
    #[serde(rename = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress")]
    pub email: Option<String>,
    #[serde(rename = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role")]
    role_claim: Option<String>,
    #[serde(rename = "userType")]
    user_type: Option<String>,
    role: Option<String>,
    pub exp: Option<i64>,
}

impl TokenClaims {
    /// Read the payload segment of a JWT (the signature is not checked)
    pub fn decode(token: &str) -> Result<Self> {
        let payload = token
            .split('.')
            .nth(1)
            .context("token is not a JWT")?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .context("token payload is not base64url")?;
        serde_json::from_slice(&bytes).context("token payload is not JSON")
    }

    /// Role from the first claim that carries one
    pub fn role(&self) -> Option<&str> {
        self.role_claim
            .as_deref()
            .or(self.user_type.as_deref())
            .or(self.role.as_deref())
    }

    pub fn is_role(&self, role: &str) -> bool {
        self.role().is_some_and(|r| r.eq_ignore_ascii_case(role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn jwt(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn test_parse_expiry_formats() {
        let secs = parse_expiry("1700000000").unwrap();
        let millis = parse_expiry("1700000000000").unwrap();
        assert_eq!(secs, millis);
        assert_eq!(
            parse_expiry("2030-01-01T00:00:00Z").unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
        );
        assert!(parse_expiry("never").is_none());
        assert!(parse_expiry("0").is_none());
    }

    #[test]
    fn test_store_validity_and_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("creds.json"));
        assert!(!store.is_auth_valid());
        assert_eq!(store.bearer_token(), None);

        let future = (Utc::now() + Duration::hours(1)).timestamp().to_string();
        store.save_login("abc", &future).unwrap();
        assert!(store.is_auth_valid());
        assert_eq!(store.bearer_token().as_deref(), Some("abc"));

        let past = (Utc::now() - Duration::hours(1)).timestamp_millis().to_string();
        store.set(EXPIRES_AT_KEY, &past).unwrap();
        assert!(!store.is_auth_valid());
        assert_eq!(store.bearer_token(), None);

        store.clear().unwrap();
        assert_eq!(store.access_token(), None);
    }

    #[test]
    fn test_store_reads_fresh_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        let store = TokenStore::new(&path);
        let other = TokenStore::new(&path);
        let future = (Utc::now() + Duration::hours(1)).to_rfc3339();

        store.save_login("first", &future).unwrap();
        assert_eq!(other.bearer_token().as_deref(), Some("first"));
        store.set(ACCESS_TOKEN_KEY, "second").unwrap();
        assert_eq!(other.bearer_token().as_deref(), Some("second"));
    }

    #[test]
    fn test_decode_claims() {
        let token = jwt(
            r#"{
                "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier": "42",
                "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name": "dj",
                "userType": "Artist",
                "exp": 1900000000
            }"#,
        );
        let claims = TokenClaims::decode(&token).unwrap();
        assert_eq!(claims.user_id.as_deref(), Some("42"));
        assert_eq!(claims.name.as_deref(), Some("dj"));
        assert_eq!(claims.role(), Some("Artist"));
        assert!(claims.is_role("artist"));
        assert!(TokenClaims::decode("garbage").is_err());
    }

    #[test]
    fn test_store_claims_follow_saved_login() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("creds.json"));
        assert!(store.claims().is_none());

        let token = jwt(r#"{"http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name": "dj"}"#);
        let future = (Utc::now() + Duration::hours(1)).to_rfc3339();
        store.save_login(&token, &future).unwrap();
        assert_eq!(store.claims().and_then(|c| c.name).as_deref(), Some("dj"));

        store.set(ACCESS_TOKEN_KEY, "opaque").unwrap();
        assert!(store.claims().is_none());
        store.clear().unwrap();
        assert!(store.claims().is_none());
    }

    #[test]
    fn test_closure_resolver() {
        let resolver = || Some("t".to_string());
        assert_eq!(resolver.bearer_token().as_deref(), Some("t"));
    }
}
