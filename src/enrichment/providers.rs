// =============================================================================
// Enrichment Providers — concrete HTTP clients, one per data role
// =============================================================================
//
// Each provider is a thin `reqwest`-backed client returning raw JSON; the
// orchestrator owns parsing into typed fragments. Client construction mirrors
// `binance/client.rs` (`reqwest::Client::builder().default_headers(..).timeout(..)`),
// generalized from one signed exchange API to a bearer-token provider gateway.
// =============================================================================

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

/// Why a provider call failed to produce a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderError {
    Timeout,
    RateLimited,
    AuthError,
    DecodeError,
    Unavailable,
}

/// Which data role a provider fills. Doubles as the rate-limiter/cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderRole {
    Security,
    Market,
    Holders,
    Creator,
    Flow,
}

impl ProviderRole {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Market => "market",
            Self::Holders => "holders",
            Self::Creator => "creator",
            Self::Flow => "flow",
        }
    }

    fn path(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Market => "market",
            Self::Holders => "holders",
            Self::Creator => "creator-history",
            Self::Flow => "flow",
        }
    }
}

/// HTTP client shared by every provider role — one connection pool, one
/// bearer token, distinct paths per role under a common base URL.
#[derive(Clone)]
pub struct ProviderClient {
    client: reqwest::Client,
    base_url: String,
}

impl ProviderClient {
    pub fn new(base_url: impl Into<String>, auth_token: Option<&str>) -> Self {
        let mut default_headers = HeaderMap::new();
        if let Some(token) = auth_token {
            if let Ok(val) = HeaderValue::from_str(&format!("Bearer {token}")) {
                default_headers.insert(AUTHORIZATION, val);
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Fetch the raw JSON fragment for `role` at `address`. The caller is
    /// expected to wrap this in its own `tokio::time::timeout` — this method
    /// never times out on its own, it only classifies transport/HTTP outcomes.
    pub async fn fetch(&self, role: ProviderRole, address: &str) -> Result<Value, ProviderError> {
        let url = format!("{}/{}/{}", self.base_url, role.path(), address);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| {
                debug!(provider = role.name(), address, error = %err, "provider request failed");
                if err.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Unavailable
                }
            })?;

        match response.status() {
            StatusCode::OK => response.json::<Value>().await.map_err(|err| {
                debug!(provider = role.name(), address, error = %err, "provider decode failed");
                ProviderError::DecodeError
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProviderError::AuthError),
            _ => Err(ProviderError::Unavailable),
        }
    }
}
