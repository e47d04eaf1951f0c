use crate::ebay::LookupError;
use crate::ebay::config::{APP_SCOPE, EbayConfig};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Client, header};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Tokens are dropped this long before eBay says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Application token via the client-credentials grant, reused until it is
/// about to expire.
pub struct TokenProvider {
    config: EbayConfig,
    http: Client,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(config: EbayConfig, http: Client) -> Self {
        Self {
            config,
            http,
            cache: Mutex::new(None),
        }
    }

    pub async fn access_token(&self) -> Result<String, LookupError> {
        let header = basic_auth_header(&self.config)?;
        let mut guard = self.cache.lock().await;
        if let Some(cached) = guard.as_ref()
            && cached.expires_at > Instant::now()
        {
            return Ok(cached.token.clone());
        }

        let payload = self.request_token(&header).await?;
        let lifetime = payload
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or_default()
            .saturating_sub(EXPIRY_MARGIN);
        debug!(
            target = "enricher.ebay",
            lifetime_secs = lifetime.as_secs(),
            "application token issued"
        );
        *guard = Some(CachedToken {
            token: payload.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(payload.access_token)
    }

    async fn request_token(&self, basic: &str) -> Result<TokenResponse, LookupError> {
        let params = [("grant_type", "client_credentials"), ("scope", APP_SCOPE)];
        let response = self
            .http
            .post(self.config.oauth_token_url())
            .header(header::AUTHORIZATION, basic)
            .form(&params)
            .send()
            .await
            .map_err(|err| LookupError::Auth(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<TokenErrorResponse>(&body)
                .ok()
                .and_then(|err| err.error_description.or(err.error))
                .unwrap_or_else(|| format!("HTTP {status}"));
            warn!(target = "enricher.ebay", %status, "oauth token exchange rejected: {reason}");
            return Err(LookupError::Auth(reason));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|err| LookupError::Auth(err.to_string()))
    }
}

fn basic_auth_header(config: &EbayConfig) -> Result<String, LookupError> {
    let Some((id, secret)) = config.credentials() else {
        return Err(LookupError::Configuration(
            "EBAY_CLIENT_ID / EBAY_CLIENT_SECRET environment variables are not set".into(),
        ));
    };
    Ok(format!("Basic {}", BASE64.encode(format!("{id}:{secret}"))))
}
