use crate::ebay::LookupError;
use crate::ebay::config::EbayConfig;
use crate::identifier::ItemId;
use crate::models::MarketplaceId;
use reqwest::{Client, RequestBuilder, StatusCode, header};
use serde_json::Value;
use tracing::{debug, info, warn};
use urlencoding::encode;

const MARKETPLACE_HEADER: &str = "X-EBAY-C-MARKETPLACE-ID";
const MAX_MESSAGE_LEN: usize = 300;

/// Browse API item lookups: `getItem`, then `getItemByLegacyId`.
pub struct BrowseClient {
    http: Client,
    item_url: String,
    legacy_url: String,
    marketplace: MarketplaceId,
}

#[derive(Debug)]
enum FetchFailure {
    Status {
        status: StatusCode,
        retry_after: Option<u64>,
        message: String,
    },
    Timeout(String),
    Transport(String),
}

impl FetchFailure {
    fn status(&self) -> Option<StatusCode> {
        match self {
            FetchFailure::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn into_lookup_error(self, item_id: &ItemId) -> LookupError {
        match self {
            FetchFailure::Status { status, .. } if status == StatusCode::NOT_FOUND => {
                LookupError::NotFound(item_id.to_string())
            }
            FetchFailure::Status { status, .. } if status == StatusCode::BAD_REQUEST => {
                LookupError::InvalidIdentifier(item_id.to_string())
            }
            FetchFailure::Status {
                status,
                retry_after,
                ..
            } if status == StatusCode::TOO_MANY_REQUESTS => LookupError::RateLimited { retry_after },
            FetchFailure::Status {
                status, message, ..
            } => LookupError::Upstream {
                status: status.as_u16(),
                message,
            },
            FetchFailure::Timeout(message) => LookupError::Upstream {
                status: StatusCode::GATEWAY_TIMEOUT.as_u16(),
                message,
            },
            FetchFailure::Transport(message) => LookupError::Upstream {
                status: StatusCode::BAD_GATEWAY.as_u16(),
                message,
            },
        }
    }
}

impl BrowseClient {
    pub fn new(config: &EbayConfig, http: Client) -> Self {
        Self {
            http,
            item_url: config.browse_item_url(),
            legacy_url: config.legacy_item_url(),
            marketplace: config.marketplace,
        }
    }

    pub async fn images(&self, item_id: &ItemId, token: &str) -> Result<Vec<String>, LookupError> {
        let direct = self
            .http
            .get(format!("{}/{}", self.item_url, encode(item_id.as_str())));
        let item = match self.fetch(direct, token).await {
            Ok(item) => item,
            Err(failure)
                if failure
                    .status()
                    .is_some_and(|s| s == StatusCode::NOT_FOUND || s == StatusCode::BAD_REQUEST) =>
            {
                debug!(
                    target = "enricher.ebay",
                    item_id = %item_id,
                    "getItem failed, trying getItemByLegacyId"
                );
                let legacy = self
                    .http
                    .get(&self.legacy_url)
                    .query(&[("legacy_item_id", item_id.as_str())]);
                let item = self
                    .fetch(legacy, token)
                    .await
                    .map_err(|failure| failure.into_lookup_error(item_id))?;
                info!(
                    target = "enricher.ebay",
                    item_id = %item_id,
                    "retrieved item using legacy id"
                );
                item
            }
            Err(failure) => return Err(failure.into_lookup_error(item_id)),
        };

        let images = extract_images(&item);
        debug!(
            target = "enricher.ebay",
            item_id = %item_id,
            count = images.len(),
            "images found"
        );
        Ok(images)
    }

    async fn fetch(&self, request: RequestBuilder, token: &str) -> Result<Value, FetchFailure> {
        let response = request
            .bearer_auth(token)
            .header(MARKETPLACE_HEADER, self.marketplace.ebay_code())
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    FetchFailure::Timeout(err.to_string())
                } else {
                    FetchFailure::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body).unwrap_or_else(|| format!("HTTP {status}"));
            warn!(target = "enricher.ebay", %status, "browse api error: {message}");
            return Err(FetchFailure::Status {
                status,
                retry_after,
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| FetchFailure::Transport(err.to_string()))
    }
}

/// Primary image first, then each additional image that carries a URL.
pub fn extract_images(item: &Value) -> Vec<String> {
    let primary = item.pointer("/image/imageUrl").and_then(Value::as_str);
    let additional = item
        .get("additionalImages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|image| image.get("imageUrl").and_then(Value::as_str));
    primary
        .into_iter()
        .chain(additional)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

/// `errors[].message` joined, or the raw body trimmed to a sane length.
fn error_message(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<Value>(body)
        && let Some(errors) = value.get("errors").and_then(Value::as_array)
    {
        let joined = errors
            .iter()
            .filter_map(|err| err.get("message").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("; ");
        if !joined.is_empty() {
            return Some(joined);
        }
    }
    let trimmed = body.trim();
    (!trimmed.is_empty()).then(|| trimmed.chars().take(MAX_MESSAGE_LEN).collect())
}
