pub mod auth;
pub mod browse;
pub mod config;

use crate::config::AppConfig;
use crate::http::build_client;
use crate::identifier::ItemId;
use auth::TokenProvider;
use browse::BrowseClient;
use std::{future::Future, time::Instant};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LookupError {
    #[error("{0}")]
    Configuration(String),
    #[error("failed to get application token: {0}")]
    Auth(String),
    #[error("invalid item id: {0}")]
    InvalidIdentifier(String),
    #[error("item {0} not found")]
    NotFound(String),
    #[error("rate limited by ebay")]
    RateLimited { retry_after: Option<u64> },
    #[error("browse api returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },
}

impl LookupError {
    /// HTTP status an endpoint should answer with for this failure.
    pub fn status(&self) -> u16 {
        match self {
            LookupError::Configuration(_) | LookupError::Auth(_) => 500,
            LookupError::InvalidIdentifier(_) => 400,
            LookupError::NotFound(_) => 404,
            LookupError::RateLimited { .. } => 429,
            LookupError::Upstream { status, .. } => *status,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LookupError::Configuration(_) => "configuration",
            LookupError::Auth(_) => "auth",
            LookupError::InvalidIdentifier(_) => "invalid_identifier",
            LookupError::NotFound(_) => "not_found",
            LookupError::RateLimited { .. } => "rate_limited",
            LookupError::Upstream { .. } => "upstream",
        }
    }
}

/// Resolves an item id to its ordered image URLs.
pub trait ImageLookup: Send + Sync + 'static {
    fn lookup(
        &self,
        item_id: &ItemId,
    ) -> impl Future<Output = Result<Vec<String>, LookupError>> + Send;
}

pub struct EbayImageClient {
    tokens: TokenProvider,
    browse: BrowseClient,
}

impl EbayImageClient {
    pub fn new(config: &AppConfig) -> Self {
        let http = build_client(&config.http);
        Self {
            tokens: TokenProvider::new(config.ebay.clone(), http.clone()),
            browse: BrowseClient::new(&config.ebay, http),
        }
    }
}

impl ImageLookup for EbayImageClient {
    async fn lookup(&self, item_id: &ItemId) -> Result<Vec<String>, LookupError> {
        let started = Instant::now();
        let result = match self.tokens.access_token().await {
            Ok(token) => self.browse.images(item_id, &token).await,
            Err(err) => Err(err),
        };
        crate::metrics::lookup_elapsed(started.elapsed().as_millis());
        result
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnrichmentConfig, HttpConfig, StorageConfig};
    use crate::ebay::config::EbayConfig;
    use crate::models::MarketplaceId;
    use axum::{
        Json, Router,
        extract::Query,
        http::StatusCode,
        routing::{get, post},
    };
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::json;
    use std::{collections::HashMap, time::Duration};

    fn app_config(root: String) -> AppConfig {
        AppConfig {
            port: 0,
            body_limit: 1024,
            http: HttpConfig::default(),
            ebay: EbayConfig {
                client_id: "app".into(),
                client_secret: "secret".into(),
                sandbox: false,
                marketplace: MarketplaceId::EbayFr,
                root_override: Some(root),
            },
            storage: StorageConfig {
                primary_path: "unused.csv".into(),
                backup_path: "unused-backup.csv".into(),
            },
            enrichment: EnrichmentConfig {
                delimiter: b';',
                row_delay: Duration::ZERO,
            },
        }
    }

    fn token_route() -> Router {
        Router::new().route(
            "/identity/v1/oauth2/token",
            post(|| async { Json(json!({"access_token": "tok", "expires_in": 7200})) }),
        )
    }

    #[tokio::test]
    async fn legacy_fallback_after_direct_404() {
        let router = token_route()
            .route(
                "/buy/browse/v1/item/get_item_by_legacy_id",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    assert_eq!(q.get("legacy_item_id").map(String::as_str), Some("354624123456"));
                    Json(json!({
                        "image": {"imageUrl": "https://i.ebayimg.com/legacy.jpg"}
                    }))
                }),
            )
            .route(
                "/buy/browse/v1/item/{id}",
                get(|| async { StatusCode::NOT_FOUND }),
            );
        let root = fake::serve(router).await;
        let client = EbayImageClient::new(&app_config(root));
        let id = ItemId::parse("354624123456").unwrap();
        let images = client.lookup(&id).await.expect("legacy images");
        assert_eq!(images, vec!["https://i.ebayimg.com/legacy.jpg".to_string()]);
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_network() {
        let root = fake::serve(fake::unreachable()).await;
        let mut config = app_config(root);
        config.ebay.client_id = "YOUR_EBAY_CLIENT_ID".into();
        let client = EbayImageClient::new(&config);
        let id = ItemId::parse("354624123456").unwrap();

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let err = {
            let _local = metrics::set_default_local_recorder(&recorder);
            client.lookup(&id).await.expect_err("config error")
        };
        assert!(matches!(err, LookupError::Configuration(_)));
        assert_eq!(err.status(), 500);
        assert!(handle.render().contains("enricher_lookup_ms_count 1"));
    }
}
