use std::env;

use crate::models::MarketplaceId;

const PLACEHOLDER_CLIENT_ID: &str = "YOUR_EBAY_CLIENT_ID";
const PLACEHOLDER_CLIENT_SECRET: &str = "YOUR_EBAY_CLIENT_SECRET";

const PRODUCTION_ROOT: &str = "https://api.ebay.com";
const SANDBOX_ROOT: &str = "https://api.sandbox.ebay.com";

pub const APP_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";

#[derive(Debug, Clone)]
pub struct EbayConfig {
    pub client_id: String,
    pub client_secret: String,
    pub sandbox: bool,
    pub marketplace: MarketplaceId,
    /// Overrides the production/sandbox root, e.g. for a local proxy.
    pub root_override: Option<String>,
}

impl EbayConfig {
    pub fn from_env() -> Self {
        Self {
            client_id: env::var("EBAY_CLIENT_ID").unwrap_or_default(),
            client_secret: env::var("EBAY_CLIENT_SECRET").unwrap_or_default(),
            sandbox: env::var("EBAY_SANDBOX")
                .map(|value| value.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            marketplace: env::var("EBAY_MARKETPLACE_ID")
                .ok()
                .and_then(|value| MarketplaceId::from_str(&value))
                .unwrap_or_default(),
            root_override: env::var("EBAY_API_BASE_URL")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty()),
        }
    }

    /// Credentials are usable when both are set and neither is the
    /// placeholder shipped in example env files.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let id = self.client_id.trim();
        let secret = self.client_secret.trim();
        if id.is_empty() || id == PLACEHOLDER_CLIENT_ID {
            return None;
        }
        if secret.is_empty() || secret == PLACEHOLDER_CLIENT_SECRET {
            return None;
        }
        Some((id, secret))
    }

    pub fn root(&self) -> &str {
        match &self.root_override {
            Some(root) => root.as_str(),
            None if self.sandbox => SANDBOX_ROOT,
            None => PRODUCTION_ROOT,
        }
    }

    pub fn oauth_token_url(&self) -> String {
        format!("{}/identity/v1/oauth2/token", self.root())
    }

    pub fn browse_item_url(&self) -> String {
        format!("{}/buy/browse/v1/item", self.root())
    }

    pub fn legacy_item_url(&self) -> String {
        format!("{}/buy/browse/v1/item/get_item_by_legacy_id", self.root())
    }
}
