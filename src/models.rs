use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

#[derive(Debug, Clone, Deserialize)]
pub struct CsvContentRequest {
    #[serde(rename = "csvContent", default)]
    pub csv_content: Option<String>,
}

impl CsvContentRequest {
    /// The uploaded text, or `None` when absent or blank.
    pub fn content(self) -> Option<String> {
        self.csv_content.filter(|content| !content.trim().is_empty())
    }
}

#[derive(Debug, Serialize)]
pub struct ItemImagesResponse {
    pub success: bool,
    pub images: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SaveCsvResponse {
    pub success: bool,
    pub message: String,
}

/// Error body shared by every endpoint: `{success: false, error, code?, message?}`.
#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub success: bool,
    pub error: String,
    pub code: Option<u16>,
    pub message: Option<String>,
}

impl ApiError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            code: None,
            message: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(clippy::enum_variant_names)]
pub enum MarketplaceId {
    #[default]
    EbayFr,
    EbayUs,
    EbayUk,
    EbayDe,
}

impl MarketplaceId {
    pub fn ebay_code(&self) -> &'static str {
        match self {
            MarketplaceId::EbayFr => "EBAY_FR",
            MarketplaceId::EbayUs => "EBAY_US",
            MarketplaceId::EbayUk => "EBAY_GB",
            MarketplaceId::EbayDe => "EBAY_DE",
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        match input.trim().to_uppercase().as_str() {
            "EBAY_FR" => Some(MarketplaceId::EbayFr),
            "EBAY_US" => Some(MarketplaceId::EbayUs),
            "EBAY_GB" | "EBAY_UK" => Some(MarketplaceId::EbayUk),
            "EBAY_DE" => Some(MarketplaceId::EbayDe),
            _ => None,
        }
    }
}
