use crate::dataset::{ITEM_NUMBER_COLUMN, ITEM_URL_COLUMN, Record};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use thiserror::Error;

const MIN_ID_LEN: usize = 10;

static ITEM_URL_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{12})").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid item id `{raw}` (normalized to `{normalized}`)")]
pub struct InvalidIdentifier {
    pub raw: String,
    pub normalized: String,
}

/// A normalized, digits-only eBay item id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemId(String);

impl ItemId {
    pub fn parse(raw: &str) -> Result<Self, InvalidIdentifier> {
        let normalized = normalize(raw);
        if normalized.len() < MIN_ID_LEN || !normalized.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidIdentifier {
                raw: raw.to_string(),
                normalized,
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw identifier of a row: the item number column, else the first
/// 12-digit run of the item url.
pub fn extract(record: &Record) -> Option<String> {
    if let Some(number) = record.get(ITEM_NUMBER_COLUMN)
        && !number.trim().is_empty()
    {
        return Some(number.to_string());
    }
    record
        .get(ITEM_URL_COLUMN)
        .and_then(|url| ITEM_URL_ID.captures(url))
        .map(|caps| caps[1].to_string())
}

/// Spreadsheet exports turn long ids into `3,54624E+11`; undo that and drop
/// thousands separators.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains("E+") || trimmed.contains("e+") {
        let decimal = trimmed.replacen(',', ".", 1);
        return match decimal.parse::<f64>() {
            Ok(value) if value.is_finite() && value >= 0.0 => format!("{value:.0}"),
            _ => decimal,
        };
    }
    trimmed.replace(',', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Record;

    fn record(number: &str, url: &str) -> Record {
        let mut record = Record::default();
        record.set(ITEM_NUMBER_COLUMN, number);
        record.set(ITEM_URL_COLUMN, url);
        record
    }

    #[test]
    fn extract_prefers_item_number() {
        let row = record("354624123456", "https://x/itm/987654321098");
        assert_eq!(extract(&row).as_deref(), Some("354624123456"));
    }

    #[test]
    fn extract_falls_back_to_url() {
        let row = record("", "https://x/itm/987654321098");
        assert_eq!(extract(&row).as_deref(), Some("987654321098"));
        let row = record("   ", "https://www.ebay.fr/itm/987654321098?hash=item1");
        assert_eq!(extract(&row).as_deref(), Some("987654321098"));
    }

    #[test]
    fn extract_empty_when_nothing_matches() {
        assert_eq!(extract(&record("", "")), None);
        assert_eq!(extract(&record("", "https://x/itm/12345")), None);
        assert_eq!(extract(&Record::default()), None);
    }

    #[test]
    fn scientific_notation_is_expanded() {
        assert_eq!(normalize("3,54624E+11"), "354624000000");
        assert_eq!(normalize("1.23456789012e+11"), "123456789012");
    }

    #[test]
    fn thousands_separators_are_removed() {
        assert_eq!(normalize(" 354,624,123,456 "), "354624123456");
    }

    #[test]
    fn short_or_non_numeric_ids_are_invalid() {
        assert!(ItemId::parse("123456789").is_err());
        assert!(ItemId::parse("v1|1234567890|0").is_err());
        let id = ItemId::parse("3,54624E+11").expect("valid");
        assert_eq!(id.as_str(), "354624000000");
    }
}
