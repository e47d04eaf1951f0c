use crate::ebay::config::EbayConfig;
use std::{env, path::PathBuf, time::Duration};

const DEFAULT_PRIMARY_PATH: &str = "public/eBay-all-active-listings-report.csv";
const DEFAULT_BACKUP_PATH: &str = "public/eBay-all-active-listings-report-backup.csv";

/// Process-wide settings, read once at startup and shared by `Arc`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub body_limit: usize,
    pub http: HttpConfig,
    pub ebay: EbayConfig,
    pub storage: StorageConfig,
    pub enrichment: EnrichmentConfig,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub primary_path: PathBuf,
    pub backup_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub delimiter: u8,
    pub row_delay: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: parse_env("PORT").unwrap_or(8000),
            body_limit: parse_env::<usize>("REQUEST_MAX_BYTES")
                .filter(|v| *v > 0)
                .unwrap_or(16 * 1024 * 1024),
            http: HttpConfig {
                timeout: Duration::from_secs(parse_env("HTTP_TIMEOUT_SECS").unwrap_or(15)),
                connect_timeout: Duration::from_secs(
                    parse_env("HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(5),
                ),
            },
            ebay: EbayConfig::from_env(),
            storage: StorageConfig {
                primary_path: env::var("CSV_PRIMARY_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_PRIMARY_PATH)),
                backup_path: env::var("CSV_BACKUP_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_BACKUP_PATH)),
            },
            enrichment: EnrichmentConfig {
                delimiter: delimiter_from_env(),
                row_delay: Duration::from_millis(parse_env("ROW_DELAY_MS").unwrap_or(200)),
            },
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn delimiter_from_env() -> u8 {
    env::var("CSV_DELIMITER")
        .ok()
        .and_then(|v| {
            let bytes = v.as_bytes();
            (bytes.len() == 1).then(|| bytes[0])
        })
        .unwrap_or(b';')
}
