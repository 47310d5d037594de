//! IDNA/BNB exchange rate lookup
//!
//! Two CoinGecko-style providers are tried in order; a good quote is cached
//! for a short while so each reconciliation pass does not hit the API once
//! per swap.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::OracleConfig;

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Price of one IDNA in BNB; `None` when no provider has a usable quote
    async fn exchange_rate(&self) -> Option<BigDecimal>;
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    idena: Option<IdenaPrice>,
}

#[derive(Debug, Deserialize)]
struct IdenaPrice {
    bnb: Option<BigDecimal>,
}

impl PriceResponse {
    fn rate(self) -> Option<BigDecimal> {
        self.idena
            .and_then(|p| p.bnb)
            .filter(|price| *price > BigDecimal::from(0))
    }
}

struct CachedRate {
    rate: BigDecimal,
    fetched_at: Instant,
}

pub struct HttpPriceOracle {
    client: Client,
    urls: Vec<String>,
    ttl: Duration,
    cache: Mutex<Option<CachedRate>>,
}

impl HttpPriceOracle {
    pub fn new(config: &OracleConfig) -> eyre::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            urls: vec![config.primary_url.clone(), config.fallback_url.clone()],
            ttl: Duration::from_secs(config.cache_secs),
            cache: Mutex::new(None),
        })
    }

    async fn fetch(&self, url: &str) -> eyre::Result<Option<BigDecimal>> {
        let response = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<PriceResponse>()
            .await?;
        Ok(response.rate())
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn exchange_rate(&self) -> Option<BigDecimal> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Some(cached.rate.clone());
            }
        }

        for url in &self.urls {
            match self.fetch(url).await {
                Ok(Some(rate)) => {
                    debug!(url = %url, rate = %rate, "Fetched IDNA price");
                    *cache = Some(CachedRate {
                        rate: rate.clone(),
                        fetched_at: Instant::now(),
                    });
                    crate::metrics::PRICE_ORACLE_RATE.set(rate.to_f64().unwrap_or_default());
                    return Some(rate);
                }
                Ok(None) => warn!(url = %url, "Price provider returned no usable IDNA price"),
                Err(e) => warn!(url = %url, error = %e, "Price provider request failed"),
            }
        }

        crate::metrics::record_error("oracle");
        None
    }
}

/// Fixed rate, for tests and local runs
pub struct StaticPriceOracle(pub Option<BigDecimal>);

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn exchange_rate(&self) -> Option<BigDecimal> {
        self.0.clone()
    }
}
