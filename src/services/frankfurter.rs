//! Client for the Frankfurter historical exchange rate API
//!
//! `GET {base_url}/{YYYY-MM-DD}?from=USD&to=EUR` answers
//! `{"amount":1.0,"base":"USD","date":"2024-01-01","rates":{"EUR":0.92}}`.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::RateSourceError;
use crate::services::rate_resolver::RateSource;

#[derive(Clone)]
pub struct FrankfurterClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct HistoricalRatesResponse {
    #[serde(default)]
    rates: HashMap<String, Value>,
}

impl FrankfurterClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, RateSourceError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RateSource for FrankfurterClient {
    async fn historical_rate(
        &self,
        date: NaiveDate,
        from: &str,
        to: &str,
    ) -> Result<Option<f64>, RateSourceError> {
        let url = format!("{}/{}", self.base_url, date.format("%Y-%m-%d"));

        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .query(&[("from", from), ("to", to)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RateSourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: HistoricalRatesResponse = response.json().await?;

        Ok(data.rates.get(to).and_then(Value::as_f64))
    }
}
