//! Flight-search provider client.
//!
//! [`OfferSource`] is the seam the scan pipeline depends on;
//! [`AmadeusClient`] implements it against the Amadeus self-service API
//! (OAuth2 client credentials, then `GET /v2/shopping/flight-offers`).
//! Offers are returned as raw JSON; normalization happens downstream.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

// ---

/// Refresh the token this long before the provider says it expires.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// One route/date combination to search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: NaiveDate,
}

impl std::fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{} {}..{}",
            self.origin, self.destination, self.departure_date, self.return_date
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider: API error: status={status}, body={body}")]
    Api { status: u16, body: String },

    #[error("Provider: unexpected response: {0}")]
    Response(String),
}

#[async_trait]
pub trait OfferSource: Send + Sync {
    /// Raw offers for `target`, in the provider's ranking order.
    async fn search(&self, target: &ScanTarget) -> Result<Vec<serde_json::Value>, ProviderError>;
}

/// Search parameters fixed for a deployment.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub currency: String,
    pub max_offers: u32,
    pub adults: u32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            currency: "EUR".to_string(),
            max_offers: 3,
            adults: 1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct OffersResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct AmadeusClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    options: SearchOptions,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for AmadeusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmadeusClient")
            .field("base_url", &self.base_url)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl AmadeusClient {
    // ---
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        options: SearchOptions,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        // ---
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(AmadeusClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            options,
            token: Mutex::new(None),
        })
    }

    /// Cached bearer token, fetched again when close to expiry.
    async fn access_token(&self) -> Result<String, ProviderError> {
        // ---
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Utc::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let url = format!("{}/v1/security/oauth2/token", self.base_url);
        tracing::debug!("Requesting access token from: {}", url);

        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.api_key.as_str()),
                ("client_secret", self.api_secret.as_str()),
            ])
            .send()
            .await?;
        let response = check_status(response).await?;
        let token: TokenResponse = response.json().await?;

        let lifetime = (token.expires_in - TOKEN_EXPIRY_MARGIN_SECS).max(0);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime),
        });
        Ok(token.access_token)
    }
}

#[async_trait]
impl OfferSource for AmadeusClient {
    async fn search(&self, target: &ScanTarget) -> Result<Vec<serde_json::Value>, ProviderError> {
        // ---
        let token = self.access_token().await?;
        let url = format!("{}/v2/shopping/flight-offers", self.base_url);

        let departure = target.departure_date.format("%Y-%m-%d").to_string();
        let return_date = target.return_date.format("%Y-%m-%d").to_string();
        let adults = self.options.adults.to_string();
        let max = self.options.max_offers.to_string();

        tracing::debug!(%target, "Searching offers");

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("originLocationCode", target.origin.as_str()),
                ("destinationLocationCode", target.destination.as_str()),
                ("departureDate", departure.as_str()),
                ("returnDate", return_date.as_str()),
                ("adults", adults.as_str()),
                ("max", max.as_str()),
                ("currencyCode", self.options.currency.as_str()),
            ])
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: serde_json::Value = response.json().await?;
        let offers: OffersResponse =
            serde_json::from_value(body).map_err(|e| ProviderError::Response(e.to_string()))?;

        tracing::debug!(%target, offers = offers.data.len(), "Search complete");
        Ok(offers.data)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    // ---
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Api {
        status: status.as_u16(),
        body,
    })
}
