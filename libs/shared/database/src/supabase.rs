use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Read-only PostgREST client for the Supabase project holding therapist
/// and patient profiles.
pub struct SupabaseClient {
    client: Client,
    rest_url: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_timeout(
            &config.supabase_url,
            &config.supabase_anon_key,
            config.scheduler.store_timeout(),
        )
    }

    pub fn with_timeout(base_url: &str, anon_key: &str, timeout: Duration) -> Self {
        let client = match Self::default_headers(anon_key) {
            Ok(headers) => Client::builder().timeout(timeout).default_headers(headers).build(),
            Err(e) => {
                error!("Supabase anon key is not a valid header value: {}", e);
                Client::builder().timeout(timeout).build()
            }
        }
        .unwrap_or_else(|e| {
            error!("Failed to build HTTP client, using defaults: {}", e);
            Client::new()
        });

        Self {
            client,
            rest_url: format!("{}/rest/v1", base_url.trim_end_matches('/')),
        }
    }

    fn default_headers(anon_key: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(anon_key)?);
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", anon_key))?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// `GET /rest/v1/{table}?{query}`, decoded as a list of rows.
    pub async fn select<T>(&self, table: &str, query: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}/{}?{}", self.rest_url, table, query);
        debug!("Selecting from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", table))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Supabase error on {} ({}): {}", table, status, body);
            return Err(anyhow!("Supabase error on {} ({}): {}", table, status, body));
        }

        response
            .json::<Vec<T>>()
            .await
            .with_context(|| format!("unexpected row shape from {}", table))
    }
}
