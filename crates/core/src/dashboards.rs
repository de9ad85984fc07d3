//! Client for the external dashboard service, which owns dashboards by user
//! id but exposes them only through its HTTP API.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::config::DashboardConfig;
use crate::errors::CountingError;

#[derive(Debug, Deserialize)]
struct DashboardPage {
    meta: DashboardMeta,
}

#[derive(Debug, Deserialize)]
struct DashboardMeta {
    #[serde(rename = "total-items")]
    total_items: u64,
}

/// Asynchronous dashboard-count client.
#[derive(Clone)]
pub struct DashboardClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl DashboardClient {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Result<Self, CountingError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("usermerge/0.1"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        info!(api_url = %api_url, "created DashboardClient");
        Ok(Self {
            http,
            api_url,
            token,
        })
    }

    pub fn from_config(config: &DashboardConfig) -> Result<Self, CountingError> {
        Self::new(config.url.clone(), config.token.clone())
    }

    /// Number of dashboards owned by `user_id`.
    #[instrument(skip(self))]
    pub async fn count_for_user(&self, user_id: &str) -> Result<u64, CountingError> {
        let url = format!("{}/v1/dashboard", self.api_url);
        let mut req = self.http.get(&url).query(&[("user", user_id)]);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CountingError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        let text = resp.text().await?;
        let page: DashboardPage = serde_json::from_str(&text)
            .map_err(|e| CountingError::ParseError(format!("{}: {}", e, text)))?;
        debug!(user_id, count = page.meta.total_items, "counted dashboards");
        Ok(page.meta.total_items)
    }
}
