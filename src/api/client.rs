use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::core::alert::AlertRecord;
use crate::core::error::KestrelError;
use crate::core::time::now_utc;

/// Vendor limit on ids per entity-fetch request.
const FETCH_CHUNK: usize = 500;
/// Default page size for the alert-id query.
pub const PAGE_LIMIT: usize = 5000;
const DEFAULT_TOKEN_TTL_SECS: i64 = 1800;
/// Tokens are treated as expired this long before their actual expiry, to
/// absorb clock skew and in-flight request latency.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;
const USER_AGENT: &str = concat!("kestrel/", env!("CARGO_PKG_VERSION"));

pub struct FalconClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: Option<String>,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default)]
    meta: QueryMeta,
}

#[derive(Deserialize, Default)]
struct QueryMeta {
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct Pagination {
    offset: Option<u64>,
    limit: Option<u64>,
    total: Option<u64>,
}

#[derive(Deserialize, Default)]
struct EntityResponse {
    #[serde(default)]
    resources: Vec<AlertRecord>,
}

impl FalconClient {
    pub fn new(
        base_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Self, KestrelError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| KestrelError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token: None,
            expires_at: DateTime::<Utc>::MIN_UTC,
        })
    }

    pub fn matches_profile(
        &self,
        base_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> bool {
        self.base_url == base_url.trim_end_matches('/')
            && self.client_id == client_id
            && self.client_secret == client_secret
    }

    pub fn is_token_valid(&self) -> bool {
        self.token.is_some()
            && now_utc() < self.expires_at - ChronoDuration::seconds(TOKEN_EXPIRY_MARGIN_SECS)
    }

    /// Return the cached bearer token, refreshing it via the OAuth2
    /// client-credentials exchange when it is missing or near expiry.
    pub async fn ensure_token(&mut self) -> Result<String, KestrelError> {
        if self.is_token_valid() {
            if let Some(token) = &self.token {
                return Ok(token.clone());
            }
        }

        let url = format!("{}/oauth2/token", self.base_url);
        let resp = self
            .http
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| KestrelError::Auth(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(KestrelError::Auth(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| KestrelError::Auth(e.to_string()))?;
        let ttl = body.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);

        self.expires_at = now_utc() + ChronoDuration::seconds(ttl);
        self.token = Some(body.access_token.clone());
        Ok(body.access_token)
    }

    /// Alert ids created strictly after `since_iso`, ascending by creation
    /// time, following the offset/limit cursor until the reported total is
    /// covered. A 429 repeats the same page after the advertised delay.
    pub async fn query_alert_ids(
        &mut self,
        since_iso: &str,
        limit: usize,
    ) -> Result<Vec<String>, KestrelError> {
        let token = self.ensure_token().await?;
        let url = format!("{}/alerts/queries/alerts/v1", self.base_url);
        let filter = format!("created_timestamp:>'{since_iso}'");
        let limit_str = limit.to_string();

        let mut ids = Vec::new();
        let mut offset: u64 = 0;
        loop {
            let resp = self
                .http
                .get(&url)
                .bearer_auth(&token)
                .query(&[
                    ("filter", filter.as_str()),
                    ("sort", "created_timestamp.asc"),
                    ("limit", limit_str.as_str()),
                    ("offset", offset.to_string().as_str()),
                ])
                .send()
                .await?;

            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                tokio::time::sleep(Duration::from_secs(retry_after_secs(&resp))).await;
                continue;
            }
            if !resp.status().is_success() {
                return Err(KestrelError::Transport(format!(
                    "alert query returned {}",
                    resp.status()
                )));
            }

            let page: QueryResponse = resp
                .json()
                .await
                .map_err(|e| KestrelError::Transport(e.to_string()))?;
            let fetched = page.resources.len() as u64;
            ids.extend(page.resources);

            let (page_offset, page_limit, total) = match page.meta.pagination {
                Some(p) => (
                    p.offset.unwrap_or(0),
                    p.limit.unwrap_or(fetched),
                    p.total.unwrap_or(fetched),
                ),
                None => (0, fetched, fetched),
            };
            if page_offset + page_limit >= total {
                break;
            }
            offset = page_offset + page_limit;
        }

        Ok(ids)
    }

    /// Fetch full alert records in chunks of at most 500 ids, preserving
    /// per-chunk response order. Each chunk is retried once on 429.
    pub async fn fetch_alerts(
        &mut self,
        ids: &[String],
    ) -> Result<Vec<AlertRecord>, KestrelError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/alerts/entities/alerts/v1", self.base_url);
        let mut out = Vec::new();
        for chunk in ids.chunks(FETCH_CHUNK) {
            let token = self.ensure_token().await?;
            let body = serde_json::json!({ "ids": chunk });

            let mut resp = self
                .http
                .post(&url)
                .bearer_auth(&token)
                .json(&body)
                .send()
                .await?;
            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                tokio::time::sleep(Duration::from_secs(retry_after_secs(&resp))).await;
                resp = self
                    .http
                    .post(&url)
                    .bearer_auth(&token)
                    .json(&body)
                    .send()
                    .await?;
            }
            if !resp.status().is_success() {
                return Err(KestrelError::Transport(format!(
                    "alert fetch returned {}",
                    resp.status()
                )));
            }

            let page: EntityResponse = resp
                .json()
                .await
                .map_err(|e| KestrelError::Transport(e.to_string()))?;
            out.extend(page.resources);
        }

        Ok(out)
    }
}

fn retry_after_secs(resp: &reqwest::Response) -> u64 {
    let secs = resp
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(2);
    if secs == 0 {
        2
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> FalconClient {
        FalconClient::new("https://api.example.com/", "cid", "secret").unwrap()
    }

    #[test]
    fn base_url_is_normalized() {
        let c = client();
        assert!(c.matches_profile("https://api.example.com", "cid", "secret"));
        assert!(!c.matches_profile("https://api.example.com", "cid", "other"));
    }

    #[test]
    fn token_invalid_when_absent() {
        assert!(!client().is_token_valid());
    }

    #[test]
    fn token_respects_expiry_margin() {
        let mut c = client();
        c.token = Some("tok".into());

        c.expires_at = now_utc() + ChronoDuration::seconds(TOKEN_EXPIRY_MARGIN_SECS + 30);
        assert!(c.is_token_valid());

        c.expires_at = now_utc() + ChronoDuration::seconds(TOKEN_EXPIRY_MARGIN_SECS - 30);
        assert!(!c.is_token_valid());
    }
}
