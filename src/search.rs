// src/search.rs
use anyhow::{Context, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    #[serde(alias = "link", alias = "href")]
    pub url: String,
    #[serde(default, alias = "body")]
    pub snippet: String,
}

/// Text search backend. Implementations may fail on network or rate-limit
/// errors; callers retry.
#[async_trait::async_trait]
pub trait Searcher: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

#[derive(Debug, Deserialize)]
struct SerperResp {
    #[serde(default)]
    organic: Vec<SearchHit>,
}

pub struct Serper {
    http: Client,
    key: String,
    gl: Option<String>,
    limiter: DefaultDirectRateLimiter,
}

impl Serper {
    pub fn new(key: String, qps: u32, timeout_ms: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("building search http client")?;
        let qps = NonZeroU32::new(qps).unwrap_or(nonzero!(1u32));
        let limiter = RateLimiter::direct(Quota::per_second(qps));
        Ok(Self { http, key, gl: None, limiter })
    }

    /// Restrict results to a country code (`"sa"`, `"eg"`, ...).
    pub fn with_region(mut self, gl: impl Into<String>) -> Self {
        self.gl = Some(gl.into());
        self
    }
}

#[async_trait::async_trait]
impl Searcher for Serper {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        self.limiter.until_ready().await;
        let mut body = serde_json::json!({ "q": query, "num": max_results });
        if let Some(gl) = &self.gl {
            body["gl"] = serde_json::Value::String(gl.clone());
        }
        let resp = self.http
            .post("https://google.serper.dev/search")
            .header("X-API-KEY", &self.key)
            .json(&body)
            .send().await?
            .error_for_status()?
            .json::<SerperResp>().await?;
        Ok(resp.organic.into_iter().take(max_results).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_accepts_provider_field_names() {
        let serper: SearchHit = serde_json::from_str(r#"{"title":"t","link":"https://a","snippet":"s"}"#).unwrap();
        assert_eq!(serper.url, "https://a");
        let ddg: SearchHit = serde_json::from_str(r#"{"title":"t","href":"https://b","body":"b"}"#).unwrap();
        assert_eq!(ddg.url, "https://b");
        assert_eq!(ddg.snippet, "b");
    }

    #[test]
    fn serper_response_without_organic_is_empty() {
        let resp: SerperResp = serde_json::from_str(r#"{"searchParameters":{}}"#).unwrap();
        assert!(resp.organic.is_empty());
    }
}
