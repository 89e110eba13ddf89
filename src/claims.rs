use crate::dates::parse::parse_lenient;
use crate::error::{Error, Result};
use crate::labels::LabelTable;
use crate::retry::RetryPolicy;
use crate::types::Claim;
use anyhow::Context;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Source of fact-checked claims for a free-text query.
#[async_trait::async_trait]
pub trait ClaimSource: Send + Sync {
    async fn claims_for(&self, query: &str) -> anyhow::Result<Vec<Claim>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    claims: Vec<ApiClaim>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: u16,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiClaim {
    #[serde(default)]
    text: String,
    claim_date: Option<String>,
    #[serde(default)]
    claim_review: Vec<ApiReview>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiReview {
    publisher: Option<Publisher>,
    url: Option<String>,
    review_date: Option<String>,
    textual_rating: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Publisher {
    site: Option<String>,
}

/// Why a claim-search request failed; decides whether it is retried.
#[derive(Debug, thiserror::Error)]
enum RequestFailure {
    #[error("claim search rejected with {0}")]
    Client(StatusCode),
    #[error("claim search unavailable: {0}")]
    Unavailable(String),
}

fn retryable(e: &anyhow::Error) -> bool {
    !matches!(e.downcast_ref::<RequestFailure>(), Some(RequestFailure::Client(_)))
}

/// Google Fact Check Tools claim search.
pub struct FactCheckToolsSource {
    http: Client,
    url: String,
    key: String,
    language_code: String,
    page_size: usize,
    labels: LabelTable,
    retry: RetryPolicy,
}

impl FactCheckToolsSource {
    pub fn new(url: impl Into<String>, key: impl Into<String>, timeout_ms: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::config(format!("building claim search client: {e}")))?;
        Ok(Self {
            http,
            url: url.into(),
            key: key.into(),
            language_code: "ar".to_string(),
            page_size: 100,
            labels: LabelTable::default(),
            retry: RetryPolicy::new(5, Duration::from_secs(1), 2.0),
        })
    }

    pub fn with_labels(mut self, labels: LabelTable) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_language(mut self, code: impl Into<String>, page_size: usize) -> Self {
        self.language_code = code.into();
        self.page_size = page_size;
        self
    }

    async fn request(&self, query: &str) -> anyhow::Result<SearchResponse> {
        let page_size = self.page_size.to_string();
        let resp = self
            .http
            .get(&self.url)
            .query(&[
                ("query", query),
                ("key", self.key.as_str()),
                ("languageCode", self.language_code.as_str()),
                ("pageSize", page_size.as_str()),
            ])
            .send()
            .await
            .context("sending claim search request")?;
        let status = resp.status();
        if status.is_client_error() {
            return Err(RequestFailure::Client(status).into());
        }
        if !status.is_success() {
            return Err(RequestFailure::Unavailable(status.to_string()).into());
        }
        let body: SearchResponse = resp.json().await.context("decoding claim search response")?;
        if let Some(err) = &body.error {
            if err.code == 503 {
                return Err(RequestFailure::Unavailable(err.message.clone()).into());
            }
            anyhow::bail!("claim search error {}: {}", err.code, err.message);
        }
        Ok(body)
    }
}

#[async_trait::async_trait]
impl ClaimSource for FactCheckToolsSource {
    async fn claims_for(&self, query: &str) -> anyhow::Result<Vec<Claim>> {
        let body = self.retry.run_if("claim search", retryable, |_| self.request(query)).await?;
        let claims: Vec<Claim> = body.claims.into_iter().filter_map(|c| to_claim(c, &self.labels)).collect();
        info!(%query, claims = claims.len(), "claims retrieved");
        Ok(claims)
    }
}

fn to_claim(raw: ApiClaim, labels: &LabelTable) -> Option<Claim> {
    let text = raw.text.trim().to_string();
    if text.is_empty() {
        return None;
    }
    let review = raw.claim_review.into_iter().next().unwrap_or_default();
    let claim_date = raw
        .claim_date
        .as_deref()
        .and_then(parse_lenient)
        .or_else(|| review.review_date.as_deref().and_then(parse_lenient));
    let source_rating = review.textual_rating.map(|r| r.trim().to_string());
    let reference_label = source_rating.as_deref().and_then(|r| labels.normalize(r));
    Some(Claim {
        id: review.url.clone().unwrap_or_else(|| text.clone()),
        text,
        claim_date,
        domain_hint: review.publisher.and_then(|p| p.site),
        review_url: review.url,
        source_rating,
        reference_label,
        source_urls: Vec::new(),
    })
}

/// Query lines from a file: trimmed, blank lines and `#` comments skipped.
pub fn load_queries(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::DataProcessing(format!("reading queries from {}: {e}", path.display())))?;
    let queries: Vec<String> = raw
        .lines()
        .filter(|l| !l.starts_with('#'))
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    info!(path = %path.display(), queries = queries.len(), "queries loaded");
    Ok(queries)
}

/// Keeps the first claim for each distinct text.
pub fn dedupe_by_text(claims: Vec<Claim>) -> Vec<Claim> {
    let before = claims.len();
    let mut seen = HashSet::new();
    let unique: Vec<Claim> = claims.into_iter().filter(|c| seen.insert(c.text.clone())).collect();
    info!(removed = before - unique.len(), kept = unique.len(), "duplicate claims removed");
    unique
}

/// Arabic fact-checking sites whose reviews are collected by default.
pub const DEFAULT_SITES: [&str; 7] =
    ["misbar.com", "yoopyup.com", "fatabyyano.net", "almushahid.net", "annir.ly", "falso.ly", "akhbarmeter.org"];

/// Keeps claims reviewed by one of `sites`; an empty list keeps everything.
pub fn filter_by_site(claims: Vec<Claim>, sites: &[String]) -> Vec<Claim> {
    if sites.is_empty() {
        return claims;
    }
    claims
        .into_iter()
        .filter(|c| {
            c.domain_hint
                .as_deref()
                .is_some_and(|d| sites.iter().any(|s| s.eq_ignore_ascii_case(d)))
        })
        .collect()
}

/// Runs every query, de-duplicates and caps. A failed query is logged and
/// skipped so the others still contribute.
pub async fn collect_claims(source: &dyn ClaimSource, queries: &[String], max_claims: Option<usize>) -> Vec<Claim> {
    let mut all = Vec::new();
    for query in queries {
        match source.claims_for(query).await {
            Ok(claims) => all.extend(claims),
            Err(e) => warn!(%query, error = %format!("{e:#}"), "claim query failed"),
        }
        if max_claims.is_some_and(|max| all.len() >= max) {
            break;
        }
    }
    let mut unique = dedupe_by_text(all);
    if let Some(max) = max_claims {
        unique.truncate(max);
    }
    unique
}
