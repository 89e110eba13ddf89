use crate::dates::{PublishDate, Timestamp};
use crate::error::{Error, Result};
use crate::relevance::RelevanceFilter;
use crate::retry::RetryPolicy;
use crate::search::{SearchHit, Searcher};
use crate::types::{Claim, EvidenceItem};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_RESULTS: usize = 5;

/// Searches for a claim and keeps only relevant hits published before it.
pub struct EvidenceRetriever {
    searcher: Arc<dyn Searcher>,
    dates: Arc<dyn PublishDate>,
    filter: RelevanceFilter,
    retry: RetryPolicy,
}

impl EvidenceRetriever {
    pub fn new(searcher: Arc<dyn Searcher>, dates: Arc<dyn PublishDate>) -> Self {
        Self { searcher, dates, filter: RelevanceFilter::default(), retry: RetryPolicy::default() }
    }

    pub fn with_filter(mut self, filter: RelevanceFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Evidence for `claim`, skipping pages from the site that fact-checked it.
    /// A search that fails after every retry is an [`Error::Retrieval`].
    pub async fn retrieve_for_claim(&self, claim: &Claim, max_results: usize) -> Result<Vec<EvidenceItem>> {
        self.collect(&claim.text, claim.claim_date, max_results, claim.domain_hint.as_deref()).await
    }

    /// Every returned item has `published_at < claim_date`. Without a claim
    /// date nothing can be checked and the result is empty. Search failures
    /// are retried; an exhausted budget yields an empty list, never an error.
    pub async fn retrieve(&self, claim_text: &str, claim_date: Option<Timestamp>, max_results: usize) -> Vec<EvidenceItem> {
        self.collect(claim_text, claim_date, max_results, None).await.unwrap_or_else(|e| {
            warn!(error = %e, "no evidence for claim");
            Vec::new()
        })
    }

    async fn collect(
        &self,
        claim_text: &str,
        claim_date: Option<Timestamp>,
        max_results: usize,
        exclude_domain: Option<&str>,
    ) -> Result<Vec<EvidenceItem>> {
        let Some(claim_date) = claim_date else {
            warn!("claim has no date; temporal filter cannot be applied, skipping retrieval");
            return Ok(Vec::new());
        };
        if claim_text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let hits = self
            .retry
            .run("evidence search", |_| self.searcher.search(claim_text, max_results))
            .await
            .map_err(|e| Error::Retrieval(format!("{e:#}")))?;

        let mut kept: Vec<EvidenceItem> = Vec::with_capacity(hits.len());
        for hit in hits.into_iter().take(max_results) {
            if kept.iter().any(|k| k.url == hit.url) {
                continue;
            }
            if let Some(item) = self.vet(hit, claim_text, claim_date, exclude_domain).await {
                kept.push(item);
            }
        }
        info!(kept = kept.len(), "evidence retrieved");
        Ok(kept)
    }

    async fn vet(
        &self,
        hit: SearchHit,
        claim_text: &str,
        claim_date: Timestamp,
        exclude_domain: Option<&str>,
    ) -> Option<EvidenceItem> {
        if let Some(domain) = exclude_domain.filter(|d| !d.is_empty()) {
            if hit.url.contains(domain) {
                debug!(url = %hit.url, %domain, "skipping fact-checker's own page");
                return None;
            }
        }
        if let Some(reason) = self.filter.rejection(&hit, claim_text) {
            debug!(url = %hit.url, reason, "irrelevant hit");
            return None;
        }
        let Some(published_at) = self.dates.resolve(&hit.url).await else {
            debug!(url = %hit.url, "no publish date");
            return None;
        };
        if published_at >= claim_date {
            debug!(url = %hit.url, %published_at, %claim_date, "published after claim");
            return None;
        }
        Some(EvidenceItem { title: hit.title, url: hit.url, snippet: hit.snippet, published_at: Some(published_at) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    const CLAIM: &str = "خبر زعم ناشروه وفاة الفنان أسعد فضة";

    fn day(y: i32, m: u32, d: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn relevant(url: &str) -> SearchHit {
        SearchHit { title: "وفاة الفنان أسعد فضة".into(), url: url.into(), snippet: "نقابة الفنانين".into() }
    }

    struct FakeSearch {
        hits: Vec<SearchHit>,
        failures_before_success: u32,
        calls: AtomicU32,
    }

    impl FakeSearch {
        fn ok(hits: Vec<SearchHit>) -> Self {
            Self { hits, failures_before_success: 0, calls: AtomicU32::new(0) }
        }
    }

    #[async_trait::async_trait]
    impl Searcher for FakeSearch {
        async fn search(&self, _q: &str, max: usize) -> anyhow::Result<Vec<SearchHit>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                anyhow::bail!("rate limited");
            }
            Ok(self.hits.iter().take(max).cloned().collect())
        }
    }

    struct FakeDates(HashMap<String, Timestamp>);

    #[async_trait::async_trait]
    impl PublishDate for FakeDates {
        async fn resolve(&self, url: &str) -> Option<Timestamp> {
            self.0.get(url).copied()
        }
    }

    fn retriever(search: FakeSearch, dates: &[(&str, Timestamp)]) -> EvidenceRetriever {
        let dates = FakeDates(dates.iter().map(|(u, d)| (u.to_string(), *d)).collect());
        EvidenceRetriever::new(Arc::new(search), Arc::new(dates)).with_retry(RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn keeps_only_hits_published_before_the_claim() {
        let search = FakeSearch::ok(vec![relevant("https://a/past"), relevant("https://a/future"), relevant("https://a/undated")]);
        let r = retriever(search, &[("https://a/past", day(2024, 12, 1)), ("https://a/future", day(2025, 6, 1))]);

        let items = r.retrieve(CLAIM, Some(day(2025, 1, 1)), DEFAULT_MAX_RESULTS).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://a/past");
        assert!(items.iter().all(|i| i.published_at.unwrap() < day(2025, 1, 1)));
    }

    #[tokio::test]
    async fn same_day_publication_is_rejected() {
        let search = FakeSearch::ok(vec![relevant("https://a/same")]);
        let r = retriever(search, &[("https://a/same", day(2025, 1, 1))]);
        assert!(r.retrieve(CLAIM, Some(day(2025, 1, 1)), 5).await.is_empty());
    }

    #[tokio::test]
    async fn retries_transient_search_failures() {
        let search = FakeSearch { hits: vec![relevant("https://a/past")], failures_before_success: 2, calls: AtomicU32::new(0) };
        let r = retriever(search, &[("https://a/past", day(2024, 1, 1))]);
        assert_eq!(r.retrieve(CLAIM, Some(day(2025, 1, 1)), 5).await.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_to_empty() {
        let search = FakeSearch { hits: vec![relevant("https://a/past")], failures_before_success: 10, calls: AtomicU32::new(0) };
        let r = retriever(search, &[("https://a/past", day(2024, 1, 1))]);
        assert!(r.retrieve(CLAIM, Some(day(2025, 1, 1)), 5).await.is_empty());
    }

    #[tokio::test]
    async fn undated_claim_retrieves_nothing() {
        let r = retriever(FakeSearch::ok(vec![relevant("https://a/past")]), &[("https://a/past", day(2024, 1, 1))]);
        assert!(r.retrieve(CLAIM, None, 5).await.is_empty());
    }

    #[tokio::test]
    async fn skips_fact_checker_domain_and_irrelevant_hits() {
        let noise = SearchHit { title: "Privacy policy".into(), url: "https://a/privacy".into(), snippet: "".into() };
        let search = FakeSearch::ok(vec![relevant("https://misbar.com/x"), noise, relevant("https://a/ok")]);
        let r = retriever(
            search,
            &[("https://misbar.com/x", day(2024, 1, 1)), ("https://a/privacy", day(2024, 1, 1)), ("https://a/ok", day(2024, 1, 1))],
        );
        let claim = Claim {
            id: "1".into(),
            text: CLAIM.into(),
            claim_date: Some(day(2025, 1, 1)),
            domain_hint: Some("misbar.com".into()),
            review_url: None,
            source_rating: None,
            reference_label: None,
            source_urls: Vec::new(),
        };
        let items = r.retrieve_for_claim(&claim, 5).await.unwrap();
        assert_eq!(items.iter().map(|i| i.url.as_str()).collect::<Vec<_>>(), vec!["https://a/ok"]);

        let down = FakeSearch { hits: Vec::new(), failures_before_success: 10, calls: AtomicU32::new(0) };
        let err = retriever(down, &[]).retrieve_for_claim(&claim, 5).await.unwrap_err();
        assert!(matches!(err, Error::Retrieval(ref m) if m.contains("rate limited")));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn caps_results_and_dedupes_urls() {
        let search = FakeSearch::ok(vec![relevant("https://a/1"), relevant("https://a/1"), relevant("https://a/2"), relevant("https://a/3")]);
        let r = retriever(
            search,
            &[("https://a/1", day(2024, 1, 1)), ("https://a/2", day(2024, 1, 1)), ("https://a/3", day(2024, 1, 1))],
        );
        let items = r.retrieve(CLAIM, Some(day(2025, 1, 1)), 3).await;
        assert_eq!(items.iter().map(|i| i.url.as_str()).collect::<Vec<_>>(), vec!["https://a/1", "https://a/2"]);
    }
}
