#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use factcheck_eval::dates::PublishDate;
use factcheck_eval::fetch::{Document, Fetcher};
use factcheck_eval::llm::Llm;
use factcheck_eval::search::{SearchHit, Searcher};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const CLAIM_TEXT: &str = "خبر زعم ناشروه وفاة الفنان أسعد فضة";

pub fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

pub struct FakeLlm {
    // maps each prompt to a reply
    pub handler: Box<dyn Fn(&str) -> Result<String> + Send + Sync>,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeLlm {
    pub fn new(handler: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self { handler: Box::new(handler), calls: AtomicUsize::new(0), prompts: Mutex::new(Vec::new()) }
    }

    /// Same QA for every generation prompt and `label` for prediction prompts.
    pub fn scripted(qa_reply: &'static str, label: &'static str) -> Self {
        Self::new(move |prompt| {
            if prompt.contains("predicted_label") {
                Ok(format!(r#"{{"predicted_label": "{label}"}}"#))
            } else {
                Ok(qa_reply.to_string())
            }
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far that contain `marker`.
    pub fn prompts_with(&self, marker: &str) -> Vec<String> {
        self.prompts.lock().unwrap().iter().filter(|p| p.contains(marker)).cloned().collect()
    }
}

#[async_trait]
impl Llm for FakeLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.handler)(prompt)
    }
}

pub struct FakeSearcher {
    pub results: Vec<SearchHit>,
}

#[async_trait]
impl Searcher for FakeSearcher {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        Ok(self.results.iter().take(max_results).cloned().collect())
    }
}

/// Search backend that is always down.
pub struct DownSearcher;

#[async_trait]
impl Searcher for DownSearcher {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>> {
        anyhow::bail!("503 service unavailable")
    }
}

/// Serves fixed HTML per URL; unknown URLs fail like a dead link.
pub struct FakeFetcher {
    pub pages: HashMap<String, String>,
}

impl FakeFetcher {
    pub fn new(pages: &[(&str, &str)]) -> Self {
        Self { pages: pages.iter().map(|(u, h)| (u.to_string(), h.to_string())).collect() }
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Option<Document>> {
        match self.pages.get(url) {
            Some(html) => Ok(Some(Document::parse(url, html))),
            None => anyhow::bail!("connection refused: {url}"),
        }
    }
}

pub struct FakeDates(pub HashMap<String, DateTime<Utc>>);

#[async_trait]
impl PublishDate for FakeDates {
    async fn resolve(&self, url: &str) -> Option<DateTime<Utc>> {
        self.0.get(url).copied()
    }
}

pub fn article(body: &str) -> String {
    format!("<html><head><title>x</title></head><body><p>{body}</p></body></html>")
}
