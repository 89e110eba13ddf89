//! Publication-date resolution for a URL.
//!
//! Sources are tried in a fixed order and the first one that yields a
//! timestamp wins:
//!
//! 1. a `YYYY-MM-DD` / `YYYY/MM/DD` date embedded in the URL
//! 2. `datePublished` in JSON-LD blocks (top level, `@graph`, or a list)
//! 3. a fixed list of `<meta>` tags, then `<time datetime>`
//! 4. the first date found in the page text
//!
//! Stages 2-4 share one fetched [`Document`]. A stage that fails to parse
//! just hands over to the next one.

pub mod arabic;
pub mod parse;

use crate::fetch::{Document, Fetcher};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub type Timestamp = DateTime<Utc>;

static URL_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})[/-](\d{2})[/-](\d{2})").unwrap());

/// `(attribute, key)` pairs checked in order by the meta-tag stage.
pub const META_CANDIDATES: &[(&str, &str)] = &[
    ("name", "pubdate"),
    ("name", "publish_date"),
    ("name", "publish-date"),
    ("name", "date"),
    ("name", "dc.date"),
    ("name", "dc.date.issued"),
    ("itemprop", "datePublished"),
    ("property", "article:published_time"),
    ("property", "og:published_time"),
    ("property", "og:updated_time"),
];

type DocumentStage = fn(&Document) -> Option<Timestamp>;

const DOCUMENT_STAGES: &[(&str, DocumentStage)] = &[
    ("json-ld", from_json_ld),
    ("meta", from_meta_tags),
    ("text", from_text),
];

#[async_trait::async_trait]
pub trait PublishDate: Send + Sync {
    async fn resolve(&self, url: &str) -> Option<Timestamp>;
}

pub struct DateResolver {
    fetcher: Arc<dyn Fetcher>,
}

impl DateResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait::async_trait]
impl PublishDate for DateResolver {
    async fn resolve(&self, url: &str) -> Option<Timestamp> {
        if let Some(ts) = from_url(url) {
            debug!(%url, %ts, "date from url");
            return Some(ts);
        }
        let doc = match self.fetcher.fetch(url).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                debug!(%url, "no usable document");
                return None;
            }
            Err(e) => {
                debug!(%url, error = %e, "fetch failed");
                return None;
            }
        };
        resolve_document(&doc)
    }
}

/// Runs the document stages in order, stopping at the first hit.
pub fn resolve_document(doc: &Document) -> Option<Timestamp> {
    DOCUMENT_STAGES.iter().find_map(|(name, stage)| {
        let ts = stage(doc)?;
        debug!(url = %doc.url, stage = *name, %ts, "date resolved");
        Some(ts)
    })
}

pub fn from_url(url: &str) -> Option<Timestamp> {
    URL_DATE.captures_iter(url).find_map(|c| {
        let date = NaiveDate::from_ymd_opt(c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?)?;
        date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt))
    })
}

pub fn from_json_ld(doc: &Document) -> Option<Timestamp> {
    doc.json_ld.iter().find_map(|block| {
        let data: Value = serde_json::from_str(block).ok()?;
        date_published(&data).into_iter().find_map(parse_published)
    })
}

pub fn from_meta_tags(doc: &Document) -> Option<Timestamp> {
    META_CANDIDATES
        .iter()
        .filter_map(|(attr, key)| doc.meta_content(attr, key))
        .chain(doc.time_datetimes.iter().map(String::as_str))
        .find_map(parse_published)
}

pub fn from_text(doc: &Document) -> Option<Timestamp> {
    parse::parse_fuzzy(&doc.text)
}

/// `datePublished` strings in JSON-LD, in document order.
fn date_published(data: &Value) -> Vec<&str> {
    match data {
        Value::Object(obj) => {
            if let Some(s) = obj.get("datePublished").and_then(Value::as_str) {
                return vec![s];
            }
            match obj.get("@graph") {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|i| i.get("datePublished").and_then(Value::as_str))
                    .collect(),
                _ => Vec::new(),
            }
        }
        Value::Array(items) => items.iter().flat_map(date_published).collect(),
        _ => Vec::new(),
    }
}

fn parse_published(raw: &str) -> Option<Timestamp> {
    if arabic::contains_arabic(raw) {
        arabic::parse(raw)
    } else {
        parse::parse_lenient(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MetaTag;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ymd(y: i32, m: u32, d: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    struct FakeFetcher {
        doc: Option<Document>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, _url: &str) -> anyhow::Result<Option<Document>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.doc.clone())
        }
    }

    fn doc_with_json_ld(block: &str) -> Document {
        Document { url: "https://x".into(), json_ld: vec![block.into()], ..Default::default() }
    }

    #[tokio::test]
    async fn url_date_wins_over_conflicting_json_ld() {
        let fetcher = Arc::new(FakeFetcher {
            doc: Some(doc_with_json_ld(r#"{"datePublished":"2020-01-01"}"#)),
            calls: AtomicUsize::new(0),
        });
        let resolver = DateResolver::new(fetcher.clone());
        let ts = resolver.resolve("https://news.example/2024/03/15/story").await;
        assert_eq!(ts, Some(ymd(2024, 3, 15)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_back_to_document_when_url_has_no_date() {
        let fetcher = Arc::new(FakeFetcher {
            doc: Some(doc_with_json_ld(r#"{"datePublished":"2020-01-01"}"#)),
            calls: AtomicUsize::new(0),
        });
        let resolver = DateResolver::new(fetcher);
        assert_eq!(resolver.resolve("https://news.example/story").await, Some(ymd(2020, 1, 1)));
    }

    #[tokio::test]
    async fn missing_document_yields_none() {
        let resolver = DateResolver::new(Arc::new(FakeFetcher { doc: None, calls: AtomicUsize::new(0) }));
        assert_eq!(resolver.resolve("https://news.example/gone").await, None);
    }

    #[test]
    fn url_stage_skips_impossible_dates() {
        assert_eq!(from_url("https://a/2024/13/40/x"), None);
        assert_eq!(from_url("https://a/2023-02-07-title"), Some(ymd(2023, 2, 7)));
    }

    #[test]
    fn json_ld_graph_list_and_arabic_forms() {
        let graph = doc_with_json_ld(r#"{"@graph":[{"@type":"WebPage"},{"@type":"Article","datePublished":"2022-05-06T10:00:00Z"}]}"#);
        assert_eq!(from_json_ld(&graph), Some(Utc.with_ymd_and_hms(2022, 5, 6, 10, 0, 0).unwrap()));

        let list = doc_with_json_ld(r#"[{"@type":"Org"},{"datePublished":"2021-09-01"}]"#);
        assert_eq!(from_json_ld(&list), Some(ymd(2021, 9, 1)));

        let arabic = doc_with_json_ld(r#"{"datePublished":"الأحد، 7 يناير 2024 08:00 ص"}"#);
        assert_eq!(from_json_ld(&arabic), Some(Utc.with_ymd_and_hms(2024, 1, 7, 8, 0, 0).unwrap()));
    }

    #[test]
    fn malformed_json_ld_moves_to_next_block() {
        let doc = Document {
            json_ld: vec!["{not json".into(), r#"{"datePublished":"garbage"}"#.into(), r#"{"datePublished":"2019-12-31"}"#.into()],
            ..Default::default()
        };
        assert_eq!(from_json_ld(&doc), Some(ymd(2019, 12, 31)));
    }

    #[test]
    fn stages_run_in_order() {
        let doc = Document {
            json_ld: vec![r#"{"headline":"no date"}"#.into()],
            meta: vec![
                MetaTag { attr: "property".into(), key: "og:updated_time".into(), content: "2018-01-01".into() },
                MetaTag { attr: "name".into(), key: "pubdate".into(), content: "2017-06-30".into() },
            ],
            text: "Posted 2016-01-01".into(),
            ..Default::default()
        };
        // pubdate precedes og:updated_time in the candidate list
        assert_eq!(resolve_document(&doc), Some(ymd(2017, 6, 30)));

        let text_only = Document { text: "آخر تحديث 12/08/2015".into(), ..Default::default() };
        assert_eq!(resolve_document(&text_only), Some(ymd(2015, 8, 12)));
    }

    #[test]
    fn time_element_is_used_after_meta_list() {
        let doc = Document { time_datetimes: vec!["2020-02-02T02:02:00+00:00".into()], ..Default::default() };
        assert_eq!(from_meta_tags(&doc), Some(Utc.with_ymd_and_hms(2020, 2, 2, 2, 2, 0).unwrap()));
    }
}
