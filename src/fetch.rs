use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::debug;

static JSON_LD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#).unwrap()
});
static META_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<meta\s[^>]*>").unwrap());
static ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)([a-z_:.\-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());
static TIME_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<time\s[^>]*datetime\s*=\s*["']([^"']+)["']"#).unwrap());
static NON_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style|noscript|head)[^>]*>.*?</(script|style|noscript|head)>").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<a\s[^>]*href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#).unwrap());
static LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(h[1-6]|strong|b)(?:\s[^>]*)?>(.*?)</(?:h[1-6]|strong|b)>").unwrap());
static NEXT_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<h[1-6][\s>]").unwrap());
static RESOURCES_SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<section[^>]*id\s*=\s*["']resources["'][^>]*>(.*?)</section>"#).unwrap()
});
static SOURCE_LINK_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:ال)?مصدر\s*\d*$").unwrap());

/// Section labels under which fact-check articles list what they cite.
const SOURCE_LABELS: [&str; 4] = ["مصادر التحقق", "المصادر", "مصادر", "المصدر"];

/// Most cited links kept per article.
pub const MAX_CITED_SOURCES: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct MetaTag {
    /// Attribute that carried the key (`name`, `property`, `itemprop`).
    pub attr: String,
    pub key: String,
    pub content: String,
}

/// Parsed page: the pieces date resolution and text extraction read.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub url: String,
    pub json_ld: Vec<String>,
    pub meta: Vec<MetaTag>,
    pub time_datetimes: Vec<String>,
    pub text: String,
    /// Off-site links the page cites as its sources, in page order.
    pub cited_sources: Vec<String>,
}

impl Document {
    pub fn parse(url: &str, html: &str) -> Self {
        let json_ld = JSON_LD
            .captures_iter(html)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .collect();

        let mut meta = Vec::new();
        for tag in META_TAG.find_iter(html) {
            let mut key = None;
            let mut content = None;
            for a in ATTR.captures_iter(tag.as_str()) {
                let name = a[1].to_ascii_lowercase();
                let value = a.get(2).or_else(|| a.get(3)).map(|m| m.as_str().to_string()).unwrap_or_default();
                match name.as_str() {
                    "name" | "property" | "itemprop" => key = Some((name, value)),
                    "content" => content = Some(value),
                    _ => {}
                }
            }
            if let (Some((attr, key)), Some(content)) = (key, content) {
                meta.push(MetaTag { attr, key, content });
            }
        }

        let time_datetimes = TIME_TAG.captures_iter(html).map(|c| c[1].to_string()).collect();

        let stripped = NON_TEXT.replace_all(html, " ");
        let stripped = TAG.replace_all(&stripped, " ");
        let text = SPACES.replace_all(&decode_entities(&stripped), " ").trim().to_string();

        let cited_sources = cited_links(url, html);

        Self { url: url.to_string(), json_ld, meta, time_datetimes, text, cited_sources }
    }

    /// Content of the first `<meta attr="key">`, keys compared case-insensitively.
    pub fn meta_content(&self, attr: &str, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|m| m.attr.eq_ignore_ascii_case(attr) && m.key.eq_ignore_ascii_case(key))
            .map(|m| m.content.as_str())
            .filter(|c| !c.trim().is_empty())
    }
}

/// Links inside a `section#resources`, under a heading such as "المصادر",
/// or whose own text reads "مصدر 1". Links back to the page's own site are
/// dropped.
fn cited_links(page_url: &str, html: &str) -> Vec<String> {
    let base = Url::parse(page_url).ok();
    let own_host = base.as_ref().and_then(|u| u.host_str()).map(bare_host);

    let mut regions: Vec<&str> =
        RESOURCES_SECTION.captures_iter(html).filter_map(|c| c.get(1)).map(|m| m.as_str()).collect();
    for caps in LABEL.captures_iter(html) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(2)) else { continue };
        let label = TAG.replace_all(inner.as_str(), " ");
        let label = label.trim().trim_end_matches([':', '：']).trim();
        if !SOURCE_LABELS.contains(&label) {
            continue;
        }
        let rest = &html[whole.end()..];
        let end = NEXT_HEADING.find(rest).map_or(rest.len(), |m| m.start());
        regions.push(&rest[..end]);
    }

    let mut hrefs: Vec<&str> = regions
        .into_iter()
        .flat_map(|r| ANCHOR.captures_iter(r))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect();
    for c in ANCHOR.captures_iter(html) {
        let (Some(href), Some(inner)) = (c.get(1), c.get(2)) else { continue };
        if SOURCE_LINK_TEXT.is_match(TAG.replace_all(inner.as_str(), " ").trim()) {
            hrefs.push(href.as_str());
        }
    }

    let mut out: Vec<String> = Vec::new();
    for href in hrefs {
        let resolved = match &base {
            Some(b) => b.join(href.trim()),
            None => Url::parse(href.trim()),
        };
        let Ok(link) = resolved else { continue };
        if !matches!(link.scheme(), "http" | "https") {
            continue;
        }
        let Some(host) = link.host_str().map(bare_host) else { continue };
        if own_host.as_deref() == Some(host.as_str()) {
            continue;
        }
        let link = link.to_string();
        if !out.contains(&link) {
            out.push(link);
        }
        if out.len() == MAX_CITED_SOURCES {
            break;
        }
    }
    out
}

fn bare_host(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Phrases that mark a rendered page as an error page.
#[derive(Debug, Clone)]
pub struct ErrorPagePhrases(pub Vec<String>);

impl Default for ErrorPagePhrases {
    fn default() -> Self {
        Self(
            [
                "404",
                "page not found",
                "not found",
                "عذراً الصفحة المطلوبة غير موجودة",
                "الصفحة غير موجودة",
                "المعذرة، ليس لديك حق الوصول إلى هذه الصفحة يمكنك العودة للصفحة الرئيسية",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        )
    }
}

impl ErrorPagePhrases {
    pub fn matches(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.0.iter().any(|p| lower.contains(p.as_str()))
    }
}

/// Fetches and parses a page. `Ok(None)` means the page was reached but is
/// an error page.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Option<Document>>;
}

pub struct HttpFetcher {
    http: Client,
    error_pages: ErrorPagePhrases,
}

impl HttpFetcher {
    pub fn new(timeout_ms: u64) -> Result<Self> {
        let http = Client::builder()
            .user_agent("Mozilla/5.0 (compatible; factcheck-eval/0.1)")
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("building fetch http client")?;
        Ok(Self { http, error_pages: ErrorPagePhrases::default() })
    }

    pub fn with_error_pages(mut self, phrases: ErrorPagePhrases) -> Self {
        self.error_pages = phrases;
        self
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Option<Document>> {
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            debug!(%url, status = %resp.status(), "non-success status");
            return Ok(None);
        }
        let html = resp.text().await?;
        let doc = Document::parse(url, &html);
        if self.error_pages.matches(&doc.text) {
            debug!(%url, "error page detected");
            return Ok(None);
        }
        Ok(Some(doc))
    }
}
