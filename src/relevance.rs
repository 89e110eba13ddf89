use crate::dates::arabic::contains_arabic;
use crate::search::SearchHit;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[،؛:.!؟]").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    /// A hit mentioning any of these in title, snippet or URL is dropped.
    pub block_list: Vec<String>,
    pub stop_words: Vec<String>,
    /// Boilerplate that fact-checkers prefix claims with.
    pub intro_phrase: String,
    pub max_keywords: usize,
    /// Keywords shorter than this many characters are ignored.
    pub min_keyword_chars: usize,
    pub min_overlap: usize,
    pub require_arabic: bool,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            block_list: [
                "google", "search", "homepage", "privacy", "terms", "settings", "advertising",
                "about google", "carbon neutral",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            stop_words: [
                "خبر", "زعم", "ناشروه", "قيام", "حتى", "إشعار", "آخر", "الذي", "التي", "الذين",
                "اللذين", "اللتين", "اللواتي", "هذا", "هذه", "ذلك", "تلك", "من", "في", "على", "إلى",
                "عن", "مع", "بين", "تحت", "فوق", "أمام", "خلف", "بعد", "قبل",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            intro_phrase: "خبر زعم ناشروه".to_string(),
            max_keywords: 5,
            min_keyword_chars: 3,
            min_overlap: 2,
            require_arabic: true,
        }
    }
}

pub struct RelevanceFilter {
    cfg: RelevanceConfig,
}

impl RelevanceFilter {
    pub fn new(cfg: RelevanceConfig) -> Self {
        Self { cfg }
    }

    /// Up to `max_keywords` content words of the claim, in order.
    pub fn keywords(&self, claim: &str) -> Vec<String> {
        let claim = claim.trim_start();
        let claim = claim.strip_prefix(self.cfg.intro_phrase.as_str()).unwrap_or(claim);
        claim
            .split_whitespace()
            .map(|w| PUNCT.replace_all(w, "").into_owned())
            .filter(|w| w.chars().count() >= self.cfg.min_keyword_chars)
            .filter(|w| !self.cfg.stop_words.iter().any(|s| s == w))
            .take(self.cfg.max_keywords)
            .collect()
    }

    pub fn is_relevant(&self, hit: &SearchHit, claim: &str) -> bool {
        self.rejection(hit, claim).is_none()
    }

    /// Why a hit is rejected, or `None` if it passes.
    pub fn rejection(&self, hit: &SearchHit, claim: &str) -> Option<&'static str> {
        let title = hit.title.to_lowercase();
        let snippet = hit.snippet.to_lowercase();
        let url = hit.url.to_lowercase();

        let blocked = self
            .cfg
            .block_list
            .iter()
            .any(|b| title.contains(b.as_str()) || snippet.contains(b.as_str()) || url.contains(b.as_str()));
        if blocked {
            return Some("block-listed");
        }

        let combined = format!("{title} {snippet}");
        if self.cfg.require_arabic && !contains_arabic(&combined) {
            return Some("no arabic content");
        }

        let mut keywords = self.keywords(claim);
        keywords.sort();
        keywords.dedup();
        let overlap = keywords.iter().filter(|k| combined.contains(k.as_str())).count();
        if overlap < self.cfg.min_overlap {
            return Some("keyword overlap too low");
        }
        None
    }
}

impl Default for RelevanceFilter {
    fn default() -> Self {
        Self::new(RelevanceConfig::default())
    }
}
