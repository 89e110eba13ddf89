use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").unwrap());

const RAW_PREVIEW_CHARS: usize = 500;

/// A model reply that could not be read as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedReply {
    pub error: String,
    pub raw_response: String,
}

impl MalformedReply {
    pub fn new(error: impl Into<String>, raw: &str) -> Self {
        let mut raw_response: String = raw.chars().take(RAW_PREVIEW_CHARS).collect();
        if raw.chars().count() > RAW_PREVIEW_CHARS {
            raw_response.push_str("...");
        }
        Self { error: error.into(), raw_response }
    }
}

impl std::fmt::Display for MalformedReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.error)
    }
}

type Extractor = fn(&str) -> Option<Value>;

const EXTRACTORS: &[Extractor] = &[from_fence, from_outer_braces, from_whole];

/// Reads a JSON object out of a model reply: a fenced block first, then the
/// outermost `{...}` span, then the whole text.
pub fn parse_reply(text: &str) -> Result<Value, MalformedReply> {
    EXTRACTORS
        .iter()
        .find_map(|extract| extract(text.trim()))
        .ok_or_else(|| MalformedReply::new("no valid JSON found in response", text))
}

fn from_fence(text: &str) -> Option<Value> {
    let inner = FENCE.captures(text)?.get(1)?.as_str();
    from_outer_braces(inner).or_else(|| from_whole(inner))
}

fn from_outer_braces(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn from_whole(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}
