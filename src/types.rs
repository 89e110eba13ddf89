use crate::labels::Label;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default cap on the size of a QA set.
pub const MAX_QUESTIONS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub text: String,
    pub claim_date: Option<DateTime<Utc>>,  // when the claim was made
    pub domain_hint: Option<String>,        // fact-checker site that reviewed it
    #[serde(default)]
    pub review_url: Option<String>,         // fact-check article
    #[serde(default)]
    pub source_rating: Option<String>,      // raw textual rating
    #[serde(default)]
    pub reference_label: Option<Label>,     // normalised rating
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_urls: Vec<String>,           // sources the article cites
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
    /// Span of the source text the answer was drawn from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl QaPair {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self { question: question.into(), answer: answer.into(), evidence: None }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    pub fn is_blank(&self) -> bool {
        self.question.trim().is_empty() && self.answer.trim().is_empty()
    }

    /// `"question answer"`, the string compared in the Q+A view.
    pub fn joined(&self) -> String {
        format!("{} {}", self.question, self.answer)
    }

    /// Evidence span, falling back to the answer.
    pub fn evidence_text(&self) -> &str {
        self.evidence.as_deref().filter(|e| !e.trim().is_empty()).unwrap_or(&self.answer)
    }
}

/// Ordered QA pairs capped at a maximum count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QaSet(Vec<QaPair>);

impl QaSet {
    /// Drops blank pairs and truncates to `max`.
    pub fn capped(pairs: impl IntoIterator<Item = QaPair>, max: usize) -> Self {
        Self(pairs.into_iter().filter(|p| !p.is_blank()).take(max).collect())
    }

    pub fn pairs(&self) -> &[QaPair] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<QaPair>> for QaSet {
    fn from(pairs: Vec<QaPair>) -> Self {
        QaSet::capped(pairs, MAX_QUESTIONS)
    }
}

/// Per-claim progress through evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStage {
    Pending,
    Searched,
    Scored,
    Reported,
}

/// Retrieved evidence and predicted QA for one claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedRecord {
    pub claim_id: String,
    pub evidence: Vec<EvidenceItem>,
    pub qa_pairs: QaSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reference QA extracted from the fact-check article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldRecord {
    pub claim_id: String,
    pub qa_pairs: QaSet,
    /// Pages the reference QA was drawn from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub claim_id: String,
    pub predicted_label: Option<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub claim_id: String,
    pub predicted_label: Option<Label>,
    pub reference_label: Option<Label>,
    pub predicted_qaset: QaSet,
    pub reference_qaset: QaSet,
    pub metric_scores: BTreeMap<String, f64>,
    pub stage: ClaimStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
