use super::pairwise::PairMetric;
use crate::llm::{complete_json, Llm};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// What the judge is comparing; it decides the reply field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeTarget {
    Evidence,
    Questions,
}

impl JudgeTarget {
    fn noun(self) -> &'static str {
        match self {
            JudgeTarget::Evidence => "evidence",
            JudgeTarget::Questions => "questions",
        }
    }
}

/// Fact-overlap counts returned by the judge, and the ratios derived from them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactOverlap {
    pub predicted_facts: f64,
    pub predicted_supported: f64,
    pub reference_facts: f64,
    pub reference_supported: f64,
}

impl FactOverlap {
    /// Reads the four count fields. Missing, non-numeric or zero fact counts
    /// make the reply unusable.
    pub fn from_reply(reply: &Value, target: JudgeTarget) -> Option<Self> {
        let noun = target.noun();
        let field = |name: String| reply.get(&name).and_then(number);
        let overlap = Self {
            predicted_facts: field(format!("facts count predicted {noun}"))?,
            predicted_supported: field(format!("support predicted {noun}"))?,
            reference_facts: field(format!("facts count reference {noun}"))?,
            reference_supported: field(format!("support reference {noun}"))?,
        };
        (overlap.predicted_facts > 0.0 && overlap.reference_facts > 0.0).then_some(overlap)
    }

    pub fn precision(&self) -> f64 {
        (self.predicted_supported / self.predicted_facts).clamp(0.0, 1.0)
    }

    pub fn recall(&self) -> f64 {
        (self.reference_supported / self.reference_facts).clamp(0.0, 1.0)
    }
}

// Judges sometimes quote numbers.
fn number(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Model-judged similarity: the share of reference facts the candidate
/// supports (recall).
pub struct JudgeMetric {
    llm: Arc<dyn Llm>,
    retry: RetryPolicy,
    target: JudgeTarget,
}

impl JudgeMetric {
    pub fn new(llm: Arc<dyn Llm>, target: JudgeTarget) -> Self {
        Self { llm, retry: RetryPolicy::default(), target }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn judge(&self, candidate: &str, reference: &str) -> Option<FactOverlap> {
        let prompt = judge_prompt(self.target, reference, candidate);
        let reply = match complete_json(self.llm.as_ref(), &prompt, &self.retry).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "judge reply unusable");
                return None;
            }
        };
        let overlap = FactOverlap::from_reply(&reply, self.target);
        if overlap.is_none() {
            warn!(judged = self.target.noun(), "judge reply missing fact counts");
        }
        overlap
    }
}

#[async_trait::async_trait]
impl PairMetric for JudgeMetric {
    fn name(&self) -> &str {
        "judge"
    }

    async fn score(&self, candidate: &str, reference: &str) -> Option<f64> {
        self.judge(candidate, reference).await.map(|o| o.recall())
    }
}

fn judge_prompt(target: JudgeTarget, reference: &str, predicted: &str) -> String {
    let noun = target.noun();
    format!(
        r#"You compare predicted {noun} for a fact-checked claim against reference {noun}.

1. Split the predicted {noun} into atomic facts. For each, decide whether the reference {noun} support it.
2. Split the reference {noun} into atomic facts. For each, decide whether the predicted {noun} support it.

Reference {noun}:
{reference}

Predicted {noun}:
{predicted}

Return JSON only:
{{"facts in predicted {noun}": "...", "fact check predicted {noun}": "...", "facts count predicted {noun}": 0, "support predicted {noun}": 0, "facts in reference {noun}": "...", "fact check reference {noun}": "...", "facts count reference {noun}": 0, "support reference {noun}": 0}}"#
    )
}
