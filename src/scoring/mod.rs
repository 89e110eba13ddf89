pub mod assignment;
pub mod judge;
pub mod meteor;
pub mod pairwise;
pub mod tokenize;
pub mod verification;

use crate::llm::Llm;
use crate::retry::RetryPolicy;
use judge::{JudgeMetric, JudgeTarget};
use meteor::MeteorMetric;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use assignment::evaluate;
pub use pairwise::{score_all, PairMetric, SimilarityMatrix};
pub use verification::{ClaimInput, EvaluationSummary, VerificationScorer, View};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    #[default]
    Meteor,
    Judge,
}

impl MetricKind {
    pub fn default_reporting_levels(self) -> Vec<f64> {
        match self {
            MetricKind::Meteor => vec![0.3],
            MetricKind::Judge => vec![0.5],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub metric: MetricKind,
    /// Falls back to the metric's own levels when unset.
    pub reporting_levels: Option<Vec<f64>>,
    pub max_questions: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self { metric: MetricKind::Meteor, reporting_levels: None, max_questions: crate::types::MAX_QUESTIONS }
    }
}

impl ScoringConfig {
    pub fn levels(&self) -> Vec<f64> {
        self.reporting_levels.clone().unwrap_or_else(|| self.metric.default_reporting_levels())
    }

    /// Builds the scorer for the configured metric. The judge needs a model;
    /// the lexical metric ignores it.
    pub fn scorer(&self, llm: Option<Arc<dyn Llm>>, retry: &RetryPolicy) -> crate::error::Result<VerificationScorer> {
        let scorer = match self.metric {
            MetricKind::Meteor => VerificationScorer::new(Arc::new(MeteorMetric::default()), self.levels()),
            MetricKind::Judge => {
                let llm = llm.ok_or_else(|| crate::error::Error::config("judge metric needs an LLM client"))?;
                let evidence = JudgeMetric::new(llm.clone(), JudgeTarget::Evidence).with_retry(retry.clone());
                let questions = JudgeMetric::new(llm, JudgeTarget::Questions).with_retry(retry.clone());
                VerificationScorer::new(Arc::new(evidence), self.levels()).with_question_metric(Arc::new(questions))
            }
        };
        Ok(scorer.with_max_questions(self.max_questions))
    }
}
