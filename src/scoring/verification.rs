use super::assignment::evaluate;
use super::pairwise::{score_all, PairMetric};
use crate::labels::Label;
use crate::types::{ClaimStage, QaSet, ScoredEntry, MAX_QUESTIONS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The three ways a QA set is flattened to strings before matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    QuestionsOnly,
    QuestionsAndAnswers,
    Evidence,
}

impl View {
    pub const ALL: [View; 3] = [View::QuestionsOnly, View::QuestionsAndAnswers, View::Evidence];

    pub fn key(self) -> &'static str {
        match self {
            View::QuestionsOnly => "q_only",
            View::QuestionsAndAnswers => "q_and_a",
            View::Evidence => "evidence",
        }
    }

    /// Strings compared in this view. Questions are de-duplicated in the
    /// question-only view.
    pub fn strings(self, set: &QaSet) -> Vec<String> {
        let pairs = set.pairs().iter();
        match self {
            View::QuestionsOnly => {
                let mut out: Vec<String> = Vec::new();
                for q in pairs.map(|p| p.question.trim()).filter(|q| !q.is_empty()) {
                    if !out.iter().any(|seen| seen == q) {
                        out.push(q.to_string());
                    }
                }
                out
            }
            View::QuestionsAndAnswers => pairs.map(|p| p.joined()).collect(),
            View::Evidence => pairs.map(|p| p.evidence_text().to_string()).collect(),
        }
    }
}

/// Everything needed to score one claim.
#[derive(Debug, Clone)]
pub struct ClaimInput {
    pub claim_id: String,
    pub predicted_label: Option<Label>,
    pub reference_label: Option<Label>,
    pub predicted: QaSet,
    pub reference: QaSet,
}

/// Corpus-level figures over a set of scored claims.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub metric: String,
    pub claims: usize,
    /// Mean utility per view.
    pub view_means: BTreeMap<String, f64>,
    /// Label-conditioned accuracy per reporting level.
    pub accuracy: BTreeMap<String, f64>,
    /// Plain label accuracy, ignoring evidence quality.
    pub label_accuracy: f64,
    pub scoring_errors: usize,
}

/// Scores predicted QA against reference QA and conditions the result on
/// label agreement.
pub struct VerificationScorer {
    metric: Arc<dyn PairMetric>,
    question_metric: Option<Arc<dyn PairMetric>>,
    reporting_levels: Vec<f64>,
    reported_view: View,
    max_questions: usize,
}

impl VerificationScorer {
    pub fn new(metric: Arc<dyn PairMetric>, reporting_levels: Vec<f64>) -> Self {
        Self {
            metric,
            question_metric: None,
            reporting_levels,
            reported_view: View::QuestionsAndAnswers,
            max_questions: MAX_QUESTIONS,
        }
    }

    /// Metric for the question-only view when it differs from the others.
    pub fn with_question_metric(mut self, metric: Arc<dyn PairMetric>) -> Self {
        self.question_metric = Some(metric);
        self
    }

    pub fn with_max_questions(mut self, max_questions: usize) -> Self {
        self.max_questions = max_questions;
        self
    }

    pub fn reporting_levels(&self) -> &[f64] {
        &self.reporting_levels
    }

    fn metric_for(&self, view: View) -> &dyn PairMetric {
        match (view, &self.question_metric) {
            (View::QuestionsOnly, Some(m)) => m.as_ref(),
            _ => self.metric.as_ref(),
        }
    }

    /// True at `level` when evidence quality clears it and the labels agree.
    pub fn is_correct(utility: f64, level: f64, predicted: Option<Label>, reference: Option<Label>) -> bool {
        utility > level && predicted.is_some() && predicted == reference
    }

    /// Utility of one view, or a note saying why it could not be computed.
    pub async fn view_utility(&self, view: View, predicted: &QaSet, reference: &QaSet) -> Result<(f64, usize), String> {
        let mut candidates = view.strings(predicted);
        candidates.truncate(self.max_questions);
        let references = view.strings(reference);
        if references.is_empty() {
            return Err(format!("{}: empty reference set", view.key()));
        }

        let metric = self.metric_for(view);
        let scores = score_all(&candidates, &references, metric).await;
        if scores.all_unscored() {
            return Err(format!("{}: {} could not score any pair", view.key(), metric.name()));
        }
        let utility = evaluate(&scores.matrix).map_err(|e| format!("{}: {e}", view.key()))?;
        Ok((utility, scores.unscored))
    }

    /// A claim that cannot be scored still yields an entry, with zero
    /// utility and the reason in `error`.
    pub async fn score_claim(&self, input: ClaimInput) -> ScoredEntry {
        let mut entry = ScoredEntry {
            claim_id: input.claim_id,
            predicted_label: input.predicted_label,
            reference_label: input.reference_label,
            predicted_qaset: input.predicted,
            reference_qaset: input.reference,
            metric_scores: BTreeMap::new(),
            stage: ClaimStage::Pending,
            error: None,
        };
        entry.stage = ClaimStage::Searched;

        let mut errors = Vec::new();
        let mut unscored = 0;
        for view in View::ALL {
            let utility = match self.view_utility(view, &entry.predicted_qaset, &entry.reference_qaset).await {
                Ok((u, missing)) => {
                    unscored += missing;
                    u
                }
                Err(note) => {
                    warn!(claim_id = %entry.claim_id, %note, "view scored as zero");
                    errors.push(note);
                    0.0
                }
            };
            entry.metric_scores.insert(view.key().to_string(), utility);
        }
        if unscored > 0 {
            entry.metric_scores.insert("unscored_cells".to_string(), unscored as f64);
        }

        let reported = entry.metric_scores.get(self.reported_view.key()).copied().unwrap_or(0.0);
        for &level in &self.reporting_levels {
            let hit = Self::is_correct(reported, level, entry.predicted_label, entry.reference_label);
            entry.metric_scores.insert(format!("correct@{level}"), if hit { 1.0 } else { 0.0 });
        }

        if !errors.is_empty() {
            entry.error = Some(errors.join("; "));
        }
        entry.stage = ClaimStage::Scored;
        debug!(claim_id = %entry.claim_id, scores = ?entry.metric_scores, "claim scored");
        entry
    }

    pub async fn score_claims(&self, inputs: Vec<ClaimInput>) -> Vec<ScoredEntry> {
        let mut out = Vec::with_capacity(inputs.len());
        for input in inputs {
            out.push(self.score_claim(input).await);
        }
        out
    }

    /// Corpus means over every entry, failed ones included. Marks each entry
    /// as reported.
    pub fn summarize(&self, entries: &mut [ScoredEntry]) -> EvaluationSummary {
        let n = entries.len();
        let mean = |key: &str, entries: &[ScoredEntry]| -> f64 {
            if n == 0 {
                return 0.0;
            }
            entries.iter().map(|e| e.metric_scores.get(key).copied().unwrap_or(0.0)).sum::<f64>() / n as f64
        };

        let view_means = View::ALL.iter().map(|v| (v.key().to_string(), mean(v.key(), entries))).collect();
        let accuracy = self
            .reporting_levels
            .iter()
            .map(|level| (level.to_string(), mean(&format!("correct@{level}"), entries)))
            .collect();
        let label_hits = entries
            .iter()
            .filter(|e| e.predicted_label.is_some() && e.predicted_label == e.reference_label)
            .count();

        for e in entries.iter_mut() {
            e.stage = e.stage.max(ClaimStage::Reported);
        }

        let summary = EvaluationSummary {
            metric: self.metric.name().to_string(),
            claims: n,
            view_means,
            accuracy,
            label_accuracy: if n == 0 { 0.0 } else { label_hits as f64 / n as f64 },
            scoring_errors: entries.iter().filter(|e| e.error.is_some()).count(),
        };
        info!(
            metric = %summary.metric,
            claims = n,
            accuracy = ?summary.accuracy,
            views = ?summary.view_means,
            "evaluation summarised"
        );
        summary
    }
}
