use crate::error::Error;
use crate::labels::LabelTable;
use crate::llm::{complete_json, Llm};
use crate::retry::RetryPolicy;
use crate::types::{Prediction, QaSet};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Asks the model for a verdict on a claim given only the predicted QA.
pub struct LabelPredictor {
    llm: Arc<dyn Llm>,
    labels: LabelTable,
    retry: RetryPolicy,
}

impl LabelPredictor {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self { llm, labels: LabelTable::default(), retry: RetryPolicy::default() }
    }

    pub fn with_labels(mut self, labels: LabelTable) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// An unreadable reply or an unknown label leaves `predicted_label` empty;
    /// the claim then counts as incorrect when scored. A failed call is also
    /// noted in `error`.
    pub async fn predict(&self, claim_id: &str, claim: &str, evidence: &QaSet) -> Prediction {
        let prompt = build_predict_prompt(claim, evidence);
        let (raw_label, error) = match complete_json(self.llm.as_ref(), &prompt, &self.retry).await {
            Ok(v) => (v.get("predicted_label").and_then(Value::as_str).map(str::to_string), None),
            Err(e) => {
                warn!(claim_id, error = %e, "label prediction failed");
                (None, Some(Error::from(e).to_string()))
            }
        };
        let predicted_label = raw_label.as_deref().and_then(|l| self.labels.normalize(l));
        if raw_label.is_some() && predicted_label.is_none() {
            warn!(claim_id, raw = raw_label.as_deref().unwrap_or_default(), "unrecognised label");
        }
        debug!(claim_id, label = ?predicted_label, "predicted");
        Prediction { claim_id: claim_id.to_string(), predicted_label, raw_label, error }
    }
}

fn build_predict_prompt(claim: &str, evidence: &QaSet) -> String {
    let evidence = evidence
        .pairs()
        .iter()
        .map(|p| format!("- {}\n  {}", p.question, p.answer))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"سوف تحصل على ادعاء ومجموعة من الأدلة. حدد الحكم على الادعاء بناءً على الأدلة فقط، دون الاعتماد على أي معرفة خارجية.

التصنيفات المتاحة:
1. SUPPORTED - الأدلة تدعم وتؤكد حصول الادعاء بشكل واضح وصريح.
2. REFUTED - الأدلة تناقض الادعاء بشكل مباشر أو تجعله غير مرجح، أو تُستخدم في غير موضعها أو زمانها بشكل يضلل القارئ.
3. NOT_ENOUGH_EVIDENCE - لا تكفي الأدلة للحكم على الادعاء.
4. CONFLICTING_EVIDENCE - توجد أدلة متناقضة أو انتقائية.

تعليمات:
- اعتمد فقط على الأدلة المقدمة.
- أعد فقط كائن JSON يحتوي على المفتاح "predicted_label" وقيمته واحدة من التصنيفات الأربعة أعلاه.

الادعاء: {claim}
الأدلة:
{evidence}

{{"predicted_label": "REFUTED"}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::Label;
    use crate::types::QaPair;

    struct FakeVerdict(&'static str);

    #[async_trait::async_trait]
    impl Llm for FakeVerdict {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn predictor(reply: &'static str) -> LabelPredictor {
        LabelPredictor::new(Arc::new(FakeVerdict(reply))).with_retry(RetryPolicy::immediate(1))
    }

    fn evidence() -> QaSet {
        vec![QaPair::new("هل توفي؟", "لا")].into()
    }

    #[tokio::test]
    async fn normalizes_label_codes() {
        let p = predictor(r#"{"predicted_label": "REFUTED"}"#).predict("c1", "ادعاء", &evidence()).await;
        assert_eq!(p.predicted_label, Some(Label::Refuted));
        assert_eq!(p.raw_label.as_deref(), Some("REFUTED"));

        let p = predictor("```json\n{\"predicted_label\": \"CONFLICTING_EVIDENCE\"}\n```").predict("c1", "ادعاء", &evidence()).await;
        assert_eq!(p.predicted_label, Some(Label::ConflictingEvidence));
    }

    #[tokio::test]
    async fn unknown_or_missing_label_is_none() {
        let p = predictor(r#"{"predicted_label": "MAYBE"}"#).predict("c1", "ادعاء", &evidence()).await;
        assert_eq!(p.predicted_label, None);
        assert_eq!(p.raw_label.as_deref(), Some("MAYBE"));

        assert_eq!(p.error, None);

        let p = predictor("no idea").predict("c1", "ادعاء", &evidence()).await;
        assert_eq!(p.predicted_label, None);
        assert_eq!(p.raw_label, None);
        assert!(p.error.unwrap().starts_with("llm error: "));
    }

    #[test]
    fn prompt_lists_every_pair() {
        let prompt = build_predict_prompt("ادعاء", &evidence());
        assert!(prompt.contains("- هل توفي؟\n  لا"));
        assert!(prompt.contains("الادعاء: ادعاء"));
    }
}
