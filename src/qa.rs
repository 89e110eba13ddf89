use crate::dates::Timestamp;
use crate::llm::{complete_json, Llm, MalformedReply};
use crate::retry::RetryPolicy;
use crate::types::{EvidenceItem, QaPair, QaSet, MAX_QUESTIONS};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

static SEGMENT_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!؟?\n]+").unwrap());

/// Result of one generation call. A failure carries the model's reply so it
/// can be inspected later; it never aborts a run.
#[derive(Debug, Clone, PartialEq)]
pub enum QaOutcome {
    Generated(QaSet),
    Failed(MalformedReply),
}

impl QaOutcome {
    pub fn error(&self) -> Option<&MalformedReply> {
        match self {
            QaOutcome::Failed(e) => Some(e),
            QaOutcome::Generated(_) => None,
        }
    }

    /// The generated set, or an [`Error::Llm`](crate::Error::Llm) carrying
    /// why generation failed.
    pub fn into_result(self) -> crate::Result<QaSet> {
        match self {
            QaOutcome::Generated(set) => Ok(set),
            QaOutcome::Failed(e) => Err(e.into()),
        }
    }

    /// The generated set, or an empty one on failure.
    pub fn into_set(self) -> QaSet {
        match self {
            QaOutcome::Generated(set) => set,
            QaOutcome::Failed(_) => QaSet::default(),
        }
    }
}

/// Page text paired with where it came from.
#[derive(Debug, Clone)]
pub struct SourcePage {
    pub item: EvidenceItem,
    pub text: String,
}

pub struct QaGenerator {
    llm: Arc<dyn Llm>,
    retry: RetryPolicy,
    max_questions: usize,
    max_source_chars: usize,
}

impl QaGenerator {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self { llm, retry: RetryPolicy::default(), max_questions: MAX_QUESTIONS, max_source_chars: 6000 }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_limits(mut self, max_questions: usize, max_source_chars: usize) -> Self {
        self.max_questions = max_questions;
        self.max_source_chars = max_source_chars;
        self
    }

    /// Reference QA: the questions the fact-check article used its sources to
    /// answer.
    pub async fn generate_gold(&self, claim: &str, article: &str, sources: &[String]) -> QaOutcome {
        let sources = sources
            .iter()
            .map(|s| self.clip(&arabic_lines(s)))
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(i, s)| format!("SOURCE {}:\n{s}", i + 1))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = gold_prompt(claim, &self.clip(article), &sources);
        self.generate(&prompt).await
    }

    /// Predicted QA from retrieved pages. Pages with no usable text are left
    /// out of the prompt; with none left nothing is generated.
    pub async fn generate_from_evidence(
        &self,
        claim: &str,
        claim_date: Option<Timestamp>,
        pages: &[SourcePage],
    ) -> QaOutcome {
        let block = self.evidence_block(pages);
        if block.is_empty() {
            debug!("no usable evidence text; skipping generation");
            return QaOutcome::Generated(QaSet::default());
        }
        let date = claim_date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_else(|| "غير معروف".into());
        self.generate(&evidence_prompt(claim, &date, &block)).await
    }

    /// `EVIDENCE i:` blocks numbered over the pages that had text.
    pub fn evidence_block(&self, pages: &[SourcePage]) -> String {
        pages
            .iter()
            .filter_map(|p| {
                let text = self.clip(&arabic_lines(&p.text));
                (!text.is_empty()).then_some((p, text))
            })
            .enumerate()
            .map(|(i, (p, text))| {
                let date = p.item.published_at.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default();
                format!("EVIDENCE {}:\npublished date: {date}\n{}\n{text}", i + 1, p.item.snippet)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    async fn generate(&self, prompt: &str) -> QaOutcome {
        let value = match complete_json(self.llm.as_ref(), prompt, &self.retry).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "qa generation failed");
                return QaOutcome::Failed(e);
            }
        };
        match read_pairs(&value) {
            Some(pairs) => QaOutcome::Generated(QaSet::capped(pairs, self.max_questions)),
            None => {
                warn!("reply has no qa_pairs list");
                QaOutcome::Failed(MalformedReply::new("reply has no qa_pairs list", &value.to_string()))
            }
        }
    }

    fn clip(&self, text: &str) -> String {
        text.chars().take(self.max_source_chars).collect()
    }
}

fn read_pairs(value: &Value) -> Option<Vec<QaPair>> {
    let list = value.get("qa_pairs")?.as_array()?;
    Some(
        list.iter()
            .filter_map(|p| {
                let q = p.get("question")?.as_str()?;
                let a = p.get("answer")?.as_str()?;
                let pair = QaPair::new(q.trim(), a.trim());
                Some(match p.get("evidence").and_then(Value::as_str) {
                    Some(ev) => pair.with_evidence(ev.trim()),
                    None => pair,
                })
            })
            .collect(),
    )
}

fn is_mostly_arabic(segment: &str) -> bool {
    let total = segment.chars().count();
    if segment.trim().is_empty() {
        return false;
    }
    let arabic = segment.chars().filter(|c| ('\u{0600}'..='\u{06FF}').contains(c)).count();
    arabic * 2 >= total
}

/// Keeps segments of a page that are at least half Arabic script, one per line.
pub fn arabic_lines(text: &str) -> String {
    SEGMENT_BREAK
        .split(text)
        .map(str::trim)
        .filter(|s| is_mostly_arabic(s))
        .collect::<Vec<_>>()
        .join("\n")
}

fn gold_prompt(claim: &str, article: &str, sources: &str) -> String {
    format!(
        r#"أنت خبير في تحليل مقالات التحقق من الحقائق. ستتلقى نص الادعاء، مقال التحقق من الحقائق، والمصادر المرتبطة به.
مهمتك هي تحليل هذه المواد لإنتاج أزواج سؤال-جواب تشرح كيف تم استخدام المصادر للتحقق من الادعاء.

الادعاء:
{claim}

مقال التحقق من الحقائق:
{article}

المصادر المستشهد بها:
{sources}

المطلوب:
1. ما هي الأسئلة التي استخدم مقال التحقق هذا المصدر للإجابة عليها؟
2. ما هي المعلومات المحددة من المصدر التي تم استخدامها؟
3. كيف تم استخدام هذه المعلومات في التحقق من الادعاء؟
4. اقتبس في حقل "evidence" الجملة أو الجمل من المصدر التي استند إليها الجواب كما وردت دون تعديل.

**مهم جداً: قدم إجابتك كـ JSON صحيح فقط، بدون أي نص إضافي قبل أو بعد JSON.**
{{"qa_pairs": [{{"question": "السؤال المستخرج", "answer": "الجواب المستند إلى المصدر والمستخدم للتحقق من الادعاء", "evidence": "النص المقتبس حرفياً من المصدر الذي يدعم الجواب"}}]}}"#
    )
}

fn evidence_prompt(claim: &str, claim_date: &str, evidence: &str) -> String {
    format!(
        r#"أنت مساعد للتحقق من الأخبار. لديك ادعاء، وأدلة مستردة من مصادر متعددة. مهمتك هي توليد أزواج سؤال وجواب دقيقة ومباشرة.

قواعد مهمة:
1. يجب أن تكون الأسئلة والأجوبة قابلة للإجابة استنادًا حصريًا إلى الأدلة المعطاة.
2. لا تخترع أي معلومة غير موجودة في الأدلة.
3. اربط كل سؤال مباشرة بالادعاء، ولا تطرح أسئلة عامة غير مرتبطة.
4. وضّح في الإجابة كيف يمكن استخدام الدليل للتحقق من الادعاء، مع مراعاة الصلاحية الزمنية للمصدر.
5. اقتبس في حقل "evidence" النص الذي استندت إليه الإجابة كما ورد في الدليل دون تعديل.
6. الإخراج يجب أن يكون بصيغة JSON صحيحة فقط.

الادعاء:
{claim}

تاريخ الادعاء:
{claim_date}

الأدلة المسترجعة:
{evidence}

الإخراج المطلوب (JSON صحيح فقط):
{{"qa_pairs": [{{"question": "سؤال مرتبط بالتحقق من الادعاء بناءً على الدليل", "answer": "إجابة مستندة إلى الدليل", "evidence": "النص المقتبس حرفياً من الدليل الذي يدعم الإجابة"}}]}}"#
    )
}
