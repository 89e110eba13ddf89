mod support;

use factcheck_eval::config::PipelineConfig;
use factcheck_eval::labels::Label;
use factcheck_eval::llm::Llm;
use factcheck_eval::pipeline::store::{Artifact, RunState, RunStore};
use factcheck_eval::pipeline::{Components, EvaluationReport, Pipeline, Step};
use factcheck_eval::predict::LabelPredictor;
use factcheck_eval::qa::QaGenerator;
use factcheck_eval::retrieve::EvidenceRetriever;
use factcheck_eval::retry::RetryPolicy;
use factcheck_eval::scoring::ScoringConfig;
use factcheck_eval::search::SearchHit;
use factcheck_eval::types::{Claim, GoldRecord, Prediction, RetrievedRecord};
use factcheck_eval::Error;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use support::*;

const QA_REPLY: &str = r#"{"qa_pairs": [
    {"question": "هل توفي الفنان أسعد فضة؟", "answer": "لا، نفت نقابة الفنانين السوريين خبر وفاته"},
    {"question": "من نفى خبر الوفاة؟", "answer": "نقابة الفنانين السوريين في بيان رسمي"}
]}"#;

const EVIDENCE_URL: &str = "https://news.example/asaad-fadda";

fn claims() -> Vec<Claim> {
    (1..=3)
        .map(|i| Claim {
            id: format!("https://misbar.com/factcheck/{i}"),
            text: format!("{CLAIM_TEXT} {i}"),
            claim_date: Some(day(2025, 7, 1)),
            domain_hint: Some("misbar.com".into()),
            review_url: Some(format!("https://misbar.com/factcheck/{i}")),
            source_rating: Some("زائف".into()),
            reference_label: Some(Label::Refuted),
            source_urls: vec![EVIDENCE_URL.to_string()],
        })
        .collect()
}

const REVIEW_BODY: &str = "نفت نقابة الفنانين السوريين خبر وفاة الفنان أسعد فضة وأكدت أنه بصحة جيدة";

fn pages() -> FakeFetcher {
    pages_with_review(&article(REVIEW_BODY))
}

fn pages_with_review(review: &str) -> FakeFetcher {
    let evidence = article("نقابة الفنانين تنفي وفاة الفنان أسعد فضة");
    let mut pages: Vec<(String, String)> =
        (1..=3).map(|i| (format!("https://misbar.com/factcheck/{i}"), review.to_string())).collect();
    pages.push((EVIDENCE_URL.to_string(), evidence));
    FakeFetcher { pages: pages.into_iter().collect() }
}

fn components(llm: Arc<dyn Llm>) -> Components {
    components_with(llm, pages())
}

fn components_with(llm: Arc<dyn Llm>, pages: FakeFetcher) -> Components {
    let fetcher = Arc::new(pages);
    let hit = SearchHit {
        title: "وفاة الفنان أسعد فضة".into(),
        url: EVIDENCE_URL.into(),
        snippet: "نقابة الفنانين تنفي".into(),
    };
    let dates = FakeDates(HashMap::from([(EVIDENCE_URL.to_string(), day(2025, 6, 1))]));
    let retry = RetryPolicy::immediate(1);
    Components {
        claim_source: None,
        fetcher,
        retriever: Some(
            EvidenceRetriever::new(Arc::new(FakeSearcher { results: vec![hit] }), Arc::new(dates))
                .with_retry(retry.clone()),
        ),
        qa: Some(QaGenerator::new(llm.clone()).with_retry(retry.clone())),
        predictor: Some(LabelPredictor::new(llm).with_retry(retry.clone())),
        scorer: ScoringConfig::default().scorer(None, &retry).unwrap(),
    }
}

fn config(root: &Path, run_id: &str) -> PipelineConfig {
    config_with(root, run_id, &claims())
}

fn config_with(root: &Path, run_id: &str, claims: &[Claim]) -> PipelineConfig {
    let claims_file = root.join("claims.json");
    std::fs::write(&claims_file, serde_json::to_string(claims).unwrap()).unwrap();
    PipelineConfig {
        claims_file: Some(claims_file),
        output_dir: root.join("out"),
        run_id: Some(run_id.to_string()),
        batch_size: 2,
        claim_delay_ms: 0,
        retry: RetryPolicy::immediate(1),
        ..Default::default()
    }
}

#[tokio::test]
async fn full_run_writes_every_artifact_and_scores_correct_claims() {
    let tmp = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::scripted(QA_REPLY, "REFUTED"));
    let mut pipeline = Pipeline::new(config(tmp.path(), "full"), components(llm.clone())).unwrap();

    let summary = pipeline.run().await.unwrap();
    assert_eq!(summary.results_summary.total_claims, 3);
    assert_eq!(summary.results_summary.gold_evidence_count, 3);
    assert_eq!(summary.results_summary.retrieved_evidence_count, 3);
    assert_eq!(summary.results_summary.predictions_count, 3);
    assert!(summary.timing.contains_key("total_pipeline"));

    let eval = summary.evaluation_summary.unwrap();
    assert_eq!(eval.metric, "meteor");
    assert_eq!(eval.claims, 3);
    assert_eq!(eval.accuracy["0.3"], 1.0);
    assert_eq!(eval.label_accuracy, 1.0);
    assert!(eval.view_means["q_and_a"] > 0.9);

    // gold + evidence + prediction per claim
    assert_eq!(llm.calls(), 9);

    let run = pipeline.run_dir();
    for artifact in Artifact::ALL {
        assert_eq!(run.has(artifact), artifact != Artifact::ErrorState, "{}", artifact.file_name());
    }
    let retrieved: Vec<RetrievedRecord> = run.require(Artifact::RetrievedEvidence).unwrap();
    assert!(retrieved.iter().all(|r| r.evidence.len() == 1 && r.evidence[0].published_at < Some(day(2025, 7, 1))));
    let report: EvaluationReport = run.require(Artifact::EvaluationResults).unwrap();
    assert_eq!(report.entries.len(), 3);

    let status = RunStore::new(tmp.path().join("out")).status("full").unwrap();
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.claims, Some(3));
}

#[tokio::test]
async fn wrong_label_scores_zero_despite_matching_evidence() {
    let tmp = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::scripted(QA_REPLY, "SUPPORTED"));
    let mut pipeline = Pipeline::new(config(tmp.path(), "wrong"), components(llm)).unwrap();
    let eval = pipeline.run().await.unwrap().evaluation_summary.unwrap();
    assert_eq!(eval.accuracy["0.3"], 0.0);
    assert!(eval.view_means["q_and_a"] > 0.9);
}

#[tokio::test]
async fn missing_input_records_error_state() {
    let tmp = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::scripted(QA_REPLY, "REFUTED"));
    let mut cfg = config(tmp.path(), "broken");
    cfg.steps = vec![Step::Predict];
    let mut pipeline = Pipeline::new(cfg, components(llm)).unwrap();

    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(err, Error::DataProcessing(_)));

    let status = RunStore::new(tmp.path().join("out")).status("broken").unwrap();
    assert_eq!(status.state, RunState::Failed);
    assert!(status.error.unwrap().contains("collected_claims.json"));
}

#[tokio::test]
async fn interrupted_run_resumes_without_repeating_work() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), "resume");

    // A previous attempt finished collection and one gold record.
    let run = RunStore::new(&cfg.output_dir).open("resume").unwrap();
    run.write(Artifact::CollectedClaims, &claims()).unwrap();
    let done = GoldRecord {
        claim_id: claims()[0].id.clone(),
        qa_pairs: Default::default(),
        source_urls: Vec::new(),
        error: None,
    };
    run.write(Artifact::GoldEvidence, &vec![done]).unwrap();

    let llm = Arc::new(FakeLlm::scripted(QA_REPLY, "REFUTED"));
    let mut cfg = cfg;
    cfg.steps = vec![Step::Extract];
    let mut pipeline = Pipeline::new(cfg, components(llm.clone())).unwrap();
    pipeline.run().await.unwrap();

    assert_eq!(llm.calls(), 2);
    let gold: Vec<GoldRecord> = run.require(Artifact::GoldEvidence).unwrap();
    assert_eq!(gold.len(), 3);
    assert!(gold[0].qa_pairs.is_empty());
    assert_eq!(gold[1].qa_pairs.len(), 2);
}

#[tokio::test]
async fn later_steps_read_earlier_outputs_from_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::scripted(QA_REPLY, "REFUTED"));

    let mut first = config(tmp.path(), "split");
    first.steps = vec![Step::Collect, Step::Retrieve];
    Pipeline::new(first, components(llm.clone())).unwrap().run().await.unwrap();

    let mut second = config(tmp.path(), "split");
    second.steps = vec![Step::Predict];
    let summary = Pipeline::new(second, components(llm)).unwrap().run().await.unwrap();
    assert_eq!(summary.results_summary.retrieved_evidence_count, 3);
    assert_eq!(summary.results_summary.predictions_count, 3);
    assert_eq!(summary.results_summary.gold_evidence_count, 0);

    let store = RunStore::new(tmp.path().join("out"));
    let predictions: Vec<Prediction> = store.existing("split").unwrap().require(Artifact::Predictions).unwrap();
    assert!(predictions.iter().all(|p| p.predicted_label == Some(Label::Refuted)));
}

#[tokio::test]
async fn gold_sources_come_from_review_links_when_claim_lists_none() {
    let tmp = tempfile::tempdir().unwrap();
    let review = format!(
        r#"<html><body><p>{REVIEW_BODY}</p><h2>المصادر</h2><ul>
        <li><a href="{EVIDENCE_URL}">بيان النقابة</a></li>
        <li><a href="/factcheck/archive">أرشيف مسبار</a></li></ul></body></html>"#
    );
    let unsourced: Vec<Claim> = claims().into_iter().map(|c| Claim { source_urls: Vec::new(), ..c }).collect();
    let llm = Arc::new(FakeLlm::scripted(QA_REPLY, "REFUTED"));
    let mut cfg = config_with(tmp.path(), "cited", &unsourced);
    cfg.steps = vec![Step::Collect, Step::Extract];
    let mut pipeline = Pipeline::new(cfg, components_with(llm.clone(), pages_with_review(&review))).unwrap();
    pipeline.run().await.unwrap();

    let gold: Vec<GoldRecord> = pipeline.run_dir().require(Artifact::GoldEvidence).unwrap();
    assert!(gold.iter().all(|g| g.source_urls == vec![EVIDENCE_URL.to_string()] && g.qa_pairs.len() == 2));

    let prompts = llm.prompts_with("المصادر المستشهد بها");
    assert_eq!(prompts.len(), 3);
    assert!(prompts.iter().all(|p| p.contains("SOURCE 1:\nنقابة الفنانين تنفي وفاة الفنان أسعد فضة")));
    assert!(prompts.iter().all(|p| !p.contains("SOURCE 2:")));
}

#[tokio::test]
async fn quoted_spans_feed_the_evidence_view() {
    let tmp = tempfile::tempdir().unwrap();
    let gold_reply = r#"{"qa_pairs": [{"question": "من نفى خبر الوفاة؟", "answer": "نقابة الفنانين السوريين",
        "evidence": "أصدرت نقابة الفنانين السوريين بيانا رسميا"}]}"#;
    let predicted_reply = r#"{"qa_pairs": [{"question": "من نفى خبر الوفاة؟", "answer": "نقابة الفنانين السوريين",
        "evidence": "صورة متداولة على مواقع التواصل"}]}"#;
    let llm = Arc::new(FakeLlm::new(move |prompt| {
        Ok(if prompt.contains("predicted_label") {
            r#"{"predicted_label": "REFUTED"}"#.to_string()
        } else if prompt.contains("الأدلة المسترجعة") {
            predicted_reply.to_string()
        } else {
            gold_reply.to_string()
        })
    }));
    let mut pipeline = Pipeline::new(config(tmp.path(), "spans"), components(llm.clone())).unwrap();
    let eval = pipeline.run().await.unwrap().evaluation_summary.unwrap();

    let run = pipeline.run_dir();
    let gold: Vec<GoldRecord> = run.require(Artifact::GoldEvidence).unwrap();
    let retrieved: Vec<RetrievedRecord> = run.require(Artifact::RetrievedEvidence).unwrap();
    assert_eq!(gold[0].qa_pairs.pairs()[0].evidence.as_deref(), Some("أصدرت نقابة الفنانين السوريين بيانا رسميا"));
    assert_eq!(retrieved[0].qa_pairs.pairs()[0].evidence.as_deref(), Some("صورة متداولة على مواقع التواصل"));

    assert!(eval.view_means["q_and_a"] > 0.9);
    assert!(eval.view_means["evidence"] < 0.2);
    assert!(llm.prompts_with("qa_pairs").iter().all(|p| p.contains(r#""evidence": ""#)));
}

#[tokio::test]
async fn search_outage_degrades_each_claim_and_run_completes() {
    let tmp = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::scripted(QA_REPLY, "REFUTED"));
    let mut parts = components(llm.clone());
    parts.retriever = Some(
        EvidenceRetriever::new(Arc::new(DownSearcher), Arc::new(FakeDates(HashMap::new())))
            .with_retry(RetryPolicy::immediate(2)),
    );
    let mut cfg = config(tmp.path(), "outage");
    cfg.steps = vec![Step::Collect, Step::Retrieve, Step::Predict];
    let mut pipeline = Pipeline::new(cfg, parts).unwrap();
    let summary = pipeline.run().await.unwrap();
    assert_eq!(summary.results_summary.predictions_count, 3);

    let retrieved: Vec<RetrievedRecord> = pipeline.run_dir().require(Artifact::RetrievedEvidence).unwrap();
    assert_eq!(retrieved.len(), 3);
    for record in &retrieved {
        assert!(record.evidence.is_empty() && record.qa_pairs.is_empty());
        let note = record.error.as_deref().unwrap();
        assert!(note.starts_with("retrieval failed: ") && note.contains("503"), "{note}");
    }
    // only label prediction reached the model
    assert_eq!(llm.calls(), 3);
}

#[tokio::test]
async fn llm_garbage_is_recorded_not_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::new(|_| Ok("I cannot help with that".to_string())));
    let mut cfg = config(tmp.path(), "garbage");
    cfg.steps = vec![Step::Collect, Step::Extract];
    let mut pipeline = Pipeline::new(cfg, components(llm)).unwrap();
    pipeline.run().await.unwrap();

    let gold: Vec<GoldRecord> = pipeline.run_dir().require(Artifact::GoldEvidence).unwrap();
    assert_eq!(gold.len(), 3);
    assert!(gold.iter().all(|g| g.qa_pairs.is_empty() && g.error.is_some()));
}

#[test]
fn real_components_need_credentials() {
    let settings = factcheck_eval::config::Settings::from_lookup(|_| None);
    let cfg = PipelineConfig::default();
    let err = Components::from_settings(&settings, &cfg, &[Step::Retrieve]).err().unwrap();
    assert!(matches!(err, Error::Configuration { .. }));
}
