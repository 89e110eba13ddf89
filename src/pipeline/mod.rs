pub mod store;

use crate::claims::{self, ClaimSource, FactCheckToolsSource};
use crate::config::{PipelineConfig, Settings};
use crate::dates::DateResolver;
use crate::error::{Error, Result};
use crate::fetch::{Document, Fetcher, HttpFetcher};
use crate::llm::{openai::LlmClient, Llm};
use crate::predict::LabelPredictor;
use crate::qa::{QaGenerator, SourcePage};
use crate::relevance::RelevanceFilter;
use crate::retrieve::EvidenceRetriever;
use crate::scoring::{ClaimInput, EvaluationSummary, VerificationScorer};
use crate::search::Serper;
use crate::types::{Claim, GoldRecord, Prediction, QaSet, RetrievedRecord, ScoredEntry};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::{Artifact, RunDir, RunStore};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Collect,
    Extract,
    Retrieve,
    Predict,
    Evaluate,
}

impl Step {
    pub const ALL: [Step; 5] = [Step::Collect, Step::Extract, Step::Retrieve, Step::Predict, Step::Evaluate];

    pub fn name(self) -> &'static str {
        match self {
            Step::Collect => "collect",
            Step::Extract => "extract",
            Step::Retrieve => "retrieve",
            Step::Predict => "predict",
            Step::Evaluate => "evaluate",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Collaborators the steps call. Steps that are not planned may leave
/// theirs unset.
pub struct Components {
    pub claim_source: Option<Arc<dyn ClaimSource>>,
    pub fetcher: Arc<dyn Fetcher>,
    pub retriever: Option<EvidenceRetriever>,
    pub qa: Option<QaGenerator>,
    pub predictor: Option<LabelPredictor>,
    pub scorer: VerificationScorer,
}

impl Components {
    /// Builds production clients for `steps`, failing on the first missing
    /// credential before any network call is made.
    pub fn from_settings(settings: &Settings, cfg: &PipelineConfig, steps: &[Step]) -> Result<Self> {
        settings.require_for(steps, cfg)?;
        let labels = cfg.labels()?;
        let fetcher: Arc<dyn Fetcher> =
            Arc::new(HttpFetcher::new(cfg.http_timeout_ms).map_err(|e| Error::config(format!("{e:#}")))?);

        let llm: Option<Arc<dyn Llm>> = settings.openai_api_key.as_ref().map(|key| {
            Arc::new(LlmClient::new(settings.model.clone(), settings.openai_base_url.clone(), Some(key.clone())))
                as Arc<dyn Llm>
        });

        let claim_source: Option<Arc<dyn ClaimSource>> = match &settings.fact_check_tools_key {
            Some(key) if steps.contains(&Step::Collect) && cfg.claims_file.is_none() => Some(Arc::new(
                FactCheckToolsSource::new(&settings.fact_check_tools_url, key, cfg.http_timeout_ms)?
                    .with_labels(labels.clone()),
            )),
            _ => None,
        };

        let retriever = if steps.contains(&Step::Retrieve) {
            let mut serper = Serper::new(settings.serper_key()?.to_string(), cfg.search_qps, cfg.http_timeout_ms)
                .map_err(|e| Error::config(format!("{e:#}")))?;
            if let Some(gl) = &cfg.search_region {
                serper = serper.with_region(gl.clone());
            }
            let dates = Arc::new(DateResolver::new(fetcher.clone()));
            Some(
                EvidenceRetriever::new(Arc::new(serper), dates)
                    .with_filter(RelevanceFilter::new(cfg.relevance.clone()))
                    .with_retry(cfg.retry.clone()),
            )
        } else {
            None
        };

        let qa = llm.clone().map(|llm| {
            QaGenerator::new(llm)
                .with_retry(cfg.retry.clone())
                .with_limits(cfg.scoring.max_questions, 6000)
        });
        let predictor =
            llm.clone().map(|llm| LabelPredictor::new(llm).with_labels(labels.clone()).with_retry(cfg.retry.clone()));
        let scorer = cfg.scoring.scorer(llm, &cfg.retry)?;

        Ok(Self { claim_source, fetcher, retriever, qa, predictor, scorer })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsSummary {
    pub total_claims: usize,
    pub gold_evidence_count: usize,
    pub retrieved_evidence_count: usize,
    pub predictions_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub run_id: String,
    pub timestamp: String,
    pub steps: Vec<Step>,
    pub timing: BTreeMap<String, f64>,
    pub results_summary: ResultsSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_summary: Option<EvaluationSummary>,
    pub config: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorState {
    pub run_id: String,
    pub timestamp: String,
    pub error: String,
    pub completed_steps: Vec<String>,
    pub timing: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub summary: EvaluationSummary,
    pub entries: Vec<ScoredEntry>,
}

/// Default run id: local time, second resolution.
pub fn default_run_id() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Runs steps in order against one run directory. Each step's output is
/// written to disk; a step that is not planned reads its input from there.
pub struct Pipeline {
    config: PipelineConfig,
    run: RunDir,
    components: Components,
    timing: BTreeMap<String, f64>,
    completed: Vec<String>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, components: Components) -> Result<Self> {
        config.validate()?;
        let run_id = config.run_id.clone().unwrap_or_else(default_run_id);
        let run = RunStore::new(&config.output_dir).open(&run_id)?;
        info!(run_id = %run_id, dir = %run.path().display(), "pipeline initialised");
        Ok(Self { config, run, components, timing: BTreeMap::new(), completed: Vec::new() })
    }

    pub fn run_id(&self) -> &str {
        self.run.run_id()
    }

    pub fn run_dir(&self) -> &RunDir {
        &self.run
    }

    /// Runs the configured steps.
    pub async fn run(&mut self) -> Result<PipelineSummary> {
        let steps = self.config.steps.clone();
        self.run_steps(&steps).await
    }

    /// Runs `steps` (in pipeline order, whatever order they are given in).
    /// On failure an error-state snapshot is written before the error is
    /// returned.
    pub async fn run_steps(&mut self, steps: &[Step]) -> Result<PipelineSummary> {
        let planned: Vec<Step> = Step::ALL.into_iter().filter(|s| steps.contains(s)).collect();
        info!(run_id = %self.run_id(), steps = ?planned, "starting pipeline");
        let started = Instant::now();
        match self.execute(&planned).await {
            Ok(mut summary) => {
                let total = started.elapsed().as_secs_f64();
                self.timing.insert("total_pipeline".into(), total);
                summary.timing = self.timing.clone();
                self.run.write(Artifact::PipelineSummary, &summary)?;
                self.run.remove(Artifact::ErrorState)?;
                info!(run_id = %self.run_id(), seconds = total, "pipeline completed");
                Ok(summary)
            }
            Err(e) => {
                error!(run_id = %self.run_id(), error = %e, "pipeline failed");
                let state = ErrorState {
                    run_id: self.run_id().to_string(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    error: e.to_string(),
                    completed_steps: self.completed.clone(),
                    timing: self.timing.clone(),
                };
                if let Err(write_err) = self.run.write(Artifact::ErrorState, &state) {
                    error!(error = %write_err, "could not record error state");
                }
                Err(e)
            }
        }
    }

    async fn execute(&mut self, steps: &[Step]) -> Result<PipelineSummary> {
        let mut claims: Option<Vec<Claim>> = None;
        let mut gold: Option<Vec<GoldRecord>> = None;
        let mut retrieved: Option<Vec<RetrievedRecord>> = None;
        let mut predictions: Option<Vec<Prediction>> = None;
        let mut evaluation: Option<EvaluationSummary> = None;

        for &step in steps {
            let started = Instant::now();
            info!(step = step.name(), "step started");
            if step != Step::Collect && claims.is_none() {
                claims = Some(self.run.require(Artifact::CollectedClaims)?);
            }
            let claim_list = claims.as_deref().unwrap_or_default();
            match step {
                Step::Collect => claims = Some(self.collect().await?),
                Step::Extract => gold = Some(self.extract(claim_list).await?),
                Step::Retrieve => retrieved = Some(self.retrieve(claim_list).await?),
                Step::Predict => {
                    let evidence = match retrieved.take() {
                        Some(r) => r,
                        None => self.run.require(Artifact::RetrievedEvidence)?,
                    };
                    predictions = Some(self.predict(claim_list, &evidence).await?);
                    retrieved = Some(evidence);
                }
                Step::Evaluate => {
                    let gold_records = match gold.take() {
                        Some(g) => g,
                        None => self.run.require(Artifact::GoldEvidence)?,
                    };
                    let evidence = match retrieved.take() {
                        Some(r) => r,
                        None => self.run.require(Artifact::RetrievedEvidence)?,
                    };
                    let preds = match predictions.take() {
                        Some(p) => p,
                        None => self.run.require(Artifact::Predictions)?,
                    };
                    evaluation = Some(self.evaluate(claim_list, &gold_records, &evidence, &preds).await?);
                    gold = Some(gold_records);
                    retrieved = Some(evidence);
                    predictions = Some(preds);
                }
            }
            let seconds = started.elapsed().as_secs_f64();
            self.timing.insert(step.name().to_string(), seconds);
            self.completed.push(step.name().to_string());
            info!(step = step.name(), seconds, "step finished");
        }

        let results_summary = ResultsSummary {
            total_claims: self.count(claims.as_ref().map(Vec::len), Artifact::CollectedClaims)?,
            gold_evidence_count: self.count(gold.as_ref().map(Vec::len), Artifact::GoldEvidence)?,
            retrieved_evidence_count: self.count(retrieved.as_ref().map(Vec::len), Artifact::RetrievedEvidence)?,
            predictions_count: self.count(predictions.as_ref().map(Vec::len), Artifact::Predictions)?,
        };
        Ok(PipelineSummary {
            run_id: self.run_id().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            steps: steps.to_vec(),
            timing: BTreeMap::new(),
            results_summary,
            evaluation_summary: evaluation,
            config: self.config.clone(),
        })
    }

    fn count(&self, known: Option<usize>, artifact: Artifact) -> Result<usize> {
        match known {
            Some(n) => Ok(n),
            None => Ok(self.run.read::<Vec<serde_json::Value>>(artifact)?.map_or(0, |v| v.len())),
        }
    }

    async fn collect(&self) -> Result<Vec<Claim>> {
        let raw = match &self.config.claims_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| Error::DataProcessing(format!("reading claims from {}: {e}", path.display())))?;
                let mut loaded: Vec<Claim> = serde_json::from_str(&text)
                    .map_err(|e| Error::DataProcessing(format!("malformed claims file {}: {e}", path.display())))?;
                if let Some(max) = self.config.max_claims {
                    loaded.truncate(max);
                }
                claims::dedupe_by_text(loaded)
            }
            None => {
                let source = self
                    .components
                    .claim_source
                    .as_deref()
                    .ok_or_else(|| Error::config("collect step needs a claim source"))?;
                let queries = claims::load_queries(&self.config.queries_file)?;
                claims::collect_claims(source, &queries, self.config.max_claims).await
            }
        };
        let kept = claims::filter_by_site(raw, &self.config.allowed_sites);
        if kept.is_empty() {
            warn!("no claims collected");
        }
        self.run.write(Artifact::CollectedClaims, &kept)?;
        info!(claims = kept.len(), "claims collected");
        Ok(kept)
    }

    async fn extract(&self, claims: &[Claim]) -> Result<Vec<GoldRecord>> {
        let qa = self.components.qa.as_ref().ok_or_else(|| Error::config("extract step needs an LLM client"))?;
        let fetcher = self.components.fetcher.as_ref();
        self.in_batches(Artifact::GoldEvidence, claims, |claim| async move {
            let review = match &claim.review_url {
                Some(url) => page(fetcher, url).await,
                None => None,
            };
            // Claims from the search API carry no sources; use the ones the review cites.
            let source_urls = match (&review, claim.source_urls.is_empty()) {
                (Some(doc), true) => doc.cited_sources.clone(),
                _ => claim.source_urls.clone(),
            };
            let article = review.map(|doc| doc.text).unwrap_or_default();
            let mut sources = Vec::new();
            for url in &source_urls {
                if let Some(text) = page_text(fetcher, url).await {
                    sources.push(text);
                }
            }
            if article.is_empty() && sources.is_empty() {
                return Err(Error::Retrieval("no article or source text".into()));
            }
            let qa_pairs = qa.generate_gold(&claim.text, &article, &sources).await.into_result()?;
            Ok(GoldRecord { claim_id: claim.id, qa_pairs, source_urls, error: None })
        })
        .await
    }

    async fn retrieve(&self, claims: &[Claim]) -> Result<Vec<RetrievedRecord>> {
        let retriever =
            self.components.retriever.as_ref().ok_or_else(|| Error::config("retrieve step needs a search client"))?;
        let qa = self.components.qa.as_ref().ok_or_else(|| Error::config("retrieve step needs an LLM client"))?;
        let fetcher = self.components.fetcher.as_ref();
        let max_results = self.config.max_results;
        self.in_batches(Artifact::RetrievedEvidence, claims, |claim| async move {
            let evidence = retriever.retrieve_for_claim(&claim, max_results).await?;
            let mut pages = Vec::with_capacity(evidence.len());
            for item in &evidence {
                if let Some(text) = page_text(fetcher, &item.url).await {
                    pages.push(SourcePage { item: item.clone(), text });
                }
            }
            let outcome = qa.generate_from_evidence(&claim.text, claim.claim_date, &pages).await;
            Ok(RetrievedRecord {
                claim_id: claim.id,
                evidence,
                error: outcome.error().map(|e| Error::Llm(e.error.clone()).to_string()),
                qa_pairs: outcome.into_set(),
            })
        })
        .await
    }

    async fn predict(&self, claims: &[Claim], evidence: &[RetrievedRecord]) -> Result<Vec<Prediction>> {
        let predictor =
            self.components.predictor.as_ref().ok_or_else(|| Error::config("predict step needs an LLM client"))?;
        let by_claim: HashMap<&str, &QaSet> = evidence.iter().map(|r| (r.claim_id.as_str(), &r.qa_pairs)).collect();
        let by_claim = &by_claim;
        let empty = QaSet::default();
        let empty = &empty;
        self.in_batches(Artifact::Predictions, claims, |claim| async move {
            let qa = by_claim.get(claim.id.as_str()).copied().unwrap_or(empty);
            Ok(predictor.predict(&claim.id, &claim.text, qa).await)
        })
        .await
    }

    async fn evaluate(
        &self,
        claims: &[Claim],
        gold: &[GoldRecord],
        evidence: &[RetrievedRecord],
        predictions: &[Prediction],
    ) -> Result<EvaluationSummary> {
        let gold: HashMap<&str, &QaSet> = gold.iter().map(|g| (g.claim_id.as_str(), &g.qa_pairs)).collect();
        let evidence: HashMap<&str, &QaSet> = evidence.iter().map(|r| (r.claim_id.as_str(), &r.qa_pairs)).collect();
        let labels: HashMap<&str, &Prediction> = predictions.iter().map(|p| (p.claim_id.as_str(), p)).collect();

        let inputs = claims
            .iter()
            .map(|c| ClaimInput {
                claim_id: c.id.clone(),
                predicted_label: labels.get(c.id.as_str()).and_then(|p| p.predicted_label),
                reference_label: c.reference_label,
                predicted: evidence.get(c.id.as_str()).map(|q| (*q).clone()).unwrap_or_default(),
                reference: gold.get(c.id.as_str()).map(|q| (*q).clone()).unwrap_or_default(),
            })
            .collect();

        let scorer = &self.components.scorer;
        let mut entries = scorer.score_claims(inputs).await;
        let summary = scorer.summarize(&mut entries);
        self.run.write(Artifact::EvaluationResults, &EvaluationReport { summary: summary.clone(), entries })?;
        Ok(summary)
    }

    /// Processes claims not yet present in `artifact`, rewriting it after
    /// every batch. Claims already recorded there are skipped, which is what
    /// lets a crashed run resume.
    /// Runs `work` per claim, checkpointing after every batch. A claim whose
    /// work fails with a non-fatal error gets a degraded record noting it;
    /// a fatal error saves the records so far and aborts the step.
    async fn in_batches<R, F, Fut>(&self, artifact: Artifact, claims: &[Claim], mut work: F) -> Result<Vec<R>>
    where
        R: PerClaim,
        F: FnMut(Claim) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let mut records: Vec<R> = self.run.read(artifact)?.unwrap_or_default();
        let done: HashSet<String> = records.iter().map(|r| r.claim_id().to_string()).collect();
        let pending: Vec<&Claim> = claims.iter().filter(|c| !done.contains(&c.id)).collect();
        if !done.is_empty() {
            info!(artifact = artifact.file_name(), done = done.len(), pending = pending.len(), "resuming");
        }

        let delay = Duration::from_millis(self.config.claim_delay_ms);
        let batches = pending.len().div_ceil(self.config.batch_size);
        for (b, batch) in pending.chunks(self.config.batch_size).enumerate() {
            info!(artifact = artifact.file_name(), batch = b + 1, of = batches, "processing batch");
            for (i, claim) in batch.iter().enumerate() {
                if (b > 0 || i > 0) && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                match work((*claim).clone()).await {
                    Ok(record) => records.push(record),
                    Err(e) if !e.is_fatal() => {
                        warn!(claim_id = %claim.id, error = %e, "claim degraded");
                        records.push(R::degraded(&claim.id, e.to_string()));
                    }
                    Err(e) => {
                        self.run.write(artifact, &records)?;
                        return Err(e);
                    }
                }
            }
            self.run.write(artifact, &records)?;
        }
        if pending.is_empty() {
            self.run.write(artifact, &records)?;
        }
        Ok(records)
    }
}

/// Per-claim records written by the batched steps.
trait PerClaim: Serialize + DeserializeOwned {
    fn claim_id(&self) -> &str;

    /// Empty record for a claim whose work failed with `error`.
    fn degraded(claim_id: &str, error: String) -> Self;
}

impl PerClaim for GoldRecord {
    fn claim_id(&self) -> &str {
        &self.claim_id
    }

    fn degraded(claim_id: &str, error: String) -> Self {
        GoldRecord {
            claim_id: claim_id.to_string(),
            qa_pairs: QaSet::default(),
            source_urls: Vec::new(),
            error: Some(error),
        }
    }
}

impl PerClaim for RetrievedRecord {
    fn claim_id(&self) -> &str {
        &self.claim_id
    }

    fn degraded(claim_id: &str, error: String) -> Self {
        RetrievedRecord {
            claim_id: claim_id.to_string(),
            evidence: Vec::new(),
            qa_pairs: QaSet::default(),
            error: Some(error),
        }
    }
}

impl PerClaim for Prediction {
    fn claim_id(&self) -> &str {
        &self.claim_id
    }

    fn degraded(claim_id: &str, error: String) -> Self {
        Prediction { claim_id: claim_id.to_string(), predicted_label: None, raw_label: None, error: Some(error) }
    }
}

/// Parsed page, or `None` when it cannot be fetched or is an error page.
async fn page(fetcher: &dyn Fetcher, url: &str) -> Option<Document> {
    match fetcher.fetch(url).await {
        Ok(doc) => doc,
        Err(e) => {
            warn!(%url, error = %format!("{e:#}"), "page fetch failed");
            None
        }
    }
}

async fn page_text(fetcher: &dyn Fetcher, url: &str) -> Option<String> {
    page(fetcher, url).await.map(|doc| doc.text).filter(|t| !t.trim().is_empty())
}
