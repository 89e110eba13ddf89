use crate::error::{Error, Result};
use crate::labels::LabelTable;
use crate::pipeline::Step;
use crate::relevance::RelevanceConfig;
use crate::retry::RetryPolicy;
use crate::scoring::ScoringConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_FACT_CHECK_TOOLS_URL: &str = "https://factchecktools.googleapis.com/v1alpha1/claims:search";

/// Credentials and endpoints read from the environment.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub serper_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub model: String,
    pub fact_check_tools_url: String,
    pub fact_check_tools_key: Option<String>,
}

impl Settings {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            serper_api_key: get("SERPER_API_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL"),
            model: get("FACTCHECK_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            fact_check_tools_url: get("FACT_CHECK_TOOLS_URL").unwrap_or_else(|| DEFAULT_FACT_CHECK_TOOLS_URL.to_string()),
            fact_check_tools_key: get("FACT_CHECK_TOOLS_KEY"),
        }
    }

    pub fn serper_key(&self) -> Result<&str> {
        self.serper_api_key.as_deref().ok_or_else(|| Error::missing_setting("SERPER_API_KEY"))
    }

    pub fn openai_key(&self) -> Result<&str> {
        self.openai_api_key.as_deref().ok_or_else(|| Error::missing_setting("OPENAI_API_KEY"))
    }

    pub fn fact_check_tools_key(&self) -> Result<&str> {
        self.fact_check_tools_key.as_deref().ok_or_else(|| Error::missing_setting("FACT_CHECK_TOOLS_KEY"))
    }

    /// Fails on the first credential a planned step cannot run without.
    pub fn require_for(&self, steps: &[Step], config: &PipelineConfig) -> Result<()> {
        for step in steps {
            match step {
                Step::Collect if config.claims_file.is_none() => {
                    self.fact_check_tools_key()?;
                }
                Step::Retrieve => {
                    self.serper_key()?;
                    self.openai_key()?;
                }
                Step::Extract | Step::Predict => {
                    self.openai_key()?;
                }
                Step::Evaluate if config.scoring.metric == crate::scoring::MetricKind::Judge => {
                    self.openai_key()?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Run parameters, loadable from a JSON file. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queries_file: PathBuf,
    /// Read claims from this JSON file instead of querying the claim API.
    pub claims_file: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub run_id: Option<String>,
    pub max_claims: Option<usize>,
    /// Keep only claims reviewed by these sites; empty keeps all. Defaults to
    /// the Arabic fact-checkers in [`claims::DEFAULT_SITES`](crate::claims::DEFAULT_SITES).
    pub allowed_sites: Vec<String>,
    pub batch_size: usize,
    pub claim_delay_ms: u64,
    pub max_results: usize,
    pub http_timeout_ms: u64,
    pub search_qps: u32,
    pub search_region: Option<String>,
    pub steps: Vec<Step>,
    pub relevance: RelevanceConfig,
    pub retry: RetryPolicy,
    pub scoring: ScoringConfig,
    /// `{label: [raw rating, ...]}` replacing the built-in table.
    pub labels_map: Option<serde_json::Value>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queries_file: PathBuf::from("data/raw/queries.txt"),
            claims_file: None,
            output_dir: PathBuf::from("pipeline_output"),
            run_id: None,
            max_claims: None,
            allowed_sites: crate::claims::DEFAULT_SITES.iter().map(|s| s.to_string()).collect(),
            batch_size: 10,
            claim_delay_ms: 2000,
            max_results: crate::retrieve::DEFAULT_MAX_RESULTS,
            http_timeout_ms: 30_000,
            search_qps: 5,
            search_region: None,
            steps: Step::ALL.to_vec(),
            relevance: RelevanceConfig::default(),
            retry: RetryPolicy::default(),
            scoring: ScoringConfig::default(),
            labels_map: None,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("reading config {}: {e}", path.display())))?;
        let cfg: PipelineConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("parsing config {}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::validation("batch_size", "must be at least 1"));
        }
        if self.max_results == 0 {
            return Err(Error::validation("max_results", "must be at least 1"));
        }
        if self.scoring.max_questions == 0 {
            return Err(Error::validation("scoring.max_questions", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::validation("retry.max_attempts", "must be at least 1"));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::validation("retry.backoff_multiplier", "must be a finite number of at least 1"));
        }
        if self.steps.is_empty() {
            return Err(Error::validation("steps", "at least one step is required"));
        }
        self.labels()?;
        Ok(())
    }

    pub fn labels(&self) -> Result<LabelTable> {
        match &self.labels_map {
            Some(map) => LabelTable::from_json(map),
            None => Ok(LabelTable::default()),
        }
    }
}
