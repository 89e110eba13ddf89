use serde::Serialize;
use tracing::debug;

/// Similarity between a candidate string and a reference string. `None`
/// marks a cell that could not be scored.
#[async_trait::async_trait]
pub trait PairMetric: Send + Sync {
    fn name(&self) -> &str;
    async fn score(&self, candidate: &str, reference: &str) -> Option<f64>;
}

/// Dense row-major matrix: rows are predictions, columns are references.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityMatrix {
    rows: usize,
    cols: usize,
    cells: Vec<f64>,
}

impl SimilarityMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, cells: vec![0.0; rows * cols] }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        let n = rows.len();
        let mut cells = Vec::with_capacity(n * cols);
        for row in rows {
            let mut row = row;
            row.resize(cols, 0.0);
            cells.extend(row);
        }
        Self { rows: n, cols, cells }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.cells[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.cells[row * self.cols + col] = value;
    }
}

/// A matrix plus how many of its cells fell back to zero.
#[derive(Debug, Clone)]
pub struct PairwiseScores {
    pub matrix: SimilarityMatrix,
    pub unscored: usize,
}

impl PairwiseScores {
    pub fn cells(&self) -> usize {
        self.matrix.rows() * self.matrix.cols()
    }

    /// True when there were cells to score and none of them could be.
    pub fn all_unscored(&self) -> bool {
        self.cells() > 0 && self.unscored == self.cells()
    }
}

/// Scores every `(candidate, reference)` pair, identical strings included.
/// Unscored cells hold `0.0`.
pub async fn score_all(candidates: &[String], references: &[String], metric: &dyn PairMetric) -> PairwiseScores {
    let mut matrix = SimilarityMatrix::zeros(candidates.len(), references.len());
    let mut unscored = 0;
    for (i, cand) in candidates.iter().enumerate() {
        for (j, reference) in references.iter().enumerate() {
            match metric.score(cand, reference).await {
                Some(v) if v.is_finite() => matrix.set(i, j, v),
                _ => unscored += 1,
            }
        }
    }
    if unscored > 0 {
        debug!(metric = metric.name(), unscored, "cells left unscored");
    }
    PairwiseScores { matrix, unscored }
}
