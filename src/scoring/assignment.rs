use super::pairwise::SimilarityMatrix;
use crate::error::{Error, Result};

/// Maximum-weight one-to-one matching over `matrix`, as `(row, col)` pairs.
/// Every row is matched when `rows <= cols`, otherwise every column.
///
/// Shortest augmenting paths with potentials (Hungarian method), O(n²m).
/// Non-finite weights are treated as zero.
pub fn max_weight_assignment(matrix: &SimilarityMatrix) -> Vec<(usize, usize)> {
    let (rows, cols) = (matrix.rows(), matrix.cols());
    if rows == 0 || cols == 0 {
        return Vec::new();
    }
    let transpose = rows > cols;
    let (n, m) = if transpose { (cols, rows) } else { (rows, cols) };
    let cost = |i: usize, j: usize| {
        let w = if transpose { matrix.get(j, i) } else { matrix.get(i, j) };
        if w.is_finite() { -w } else { 0.0 }
    };

    // 1-based; index 0 is the virtual source column.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    let mut owner = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        owner[0] = i;
        let mut j0 = 0;
        let mut min_slack = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];
        loop {
            used[j0] = true;
            let i0 = owner[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let slack = cost(i0 - 1, j - 1) - u[i0] - v[j];
                if slack < min_slack[j] {
                    min_slack[j] = slack;
                    way[j] = j0;
                }
                if min_slack[j] < delta {
                    delta = min_slack[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[owner[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_slack[j] -= delta;
                }
            }
            j0 = j1;
            if owner[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            owner[j0] = owner[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut pairs: Vec<(usize, usize)> = (1..=m)
        .filter(|&j| owner[j] != 0)
        .map(|j| if transpose { (j - 1, owner[j] - 1) } else { (owner[j] - 1, j - 1) })
        .collect();
    pairs.sort_unstable();
    pairs
}

/// Utility of the best matching: matched weight divided by the number of
/// references, so references left unmatched pull the score down. Extra
/// predictions cost nothing.
///
/// An empty reference side is rejected; an empty prediction side scores 0.
pub fn evaluate(matrix: &SimilarityMatrix) -> Result<f64> {
    if matrix.cols() == 0 {
        return Err(Error::validation("reference_qaset", "cannot score against an empty reference set"));
    }
    let total: f64 = max_weight_assignment(matrix)
        .into_iter()
        .map(|(r, c)| matrix.get(r, c))
        .filter(|w| w.is_finite())
        .sum();
    Ok(total / matrix.cols() as f64)
}
