use super::pairwise::PairMetric;
use super::tokenize::tokenize;
use once_cell::sync::Lazy;
use rust_stemmers::{Algorithm, Stemmer};

static ARABIC: Lazy<Stemmer> = Lazy::new(|| Stemmer::create(Algorithm::Arabic));
static ENGLISH: Lazy<Stemmer> = Lazy::new(|| Stemmer::create(Algorithm::English));

/// Weights of the harmonic mean and fragmentation penalty.
#[derive(Debug, Clone, Copy)]
pub struct MeteorParams {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl Default for MeteorParams {
    fn default() -> Self {
        Self { alpha: 0.9, beta: 3.0, gamma: 0.5 }
    }
}

/// Unigram alignment score in `[0, 1]`. Tokens match exactly first, then
/// by Snowball stem; the fragmentation penalty rewards matches that appear
/// in the same order.
pub fn meteor(candidate: &str, reference: &str, params: MeteorParams) -> f64 {
    let hyp = tokenize(candidate);
    let refs = tokenize(reference);
    if hyp.is_empty() || refs.is_empty() {
        return 0.0;
    }

    let alignment = align(&hyp, &refs);
    let matches = alignment.len() as f64;
    if matches == 0.0 {
        return 0.0;
    }

    let precision = matches / hyp.len() as f64;
    let recall = matches / refs.len() as f64;
    let fmean = precision * recall / (params.alpha * precision + (1.0 - params.alpha) * recall);
    let frag = chunks(&alignment) as f64 / matches;
    let penalty = params.gamma * frag.powf(params.beta);
    fmean * (1.0 - penalty)
}

/// Pairs `(hyp_index, ref_index)`, each index used once. Exact matches are
/// taken first, then leftover tokens are matched on their stems.
fn align(hyp: &[String], refs: &[String]) -> Vec<(usize, usize)> {
    let mut hyp_free = vec![true; hyp.len()];
    let mut ref_free = vec![true; refs.len()];
    let mut out = Vec::new();
    match_stage(hyp, refs, &mut hyp_free, &mut ref_free, &mut out);

    let hyp_stems: Vec<String> = hyp.iter().map(|t| stem(t)).collect();
    let ref_stems: Vec<String> = refs.iter().map(|t| stem(t)).collect();
    match_stage(&hyp_stems, &ref_stems, &mut hyp_free, &mut ref_free, &mut out);

    out.sort_unstable();
    out
}

// Scans both sides from the end, taking the last free reference match.
fn match_stage(
    hyp: &[String],
    refs: &[String],
    hyp_free: &mut [bool],
    ref_free: &mut [bool],
    out: &mut Vec<(usize, usize)>,
) {
    for i in (0..hyp.len()).rev() {
        if !hyp_free[i] {
            continue;
        }
        if let Some(j) = (0..refs.len()).rev().find(|&j| ref_free[j] && refs[j] == hyp[i]) {
            hyp_free[i] = false;
            ref_free[j] = false;
            out.push((i, j));
        }
    }
}

fn stem(token: &str) -> String {
    let arabic = token.chars().any(|c| ('\u{0600}'..='\u{06FF}').contains(&c));
    let stemmer = if arabic { &*ARABIC } else { &*ENGLISH };
    stemmer.stem(token).into_owned()
}

/// Runs of matches contiguous in both sequences.
fn chunks(alignment: &[(usize, usize)]) -> usize {
    if alignment.is_empty() {
        return 0;
    }
    1 + alignment
        .windows(2)
        .filter(|w| !(w[1].0 == w[0].0 + 1 && w[1].1 == w[0].1 + 1))
        .count()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MeteorMetric {
    pub params: MeteorParams,
}

#[async_trait::async_trait]
impl PairMetric for MeteorMetric {
    fn name(&self) -> &str {
        "meteor"
    }

    async fn score(&self, candidate: &str, reference: &str) -> Option<f64> {
        Some(meteor(candidate, reference, self.params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(a: &str, b: &str) -> f64 {
        meteor(a, b, MeteorParams::default())
    }

    #[test]
    fn identical_text_scores_near_one() {
        let s = "متى وقع الحادث؟ وقع الحادث في الأول من يناير";
        assert!(m(s, s) > 0.99);
        assert!(m(s, s) <= 1.0);
    }

    #[test]
    fn disjoint_or_empty_text_scores_zero() {
        assert_eq!(m("قطة سوداء", "سيارة حمراء"), 0.0);
        assert_eq!(m("", "شيء"), 0.0);
        assert_eq!(m("...", "شيء"), 0.0);
    }

    #[test]
    fn word_order_is_penalised() {
        let ordered = m("the cat sat on the mat", "the cat sat on the mat today");
        let shuffled = m("mat the on sat cat the", "the cat sat on the mat today");
        assert!(ordered > shuffled);
        assert!(shuffled > 0.0);
    }

    #[test]
    fn recall_weighs_more_than_precision() {
        let short = m("cat sat", "the cat sat on the mat");
        let long = m("the cat sat on the mat", "cat sat");
        assert!(long > short);
    }

    #[test]
    fn inflected_forms_match_on_stems() {
        // exact stage alone aligns only "the" and "denied"
        let score = m("the rumours were denied", "the rumour was denied");
        assert!(score > 0.6, "{score}");
        assert!(m("المعلومات", "معلومات") > 0.4);
    }

    #[test]
    fn exact_matches_win_over_stem_matches() {
        let hyp: Vec<String> = ["denied", "denial"].iter().map(|s| s.to_string()).collect();
        let refs: Vec<String> = ["denial"].iter().map(|s| s.to_string()).collect();
        assert_eq!(align(&hyp, &refs), vec![(1, 0)]);
    }

    #[test]
    fn chunk_counting() {
        assert_eq!(chunks(&[(0, 0), (1, 1), (2, 2)]), 1);
        assert_eq!(chunks(&[(0, 2), (1, 0)]), 2);
        assert_eq!(chunks(&[]), 0);
    }
}
