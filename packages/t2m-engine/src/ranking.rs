//! Hybrid semantic + keyword ranking (spec.md §4.5 "Hybrid ranking",
//! grounded on `sqlite_adapter.py::_resolve_search_ids` /
//! `_keyword_score`).

#[derive(Debug, Clone, Copy)]
pub struct RankingWeights {
    pub alpha: f64,
    pub beta: f64,
    pub phrase_bonus: f64,
    pub default_k: usize,
    pub max_k: usize,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            beta: 0.3,
            phrase_bonus: 0.2,
            default_k: 10,
            max_k: 100,
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Returns `(score, exact_phrase)`. Exact whole-phrase substring match
/// (case-insensitive) scores 1.0; otherwise the fraction of query tokens
/// present in the text.
pub fn keyword_score(text: &str, query: &str) -> (f64, bool) {
    let query = query.to_lowercase();
    let query = query.trim();
    if text.is_empty() || query.is_empty() {
        return (0.0, false);
    }
    let text_lower = text.to_lowercase();
    if text_lower.contains(query) {
        return (1.0, true);
    }
    let tokens: Vec<&str> = query.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).collect();
    if tokens.is_empty() {
        return (0.0, false);
    }
    let hits = tokens.iter().filter(|t| text_lower.contains(**t)).count();
    (hits as f64 / tokens.len() as f64, false)
}

/// `sim = alpha*cosine + beta*keyword + phrase_bonus*[exact]`, capped at 1.0
/// (spec.md §4.5).
pub fn hybrid_score(weights: &RankingWeights, cosine: f64, text: &str, query: Option<&str>) -> f64 {
    let (kw, exact) = match query {
        Some(q) => keyword_score(text, q),
        None => (0.0, false),
    };
    let bonus = if exact { weights.phrase_bonus } else { 0.0 };
    (weights.alpha * cosine + weights.beta * kw + bonus).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![1.0_f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn exact_phrase_match_scores_one() {
        let (score, exact) = keyword_score("alpha project meeting notes", "alpha project");
        assert_eq!(score, 1.0);
        assert!(exact);
    }

    #[test]
    fn partial_token_overlap_is_fractional() {
        let (score, exact) = keyword_score("beta launch plan", "alpha project plan");
        assert!(!exact);
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn hybrid_score_is_capped_at_one() {
        let weights = RankingWeights::default();
        let score = hybrid_score(&weights, 1.0, "alpha project plan", Some("alpha project plan"));
        assert!(score <= 1.0);
    }
}
