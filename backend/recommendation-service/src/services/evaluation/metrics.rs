use std::collections::{HashMap, HashSet};

/// Novelty assigned to items never interacted with.
const UNSEEN_NOVELTY: f64 = 10.0;

/// Share of the first `k` recommendations that are relevant.
pub fn precision_at_k(recommended: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    let top = &recommended[..recommended.len().min(k)];
    if top.is_empty() {
        return 0.0;
    }
    distinct_hits(top, relevant) as f64 / top.len() as f64
}

/// Share of relevant items found in the first `k` recommendations.
pub fn recall_at_k(recommended: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    let top = &recommended[..recommended.len().min(k)];
    distinct_hits(top, relevant) as f64 / relevant.len() as f64
}

/// Binary-relevance NDCG@k.
pub fn ndcg_at_k(recommended: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    let dcg: f64 = recommended
        .iter()
        .take(k)
        .enumerate()
        .filter(|(_, id)| relevant.contains(*id))
        .map(|(i, _)| 1.0 / ((i + 2) as f64).log2())
        .sum();

    let ideal: f64 = (0..relevant.len().min(k))
        .map(|i| 1.0 / ((i + 2) as f64).log2())
        .sum();

    if ideal > 0.0 {
        dcg / ideal
    } else {
        0.0
    }
}

/// Reciprocal rank of the first relevant item.
pub fn mrr(recommended: &[String], relevant: &HashSet<String>) -> f64 {
    recommended
        .iter()
        .position(|id| relevant.contains(id))
        .map(|i| 1.0 / (i + 1) as f64)
        .unwrap_or(0.0)
}

/// Mean self-information (-log2 popularity) of the recommended items.
pub fn novelty(recommended: &HashSet<String>, popularity: &HashMap<String, f64>) -> f64 {
    if recommended.is_empty() {
        return 0.0;
    }
    let total: f64 = recommended
        .iter()
        .map(|id| match popularity.get(id) {
            Some(p) if *p > 0.0 => -p.log2(),
            _ => UNSEEN_NOVELTY,
        })
        .sum();
    total / recommended.len() as f64
}

fn distinct_hits(items: &[String], relevant: &HashSet<String>) -> usize {
    items
        .iter()
        .filter(|id| relevant.contains(*id))
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_precision_and_recall() {
        let rec = ids(&["a", "b", "c", "d"]);
        let rel = set(&["b", "d", "z"]);
        assert!((precision_at_k(&rec, &rel, 2) - 0.5).abs() < 1e-12);
        assert!((recall_at_k(&rec, &rel, 4) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(precision_at_k(&[], &rel, 5), 0.0);
        assert_eq!(recall_at_k(&rec, &HashSet::new(), 5), 0.0);
    }

    #[test]
    fn test_ndcg_perfect_and_partial() {
        let rel = set(&["a", "b"]);
        assert!((ndcg_at_k(&ids(&["a", "b", "c"]), &rel, 3) - 1.0).abs() < 1e-12);

        // single hit at rank 2 of 2 relevant
        let expected = (1.0 / 3f64.log2()) / (1.0 + 1.0 / 3f64.log2());
        assert!((ndcg_at_k(&ids(&["c", "a"]), &rel, 2) - expected).abs() < 1e-12);
        assert_eq!(ndcg_at_k(&ids(&["c"]), &HashSet::new(), 1), 0.0);
    }

    #[test]
    fn test_mrr() {
        let rel = set(&["c"]);
        assert!((mrr(&ids(&["a", "b", "c"]), &rel) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(mrr(&ids(&["a"]), &rel), 0.0);
    }

    #[test]
    fn test_novelty() {
        let mut pop = HashMap::new();
        pop.insert("a".to_string(), 0.25);
        let rec = set(&["a", "b"]);
        // (-log2(0.25) + 10) / 2
        assert!((novelty(&rec, &pop) - 6.0).abs() < 1e-12);
        assert_eq!(novelty(&HashSet::new(), &pop), 0.0);
    }
}
