use crate::models::Candidate;
use std::collections::HashMap;

/// Business Rule Filter - 多樣性與庫存規則
///
/// Single forward pass over a score-sorted list. The category cap is a
/// hard ceiling: lower-ranked items of a full category are dropped.
#[derive(Debug, Clone, Copy)]
pub struct BusinessRuleFilter {
    max_per_category: usize,
}

impl BusinessRuleFilter {
    pub fn new(max_per_category: usize) -> Self {
        Self { max_per_category }
    }

    /// Keep at most `max_per_category` items per category, in order.
    pub fn apply_diversity(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        apply_diversity(candidates, self.max_per_category)
    }

    /// Diversity then stock.
    pub fn apply(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        apply_stock_filter(self.apply_diversity(candidates))
    }
}

pub fn apply_diversity(candidates: Vec<Candidate>, max_per_category: usize) -> Vec<Candidate> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    candidates
        .into_iter()
        .filter(|c| {
            let count = counts.entry(c.category.clone()).or_insert(0);
            if *count < max_per_category {
                *count += 1;
                true
            } else {
                false
            }
        })
        .collect()
}

/// Drop out-of-stock items. Unknown stock counts as in stock.
pub fn apply_stock_filter(candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| c.stock.unwrap_or(1) > 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Product, Signal};

    fn candidate(id: &str, category: &str, stock: Option<i32>) -> Candidate {
        let product = Product {
            product_id: id.to_string(),
            name: id.to_string(),
            category: category.to_string(),
            price: 10.0,
            stock,
            is_active: true,
            popularity_score: None,
            description: None,
            image_url: None,
            embedding: None,
        };
        Candidate::from_product(&product, Signal::Content, 0.5)
    }

    #[test]
    fn test_diversity_cap_is_hard_ceiling() {
        let filter = BusinessRuleFilter::new(2);
        let input = vec![
            candidate("a1", "A", Some(1)),
            candidate("a2", "A", Some(1)),
            candidate("a3", "A", Some(1)),
            candidate("b1", "B", Some(1)),
            candidate("a4", "A", Some(1)),
        ];

        let out = filter.apply_diversity(input);
        let ids: Vec<&str> = out.iter().map(|c| c.product_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "b1"]);
    }

    #[test]
    fn test_diversity_never_exceeds_cap() {
        for cap in 1..5 {
            let input: Vec<Candidate> = (0..30)
                .map(|i| candidate(&format!("p{}", i), &format!("c{}", i % 3), Some(1)))
                .collect();
            let out = apply_diversity(input, cap);
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for c in &out {
                *counts.entry(c.category.as_str()).or_insert(0) += 1;
            }
            assert!(counts.values().all(|n| *n <= cap));
        }
    }

    #[test]
    fn test_stock_filter() {
        let out = apply_stock_filter(vec![
            candidate("in", "A", Some(3)),
            candidate("out", "A", Some(0)),
            candidate("neg", "A", Some(-2)),
            candidate("unknown", "A", None),
        ]);
        let ids: Vec<&str> = out.iter().map(|c| c.product_id.as_str()).collect();
        assert_eq!(ids, vec!["in", "unknown"]);
    }

    #[test]
    fn test_apply_runs_both_rules() {
        let filter = BusinessRuleFilter::new(1);
        let out = filter.apply(vec![
            candidate("a1", "A", Some(0)),
            candidate("a2", "A", Some(5)),
            candidate("b1", "B", Some(5)),
        ]);
        // a1 takes the A slot before the stock filter drops it
        let ids: Vec<&str> = out.iter().map(|c| c.product_id.as_str()).collect();
        assert_eq!(ids, vec!["b1"]);
    }
}
