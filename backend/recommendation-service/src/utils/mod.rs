// Utility functions for recommendation-service

/// Normalize a score to [0, 1] range
pub fn normalize_score(score: f32, min: f32, max: f32) -> f32 {
    if max - min < f32::EPSILON {
        0.5
    } else {
        ((score - min) / (max - min)).clamp(0.0, 1.0)
    }
}

/// Min-max normalize a batch of scores in place.
pub fn min_max_normalize(scores: &mut [f32]) {
    if scores.is_empty() {
        return;
    }
    let min = scores.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    for s in scores.iter_mut() {
        *s = normalize_score(*s, min, max);
    }
}

/// Exponential recency decay: exp(-days / decay_days)
pub fn recency_weight(days_old: f64, decay_days: f64) -> f64 {
    (-days_old / decay_days).exp()
}

pub fn clamp_unit(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_score() {
        assert!((normalize_score(5.0, 0.0, 10.0) - 0.5).abs() < 0.001);
        assert!((normalize_score(10.0, 0.0, 10.0) - 1.0).abs() < 0.001);
        assert!((normalize_score(0.0, 0.0, 10.0) - 0.0).abs() < 0.001);
        // 區間為 0 時取中值
        assert!((normalize_score(3.0, 3.0, 3.0) - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_min_max_normalize_handles_negatives() {
        let mut scores = vec![-4.0, 0.0, 4.0];
        min_max_normalize(&mut scores);
        assert_eq!(scores, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_recency_weight() {
        assert!((recency_weight(0.0, 30.0) - 1.0).abs() < 1e-12);
        assert!((recency_weight(30.0, 30.0) - (-1.0f64).exp()).abs() < 1e-12);

        let mut prev = recency_weight(0.0, 30.0);
        for day in 1..120 {
            let w = recency_weight(day as f64, 30.0);
            assert!(w < prev);
            prev = w;
        }
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f32::NAN), 0.0);
    }
}
