//! Token-level generation metrics
//!
//! Converts the per-step probability distributions produced while generating
//! a sequence into entropy and perplexity, per token and averaged over the
//! sequence. Entropy is measured in bits; perplexity is `2^entropy`.

use serde::{Deserialize, Serialize};

/// One generation step: the distribution sampled from and the chosen token
#[derive(Debug, Clone)]
pub struct GenerationStep {
    /// Probability of every vocabulary entry at this step
    pub distribution: Vec<f32>,
    /// Token ID that was emitted
    pub token_id: u32,
}

/// Uncertainty of a single generation step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenMetric {
    /// Shannon entropy in bits
    pub entropy: f64,
    /// Effective branching factor, `2^entropy`
    pub perplexity: f64,
}

impl TokenMetric {
    /// Build a metric from an entropy value in bits
    pub fn from_entropy(entropy: f64) -> Self {
        Self {
            entropy,
            perplexity: (entropy * std::f64::consts::LN_2).exp(),
        }
    }
}

/// Averages over every generated token of one sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceMetrics {
    pub mean_entropy: f64,
    pub mean_perplexity: f64,
}

/// Compute entropy (bits) and perplexity of one probability distribution.
///
/// Zero-probability entries are skipped so `0 * log2(0)` never appears.
/// The distribution is expected to already be normalized.
pub fn compute_token_metric<P: Copy + Into<f64>>(distribution: &[P]) -> TokenMetric {
    let entropy = -distribution
        .iter()
        .map(|&p| p.into())
        .filter(|&p| p > 0.0)
        .map(|p| p * p.log2())
        .sum::<f64>();

    // A one-hot distribution sums to -0.0
    TokenMetric::from_entropy(entropy.max(0.0))
}

/// Arithmetic means of entropy and perplexity; zeros for an empty sequence.
pub fn aggregate_sequence(token_metrics: &[TokenMetric]) -> SequenceMetrics {
    if token_metrics.is_empty() {
        return SequenceMetrics::default();
    }

    let n = token_metrics.len() as f64;
    let entropy_sum: f64 = token_metrics.iter().map(|m| m.entropy).sum();
    let perplexity_sum: f64 = token_metrics.iter().map(|m| m.perplexity).sum();

    SequenceMetrics {
        mean_entropy: entropy_sum / n,
        mean_perplexity: perplexity_sum / n,
    }
}

/// Numerically stable softmax over raw logits.
///
/// `-inf` logits map to exactly zero probability.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_val = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max_val.is_finite() {
        return vec![0.0; logits.len()];
    }

    let exp_vals: Vec<f32> = logits.iter().map(|x| (x - max_val).exp()).collect();
    let sum: f32 = exp_vals.iter().sum();
    exp_vals.iter().map(|x| x / sum).collect()
}

/// Collects token metrics while a sequence is being generated
///
/// Each [`GenerationStep`] is consumed as soon as it is recorded, so the
/// full vocabulary distribution never outlives its step.
#[derive(Debug, Default, Clone)]
pub struct MetricsRecorder {
    metrics: Vec<TokenMetric>,
    tokens: Vec<u32>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one step and return its metric
    pub fn record(&mut self, step: GenerationStep) -> TokenMetric {
        let metric = compute_token_metric(&step.distribution);
        self.metrics.push(metric);
        self.tokens.push(step.token_id);
        metric
    }

    /// Per-token metrics in generation order
    pub fn metrics(&self) -> &[TokenMetric] {
        &self.metrics
    }

    /// Tokens recorded so far
    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Sequence-level averages
    pub fn finish(&self) -> SequenceMetrics {
        aggregate_sequence(&self.metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_one_hot_has_zero_entropy() {
        let metric = compute_token_metric(&[0.0_f64, 1.0, 0.0, 0.0]);
        assert_eq!(metric.entropy, 0.0);
        assert_eq!(metric.perplexity, 1.0);
    }

    #[test]
    fn test_uniform_distribution() {
        for k in [2usize, 4, 7, 50] {
            let dist = vec![1.0 / k as f64; k];
            let metric = compute_token_metric(&dist);
            assert!((metric.entropy - (k as f64).log2()).abs() < 1e-9);
            assert!((metric.perplexity - k as f64).abs() < 1e-6);
        }
    }

    #[test]
    fn test_perplexity_is_two_to_the_entropy() {
        let dists: [&[f64]; 3] = [&[0.5, 0.25, 0.25], &[0.9, 0.1], &[0.1, 0.2, 0.3, 0.4]];
        for dist in dists {
            let metric = compute_token_metric(dist);
            assert!((metric.perplexity - 2f64.powf(metric.entropy)).abs() < EPS);
        }
    }

    #[test]
    fn test_zero_terms_are_skipped() {
        let metric = compute_token_metric(&[0.5_f32, 0.0, 0.5, 0.0]);
        assert!(metric.entropy.is_finite());
        assert!((metric.entropy - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_aggregate_empty() {
        let agg = aggregate_sequence(&[]);
        assert_eq!(agg.mean_entropy, 0.0);
        assert_eq!(agg.mean_perplexity, 0.0);
    }

    #[test]
    fn test_aggregate_means() {
        let metrics = [TokenMetric::from_entropy(0.0), TokenMetric::from_entropy(2.0)];
        let agg = aggregate_sequence(&metrics);
        assert!((agg.mean_entropy - 1.0).abs() < EPS);
        assert!((agg.mean_perplexity - 2.5).abs() < EPS);
    }

    #[test]
    fn test_softmax_masks_neg_infinity() {
        let probs = softmax(&[1.0, f32::NEG_INFINITY, 1.0]);
        assert_eq!(probs[1], 0.0);
        assert!((probs[0] - 0.5).abs() < 1e-6);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_recorder_tracks_steps() {
        let mut recorder = MetricsRecorder::new();
        recorder.record(GenerationStep {
            distribution: vec![1.0, 0.0],
            token_id: 0,
        });
        recorder.record(GenerationStep {
            distribution: vec![0.5, 0.5],
            token_id: 1,
        });

        assert_eq!(recorder.tokens(), &[0, 1]);
        let seq = recorder.finish();
        assert!((seq.mean_entropy - 0.5).abs() < 1e-6);
        assert!((seq.mean_perplexity - 1.5).abs() < 1e-6);
    }
}
