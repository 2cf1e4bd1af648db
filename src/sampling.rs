//! Token sampling with temperature, top-k and nucleus (top-p) filtering
//!
//! The distribution returned by [`Sampler::warp`] is the one the token is
//! actually drawn from, so it is also what the metrics recorder measures.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::metrics::{softmax, GenerationStep};

/// Sampling parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    /// Temperature (<= 0.0 means greedy)
    pub temperature: f32,
    /// Keep only the k most likely tokens
    pub top_k: Option<usize>,
    /// Keep the smallest set of tokens whose mass reaches p
    pub top_p: Option<f32>,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: Some(50),
            top_p: Some(0.95),
            seed: 42,
        }
    }
}

impl SamplingConfig {
    /// Greedy decoding
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            top_k: None,
            top_p: None,
            ..Self::default()
        }
    }

    pub fn is_greedy(&self) -> bool {
        self.temperature <= 0.0
    }
}

/// Stateful sampler holding a seeded RNG
pub struct Sampler {
    config: SamplingConfig,
    rng: StdRng,
}

impl Sampler {
    pub fn new(config: SamplingConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Turn raw logits into the filtered, renormalized sampling distribution
    pub fn warp(&self, logits: &[f32]) -> Vec<f32> {
        if logits.is_empty() {
            return Vec::new();
        }
        if self.config.is_greedy() {
            let mut dist = vec![0.0; logits.len()];
            dist[argmax(logits)] = 1.0;
            return dist;
        }

        let scaled: Vec<f32> = logits
            .iter()
            .map(|x| x / self.config.temperature)
            .collect();
        let probs = softmax(&scaled);

        let mut order: Vec<usize> = (0..probs.len()).collect();
        order.sort_by(|&a, &b| {
            probs[b]
                .partial_cmp(&probs[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if let Some(k) = self.config.top_k {
            if k > 0 && k < order.len() {
                order.truncate(k);
            }
        }

        if let Some(p) = self.config.top_p {
            if p < 1.0 {
                let kept_mass: f32 = order.iter().map(|&i| probs[i]).sum();
                let mut cumsum = 0.0;
                let mut cutoff = order.len();
                for (rank, &i) in order.iter().enumerate() {
                    cumsum += probs[i] / kept_mass;
                    if cumsum >= p {
                        cutoff = rank + 1;
                        break;
                    }
                }
                order.truncate(cutoff.max(1));
            }
        }

        let kept_mass: f32 = order.iter().map(|&i| probs[i]).sum();
        let mut dist = vec![0.0; probs.len()];
        if kept_mass > 0.0 {
            for &i in &order {
                dist[i] = probs[i] / kept_mass;
            }
        } else {
            dist[order[0]] = 1.0;
        }
        dist
    }

    /// Draw the next token and return it with the distribution it came from
    pub fn sample(&mut self, logits: &[f32]) -> GenerationStep {
        let distribution = self.warp(logits);

        let r: f32 = self.rng.gen();
        let mut cumsum = 0.0;
        let mut last_nonzero = 0;
        let mut chosen = None;
        for (idx, &p) in distribution.iter().enumerate() {
            if p <= 0.0 {
                continue;
            }
            last_nonzero = idx;
            cumsum += p;
            if r < cumsum {
                chosen = Some(idx);
                break;
            }
        }

        // Rounding can leave the cumulative sum just under r
        let token_id = chosen.unwrap_or(last_nonzero) as u32;
        GenerationStep {
            distribution,
            token_id,
        }
    }
}

fn argmax(logits: &[f32]) -> usize {
    logits
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map_or(0, |(idx, _)| idx)
}
