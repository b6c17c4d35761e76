//! Load Balancer
//!
//! Selection algorithms over an already-filtered list of candidates.
//!
//! Every algorithm works on point-in-time [`Candidate`] snapshots and
//! returns an index into the slice it was given, or `None` for an empty
//! slice. The only state kept between calls is the round-robin cursor,
//! keyed by the exact ordered candidate set so that a changing eligible set
//! starts its own rotation instead of skewing another one.
//!
//! All randomised strategies accept a caller-supplied RNG through
//! [`LoadBalancer::select_with_rng`]; [`LoadBalancer::select`] uses the
//! thread-local generator.

use std::cmp::Ordering;
use std::str::FromStr;

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};

// ============================================================================
// Strategy
// ============================================================================

/// Endpoint selection strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Rotate through candidates in order
    RoundRobin,
    /// Random draw proportional to weight
    Weighted,
    /// Random draw among the fastest third
    LatencyBased,
    /// Cheapest candidate
    CostBased,
    /// Blend of latency, cost and quality
    #[default]
    Adaptive,
    /// Uniform random draw; `quality_based` configs land here
    #[serde(alias = "quality_based")]
    Random,
}

impl RoutingStrategy {
    /// Wire name of this strategy
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Weighted => "weighted",
            Self::LatencyBased => "latency_based",
            Self::CostBased => "cost_based",
            Self::Adaptive => "adaptive",
            Self::Random => "random",
        }
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(Self::RoundRobin),
            "weighted" => Ok(Self::Weighted),
            "latency_based" => Ok(Self::LatencyBased),
            "cost_based" => Ok(Self::CostBased),
            "adaptive" => Ok(Self::Adaptive),
            "random" | "quality_based" => Ok(Self::Random),
            other => Err(format!("unknown routing strategy: {other}")),
        }
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// Snapshot of an eligible endpoint taken at selection time
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    /// Endpoint id
    pub id: String,
    /// Selection weight
    pub weight: f64,
    /// Cost per thousand tokens
    pub cost_per_1k_tokens: f64,
    /// Moving average latency
    pub avg_latency_ms: f64,
    /// Quality signal
    pub quality_score: f64,
}

impl Candidate {
    /// Candidate with neutral statistics
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            weight: 1.0,
            cost_per_1k_tokens: 0.0,
            avg_latency_ms: 0.0,
            quality_score: 1.0,
        }
    }
}

/// Coefficients of the adaptive score
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdaptiveWeights {
    /// Weight of the latency term
    pub latency: f64,
    /// Weight of the cost term
    pub cost: f64,
    /// Weight of the quality term
    pub quality: f64,
}

impl Default for AdaptiveWeights {
    fn default() -> Self {
        Self {
            latency: 0.3,
            cost: 0.3,
            quality: 0.4,
        }
    }
}

// ============================================================================
// Load Balancer
// ============================================================================

/// Strategy dispatcher holding the round-robin cursors
#[derive(Debug, Default)]
pub struct LoadBalancer {
    weights: AdaptiveWeights,
    cursors: DashMap<String, usize>,
}

impl LoadBalancer {
    /// Create a balancer scoring adaptively with `weights`
    #[must_use]
    pub fn new(weights: AdaptiveWeights) -> Self {
        Self {
            weights,
            cursors: DashMap::new(),
        }
    }

    /// Select with the thread-local RNG
    pub fn select(&self, strategy: RoutingStrategy, candidates: &[Candidate]) -> Option<usize> {
        self.select_with_rng(strategy, candidates, &mut rand::thread_rng())
    }

    /// Select with a caller-supplied RNG
    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        strategy: RoutingStrategy,
        candidates: &[Candidate],
        rng: &mut R,
    ) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        match strategy {
            RoutingStrategy::RoundRobin => self.round_robin(candidates),
            RoutingStrategy::Weighted => {
                let weights: Vec<f64> = candidates.iter().map(|c| c.weight).collect();
                weighted_random(&weights, rng)
            }
            RoutingStrategy::LatencyBased => latency_based(candidates, rng),
            RoutingStrategy::CostBased => cost_based(candidates),
            RoutingStrategy::Adaptive => adaptive(candidates, self.weights, rng),
            RoutingStrategy::Random => Some(rng.gen_range(0..candidates.len())),
        }
    }

    /// Next candidate in rotation for this exact ordered set
    pub fn round_robin(&self, candidates: &[Candidate]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let key = candidates
            .iter()
            .map(|c| c.id.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let mut cursor = self.cursors.entry(key).or_insert(0);
        let index = *cursor % candidates.len();
        *cursor = (index + 1) % candidates.len();
        Some(index)
    }
}

// ============================================================================
// Algorithms
// ============================================================================

/// Cumulative-weight draw
///
/// Non-positive weights are never chosen. If no weight is positive the draw
/// falls back to uniform.
pub fn weighted_random<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }

    let total: f64 = weights.iter().map(|w| w.max(0.0)).sum();
    if total <= 0.0 || !total.is_finite() {
        return Some(rng.gen_range(0..weights.len()));
    }

    let r = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    for (index, weight) in weights.iter().enumerate() {
        cumulative += weight.max(0.0);
        if r < cumulative {
            return Some(index);
        }
    }

    // Rounding can leave r == total; fall back to the last positive weight.
    weights.iter().rposition(|w| *w > 0.0)
}

/// Uniform pick among the fastest third (at least one)
pub fn latency_based<R: Rng + ?Sized>(candidates: &[Candidate], rng: &mut R) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }

    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        candidates[a]
            .avg_latency_ms
            .total_cmp(&candidates[b].avg_latency_ms)
    });

    let top = top_third(candidates.len());
    Some(order[rng.gen_range(0..top)])
}

/// Cheapest candidate, first in input order on ties
#[must_use]
pub fn cost_based(candidates: &[Candidate]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        match best {
            Some(b) if candidates[b].cost_per_1k_tokens <= candidate.cost_per_1k_tokens => {}
            _ => best = Some(index),
        }
    }
    best
}

/// Adaptive score of every candidate, in input order
///
/// `score = lw * (1 - latency / max_latency) + cw * (1 - cost / max_cost) + qw * quality`
/// where a zero maximum is treated as 1.
#[must_use]
pub fn adaptive_scores(candidates: &[Candidate], weights: AdaptiveWeights) -> Vec<f64> {
    let max_latency = non_zero(
        candidates
            .iter()
            .map(|c| c.avg_latency_ms)
            .fold(0.0, f64::max),
    );
    let max_cost = non_zero(
        candidates
            .iter()
            .map(|c| c.cost_per_1k_tokens)
            .fold(0.0, f64::max),
    );

    candidates
        .iter()
        .map(|c| {
            weights.latency * (1.0 - c.avg_latency_ms / max_latency)
                + weights.cost * (1.0 - c.cost_per_1k_tokens / max_cost)
                + weights.quality * c.quality_score
        })
        .collect()
}

/// Score-weighted draw among the best-scored third
///
/// Returns the best-scored candidate if the top third scores nothing.
pub fn adaptive<R: Rng + ?Sized>(
    candidates: &[Candidate],
    weights: AdaptiveWeights,
    rng: &mut R,
) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }

    let scores = adaptive_scores(candidates, weights);
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));

    let top = &order[..top_third(candidates.len())];
    let top_scores: Vec<f64> = top.iter().map(|&i| scores[i]).collect();
    let total: f64 = top_scores.iter().sum();
    if total <= 0.0 {
        return Some(top[0]);
    }

    weighted_random(&top_scores, rng).map(|pick| top[pick])
}

fn top_third(len: usize) -> usize {
    (len / 3).max(1)
}

fn non_zero(value: f64) -> f64 {
    if value == 0.0 {
        1.0
    } else {
        value
    }
}
