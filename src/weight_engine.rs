// =============================================================================
// Weight Engine (C7) — pure order + market context -> weights/categories
// =============================================================================
//
// No I/O, no shared state. Called by the hot pool (C6) on every
// re-evaluation and, for the report-only adaptive-category distribution, by
// the primary scanner (C3).
// =============================================================================

use chrono::{Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::types::{categorize, AlgorithmScore, Category, GrowthTrend, MarketTemperature, WeightScores};
use crate::wall_detector::nearest_round_level_distance;

/// θ in the spec: relative distance within which a price counts as "near" a
/// round level for the purposes of `round_level_factor`.
const ROUND_LEVEL_PROXIMITY_THRESHOLD: f64 = 0.001;

/// `scale` in the `adaptive_volatility` time factor.
const ADAPTIVE_VOLATILITY_SCALE: f64 = 10.0;

/// `M_max` in `size_factor`.
const MAX_SIZE_MULTIPLIER: f64 = 10.0;

/// `V_max` in `volatility_factor`.
const MAX_VOLATILITY: f64 = 0.1;

/// Everything the weight engine needs about one order, decoupled from
/// `HotOrder` so the function stays pure and independently testable.
#[derive(Debug, Clone)]
pub struct WeightInput {
    pub lifetime_seconds: f64,
    pub size_vs_average: f64,
    pub order_price: f64,
    pub scan_count: u32,
}

/// Coefficients `(alpha_T, alpha_S, alpha_R, alpha_V, alpha_G)` for one
/// named algorithm, summing to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlgorithmCoefficients {
    pub time: f64,
    pub size: f64,
    pub round_level: f64,
    pub volatility: f64,
    pub growth: f64,
}

/// Per-method weights for the blended time factor `T`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeFactorWeights {
    pub linear_1h: f64,
    pub linear_4h: f64,
    pub exp_30m: f64,
    pub exp_60m: f64,
    pub log: f64,
    pub sqrt_norm: f64,
    pub adaptive_volatility: f64,
    pub adaptive_market: f64,
}

/// All tunables the weight engine needs beyond the order/context inputs.
/// Lives in `AppConfig` in production; tests construct it directly.
#[derive(Debug, Clone, Copy)]
pub struct WeightEngineConfig {
    pub conservative: AlgorithmCoefficients,
    pub aggressive: AlgorithmCoefficients,
    pub volume_weighted: AlgorithmCoefficients,
    pub time_weighted: AlgorithmCoefficients,
    pub hybrid: AlgorithmCoefficients,
    pub time_factor_weights: TimeFactorWeights,
}

impl Default for WeightEngineConfig {
    fn default() -> Self {
        Self {
            conservative: AlgorithmCoefficients { time: 0.50, size: 0.15, round_level: 0.10, volatility: 0.15, growth: 0.10 },
            aggressive: AlgorithmCoefficients { time: 0.15, size: 0.45, round_level: 0.10, volatility: 0.20, growth: 0.10 },
            volume_weighted: AlgorithmCoefficients { time: 0.10, size: 0.55, round_level: 0.05, volatility: 0.20, growth: 0.10 },
            time_weighted: AlgorithmCoefficients { time: 0.60, size: 0.10, round_level: 0.05, volatility: 0.10, growth: 0.15 },
            hybrid: AlgorithmCoefficients { time: 0.30, size: 0.25, round_level: 0.15, volatility: 0.15, growth: 0.15 },
            time_factor_weights: TimeFactorWeights {
                linear_1h: 0.10,
                linear_4h: 0.05,
                exp_30m: 0.20,
                exp_60m: 0.20,
                log: 0.15,
                sqrt_norm: 0.10,
                adaptive_volatility: 0.10,
                adaptive_market: 0.10,
            },
        }
    }
}

fn clamp01(v: f64) -> f64 {
    v.max(0.0).min(1.0)
}

fn market_temperature_factor(temp: MarketTemperature) -> f64 {
    temp.time_factor_scale()
}

/// The eight named time factors in `[0, 1]`, given lifetime in minutes.
struct TimeFactors {
    linear_1h: f64,
    linear_4h: f64,
    exp_30m: f64,
    exp_60m: f64,
    log: f64,
    sqrt_norm: f64,
    adaptive_volatility: f64,
    adaptive_market: f64,
}

fn calculate_time_factors(lifetime_minutes: f64, volatility_1h: f64, temp: MarketTemperature) -> TimeFactors {
    let t = lifetime_minutes;
    TimeFactors {
        linear_1h: clamp01(t / 60.0),
        linear_4h: clamp01(t / 240.0),
        exp_30m: clamp01(1.0 - (-t / 30.0).exp()),
        exp_60m: clamp01(1.0 - (-t / 60.0).exp()),
        log: clamp01((1.0 + t).ln() / (1.0 + 240.0_f64).ln()),
        sqrt_norm: clamp01((t / 240.0).max(0.0).sqrt()),
        adaptive_volatility: clamp01(t / (60.0 * (1.0 + volatility_1h * ADAPTIVE_VOLATILITY_SCALE))),
        adaptive_market: clamp01(t / (60.0 * market_temperature_factor(temp))),
    }
}

fn blend_time_factor(factors: &TimeFactors, weights: &TimeFactorWeights) -> f64 {
    let weighted_sum = factors.linear_1h * weights.linear_1h
        + factors.linear_4h * weights.linear_4h
        + factors.exp_30m * weights.exp_30m
        + factors.exp_60m * weights.exp_60m
        + factors.log * weights.log
        + factors.sqrt_norm * weights.sqrt_norm
        + factors.adaptive_volatility * weights.adaptive_volatility
        + factors.adaptive_market * weights.adaptive_market;
    let total_weight = weights.linear_1h
        + weights.linear_4h
        + weights.exp_30m
        + weights.exp_60m
        + weights.log
        + weights.sqrt_norm
        + weights.adaptive_volatility
        + weights.adaptive_market;
    if total_weight > 0.0 {
        weighted_sum / total_weight
    } else {
        0.0
    }
}

fn round_level_factor(order_price: f64) -> f64 {
    let distance = nearest_round_level_distance(order_price);
    if distance <= ROUND_LEVEL_PROXIMITY_THRESHOLD {
        1.0 - distance / ROUND_LEVEL_PROXIMITY_THRESHOLD
    } else {
        0.0
    }
}

fn time_of_day_modifier(hour: u32) -> f64 {
    match hour {
        0..=7 => 0.8,
        8..=12 => 1.2,
        13..=20 => 1.5,
        21..=23 => 0.8,
        _ => 1.0,
    }
}

fn day_of_week_modifier(weekday: Weekday) -> f64 {
    match weekday {
        Weekday::Mon | Weekday::Tue | Weekday::Wed | Weekday::Thu => 1.1,
        Weekday::Fri => 1.3,
        Weekday::Sat | Weekday::Sun => 0.7,
    }
}

fn market_volatility_modifier(market_volatility: f64) -> f64 {
    if market_volatility < 0.01 {
        0.7
    } else if market_volatility < 0.03 {
        1.0
    } else if market_volatility < 0.06 {
        1.3
    } else {
        1.5
    }
}

fn algorithm_weight(
    coeffs: AlgorithmCoefficients,
    time_factor: f64,
    size_factor: f64,
    round_factor: f64,
    volatility_factor: f64,
    growth_factor: f64,
    modifier: f64,
) -> f64 {
    let base = coeffs.time * time_factor
        + coeffs.size * size_factor
        + coeffs.round_level * round_factor
        + coeffs.volatility * (1.0 - volatility_factor)
        + coeffs.growth * growth_factor;
    clamp01(base * modifier)
}

/// Full weight-engine output: the five algorithm scores plus growth trend
/// and stability, ready to attach to a `HotOrder`.
pub fn evaluate(
    input: &WeightInput,
    volatility_1h: f64,
    market_volatility: f64,
    market_temperature: MarketTemperature,
    config: &WeightEngineConfig,
) -> WeightScores {
    let now = Utc::now();
    let lifetime_minutes = input.lifetime_seconds / 60.0;

    let time_factors = calculate_time_factors(lifetime_minutes, volatility_1h, market_temperature);
    let time_factor = blend_time_factor(&time_factors, &config.time_factor_weights);

    let size_factor = clamp01(input.size_vs_average / MAX_SIZE_MULTIPLIER);
    let round_factor = round_level_factor(input.order_price);
    let volatility_factor = clamp01(volatility_1h / MAX_VOLATILITY);
    let growth_factor = clamp01(input.scan_count as f64 / 50.0);

    let modifier = (time_of_day_modifier(now.hour())
        * day_of_week_modifier(now.weekday())
        * market_volatility_modifier(market_volatility))
        / 3.0;

    let score = |coeffs: AlgorithmCoefficients| -> AlgorithmScore {
        let weight = algorithm_weight(coeffs, time_factor, size_factor, round_factor, volatility_factor, growth_factor, modifier);
        AlgorithmScore { weight, category: categorize(weight) }
    };

    WeightScores {
        conservative: score(config.conservative),
        aggressive: score(config.aggressive),
        volume_weighted: score(config.volume_weighted),
        time_weighted: score(config.time_weighted),
        hybrid: score(config.hybrid),
    }
}

/// Directional trend across the last three snapshot notionals: the mean of
/// those three against the first of the three. Fewer than three snapshots
/// can't form the comparison, so it's `Stable`.
pub fn growth_trend(last_three_notionals: &[f64]) -> GrowthTrend {
    if last_three_notionals.len() < 3 {
        return GrowthTrend::Stable;
    }
    let first = last_three_notionals[0];
    if first <= 0.0 {
        return GrowthTrend::Stable;
    }
    let mean = last_three_notionals.iter().sum::<f64>() / 3.0;
    let ratio = mean / first;
    if ratio > 1.05 {
        GrowthTrend::Inc
    } else if ratio < 0.95 {
        GrowthTrend::Dec
    } else {
        GrowthTrend::Stable
    }
}

/// Stability score: the coefficient of variation of the order's notional
/// history, inverted and floored at zero — a tightly clustered history is
/// "stable" (close to 1), a wildly varying one is not.
pub fn stability_score(history_notionals: &[f64]) -> f64 {
    if history_notionals.len() < 2 {
        return 0.0;
    }
    let mean = history_notionals.iter().sum::<f64>() / history_notionals.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = history_notionals
        .iter()
        .map(|n| (n - mean).powi(2))
        .sum::<f64>()
        / history_notionals.len() as f64;
    let stdev = variance.sqrt();
    (1.0 - stdev / mean).max(0.0)
}

/// Cutoff table an adaptive-category report resolved to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryCutoffs {
    pub gold_at: f64,
    pub diamond_at: f64,
    pub method: &'static str,
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}

/// Report-mode-only adaptive categorization: choose quartile, statistical,
/// or percentile cutoffs based on the distribution's shape. Fewer than 3
/// samples falls back to the fixed static table rather than attempting any
/// adaptive method. Returns `(cutoffs, per_notional_category)`.
pub fn adaptive_categorize(notionals: &[f64]) -> (CategoryCutoffs, Vec<Category>) {
    if notionals.len() < 3 {
        let cutoffs = CategoryCutoffs { gold_at: 5000.0, diamond_at: 15000.0, method: "static" };
        let categories = notionals.iter().map(|&n| static_category(n, &cutoffs)).collect();
        return (cutoffs, categories);
    }

    let mut sorted: Vec<f64> = notionals.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let q25 = percentile(&sorted, 0.25);
    let q50 = percentile(&sorted, 0.50);
    let q75 = percentile(&sorted, 0.75);
    let q90 = percentile(&sorted, 0.90);
    let iqr = q75 - q25;
    let range = sorted.last().unwrap() - sorted.first().unwrap();

    let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
    let median = q50;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / sorted.len() as f64;
    let stdev = variance.sqrt();

    let cutoffs = if iqr > 0.0 && range > 5.0 * iqr {
        CategoryCutoffs { gold_at: q75, diamond_at: q90, method: "percentile" }
    } else if mean > 0.0 && ((mean - median).abs() / mean) < 0.2 {
        CategoryCutoffs { gold_at: mean, diamond_at: mean + stdev, method: "statistical" }
    } else {
        CategoryCutoffs { gold_at: q50, diamond_at: q75, method: "quartile" }
    };

    let categories = notionals.iter().map(|&n| static_category(n, &cutoffs)).collect();
    (cutoffs, categories)
}

fn static_category(notional: f64, cutoffs: &CategoryCutoffs) -> Category {
    if notional < cutoffs.gold_at {
        Category::Basic
    } else if notional < cutoffs.diamond_at {
        Category::Gold
    } else {
        Category::Diamond
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_factors_clamp_to_unit_interval() {
        let factors = calculate_time_factors(10_000.0, 0.5, MarketTemperature::Extreme);
        assert!(factors.linear_1h <= 1.0);
        assert!(factors.exp_60m <= 1.0);
        assert!(factors.adaptive_market <= 1.0);
    }

    #[test]
    fn zero_lifetime_yields_zero_time_factors() {
        let factors = calculate_time_factors(0.0, 0.05, MarketTemperature::Warm);
        assert_eq!(factors.linear_1h, 0.0);
        assert_eq!(factors.exp_30m, 0.0);
    }

    #[test]
    fn round_level_factor_is_highest_exactly_on_level() {
        assert_eq!(round_level_factor(50000.0), 1.0);
        assert_eq!(round_level_factor(1.0), 1.0);
        assert_eq!(round_level_factor(50483.27), 0.0);
    }

    #[test]
    fn algorithms_rank_distinctly_for_a_long_lived_large_order() {
        let input = WeightInput {
            lifetime_seconds: 3600.0,
            size_vs_average: 8.0,
            order_price: 50000.0,
            scan_count: 40,
        };
        let scores = evaluate(&input, 0.02, 0.02, MarketTemperature::Warm, &WeightEngineConfig::default());
        assert!(scores.aggressive.weight > 0.0);
        assert!(scores.time_weighted.weight > 0.0);
        for score in [&scores.conservative, &scores.aggressive, &scores.volume_weighted, &scores.time_weighted, &scores.hybrid] {
            assert!(score.weight >= 0.0 && score.weight <= 1.0);
        }
    }

    #[test]
    fn growth_trend_compares_mean_of_last_three_to_first() {
        assert_eq!(growth_trend(&[100.0, 110.0, 120.0]), GrowthTrend::Inc);
        assert_eq!(growth_trend(&[100.0, 90.0, 80.0]), GrowthTrend::Dec);
        assert_eq!(growth_trend(&[100.0, 100.0, 102.0]), GrowthTrend::Stable);
        assert_eq!(growth_trend(&[100.0, 120.0]), GrowthTrend::Stable);
    }

    #[test]
    fn stability_score_is_inverted_coefficient_of_variation() {
        assert_eq!(stability_score(&[100.0, 100.0, 100.0]), 1.0);
        assert_eq!(stability_score(&[100.0]), 0.0);
        let score = stability_score(&[100.0, 200.0]);
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn fewer_than_three_samples_uses_static_table() {
        let (cutoffs, categories) = adaptive_categorize(&[1000.0, 20000.0]);
        assert_eq!(cutoffs, CategoryCutoffs { gold_at: 5000.0, diamond_at: 15000.0, method: "static" });
        assert_eq!(categories, vec![Category::Basic, Category::Diamond]);
    }

    #[test]
    fn fixed_categorize_distributes_six_weight_batch() {
        // Recommended-weight batch, not notionals — exercises `categorize`
        // directly rather than the adaptive (notional-based) method.
        let categories: Vec<Category> = [0.2, 0.3, 0.4, 0.5, 0.7, 0.8].iter().map(|&w| categorize(w)).collect();
        let basic = categories.iter().filter(|c| **c == Category::Basic).count();
        let gold = categories.iter().filter(|c| **c == Category::Gold).count();
        let diamond = categories.iter().filter(|c| **c == Category::Diamond).count();
        assert_eq!((basic, gold, diamond), (2, 2, 2));
    }

    #[test]
    fn adaptive_categorize_quartile_branch_on_skewed_notionals() {
        let (cutoffs, categories) = adaptive_categorize(&[100.0, 200.0, 300.0, 400.0, 50000.0]);
        assert!(categories.contains(&Category::Diamond));
        assert!(cutoffs.diamond_at > cutoffs.gold_at);
    }
}
