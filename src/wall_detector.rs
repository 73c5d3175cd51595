// =============================================================================
// Wall Detector (C2) — pure large-order detection over one book side
// =============================================================================
//
// No I/O, no shared state, no async: this is a plain function callable from
// any thread (or from a test) without a runtime. Both the primary scanner
// (C3) and the general scanner (C4) call this over a side they have already
// fetched.
// =============================================================================

use chrono::Utc;
use rust_decimal::Decimal;

use crate::types::{BookSide, Side, WallCandidate};

/// Minimum number of resting entries required on a side before the
/// detector will trust an average-size baseline computed from it. Fewer
/// than this and the side is skipped entirely.
pub const MIN_ENTRIES_FOR_BASELINE: usize = 10;

/// Psychologically round reference levels, expanded across decades by the
/// multipliers in [`ROUND_MULTIPLIERS`].
const ROUND_BASES: [f64; 11] = [
    0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0,
];
const ROUND_MULTIPLIERS: [f64; 7] = [0.001, 0.01, 0.1, 1.0, 10.0, 100.0, 1000.0];

/// Relative distance (fraction of the level) within which a price counts
/// as "near" a round level.
const ROUND_LEVEL_TOLERANCE: f64 = 0.001;

/// Relative distance from `price` to the nearest base-times-multiplier
/// round level, as a fraction of that level. `f64::INFINITY` for `price <= 0`.
pub fn nearest_round_level_distance(price: f64) -> f64 {
    if price <= 0.0 {
        return f64::INFINITY;
    }
    let mut min_distance = f64::INFINITY;
    for base in ROUND_BASES {
        for multiplier in ROUND_MULTIPLIERS {
            let level = base * multiplier;
            if level > 0.0 {
                let distance = (price - level).abs() / level;
                if distance < min_distance {
                    min_distance = distance;
                }
            }
        }
    }
    min_distance
}

/// Whether `price` sits within [`ROUND_LEVEL_TOLERANCE`] of any
/// base-times-multiplier round level.
pub fn is_near_round_level(price: f64) -> bool {
    nearest_round_level_distance(price) <= ROUND_LEVEL_TOLERANCE
}

fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_string().parse().unwrap_or(0.0)
}

/// Scan one side of a book for entries whose notional value is at least
/// `large_order_multiplier` times the mean notional of the first
/// [`MIN_ENTRIES_FOR_BASELINE`] entries (the baseline window). Returns an
/// empty vector if the side has fewer than that many entries — there is no
/// reliable baseline to compare against.
pub fn find_walls_in_side(
    symbol: &str,
    side_kind: Side,
    side: &BookSide,
    reference_price: Decimal,
    large_order_multiplier: f64,
) -> Vec<WallCandidate> {
    if side.entries.len() < MIN_ENTRIES_FOR_BASELINE || reference_price.is_zero() {
        return Vec::new();
    }

    let baseline_window = &side.entries[..MIN_ENTRIES_FOR_BASELINE];
    let total_notional: Decimal = baseline_window.iter().map(|e| e.notional()).sum();
    let average_notional = total_notional / Decimal::from(MIN_ENTRIES_FOR_BASELINE as u64);

    if average_notional.is_zero() {
        return Vec::new();
    }

    let multiplier = Decimal::try_from(large_order_multiplier).unwrap_or_default();
    let large_threshold = average_notional * multiplier;
    let now = Utc::now();
    let reference_f64 = decimal_to_f64(reference_price);

    let mut candidates = Vec::new();
    for entry in &side.entries {
        let notional = entry.notional();
        if notional < large_threshold {
            continue;
        }

        let price_f64 = decimal_to_f64(entry.price);
        let distance_percent = if reference_f64 > 0.0 {
            (price_f64 - reference_f64).abs() / reference_f64 * 100.0
        } else {
            0.0
        };
        let size_vs_average = decimal_to_f64(notional) / decimal_to_f64(average_notional);

        candidates.push(WallCandidate {
            symbol: symbol.to_string(),
            side: side_kind,
            price: entry.price,
            quantity: entry.quantity,
            notional,
            reference_price,
            distance_percent,
            size_vs_average,
            average_order_size: average_notional,
            is_round_level: is_near_round_level(price_f64),
            observed_at: now,
        });
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BookEntry;
    use rust_decimal_macros::dec;

    fn side_with(entries: &[(Decimal, Decimal)]) -> BookSide {
        BookSide {
            entries: entries.iter().map(|(p, q)| BookEntry::new(*p, *q)).collect(),
        }
    }

    #[test]
    fn too_few_entries_yields_no_candidates() {
        let side = side_with(&[(dec!(100), dec!(1)); 5]);
        let found = find_walls_in_side("BTCUSDT", Side::Ask, &side, dec!(100), 5.0);
        assert!(found.is_empty());
    }

    #[test]
    fn detects_outsized_entry_above_threshold() {
        let mut entries = vec![(dec!(100), dec!(1)); 10];
        entries.push((dec!(101), dec!(50)));
        let side = side_with(&entries);
        let found = find_walls_in_side("BTCUSDT", Side::Ask, &side, dec!(100), 5.0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].quantity, dec!(50));
        assert!(found[0].size_vs_average > 5.0);
    }

    #[test]
    fn round_level_detection_matches_known_levels() {
        assert!(is_near_round_level(50000.0));
        assert!(is_near_round_level(100.0));
        assert!(is_near_round_level(0.5));
        assert!(!is_near_round_level(50483.27));
    }

    #[test]
    fn zero_reference_price_is_skipped() {
        let entries = vec![(dec!(100), dec!(1)); 10];
        let side = side_with(&entries);
        let found = find_walls_in_side("BTCUSDT", Side::Ask, &side, dec!(0), 5.0);
        assert!(found.is_empty());
    }
}
