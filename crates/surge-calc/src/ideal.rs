//! Weighted aggregation and the ideal-range fold.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::criteria::EndpointCriteria;

/// Sentinel for "no upper limit on the instance count".
pub const UNBOUNDED: u32 = u32::MAX;

/// The metric name that constrains the instance count directly.
const INSTANCES_METRIC: &str = "instances";

/// Calculator errors.
///
/// Only the reserved `"instances"` clause can fail: it bypasses the
/// load division, so a clause that names it but cannot be parsed leaves
/// the endpoint with no usable count constraint at all.
#[derive(Debug, Error)]
pub enum CalcError {
    #[error("unparseable instance-count rule: {0:?}")]
    InvalidInstancesRule(String),
}

/// Compute per-metric weighted averages across instance samples.
///
/// Each sample map carries `metric_name -> sample` where a well-formed
/// sample is a `[weight, value]` pair. A bare number is taken with
/// weight 1.0, a malformed weight falls back to 1.0, and a value that
/// cannot be read as a number drops the entry. Metric feeds are lossy
/// by nature, so nothing here is an error.
pub fn aggregate(samples: &[HashMap<String, Value>]) -> HashMap<String, f64> {
    let mut totals: HashMap<String, f64> = HashMap::new();
    let mut weights: HashMap<String, f64> = HashMap::new();

    for sample in samples {
        for (key, raw) in sample {
            let Some((weight, value)) = coerce_sample(raw) else {
                continue;
            };
            *totals.entry(key.clone()).or_insert(0.0) += weight * value;
            *weights.entry(key.clone()).or_insert(0.0) += weight;
        }
    }

    for (key, total) in totals.iter_mut() {
        let weight = weights.get(key).copied().unwrap_or(0.0);
        *total = if weight != 0.0 { *total / weight } else { 0.0 };
    }
    totals
}

/// Read a sample as `(weight, value)`.
fn coerce_sample(raw: &Value) -> Option<(f64, f64)> {
    match raw {
        Value::Array(parts) if parts.len() == 2 => {
            let value = coerce_number(&parts[1])?;
            let weight = coerce_number(&parts[0]).unwrap_or(1.0);
            Some((weight, value))
        }
        other => coerce_number(other).map(|value| (1.0, value)),
    }
}

fn coerce_number(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Number of instances needed to spread `total` load so each carries at
/// most `bound`.
///
/// When the division is exact, the caller says whether the boundary
/// itself counts as just-over (`round_up`, from a strict upper
/// comparison) or just-under (`round_down`, from a strict lower
/// comparison). A bound of zero or less means no limit.
pub fn instances_for_bound(total: f64, bound: f64, round_up: bool, round_down: bool) -> u32 {
    debug_assert!(!(round_up && round_down));

    if bound <= 0.0 {
        return UNBOUNDED;
    }

    let mut total = total;
    if total % bound == 0.0 {
        if round_up {
            total += 1.0;
        }
        if round_down {
            total -= 1.0;
        }
    }

    // Saturating float-to-int cast; the ceil of a negative adjusted
    // total clamps to zero.
    (total / bound).ceil().max(0.0) as u32
}

/// Instance-count range satisfying one load criterion.
///
/// Note the cross: the upper load bound yields the *minimum* instance
/// count (fewer instances would push each over the bound) and the lower
/// load bound yields the maximum.
pub fn range_for_criterion(
    total: f64,
    lower: Option<f64>,
    upper: Option<f64>,
    lower_inclusive: bool,
    upper_inclusive: bool,
) -> (u32, u32) {
    match (lower, upper) {
        (None, None) => (0, UNBOUNDED),
        (None, Some(upper)) => (
            instances_for_bound(total, upper, !upper_inclusive, false),
            UNBOUNDED,
        ),
        (Some(lower), None) => (
            0,
            instances_for_bound(total, lower, false, !lower_inclusive),
        ),
        (Some(lower), Some(upper)) => (
            instances_for_bound(total, upper, !upper_inclusive, false),
            instances_for_bound(total, lower, false, !lower_inclusive),
        ),
    }
}

/// Fold a scaling policy into the ideal instance-count range.
///
/// Clauses intersect; a disjoint intersection collapses to the running
/// bound nearest the new range, so the fold always produces a range
/// with `min <= max`. Returns `None` when no clause contributed (empty
/// or fully inert policy).
pub fn ideal_range(
    rules: &[String],
    averages: &HashMap<String, f64>,
    instance_count: u32,
) -> Result<Option<(u32, u32)>, CalcError> {
    debug!(?averages, instance_count, "computing ideal range");

    let mut ideal: Option<(u32, u32)> = None;
    for rule in rules {
        if rule.is_empty() {
            continue;
        }
        let c = EndpointCriteria::parse(rule);

        let Some(name) = c.metric_name.as_deref() else {
            if rule.contains(INSTANCES_METRIC) {
                return Err(CalcError::InvalidInstancesRule(rule.clone()));
            }
            // Bad clauses for ordinary metrics are inert.
            continue;
        };

        let range = if name == INSTANCES_METRIC {
            instances_clause_range(&c)
        } else {
            let avg = averages.get(name).copied().unwrap_or(0.0);
            range_for_criterion(
                avg * f64::from(instance_count),
                c.lower_bound,
                c.upper_bound,
                c.lower_inclusive,
                c.upper_inclusive,
            )
        };
        debug!(clause = %c, range.min = range.0, range.max = range.1, "clause range");

        ideal = Some(match ideal {
            None => range,
            Some((run_min, run_max)) => {
                let new_min = run_min.max(range.0);
                let new_max = run_max.min(range.1);
                if new_min <= new_max {
                    (new_min, new_max)
                } else if range.1 < run_min {
                    // New range lies entirely below the running one.
                    (run_min, run_min)
                } else {
                    // Entirely above.
                    (run_max, run_max)
                }
            }
        });
    }

    Ok(ideal)
}

/// Direct count constraint from an `"instances"` clause: integer
/// bounds, nudged by one when the comparison was strict.
fn instances_clause_range(c: &EndpointCriteria) -> (u32, u32) {
    let min = match c.lower_bound {
        Some(v) => (v as u32) + u32::from(!c.lower_inclusive),
        None => 0,
    };
    let max = match c.upper_bound {
        Some(v) => (v as u32).saturating_sub(u32::from(!c.upper_inclusive)),
        None => UNBOUNDED,
    };
    (min, max)
}

/// Intersect the ideal range with the configured floor and ceiling.
///
/// When the ideal falls entirely outside the configured band, the
/// result collapses to whichever configured bound is nearest.
pub fn clamp_to_config(ideal: (u32, u32), config_min: u32, config_max: u32) -> (u32, u32) {
    let target_min = ideal.0.max(config_min);
    let target_max = ideal.1.min(config_max);

    if target_min <= target_max {
        (target_min, target_max)
    } else if ideal.0 > config_max {
        (config_max, config_max)
    } else {
        (config_min, config_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn aggregate_single_sample_ignores_weight_magnitude() {
        for weight in [0.5, 1.0, 7.0] {
            let avgs = aggregate(&[sample(&[("rate", json!([weight, 3.0]))])]);
            assert_eq!(avgs["rate"], 3.0);
        }
    }

    #[test]
    fn aggregate_empty_is_empty() {
        assert!(aggregate(&[]).is_empty());
    }

    #[test]
    fn aggregate_weights_values() {
        let avgs = aggregate(&[
            sample(&[("rate", json!([1.0, 10.0]))]),
            sample(&[("rate", json!([3.0, 20.0]))]),
        ]);
        // (10 + 60) / 4
        assert_eq!(avgs["rate"], 17.5);
    }

    #[test]
    fn aggregate_zero_total_weight_averages_to_zero() {
        let avgs = aggregate(&[sample(&[("rate", json!([0.0, 42.0]))])]);
        assert_eq!(avgs["rate"], 0.0);
    }

    #[test]
    fn aggregate_bare_number_takes_weight_one() {
        let avgs = aggregate(&[
            sample(&[("rate", json!(10.0))]),
            sample(&[("rate", json!([1.0, 20.0]))]),
        ]);
        assert_eq!(avgs["rate"], 15.0);
    }

    #[test]
    fn aggregate_skips_malformed_values() {
        let avgs = aggregate(&[
            sample(&[("rate", json!({"not": "a number"}))]),
            sample(&[("rate", json!([1.0, "bogus"]))]),
            sample(&[("rate", json!("12.5"))]),
        ]);
        // Only the numeric string survives.
        assert_eq!(avgs["rate"], 12.5);
    }

    #[test]
    fn aggregate_malformed_weight_defaults_to_one() {
        let avgs = aggregate(&[
            sample(&[("rate", json!(["heavy", 10.0]))]),
            sample(&[("rate", json!([3.0, 2.0]))]),
        ]);
        // (10 + 6) / 4
        assert_eq!(avgs["rate"], 4.0);
    }

    #[test]
    fn instances_for_bound_basic() {
        assert_eq!(instances_for_bound(10.0, 3.0, false, false), 4);
        assert_eq!(instances_for_bound(9.0, 3.0, false, false), 3);
    }

    #[test]
    fn instances_for_bound_exact_division_bumps() {
        assert_eq!(instances_for_bound(10.0, 2.0, false, false), 5);
        assert_eq!(instances_for_bound(10.0, 2.0, true, false), 6);
        assert_eq!(instances_for_bound(10.0, 2.0, false, true), 5);
    }

    #[test]
    fn instances_for_bound_zero_bound_is_unbounded() {
        assert_eq!(instances_for_bound(100.0, 0.0, false, false), UNBOUNDED);
        assert_eq!(instances_for_bound(100.0, -1.0, false, false), UNBOUNDED);
    }

    #[test]
    fn instances_for_bound_never_negative() {
        // total 0, exact, round down -> adjusted total -1.
        assert_eq!(instances_for_bound(0.0, 5.0, false, true), 0);
    }

    #[test]
    fn range_for_criterion_shapes() {
        assert_eq!(range_for_criterion(15.0, None, None, false, false), (0, UNBOUNDED));
        assert_eq!(
            range_for_criterion(15.0, None, Some(2.0), true, true),
            (8, UNBOUNDED)
        );
        assert_eq!(range_for_criterion(15.0, Some(1.0), None, true, true), (0, 15));
        assert_eq!(
            range_for_criterion(15.0, Some(1.0), Some(2.0), true, true),
            (8, 15)
        );
    }

    #[test]
    fn ideal_range_matches_single_criterion() {
        let rules = vec!["1<=rate<=2".to_string()];
        let mut averages = HashMap::new();
        averages.insert("rate".to_string(), 1.5);

        let ideal = ideal_range(&rules, &averages, 10).unwrap();
        assert_eq!(ideal, Some(range_for_criterion(15.0, Some(1.0), Some(2.0), true, true)));
    }

    #[test]
    fn ideal_range_empty_policy_is_none() {
        assert_eq!(ideal_range(&[], &HashMap::new(), 5).unwrap(), None);
        assert_eq!(
            ideal_range(&["".to_string()], &HashMap::new(), 5).unwrap(),
            None
        );
    }

    #[test]
    fn ideal_range_intersects_clauses() {
        let rules = vec!["1<=rate<=2".to_string(), "instances<=10".to_string()];
        let mut averages = HashMap::new();
        averages.insert("rate".to_string(), 1.5);

        // rate clause -> (8, 15); instances clause -> (0, 10).
        assert_eq!(ideal_range(&rules, &averages, 10).unwrap(), Some((8, 10)));
    }

    #[test]
    fn ideal_range_disjoint_collapses_to_nearest_bound() {
        // First clause pins (3, 5); second demands at least 20.
        let rules = vec!["3<=instances<=5".to_string(), "20<=instances".to_string()];
        let ideal = ideal_range(&rules, &HashMap::new(), 4).unwrap().unwrap();
        assert_eq!(ideal, (5, 5));
        assert!(ideal.0 <= ideal.1);

        // Second clause entirely below the running range.
        let rules = vec!["3<=instances<=5".to_string(), "instances<=1".to_string()];
        let ideal = ideal_range(&rules, &HashMap::new(), 4).unwrap().unwrap();
        assert_eq!(ideal, (3, 3));
    }

    #[test]
    fn ideal_range_instances_clause_exclusivity() {
        let rules = vec!["2<instances<6".to_string()];
        assert_eq!(ideal_range(&rules, &HashMap::new(), 0).unwrap(), Some((3, 5)));
    }

    #[test]
    fn ideal_range_unknown_metric_counts_as_zero_average() {
        let rules = vec!["ghost<=4".to_string()];
        // Average 0 -> total 0 -> 0 instances needed.
        assert_eq!(
            ideal_range(&rules, &HashMap::new(), 3).unwrap(),
            Some((0, UNBOUNDED))
        );
    }

    #[test]
    fn ideal_range_bad_instances_rule_is_an_error() {
        let rules = vec!["instances == 4".to_string()];
        assert!(matches!(
            ideal_range(&rules, &HashMap::new(), 1),
            Err(CalcError::InvalidInstancesRule(_))
        ));
    }

    #[test]
    fn ideal_range_bad_metric_rule_is_inert() {
        let rules = vec!["rate == 4".to_string(), "instances<=3".to_string()];
        assert_eq!(ideal_range(&rules, &HashMap::new(), 1).unwrap(), Some((0, 3)));
    }

    #[test]
    fn clamp_to_config_intersects() {
        assert_eq!(clamp_to_config((2, 8), 1, 10), (2, 8));
        assert_eq!(clamp_to_config((2, 8), 4, 6), (4, 6));
    }

    #[test]
    fn clamp_to_config_collapses_to_nearest_bound() {
        // Ideal entirely above the configured band.
        assert_eq!(clamp_to_config((12, 20), 1, 10), (10, 10));
        // Ideal entirely below.
        assert_eq!(clamp_to_config((0, 0), 2, 10), (2, 2));
    }
}
