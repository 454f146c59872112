use std::collections::HashMap;

/// Upper bound for any period, lookback or bin-count parameter.
pub const MAX_WINDOW_PARAM: usize = 100_000;

/// Extract a finite parameter as f64 with a default value
pub fn get_param_f64(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

/// Extract a parameter as f64, clamped to a range with finite checks
pub fn get_param_f64_clamped(
    params: &HashMap<String, f64>,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> f64 {
    let raw = params.get(key).copied().unwrap_or(default);
    if !raw.is_finite() {
        return default;
    }
    raw.clamp(min, max)
}

/// Extract a parameter as usize, rounded, within `min..=MAX_WINDOW_PARAM`
pub fn get_param_usize_at_least(
    params: &HashMap<String, f64>,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    let raw = params.get(key).copied().unwrap_or(default as f64);
    let upper = MAX_WINDOW_PARAM.max(min);
    if !raw.is_finite() {
        return default.clamp(min, upper);
    }
    raw.round().clamp(min as f64, upper as f64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn missing_or_non_finite_values_fall_back_to_default() {
        let p = params(&[("rsiPeriod", f64::NAN)]);
        assert_eq!(get_param_f64(&p, "rsiPeriod", 14.0), 14.0);
        assert_eq!(get_param_f64(&p, "other", 3.0), 3.0);
        assert_eq!(get_param_f64_clamped(&p, "rsiPeriod", 14.0, 2.0, 50.0), 14.0);
        assert_eq!(get_param_usize_at_least(&p, "rsiPeriod", 14, 2), 14);
    }

    #[test]
    fn values_are_clamped_and_rounded() {
        let p = params(&[("ratio", 9.0), ("period", 4.6), ("tiny", 0.2)]);
        assert_eq!(get_param_f64_clamped(&p, "ratio", 1.0, 0.0, 5.0), 5.0);
        assert_eq!(get_param_usize_at_least(&p, "period", 14, 2), 5);
        assert_eq!(get_param_usize_at_least(&p, "tiny", 14, 2), 2);
    }

    #[test]
    fn huge_windows_are_capped() {
        let p = params(&[("volumeLookback", 1e30), ("rsiPeriod", f64::INFINITY)]);
        assert_eq!(
            get_param_usize_at_least(&p, "volumeLookback", 20, 1),
            MAX_WINDOW_PARAM
        );
        assert_eq!(get_param_usize_at_least(&p, "rsiPeriod", 14, 2), 14);
    }
}
