//! Median and deviation helpers used for quorum selection and reference checks

/// Median of the given values; mean of the two middle values for even length.
/// Returns `None` for an empty slice.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Absolute deviation of `deviated` from `base`, in percent of `base`
pub fn deviation_percent(base: f64, deviated: f64) -> f64 {
    let diff = (deviated - base).abs();
    if base == 0.0 {
        return if diff == 0.0 { 0.0 } else { f64::MAX };
    }
    diff / base.abs() * 100.0
}

/// Pick `count` items whose values are closest to the median of all values.
///
/// Items are ordered by absolute distance from the median; items at equal
/// distance keep their original (arrival) order.
pub fn pick_closest_to_median<T, F>(items: &[T], count: usize, value_of: F) -> Vec<T>
where
    T: Clone,
    F: Fn(&T) -> f64,
{
    let values: Vec<f64> = items.iter().map(&value_of).collect();
    let Some(median_value) = median(&values) else {
        return Vec::new();
    };

    let mut indexed: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .map(|(idx, value)| (idx, (value - median_value).abs()))
        .collect();
    // sort_by is stable
    indexed.sort_by(|a, b| a.1.total_cmp(&b.1));

    indexed
        .into_iter()
        .take(count)
        .map(|(idx, _)| items[idx].clone())
        .collect()
}
