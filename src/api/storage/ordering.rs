//! Fractional `display_order` helpers.

/// Gap used when appending past the last sibling.
pub const ORDER_STEP: f64 = 1.0;

/// Position for a row placed between `prev` and `next`.
pub fn between(prev: Option<f64>, next: Option<f64>) -> f64 {
    match (prev, next) {
        (Some(p), Some(n)) => p + (n - p) / 2.0,
        (Some(p), None) => p + ORDER_STEP,
        (None, Some(n)) => n - ORDER_STEP,
        (None, None) => ORDER_STEP,
    }
}

/// Position past the end of `existing`.
pub fn after_last<I: IntoIterator<Item = f64>>(existing: I) -> f64 {
    existing
        .into_iter()
        .fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))))
        .map_or(ORDER_STEP, |m| m + ORDER_STEP)
}

/// Sort key that keeps insertion order (by id) for equal positions.
pub fn cmp_order<K: Ord>(a: (f64, K), b: (f64, K)) -> std::cmp::Ordering {
    a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1))
}
