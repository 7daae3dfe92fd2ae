//! NaN-aware numeric helpers shared by the cleaner, the feature engineer
//! and the report writer. All of them skip NaN entries, mirroring how the
//! plant exports treat missing cells.

/// Mean over non-NaN values; NaN when nothing is present.
pub fn nan_mean(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for &v in values {
        if !v.is_nan() {
            sum += v;
            n += 1;
        }
    }
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Sample standard deviation (ddof = 1) over non-NaN values.
/// Fewer than two observations yield NaN.
pub fn nan_std(values: &[f64]) -> f64 {
    let mean = nan_mean(values);
    if mean.is_nan() {
        return f64::NAN;
    }
    let mut sum_sq = 0.0;
    let mut n = 0usize;
    for &v in values {
        if !v.is_nan() {
            let d = v - mean;
            sum_sq += d * d;
            n += 1;
        }
    }
    if n < 2 {
        f64::NAN
    } else {
        (sum_sq / (n - 1) as f64).sqrt()
    }
}

pub fn nan_min(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f64::NAN, |acc, v| if acc.is_nan() || v < acc { v } else { acc })
}

pub fn nan_max(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f64::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc })
}

/// Linear-interpolated quantile over non-NaN values, q in [0, 1].
/// Matches the interpolation the original quantile bounds were computed with.
pub fn nan_quantile(values: &[f64], q: f64) -> f64 {
    let mut kept: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if kept.is_empty() {
        return f64::NAN;
    }
    kept.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = kept.len();
    if n == 1 {
        return kept[0];
    }
    let h = (n - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    if lo == hi {
        kept[lo]
    } else {
        kept[lo] + (h - lo as f64) * (kept[hi] - kept[lo])
    }
}

/// Pearson correlation with pairwise NaN exclusion. NaN when fewer than two
/// complete pairs exist or either side has zero variance.
pub fn nan_pearson(x: &[f64], y: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y.iter())
        .filter(|(a, b)| !a.is_nan() && !b.is_nan())
        .map(|(a, b)| (*a, *b))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|(a, _)| a).sum::<f64>() / n;
    let my = pairs.iter().map(|(_, b)| b).sum::<f64>() / n;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in &pairs {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let denom = (sxx * syy).sqrt();
    if denom == 0.0 {
        f64::NAN
    } else {
        sxy / denom
    }
}
