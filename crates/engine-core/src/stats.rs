//! Numeric helpers every scoring stage leans on. All synchronous and
//! side-effect free; domain formulas live in the stage crates.

/// Period-over-period fractional changes of a price series.
/// Steps off a non-positive base are dropped.
pub fn simple_returns(series: &[f64]) -> Vec<f64> {
    series
        .iter()
        .zip(series.iter().skip(1))
        .filter(|(base, _)| **base > 0.0)
        .map(|(base, next)| next / base - 1.0)
        .collect()
}

/// Mean of a data slice; 0.0 for empty input.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Sample standard deviation (n − 1 denominator).
pub fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    let variance = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64;
    variance.sqrt()
}

/// Standard deviation of the negative side only, against zero.
pub fn downside_std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let downside: Vec<f64> = data.iter().filter(|&&r| r < 0.0).map(|r| r * r).collect();
    if downside.is_empty() {
        return 0.0;
    }
    (downside.iter().sum::<f64>() / (data.len() - 1) as f64).sqrt()
}

/// Pearson correlation of two equal-length series.
/// Returns 0.0 when either side has no variance.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 3 {
        return 0.0;
    }
    let x_mean = mean(&x[..n]);
    let y_mean = mean(&y[..n]);

    let mut ss_xy = 0.0;
    let mut ss_xx = 0.0;
    let mut ss_yy = 0.0;
    for i in 0..n {
        let dx = x[i] - x_mean;
        let dy = y[i] - y_mean;
        ss_xy += dx * dy;
        ss_xx += dx * dx;
        ss_yy += dy * dy;
    }

    if ss_xx < 1e-15 || ss_yy < 1e-15 {
        return 0.0;
    }
    ss_xy / (ss_xx * ss_yy).sqrt()
}

/// Percentile rank of `value` within `data` (0.0 to 1.0).
/// Midpoint interpolation: ties count as half.
pub fn percentile_rank(value: f64, data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.5;
    }
    let count_below = data.iter().filter(|&&x| x < value).count();
    let count_equal = data
        .iter()
        .filter(|&&x| (x - value).abs() < f64::EPSILON)
        .count();
    (count_below as f64 + 0.5 * count_equal as f64) / data.len() as f64
}

/// Deepest peak-to-trough decline in an equity curve, as a positive
/// fraction of the peak reached before it.
pub fn max_drawdown(curve: &[f64]) -> f64 {
    let mut high_water = f64::MIN;
    let mut worst = 0.0_f64;
    for &point in curve {
        high_water = high_water.max(point);
        if high_water > 0.0 {
            worst = worst.max((high_water - point) / high_water);
        }
    }
    worst
}

/// Clamp to [0, 1].
pub fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Return val if it is finite, otherwise the default.
#[inline]
pub fn finite_or(val: f64, default: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        default
    }
}
