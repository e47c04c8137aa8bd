//! Descriptive statistics over sparse channel series.
//!
//! Series are `&[Option<f64>]`; `None` and non-finite values are skipped by
//! every reducer so a single bad cell never poisons an aggregate.

/// Present, finite values in sample order.
pub fn finite(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().flatten().copied().filter(|v| v.is_finite()).collect()
}

/// Arithmetic mean, accumulated as offsets from the first sample so a
/// constant series averages to exactly its value.
pub fn mean(values: &[f64]) -> Option<f64> {
    let shift = *values.first()?;
    let offset = values.iter().map(|v| v - shift).sum::<f64>() / values.len() as f64;
    Some(shift + offset)
}

/// Population standard deviation (divisor `n`).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.max(0.0).sqrt())
}

/// Sample standard deviation (divisor `n - 1`).
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.max(0.0).sqrt())
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

/// Percentage of samples that are missing or non-finite.
pub fn null_pct(values: &[Option<f64>]) -> f64 {
    if values.is_empty() {
        return 100.0;
    }
    let missing = values
        .iter()
        .filter(|v| !matches!(v, Some(x) if x.is_finite()))
        .count();
    missing as f64 / values.len() as f64 * 100.0
}

/// Percentage of consecutive transitions between non-null values that repeat
/// the previous value exactly.
pub fn flatline_pct(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let repeats = values.windows(2).filter(|w| w[0] == w[1]).count();
    repeats as f64 / (values.len() - 1) as f64 * 100.0
}

/// Sample-to-sample difference; `None` at index 0 or next to a gap.
pub fn diff(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let d = match (i.checked_sub(1).and_then(|p| values[p]), values[i]) {
            (Some(prev), Some(cur)) => Some(cur - prev).filter(|d| d.is_finite()),
            _ => None,
        };
        out.push(d);
    }
    out
}

/// Trailing-window sample standard deviation. A window containing a gap
/// yields `None`, as does any index before the first full window.
pub fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    if window < 2 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            if slice.iter().any(|v| v.is_none()) {
                return None;
            }
            let dense: Vec<f64> = slice.iter().flatten().copied().collect();
            sample_std_dev(&dense)
        })
        .collect()
}

/// Pearson product-moment correlation over index-aligned pairs where both
/// sides are present. `None` with fewer than three pairs or zero variance.
pub fn pearson(x: &[Option<f64>], y: &[Option<f64>]) -> Option<(f64, usize)> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = x
        .iter()
        .zip(y.iter())
        .filter_map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) if a.is_finite() && b.is_finite() => Some((*a, *b)),
            _ => None,
        })
        .unzip();
    let n = xs.len();
    if n < 3 {
        return None;
    }
    let mx = mean(&xs)?;
    let my = mean(&ys)?;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (a, b) in xs.iter().zip(ys.iter()) {
        cov += (a - mx) * (b - my);
        vx += (a - mx).powi(2);
        vy += (b - my).powi(2);
    }
    if vx < 1e-300 || vy < 1e-300 {
        return None;
    }
    let r = (cov / (vx.sqrt() * vy.sqrt())).clamp(-1.0, 1.0);
    Some((r, n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(v: &[f64]) -> Vec<Option<f64>> {
        v.iter().map(|x| Some(*x)).collect()
    }

    #[test]
    fn test_population_std() {
        let mut v = vec![10.0; 9];
        v.push(1000.0);
        assert_eq!(mean(&v), Some(109.0));
        assert_eq!(std_dev(&v), Some(297.0));
    }

    #[test]
    fn test_constant_mean_is_exact() {
        for n in 1..40 {
            assert_eq!(mean(&vec![0.88; n]), Some(0.88));
        }
    }

    #[test]
    fn test_null_pct_counts_missing() {
        let v = vec![Some(1.0), None, Some(f64::NAN), Some(2.0)];
        assert_eq!(null_pct(&v), 50.0);
        assert_eq!(finite(&v), vec![1.0, 2.0]);
        assert_eq!(null_pct(&[]), 100.0);
    }

    #[test]
    fn test_flatline_pct() {
        assert_eq!(flatline_pct(&[1.0, 1.0, 1.0, 2.0, 3.0]), 50.0);
        assert_eq!(flatline_pct(&[1.0]), 0.0);
    }

    #[test]
    fn test_diff_respects_gaps() {
        let d = diff(&[Some(1.0), Some(3.0), None, Some(4.0), Some(2.0)]);
        assert_eq!(d, vec![None, Some(2.0), None, None, Some(-2.0)]);
    }

    #[test]
    fn test_rolling_std_window() {
        let r = rolling_std(&dense(&[1.0, 1.0, 1.0, 4.0]), 3);
        assert_eq!(r[0], None);
        assert_eq!(r[1], None);
        assert_eq!(r[2], Some(0.0));
        assert!((r[3].unwrap() - 3.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_pearson_perfect_and_degenerate() {
        let x = dense(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let y = dense(&[2.0, 4.0, 6.0, 8.0, 10.0]);
        let (r, n) = pearson(&x, &y).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
        assert_eq!(n, 5);

        let flat = dense(&[3.0; 5]);
        assert!(pearson(&x, &flat).is_none());
    }

    #[test]
    fn test_pearson_skips_unpaired_samples() {
        let x = vec![Some(1.0), None, Some(2.0), Some(3.0), Some(4.0)];
        let y = vec![Some(4.0), Some(100.0), Some(3.0), Some(2.0), Some(1.0)];
        let (r, n) = pearson(&x, &y).unwrap();
        assert_eq!(n, 4);
        assert!((r + 1.0).abs() < 1e-12);
    }
}
