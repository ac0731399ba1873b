use serde::{Deserialize, Serialize};

/// Lower / upper quantiles of the empirical 95% interval.
pub const CI_LOW_Q: f64 = 0.025;
pub const CI_HIGH_Q: f64 = 0.975;

/// Cross-draw summary of one quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub n: usize,
    pub mean: f64,
    /// Sample standard deviation (n − 1). Zero when n < 2.
    pub sd: f64,
    pub min: f64,
    pub max: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

/// Mean and sample standard deviation only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanSd {
    pub mean: f64,
    pub sd: f64,
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation around `mean`; zero for fewer than two values.
pub fn sample_sd(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Linear-interpolated quantile of an ascending slice, q ∈ [0, 1].
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = pos - lo as f64;
            sorted[lo] + frac * (sorted[hi] - sorted[lo])
        }
    }
}

impl MeanSd {
    pub fn from_values(values: &[f64]) -> Self {
        let m = mean(values);
        Self { mean: m, sd: sample_sd(values, m) }
    }
}

impl Summary {
    /// Summarise one value per draw. An empty input gives an all-zero summary.
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self { n: 0, mean: 0.0, sd: 0.0, min: 0.0, max: 0.0, ci_low: 0.0, ci_high: 0.0 };
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let m = mean(values);
        Self {
            n: values.len(),
            mean: m,
            sd: sample_sd(values, m),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            ci_low: quantile_sorted(&sorted, CI_LOW_Q),
            ci_high: quantile_sorted(&sorted, CI_HIGH_Q),
        }
    }
}
