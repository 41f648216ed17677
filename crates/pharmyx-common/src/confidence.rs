//! Confidence scoring for fused drug-response predictions.
//!
//! The [floor, ceiling] range is split into one band per predictive omics
//! type. A prediction backed by `n` types always lands in band `n`; where it
//! falls inside the band is decided by how well the contributing models agree.

/// Inputs to the confidence computation for one fused prediction.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceInputs {
    /// Number of omics types that contributed a prediction.
    pub available_types: usize,
    /// Number of predictive omics types the platform knows about.
    pub total_types: usize,
    /// Disagreement between contributions (weighted std), or the sample
    /// spread of the single contributing model.
    pub spread: f64,
    /// Fraction of contributions that came from untrained baseline models.
    pub baseline_fraction: f64,
}

/// Map a spread (>= 0) to an agreement quality in (0, 1].
pub fn agreement_quality(spread: f64) -> f64 {
    if !spread.is_finite() || spread < 0.0 {
        return 0.0;
    }
    1.0 / (1.0 + spread)
}

/// Lower and upper bound of the band for `available` of `total` types.
pub fn coverage_band(available: usize, total: usize, floor: f64, ceiling: f64) -> (f64, f64) {
    if available == 0 || total == 0 {
        return (0.0, 0.0);
    }
    let n = available.min(total) as f64;
    let width = (ceiling - floor) / total as f64;
    (floor + (n - 1.0) * width, floor + n * width)
}

/// Compute a confidence score in [0, 1].
pub fn compute_confidence(inputs: &ConfidenceInputs, floor: f64, ceiling: f64) -> f64 {
    let (lo, hi) = coverage_band(inputs.available_types, inputs.total_types, floor, ceiling);
    if hi <= lo {
        return lo.clamp(0.0, 1.0);
    }

    let mut quality = agreement_quality(inputs.spread);

    // Baseline contributions carry half weight in the quality term
    let baseline = inputs.baseline_fraction.clamp(0.0, 1.0);
    quality *= 1.0 - 0.5 * baseline;

    (lo + quality * (hi - lo)).clamp(0.0, 1.0)
}

/// Weighted standard deviation of `values` around their weighted mean.
pub fn weighted_spread(values: &[f64], weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    if values.len() < 2 || total <= 0.0 {
        return 0.0;
    }
    let mean: f64 = values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / total;
    let var: f64 = values
        .iter()
        .zip(weights)
        .map(|(v, w)| w * (v - mean).powi(2))
        .sum::<f64>()
        / total;
    var.sqrt()
}
