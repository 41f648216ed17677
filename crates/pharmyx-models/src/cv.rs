//! Grouped k-fold cross-validation.
//!
//! Rows from the same patient always land in the same fold so that held-out
//! error reflects unseen patients. With fewer patients than folds the split
//! falls back to row-level folds.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pharmyx_common::{OmicsTable, PharmyxError, Result};

use crate::catalog::Model;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvReport {
    pub folds: usize,
    /// True when folds were built from patients rather than rows.
    pub grouped: bool,
    pub fold_mae: Vec<f64>,
    pub mean_mae: f64,
    pub std_mae: f64,
}

pub fn mean_absolute_error(predicted: &[f64], actual: &[f64]) -> f64 {
    if predicted.is_empty() {
        return 0.0;
    }
    predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a).abs())
        .sum::<f64>()
        / predicted.len() as f64
}

/// Smallest training split a forest accepts.
const MIN_TRAIN_ROWS: usize = 2;

type Folds = Vec<(Vec<usize>, Vec<usize>)>;

/// Fold assignment: one `(train, test)` index pair per fold.
/// Returns `(folds, grouped)`.
///
/// Folds whose training split would fall below two rows are dropped. When
/// fewer than two patient folds survive (one patient holding most rows, say)
/// the split falls back to row-level folds.
pub fn grouped_kfold(groups: &[String], k: usize) -> (Folds, bool) {
    let n = groups.len();
    let mut unique: Vec<&String> = groups.iter().collect();
    unique.sort();
    unique.dedup();

    if unique.len() >= k {
        let fold_of: Vec<usize> = groups
            .iter()
            .map(|g| unique.binary_search(&g).unwrap_or(0) % k)
            .collect();
        let folds = split(&fold_of, k);
        if folds.len() >= 2 {
            return (folds, true);
        }
        debug!(patients = unique.len(), k, "Uneven patient groups, using row-level folds");
    }

    let fold_of: Vec<usize> = (0..n).map(|i| i % k).collect();
    (split(&fold_of, k), false)
}

fn split(fold_of: &[usize], k: usize) -> Folds {
    (0..k)
        .map(|f| {
            let (test, train): (Vec<usize>, Vec<usize>) = (0..fold_of.len()).partition(|&i| fold_of[i] == f);
            (train, test)
        })
        .filter(|(train, test)| train.len() >= MIN_TRAIN_ROWS && !test.is_empty())
        .collect()
}

/// Run k-fold CV with fresh models from `make_model`.
///
/// `k` is capped at half the rows, and folds that would train on fewer than
/// two rows are dropped (see [`grouped_kfold`]). Returns `Ok(None)` when the
/// data is too small for any CV.
pub fn cross_validate(
    x: &OmicsTable,
    y: &[f64],
    groups: &[String],
    k: usize,
    make_model: impl Fn() -> Model,
) -> Result<Option<CvReport>> {
    let n = x.n_rows();
    if y.len() != n || groups.len() != n {
        return Err(PharmyxError::DimensionMismatch { expected: n, actual: y.len().min(groups.len()) });
    }
    let k = k.min(n / 2);
    if k < 2 {
        warn!(rows = n, "Too few rows for cross-validation, skipping");
        return Ok(None);
    }

    let (folds, grouped) = grouped_kfold(groups, k);
    let mut fold_mae = Vec::with_capacity(folds.len());
    for (train, test) in &folds {
        let mut model = make_model();
        let train_y: Vec<f64> = train.iter().map(|&i| y[i]).collect();
        model.fit(&x.select_rows(train), &train_y)?;

        let predicted = model.predict(&x.select_rows(test))?;
        let test_y: Vec<f64> = test.iter().map(|&i| y[i]).collect();
        fold_mae.push(mean_absolute_error(&predicted, &test_y));
    }
    if fold_mae.is_empty() {
        return Ok(None);
    }

    let mean_mae = fold_mae.iter().sum::<f64>() / fold_mae.len() as f64;
    let std_mae = (fold_mae.iter().map(|m| (m - mean_mae).powi(2)).sum::<f64>()
        / fold_mae.len() as f64)
        .sqrt();
    Ok(Some(CvReport { folds: fold_mae.len(), grouped, fold_mae, mean_mae, std_mae }))
}
