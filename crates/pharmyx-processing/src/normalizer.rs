//! Per-type omics normalization.
//!
//! An [`OmicsNormalizer`] turns an uploaded [`RawTable`] into a sample-major
//! [`OmicsTable`] of exactly the configured feature width, recording every
//! step it applies. The step sequence is fixed per [`DataType`]:
//!
//! | Type | Steps |
//! |------|-------|
//! | genomics | transpose, coerce, impute zero, clip dosage, variance filter, z-score, reconcile |
//! | transcriptomics | coerce, impute median, signed log2, variance filter, z-score, reconcile |
//! | proteomics | coerce, impute median, winsorize, variance filter, z-score, reconcile |
//! | drug_response | coerce, impute median, reconcile |

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

use pharmyx_common::{
    DataType, ImputePolicy, OmicsTable, Orientation, PharmyxError, ProcessingConfig,
    ProcessingMetadata, ProcessingStep, RawTable, Result, PAD_PREFIX,
};

use crate::stats::{mad, mean, median, population_std, population_variance, VARIANCE_EPS};

/// A labelled feature column during processing.
#[derive(Debug, Clone)]
struct Column {
    label: String,
    values: Vec<f64>,
}

/// Working state between steps: sample labels plus feature columns.
#[derive(Debug)]
struct Frame {
    row_labels: Vec<String>,
    columns: Vec<Column>,
}

impl Frame {
    fn n_rows(&self) -> usize {
        self.row_labels.len()
    }

    fn map_values(&mut self, f: impl Fn(f64) -> f64) {
        for col in &mut self.columns {
            for v in &mut col.values {
                *v = f(*v);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct OmicsNormalizer {
    data_type: DataType,
    width: usize,
    config: ProcessingConfig,
}

impl OmicsNormalizer {
    pub fn new(data_type: DataType, config: &ProcessingConfig) -> Self {
        Self {
            data_type,
            width: config.feature_width(data_type),
            config: config.clone(),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// The ordered steps this normalizer applies.
    pub fn steps(&self) -> Vec<ProcessingStep> {
        let mut steps = Vec::with_capacity(7);
        if self.data_type.raw_orientation() == Orientation::FeatureMajor {
            steps.push(ProcessingStep::TransposeToSampleMajor);
        }
        steps.push(ProcessingStep::CoerceNumeric);
        steps.push(match self.data_type.impute_policy() {
            ImputePolicy::Zero   => ProcessingStep::ImputeZero,
            ImputePolicy::Median => ProcessingStep::ImputeMedian,
        });
        match self.data_type {
            DataType::Genomics => steps.extend([
                ProcessingStep::ClipDosage,
                ProcessingStep::VarianceFilter,
                ProcessingStep::ZscoreScale,
            ]),
            DataType::Transcriptomics => steps.extend([
                ProcessingStep::Log2Transform,
                ProcessingStep::VarianceFilter,
                ProcessingStep::ZscoreScale,
            ]),
            DataType::Proteomics => steps.extend([
                ProcessingStep::Winsorize,
                ProcessingStep::VarianceFilter,
                ProcessingStep::ZscoreScale,
            ]),
            DataType::DrugResponse => {}
        }
        steps.push(ProcessingStep::ReconcileWidth { width: self.width });
        steps
    }

    /// Normalize one raw upload.
    pub fn process(&self, raw: &RawTable) -> Result<(OmicsTable, ProcessingMetadata)> {
        validate_raw(raw)?;
        let input_digest = digest(raw);

        let steps = self.steps();
        let mut oriented = None;
        let mut cells = None;
        let mut frame = None;
        let mut dropped = 0usize;
        let mut padded = 0usize;

        for step in &steps {
            match step {
                ProcessingStep::TransposeToSampleMajor => {
                    oriented = Some(raw.transpose());
                }
                ProcessingStep::CoerceNumeric => {
                    cells = Some(self.coerce(oriented.as_ref().unwrap_or(raw))?);
                }
                ProcessingStep::ImputeZero | ProcessingStep::ImputeMedian => {
                    let (row_labels, columns) = cells.take().ok_or_else(|| out_of_order(step))?;
                    frame = Some(impute(row_labels, columns, *step));
                }
                other => {
                    let f = frame.as_mut().ok_or_else(|| out_of_order(other))?;
                    match other {
                        ProcessingStep::ClipDosage     => f.map_values(|v| v.clamp(0.0, 2.0)),
                        ProcessingStep::Log2Transform  => f.map_values(|v| v.signum() * (1.0 + v.abs()).log2()),
                        ProcessingStep::Winsorize      => winsorize(f, self.config.winsorize_mads),
                        ProcessingStep::VarianceFilter => dropped += variance_filter(f),
                        ProcessingStep::ZscoreScale    => zscore(f),
                        ProcessingStep::ReconcileWidth { width } => {
                            let (truncated, pads) = reconcile_width(f, *width);
                            dropped += truncated;
                            padded += pads;
                        }
                        _ => return Err(out_of_order(other)),
                    }
                }
            }
        }

        let frame = frame.ok_or_else(|| {
            PharmyxError::DataFormat(format!("{} pipeline produced no table", self.data_type))
        })?;
        let table = into_table(frame)?;

        debug!(
            data_type = %self.data_type,
            input = ?raw.shape(),
            output = ?table.shape(),
            dropped,
            padded,
            "Normalized omics table"
        );

        let metadata = ProcessingMetadata {
            processing_type: self.data_type,
            processing_steps: steps,
            input_shape: raw.shape(),
            output_shape: table.shape(),
            dropped_features: dropped,
            padded_features: padded,
            input_digest,
            timestamp: Utc::now(),
        };
        Ok((table, metadata))
    }

    /// Parse every cell, column by column. Missing tokens become `None`.
    fn coerce(&self, raw: &RawTable) -> Result<(Vec<String>, Vec<(String, Vec<Option<f64>>)>)> {
        let mut columns = Vec::with_capacity(raw.n_cols());
        for (c, label) in raw.col_labels.iter().enumerate() {
            let mut values = Vec::with_capacity(raw.n_rows());
            for (r, row) in raw.cells.iter().enumerate() {
                let cell = row[c].trim();
                if self.config.is_missing(cell) {
                    values.push(None);
                    continue;
                }
                match cell.parse::<f64>() {
                    Ok(v) if v.is_finite() => values.push(Some(v)),
                    _ => {
                        return Err(PharmyxError::DataFormat(format!(
                            "row {:?} column {:?}: cannot parse {:?} as a number",
                            raw.row_labels[r], label, cell
                        )))
                    }
                }
            }
            columns.push((label.clone(), values));
        }
        Ok((raw.row_labels.clone(), columns))
    }
}

fn out_of_order(step: &ProcessingStep) -> PharmyxError {
    PharmyxError::DataFormat(format!("step {step} ran before its inputs were ready"))
}

fn validate_raw(raw: &RawTable) -> Result<()> {
    if raw.n_rows() == 0 || raw.n_cols() == 0 {
        return Err(PharmyxError::DataFormat(format!(
            "table has no data (shape {:?})",
            raw.shape()
        )));
    }
    if let Some((i, row)) = raw.cells.iter().enumerate().find(|(_, r)| r.len() != raw.n_cols()) {
        return Err(PharmyxError::DataFormat(format!(
            "row {} has {} cells, header has {} columns",
            i,
            row.len(),
            raw.n_cols()
        )));
    }
    if raw.cells.len() != raw.n_rows() {
        return Err(PharmyxError::DataFormat(format!(
            "{} row labels for {} rows",
            raw.n_rows(),
            raw.cells.len()
        )));
    }
    Ok(())
}

/// SHA-256 over labels and cells, with separators so shifted cells differ.
fn digest(raw: &RawTable) -> String {
    let mut hasher = Sha256::new();
    for label in &raw.col_labels {
        hasher.update(label.as_bytes());
        hasher.update([0x1f]);
    }
    hasher.update([0x1e]);
    for (label, row) in raw.row_labels.iter().zip(&raw.cells) {
        hasher.update(label.as_bytes());
        for cell in row {
            hasher.update([0x1f]);
            hasher.update(cell.as_bytes());
        }
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

fn impute(
    row_labels: Vec<String>,
    columns: Vec<(String, Vec<Option<f64>>)>,
    step: ProcessingStep,
) -> Frame {
    let columns = columns
        .into_iter()
        .map(|(label, values)| {
            let fill = match step {
                ProcessingStep::ImputeMedian => {
                    let observed: Vec<f64> = values.iter().flatten().copied().collect();
                    median(&observed).unwrap_or(0.0)
                }
                _ => 0.0,
            };
            Column { label, values: values.into_iter().map(|v| v.unwrap_or(fill)).collect() }
        })
        .collect();
    Frame { row_labels, columns }
}

fn winsorize(frame: &mut Frame, radius: f64) {
    for col in &mut frame.columns {
        let spread = mad(&col.values);
        if spread <= 0.0 {
            continue;
        }
        let center = median(&col.values).unwrap_or(0.0);
        let (lo, hi) = (center - radius * spread, center + radius * spread);
        for v in &mut col.values {
            *v = v.clamp(lo, hi);
        }
    }
}

/// Drop zero-variance columns. Returns how many were dropped.
fn variance_filter(frame: &mut Frame) -> usize {
    if frame.n_rows() < 2 {
        return 0;
    }
    let before = frame.columns.len();
    frame.columns.retain(|c| population_variance(&c.values) > VARIANCE_EPS);
    before - frame.columns.len()
}

fn zscore(frame: &mut Frame) {
    for col in &mut frame.columns {
        let m = mean(&col.values);
        let sd = population_std(&col.values);
        for v in &mut col.values {
            *v = if sd < 1e-9 { 0.0 } else { (*v - m) / sd };
        }
    }
}

/// Sort features by label, keep the first `width`, pad the rest with zeros.
/// Returns `(truncated, padded)`.
fn reconcile_width(frame: &mut Frame, width: usize) -> (usize, usize) {
    frame.columns.sort_by(|a, b| a.label.cmp(&b.label));
    let truncated = frame.columns.len().saturating_sub(width);
    frame.columns.truncate(width);

    let pads = width - frame.columns.len();
    let n_rows = frame.n_rows();
    for i in 0..pads {
        frame.columns.push(Column {
            label: format!("{PAD_PREFIX}{i:03}"),
            values: vec![0.0; n_rows],
        });
    }
    (truncated, pads)
}

fn into_table(frame: Frame) -> Result<OmicsTable> {
    let n_rows = frame.n_rows();
    let n_cols = frame.columns.len();
    let mut data = Vec::with_capacity(n_rows * n_cols);
    for r in 0..n_rows {
        for col in &frame.columns {
            data.push(col.values[r]);
        }
    }
    let col_labels = frame.columns.into_iter().map(|c| c.label).collect();
    OmicsTable::new(frame.row_labels, col_labels, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmyx_common::is_padding_label;
    use pretty_assertions::assert_eq;

    fn raw(rows: &[&str], cols: &[&str], cells: &[&[&str]]) -> RawTable {
        RawTable::new(
            rows.iter().map(|s| s.to_string()).collect(),
            cols.iter().map(|s| s.to_string()).collect(),
            cells.iter().map(|r| r.iter().map(|s| s.to_string()).collect()).collect(),
        )
        .unwrap()
    }

    fn normalizer(dt: DataType) -> OmicsNormalizer {
        OmicsNormalizer::new(dt, &ProcessingConfig::default())
    }

    #[test]
    fn test_genomics_transposes_and_pads() {
        // 3 SNPs x 2 samples, feature-major
        let table = raw(
            &["rs3", "rs1", "rs2"],
            &["S1", "S2"],
            &[&["0", "2"], &["1", "1"], &["NA", "5"]],
        );
        let (out, meta) = normalizer(DataType::Genomics).process(&table).unwrap();
        assert_eq!(out.shape(), (2, 64));
        assert_eq!(out.row_labels(), &["S1".to_string(), "S2".to_string()]);
        // rs1 is constant and dropped, rs2 and rs3 survive in label order
        assert_eq!(&out.col_labels()[..2], &["rs2".to_string(), "rs3".to_string()]);
        assert!(is_padding_label(&out.col_labels()[2]));
        assert_eq!(meta.dropped_features, 1);
        assert_eq!(meta.padded_features, 62);
        assert_eq!(meta.input_shape, (3, 2));
        assert_eq!(
            meta.step_names(),
            vec![
                "transpose_to_sample_major",
                "coerce_numeric",
                "impute_zero",
                "clip_dosage",
                "variance_filter",
                "zscore_scale",
                "reconcile_width(64)",
            ]
        );
        // rs2: NA -> 0, 5 clipped to 2, z-scored to [-1, 1]
        assert_eq!(out.column(0), vec![-1.0, 1.0]);
    }

    #[test]
    fn test_bad_cell_names_location() {
        let table = raw(&["S1"], &["TP53", "EGFR"], &[&["1.0", "high"]]);
        let err = normalizer(DataType::Proteomics).process(&table).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, PharmyxError::DataFormat(_)));
        assert!(msg.contains("S1") && msg.contains("EGFR") && msg.contains("high"), "{msg}");
    }

    #[test]
    fn test_single_sample_keeps_features() {
        let table = raw(&["S1"], &["A", "B", "C"], &[&["1", "2", "3"]]);
        let (out, meta) = normalizer(DataType::Transcriptomics).process(&table).unwrap();
        assert_eq!(out.shape(), (1, 128));
        assert_eq!(meta.dropped_features, 0);
        assert_eq!(&out.col_labels()[..3], &["A".to_string(), "B".to_string(), "C".to_string()]);
        assert!(out.values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_median_imputation_and_truncation() {
        let cols: Vec<String> = (0..6).map(|i| format!("m{i}")).collect();
        let col_refs: Vec<&str> = cols.iter().map(|s| s.as_str()).collect();
        let table = raw(
            &["erlotinib", "cisplatin", "imatinib"],
            &col_refs,
            &[
                &["1", "2", "3", "4", "5", "6"],
                &["", "2", "3", "4", "5", "6"],
                &["3", "2", "3", "4", "5", "6"],
            ],
        );
        let (out, meta) = normalizer(DataType::DrugResponse).process(&table).unwrap();
        assert_eq!(out.shape(), (3, 4));
        assert_eq!(out.get(1, 0), 2.0);
        assert_eq!(meta.dropped_features, 2);
        assert_eq!(meta.padded_features, 0);
    }

    #[test]
    fn test_configured_missing_tokens() {
        let config = ProcessingConfig { missing_tokens: vec!["n/a".into()], ..Default::default() };
        let n = OmicsNormalizer::new(DataType::DrugResponse, &config);
        let table = raw(&["erlotinib", "cisplatin"], &["ic50"], &[&[" N/A "], &["4"]]);
        let (out, _) = n.process(&table).unwrap();
        assert_eq!(out.get(0, 0), 4.0);

        // "NA" is only missing under the default token list
        let table = raw(&["erlotinib"], &["ic50"], &[&["NA"]]);
        assert!(matches!(n.process(&table), Err(PharmyxError::DataFormat(_))));
    }

    #[test]
    fn test_winsorize_clamps_outlier() {
        let table = raw(
            &["S1", "S2", "S3", "S4", "S5"],
            &["P1"],
            &[&["1"], &["2"], &["3"], &["4"], &["1000"]],
        );
        let n = normalizer(DataType::Proteomics);
        let (out, _) = n.process(&table).unwrap();
        // median 3, MAD 1 -> upper bound 8, so the outlier no longer dominates
        let col = out.column(0);
        assert!(col[4] < 2.0, "{col:?}");
    }

    #[test]
    fn test_empty_table_rejected() {
        let table = RawTable { row_labels: vec![], col_labels: vec!["a".into()], cells: vec![] };
        assert!(matches!(
            normalizer(DataType::Genomics).process(&table),
            Err(PharmyxError::DataFormat(_))
        ));
    }

    #[test]
    fn test_digest_is_stable_and_sensitive() {
        let a = raw(&["S1"], &["A", "B"], &[&["1", "2"]]);
        let b = raw(&["S1"], &["A", "B"], &[&["12", ""]]);
        assert_eq!(digest(&a), digest(&a.clone()));
        assert_ne!(digest(&a), digest(&b));
    }
}
