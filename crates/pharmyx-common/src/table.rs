//! Tabular containers: raw uploads and processed numeric matrices.

use serde::{Deserialize, Serialize};

use crate::error::{PharmyxError, Result};

/// Label prefix of zero columns added by width reconciliation.
pub const PAD_PREFIX: &str = "__pad_";

pub fn is_padding_label(label: &str) -> bool {
    label.starts_with(PAD_PREFIX)
}

/// An uploaded table as decoded by the upload collaborator: labels plus
/// untyped cells. Numeric coercion happens during normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub row_labels: Vec<String>,
    pub col_labels: Vec<String>,
    pub cells: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(
        row_labels: Vec<String>,
        col_labels: Vec<String>,
        cells: Vec<Vec<String>>,
    ) -> Result<Self> {
        if row_labels.len() != cells.len() {
            return Err(PharmyxError::DataFormat(format!(
                "{} row labels for {} rows",
                row_labels.len(),
                cells.len()
            )));
        }
        if let Some((i, row)) = cells
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != col_labels.len())
        {
            return Err(PharmyxError::DataFormat(format!(
                "row {} ({}) has {} cells, header has {} columns",
                i,
                row_labels[i],
                row.len(),
                col_labels.len()
            )));
        }
        Ok(Self { row_labels, col_labels, cells })
    }

    /// Build a raw table from numeric values. `Display` for f64 round-trips
    /// exactly, so coercion recovers the same numbers.
    pub fn from_values(
        row_labels: Vec<String>,
        col_labels: Vec<String>,
        values: &[Vec<f64>],
    ) -> Result<Self> {
        let cells = values
            .iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect();
        Self::new(row_labels, col_labels, cells)
    }

    pub fn n_rows(&self) -> usize {
        self.row_labels.len()
    }

    pub fn n_cols(&self) -> usize {
        self.col_labels.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows(), self.n_cols())
    }

    pub fn transpose(&self) -> RawTable {
        let cells = (0..self.n_cols())
            .map(|c| self.cells.iter().map(|row| row[c].clone()).collect())
            .collect();
        RawTable {
            row_labels: self.col_labels.clone(),
            col_labels: self.row_labels.clone(),
            cells,
        }
    }
}

/// Dense row-major numeric matrix with row and column labels.
///
/// After normalization rows are samples and columns are features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmicsTable {
    row_labels: Vec<String>,
    col_labels: Vec<String>,
    data: Vec<f64>,
}

impl OmicsTable {
    pub fn new(row_labels: Vec<String>, col_labels: Vec<String>, data: Vec<f64>) -> Result<Self> {
        let expected = row_labels.len() * col_labels.len();
        if data.len() != expected {
            return Err(PharmyxError::DataFormat(format!(
                "{}x{} table needs {} values, got {}",
                row_labels.len(),
                col_labels.len(),
                expected,
                data.len()
            )));
        }
        Ok(Self { row_labels, col_labels, data })
    }

    pub fn from_rows(
        row_labels: Vec<String>,
        col_labels: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if rows.len() != row_labels.len() {
            return Err(PharmyxError::DataFormat(format!(
                "{} row labels for {} rows",
                row_labels.len(),
                rows.len()
            )));
        }
        let width = col_labels.len();
        let mut data = Vec::with_capacity(rows.len() * width);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(PharmyxError::DataFormat(format!(
                    "row {i} has {} values, expected {width}",
                    row.len()
                )));
            }
            data.extend(row);
        }
        Self::new(row_labels, col_labels, data)
    }

    /// Stack tables with identical widths on top of each other.
    pub fn vstack(tables: &[&OmicsTable]) -> Result<Self> {
        let Some(first) = tables.first() else {
            return Err(PharmyxError::NoDataAvailable("no tables to stack".to_string()));
        };
        let width = first.n_cols();
        let mut row_labels = Vec::new();
        let mut data = Vec::new();
        for t in tables {
            if t.n_cols() != width {
                return Err(PharmyxError::DimensionMismatch { expected: width, actual: t.n_cols() });
            }
            row_labels.extend(t.row_labels.iter().cloned());
            data.extend_from_slice(&t.data);
        }
        Self::new(row_labels, first.col_labels.clone(), data)
    }

    pub fn n_rows(&self) -> usize {
        self.row_labels.len()
    }

    pub fn n_cols(&self) -> usize {
        self.col_labels.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows(), self.n_cols())
    }

    pub fn row_labels(&self) -> &[String] {
        &self.row_labels
    }

    pub fn col_labels(&self) -> &[String] {
        &self.col_labels
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n_cols() + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let w = self.n_cols();
        &self.data[row * w..(row + 1) * w]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        // zero-width tables hold no data, so the max(1) never yields a chunk
        self.data.chunks(self.n_cols().max(1))
    }

    pub fn column(&self, col: usize) -> Vec<f64> {
        (0..self.n_rows()).map(|r| self.get(r, col)).collect()
    }

    pub fn column_means(&self) -> Vec<f64> {
        let n = self.n_rows();
        if n == 0 {
            return vec![0.0; self.n_cols()];
        }
        let mut sums = vec![0.0; self.n_cols()];
        for row in self.rows() {
            for (s, v) in sums.iter_mut().zip(row) {
                *s += v;
            }
        }
        sums.iter().map(|s| s / n as f64).collect()
    }

    /// New table with the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> OmicsTable {
        let mut data = Vec::with_capacity(indices.len() * self.n_cols());
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        OmicsTable {
            row_labels: indices.iter().map(|&i| self.row_labels[i].clone()).collect(),
            col_labels: self.col_labels.clone(),
            data,
        }
    }

    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}
