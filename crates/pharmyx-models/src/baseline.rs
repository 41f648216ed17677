//! Untrained fallback predictor.
//!
//! Projects a patient's scaled features onto a pseudo-random drug signature
//! derived from SHA-256 of the drug id and data type, squashed with `tanh`.
//! Same drug, same type and same input always give the same output.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use pharmyx_common::{DataType, OmicsTable, PharmyxError, Result};

#[derive(Debug, Clone)]
pub struct BaselineModel {
    data_type: DataType,
    signature: Vec<f64>,
}

impl BaselineModel {
    pub fn new(drug_id: &str, data_type: DataType, width: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(drug_id.trim().to_ascii_lowercase().as_bytes());
        hasher.update([0x1f]);
        hasher.update(data_type.as_str().as_bytes());
        let digest = hasher.finalize();

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        let mut rng = StdRng::from_seed(seed);
        let signature = (0..width).map(|_| rng.gen_range(-1.0..1.0)).collect();

        Self { data_type, signature }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn predict(&self, x: &OmicsTable) -> Result<Vec<f64>> {
        let expected = self.signature.len();
        if x.n_cols() != expected {
            return Err(PharmyxError::DimensionMismatch { expected, actual: x.n_cols() });
        }
        let scale = (expected.max(1) as f64).sqrt();
        Ok(x
            .rows()
            .map(|row| {
                let dot: f64 = row.iter().zip(&self.signature).map(|(a, b)| a * b).sum();
                (dot / scale).tanh()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(values: Vec<f64>, width: usize) -> OmicsTable {
        let rows = values.len() / width;
        OmicsTable::new(
            (0..rows).map(|i| format!("s{i}")).collect(),
            (0..width).map(|i| format!("f{i}")).collect(),
            values,
        )
        .unwrap()
    }

    #[test]
    fn test_deterministic_per_drug() {
        let x = table(vec![0.5, -1.0, 2.0, 0.1, 0.3, -0.7], 3);
        let a = BaselineModel::new("erlotinib", DataType::Genomics, 3).predict(&x).unwrap();
        let b = BaselineModel::new("Erlotinib ", DataType::Genomics, 3).predict(&x).unwrap();
        let c = BaselineModel::new("cisplatin", DataType::Genomics, 3).predict(&x).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_width_checked() {
        let x = table(vec![1.0, 2.0], 2);
        let model = BaselineModel::new("erlotinib", DataType::Proteomics, 48);
        assert!(matches!(
            model.predict(&x),
            Err(PharmyxError::DimensionMismatch { expected: 48, actual: 2 })
        ));
    }
}
