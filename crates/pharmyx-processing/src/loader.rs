//! CSV upload decoding.
//!
//! The first column of every record is the row label and the header row holds
//! the column labels. Cells are kept as strings; numeric coercion is the
//! normalizer's job.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use pharmyx_common::{PharmyxError, RawTable, Result};
use tracing::debug;

/// Read a CSV upload from disk.
pub fn read_csv(path: impl AsRef<Path>) -> Result<RawTable> {
    let path = path.as_ref();
    debug!("Reading upload from {:?}", path);
    let file = File::open(path)?;
    parse_csv(file)
}

/// Decode a CSV upload from any reader.
pub fn parse_csv<R: Read>(reader: R) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(PharmyxError::DataFormat(format!(
            "header needs a label column and at least one data column, found {} columns",
            headers.len()
        )));
    }
    let col_labels: Vec<String> = headers.iter().skip(1).map(|s| s.trim().to_string()).collect();

    let mut row_labels = Vec::new();
    let mut cells = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = result?;
        if record.len() != headers.len() {
            let line = record.position().map(|p| p.line()).unwrap_or(i as u64 + 2);
            return Err(PharmyxError::DataFormat(format!(
                "line {} has {} fields, header has {}",
                line,
                record.len(),
                headers.len()
            )));
        }
        let mut fields = record.iter();
        row_labels.push(fields.next().unwrap_or_default().trim().to_string());
        cells.push(fields.map(str::to_string).collect());
    }

    RawTable::new(row_labels, col_labels, cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_parse_basic() {
        let data = "sample,EGFR,KRAS\nS1,1.5,NA\nS2,2.0,3\n";
        let raw = parse_csv(data.as_bytes()).unwrap();
        assert_eq!(raw.shape(), (2, 2));
        assert_eq!(raw.col_labels, vec!["EGFR", "KRAS"]);
        assert_eq!(raw.row_labels, vec!["S1", "S2"]);
        assert_eq!(raw.cells[0][1], "NA");
    }

    #[test]
    fn test_ragged_row_rejected() {
        let data = "sample,EGFR,KRAS\nS1,1.5\n";
        let err = parse_csv(data.as_bytes()).unwrap_err();
        assert!(matches!(err, PharmyxError::DataFormat(_)), "{err}");
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn test_label_only_header_rejected() {
        assert!(parse_csv("sample\nS1\n".as_bytes()).is_err());
    }

    #[test]
    fn test_read_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "variant,S1,S2,S3").unwrap();
        writeln!(file, "rs1,0,1,2").unwrap();
        let raw = read_csv(file.path()).unwrap();
        assert_eq!(raw.shape(), (1, 3));
    }
}
