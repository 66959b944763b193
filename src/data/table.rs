//! Whitespace-separated numeric tables.

use crate::error::{Result, SqwError};
use ndarray::{Array2, ArrayView1};
use std::collections::BTreeMap;
use std::path::Path;

/// A rectangular table of reals with `key: value` header metadata.
#[derive(Clone, Debug)]
pub struct DataTable {
    data: Array2<f64>,
    metadata: BTreeMap<String, String>,
}

impl DataTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SqwError::io(path, e))?;
        Self::parse(&text)
    }

    /// Parse rows of numbers. `#` lines become metadata when they hold a
    /// `key: value` pair and are ignored otherwise.
    pub fn parse(text: &str) -> Result<Self> {
        let mut metadata = BTreeMap::new();
        let mut values = Vec::new();
        let mut ncols = None;
        let mut nrows = 0;

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(header) = line.strip_prefix('#') {
                if let Some((k, v)) = header.split_once(':') {
                    metadata.insert(k.trim().to_string(), v.trim().to_string());
                }
                continue;
            }

            let row = line
                .split_whitespace()
                .map(|t| t.parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| SqwError::Parse {
                    line: idx + 1,
                    msg: e.to_string(),
                })?;

            match ncols {
                None => ncols = Some(row.len()),
                Some(n) if n != row.len() => {
                    return Err(SqwError::Parse {
                        line: idx + 1,
                        msg: format!("expected {} columns, found {}", n, row.len()),
                    })
                }
                _ => {}
            }
            values.extend(row);
            nrows += 1;
        }

        let data = Array2::from_shape_vec((nrows, ncols.unwrap_or(0)), values)
            .map_err(|e| SqwError::Format(e.to_string()))?;
        Ok(Self { data, metadata })
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn column(&self, idx: usize) -> Option<ArrayView1<'_, f64>> {
        (idx < self.ncols()).then(|| self.data.column(idx))
    }

    pub fn rows(&self) -> impl Iterator<Item = ArrayView1<'_, f64>> {
        self.data.rows().into_iter()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_metadata() {
        let t = DataTable::parse("# sample: Si\n#plain comment\n1 2 3\n4 5 6\n\n").unwrap();
        assert_eq!(t.nrows(), 2);
        assert_eq!(t.ncols(), 3);
        assert_eq!(t.column(1).unwrap().to_vec(), vec![2.0, 5.0]);
        assert!(t.column(3).is_none());
        assert_eq!(t.metadata().get("sample").map(String::as_str), Some("Si"));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = DataTable::parse("1 2 3\n4 5\n").unwrap_err();
        assert!(matches!(err, SqwError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_bad_number() {
        assert!(DataTable::parse("1 x 3\n").is_err());
    }

    #[test]
    fn test_empty() {
        let t = DataTable::parse("# only: header\n").unwrap();
        assert_eq!(t.nrows(), 0);
    }
}
