//! # Table Loading
//!
//! Reads the delimited text tables consumed by the command-line tool: one
//! integer category-id column per fixed-effect dimension plus any number of
//! numeric columns. Column names are chosen by the caller; every requested
//! column must exist and every cell must parse. Ids are returned as written
//! (zero- or one-based); `LoadedTable::membership` performs the translation.

use crate::types::{InputError, Membership};
use ndarray::{Array1, Array2};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Error from the CSV reader: {0}")]
    CsvError(#[from] csv::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error("Row {row}, column '{column}': '{value}' is not a non-negative integer category id.")]
    InvalidId {
        column: String,
        row: usize,
        value: String,
    },
    #[error("Row {row}, column '{column}': '{value}' is not a finite number.")]
    InvalidNumber {
        column: String,
        row: usize,
        value: String,
    },
    #[error("The input file contains no data rows.")]
    NoRows,
}

/// Raw contents of a loaded table.
#[derive(Debug)]
pub struct LoadedTable {
    /// Category ids as written in the file, shape `[n_rows, n_id_columns]`.
    pub ids: Array2<usize>,
    /// Numeric columns in the order they were requested.
    pub values: Vec<Array1<f64>>,
}

impl LoadedTable {
    pub fn n_rows(&self) -> usize {
        self.ids.nrows()
    }

    /// Builds a validated membership, sizing each dimension by its largest id.
    pub fn membership(&self, one_based: bool) -> Result<Membership, InputError> {
        let offset = usize::from(!one_based);
        let sizes = self
            .ids
            .columns()
            .into_iter()
            .map(|column| column.iter().copied().max().map_or(0, |max| max + offset))
            .collect();
        if one_based {
            Membership::from_one_based(self.ids.clone(), sizes)
        } else {
            Membership::new(self.ids.clone(), sizes)
        }
    }
}

pub fn load_table(
    path: &Path,
    delimiter: u8,
    id_columns: &[String],
    value_columns: &[String],
) -> Result<LoadedTable, DataError> {
    log::info!("Loading data from '{}'", path.display());

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers = reader.headers()?.clone();

    let locate = |name: &String| {
        headers
            .iter()
            .position(|header| header == name.as_str())
            .ok_or_else(|| DataError::ColumnNotFound(name.clone()))
    };
    let id_positions = id_columns.iter().map(locate).collect::<Result<Vec<_>, _>>()?;
    let value_positions = value_columns
        .iter()
        .map(locate)
        .collect::<Result<Vec<_>, _>>()?;

    let mut flat_ids = Vec::new();
    let mut values: Vec<Vec<f64>> = vec![Vec::new(); value_columns.len()];
    let mut n_rows = 0usize;

    for record in reader.records() {
        let record = record?;
        n_rows += 1;

        for (column, &position) in id_columns.iter().zip(&id_positions) {
            let field = record.get(position).unwrap_or("");
            let id = field.parse::<usize>().map_err(|_| DataError::InvalidId {
                column: column.clone(),
                row: n_rows,
                value: field.to_string(),
            })?;
            flat_ids.push(id);
        }

        for ((column, &position), target) in value_columns
            .iter()
            .zip(&value_positions)
            .zip(values.iter_mut())
        {
            let field = record.get(position).unwrap_or("");
            let value = field
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| DataError::InvalidNumber {
                    column: column.clone(),
                    row: n_rows,
                    value: field.to_string(),
                })?;
            target.push(value);
        }
    }

    if n_rows == 0 {
        return Err(DataError::NoRows);
    }

    let ids = Array2::from_shape_vec((n_rows, id_columns.len()), flat_ids)
        .map_err(|e| DataError::IoError(std::io::Error::other(e)))?;
    log::info!(
        "Loaded {} rows with {} fixed-effect columns",
        n_rows,
        id_columns.len()
    );

    Ok(LoadedTable {
        ids,
        values: values.into_iter().map(Array1::from_vec).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_table(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        write!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn loads_requested_columns_in_order() {
        let file =
            create_test_table("firm\tworker\tsum_fe\textra\n0\t1\t2.5\tx\n1\t0\t-1\ty\n").unwrap();
        let table = load_table(file.path(), b'\t', &names(&["worker", "firm"]), &names(&["sum_fe"]))
            .unwrap();

        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.ids, array![[1, 0], [0, 1]]);
        assert_eq!(table.values[0], array![2.5, -1.0]);

        let membership = table.membership(false).unwrap();
        assert_eq!(membership.sizes(), &[2, 2]);
    }

    #[test]
    fn one_based_ids_are_sized_by_their_maximum() {
        let file = create_test_table("a,b,y\n1,2,1.0\n2,1,2.0\n").unwrap();
        let table = load_table(file.path(), b',', &names(&["a", "b"]), &names(&["y"])).unwrap();
        let membership = table.membership(true).unwrap();
        assert_eq!(membership.sizes(), &[2, 2]);
        assert_eq!(membership.category(0, 1), 1);
    }

    #[test]
    fn missing_column_is_named() {
        let file = create_test_table("a,y\n0,1.0\n").unwrap();
        let err = load_table(file.path(), b',', &names(&["a", "b"]), &names(&["y"])).unwrap_err();
        assert!(matches!(err, DataError::ColumnNotFound(name) if name == "b"));
    }

    #[test]
    fn bad_cells_report_row_and_column() {
        let file = create_test_table("a,y\n0,1.0\n-1,2.0\n").unwrap();
        let err = load_table(file.path(), b',', &names(&["a"]), &names(&["y"])).unwrap_err();
        assert!(matches!(err, DataError::InvalidId { row: 2, .. }));

        let file = create_test_table("a,y\n0,NaN\n").unwrap();
        let err = load_table(file.path(), b',', &names(&["a"]), &names(&["y"])).unwrap_err();
        assert!(matches!(err, DataError::InvalidNumber { row: 1, .. }));
    }

    #[test]
    fn header_only_file_has_no_rows() {
        let file = create_test_table("a,y\n").unwrap();
        let err = load_table(file.path(), b',', &names(&["a"]), &names(&["y"])).unwrap_err();
        assert!(matches!(err, DataError::NoRows));
    }
}
