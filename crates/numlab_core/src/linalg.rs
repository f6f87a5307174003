//! Small dense matrices.
//!
//! Storage and multiplication are delegated to `nalgebra`. Determinant and
//! inverse use cofactor expansion and the adjugate, which is only sensible for
//! the 3x3 normal-equation systems built by the curve fitter; sizes up to 3 use
//! closed forms.

use crate::error::MatrixError;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Below this absolute determinant a matrix is treated as singular.
pub const SINGULAR_DETERMINANT: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    data: DMatrix<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: DMatrix::zeros(rows, cols),
        }
    }

    pub fn identity(n: usize) -> Self {
        Self {
            data: DMatrix::identity(n, n),
        }
    }

    /// Builds a matrix from row-major data.
    pub fn from_row_slice(rows: usize, cols: usize, values: &[f64]) -> Result<Self, MatrixError> {
        if values.len() != rows * cols {
            return Err(MatrixError::BadShape {
                rows,
                cols,
                actual: values.len(),
            });
        }
        Ok(Self {
            data: DMatrix::from_row_slice(rows, cols, values),
        })
    }

    /// Builds a matrix from equally sized rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, MatrixError> {
        let cols = rows.first().map_or(0, Vec::len);
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        if rows.iter().any(|r| r.len() != cols) {
            return Err(MatrixError::BadShape {
                rows: rows.len(),
                cols,
                actual: flat.len(),
            });
        }
        Self::from_row_slice(rows.len(), cols, &flat)
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.data.get((row, col)).copied()
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        if let Some(entry) = self.data.get_mut((row, col)) {
            *entry = value;
        }
    }

    /// Row-major copy of the entries.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.data
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect()
    }

    pub fn multiply(&self, rhs: &Matrix) -> Result<Matrix, MatrixError> {
        if self.cols() != rhs.rows() {
            return Err(MatrixError::DimensionMismatch {
                left_rows: self.rows(),
                left_cols: self.cols(),
                right_rows: rhs.rows(),
                right_cols: rhs.cols(),
            });
        }
        Ok(Matrix {
            data: &self.data * &rhs.data,
        })
    }

    /// Multiplies by a column vector.
    pub fn apply(&self, vector: &[f64]) -> Result<Vec<f64>, MatrixError> {
        let column = Matrix::from_row_slice(vector.len(), 1, vector)?;
        Ok(self.multiply(&column)?.data.iter().copied().collect())
    }

    /// Determinant by cofactor expansion along the first row.
    pub fn determinant(&self) -> Result<f64, MatrixError> {
        self.ensure_square()?;
        Ok(cofactor_determinant(&self.data))
    }

    /// Inverse as adjugate / determinant.
    pub fn inverse(&self) -> Result<Matrix, MatrixError> {
        self.ensure_square()?;
        let n = self.rows();
        let det = cofactor_determinant(&self.data);
        if !det.is_finite() || det.abs() < SINGULAR_DETERMINANT {
            return Err(MatrixError::Singular(det));
        }
        if n == 1 {
            return Ok(Matrix {
                data: DMatrix::from_element(1, 1, 1.0 / det),
            });
        }

        let mut inverse = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                let minor = self.data.clone().remove_row(i).remove_column(j);
                let sign = if (i + j) % 2 == 0 { 1.0 } else { -1.0 };
                // adj(A)[j][i] = C[i][j]
                inverse[(j, i)] = sign * cofactor_determinant(&minor) / det;
            }
        }
        Ok(Matrix { data: inverse })
    }

    /// Solves `A x = b` through the inverse.
    pub fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>, MatrixError> {
        self.inverse()?.apply(rhs)
    }

    fn ensure_square(&self) -> Result<(), MatrixError> {
        if self.rows() != self.cols() {
            return Err(MatrixError::NotSquare {
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        Ok(())
    }
}

fn cofactor_determinant(m: &DMatrix<f64>) -> f64 {
    match m.nrows() {
        0 => 1.0,
        1 => m[(0, 0)],
        2 => m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)],
        3 => {
            m[(0, 0)] * (m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)])
                - m[(0, 1)] * (m[(1, 0)] * m[(2, 2)] - m[(1, 2)] * m[(2, 0)])
                + m[(0, 2)] * (m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)])
        }
        n => (0..n)
            .map(|j| {
                let minor = m.clone().remove_row(0).remove_column(j);
                let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
                sign * m[(0, j)] * cofactor_determinant(&minor)
            })
            .sum(),
    }
}
