//! Row-major tensor view over tape variables

use crate::error::{CmorlError, Result};
use crate::tape::{Tape, Var};

/// Shaped collection of [`Var`]s, stored row-major
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<Var>,
}

impl Tensor {
    /// Build from a shape and matching data
    pub fn new(shape: Vec<usize>, data: Vec<Var>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(CmorlError::ShapeError(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn vector(data: Vec<Var>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Record a vector of leaves
    pub fn leaf_vector(tape: &Tape, values: &[f64]) -> Self {
        Self::vector(values.iter().map(|v| tape.leaf(*v)).collect())
    }

    /// Record a `[rows, width]` matrix of leaves; every row must have `width` entries
    pub fn leaf_matrix<R: AsRef<[f64]>>(tape: &Tape, rows: &[R], width: usize) -> Result<Self> {
        let mut data = Vec::with_capacity(rows.len() * width);
        for row in rows {
            let row = row.as_ref();
            if row.len() != width {
                return Err(CmorlError::DimensionMismatch {
                    expected: width,
                    actual: row.len(),
                });
            }
            data.extend(row.iter().map(|v| tape.leaf(*v)));
        }
        Self::new(vec![rows.len(), width], data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn vars(&self) -> &[Var] {
        &self.data
    }

    /// Element at a flat row-major index
    pub fn get(&self, index: usize) -> Option<Var> {
        self.data.get(index).copied()
    }

    pub fn values(&self, tape: &Tape) -> Vec<f64> {
        tape.values(&self.data)
    }

    /// Apply an element-wise operation, keeping the shape
    pub fn map<F: FnMut(Var) -> Var>(&self, f: F) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().copied().map(f).collect(),
        }
    }

    /// Swap the two axes of a rank-2 tensor
    pub fn transpose(&self) -> Result<Self> {
        let (rows, cols) = self.matrix_dims()?;
        let mut data = Vec::with_capacity(self.data.len());
        for c in 0..cols {
            for r in 0..rows {
                data.push(self.data[r * cols + c]);
            }
        }
        Self::new(vec![cols, rows], data)
    }

    /// Column `index` of a rank-2 tensor as a vector
    pub fn column(&self, index: usize) -> Result<Self> {
        let (rows, cols) = self.matrix_dims()?;
        if index >= cols {
            return Err(CmorlError::ShapeError(format!(
                "column {} out of range for {} columns",
                index, cols
            )));
        }
        Ok(Self::vector(
            (0..rows).map(|r| self.data[r * cols + index]).collect(),
        ))
    }

    /// Columns `range` of a rank-2 tensor, keeping rank 2
    pub fn columns(&self, range: std::ops::Range<usize>) -> Result<Self> {
        let (rows, cols) = self.matrix_dims()?;
        if range.start > range.end || range.end > cols {
            return Err(CmorlError::ShapeError(format!(
                "columns {:?} out of range for {} columns",
                range, cols
            )));
        }
        let width = range.end - range.start;
        let mut data = Vec::with_capacity(rows * width);
        for r in 0..rows {
            data.extend_from_slice(&self.data[r * cols + range.start..r * cols + range.end]);
        }
        Self::new(vec![rows, width], data)
    }

    /// Elements `range` of a vector
    pub fn slice(&self, range: std::ops::Range<usize>) -> Result<Self> {
        if self.rank() != 1 || range.start > range.end || range.end > self.data.len() {
            return Err(CmorlError::ShapeError(format!(
                "cannot slice {:?} from shape {:?}",
                range, self.shape
            )));
        }
        Ok(Self::vector(self.data[range].to_vec()))
    }

    /// Stack equally shaped tensors along a new leading axis
    pub fn stack(parts: &[Tensor]) -> Result<Self> {
        let Some(first) = parts.first() else {
            return Err(CmorlError::ShapeError("cannot stack zero tensors".into()));
        };
        let mut data = Vec::with_capacity(parts.len() * first.len());
        for part in parts {
            if part.shape != first.shape {
                return Err(CmorlError::ShapeError(format!(
                    "cannot stack shapes {:?} and {:?}",
                    first.shape, part.shape
                )));
            }
            data.extend_from_slice(&part.data);
        }
        let mut shape = vec![parts.len()];
        shape.extend_from_slice(&first.shape);
        Self::new(shape, data)
    }

    /// Split into the lanes reduced along `axis` (`None` reduces everything)
    ///
    /// Returns the output shape and one lane per output element.
    pub fn lanes(&self, axis: Option<usize>) -> Result<(Vec<usize>, Vec<Vec<Var>>)> {
        let Some(axis) = axis else {
            return Ok((Vec::new(), vec![self.data.clone()]));
        };
        if axis >= self.rank() {
            return Err(CmorlError::ShapeError(format!(
                "axis {} out of range for shape {:?}",
                axis, self.shape
            )));
        }
        let outer: usize = self.shape[..axis].iter().product();
        let len = self.shape[axis];
        let inner: usize = self.shape[axis + 1..].iter().product();

        let mut lanes = Vec::with_capacity(outer * inner);
        for o in 0..outer {
            for i in 0..inner {
                lanes.push(
                    (0..len)
                        .map(|k| self.data[o * len * inner + k * inner + i])
                        .collect(),
                );
            }
        }

        let mut out_shape = self.shape.clone();
        out_shape.remove(axis);
        Ok((out_shape, lanes))
    }

    fn matrix_dims(&self) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            [rows, cols] => Ok((*rows, *cols)),
            other => Err(CmorlError::ShapeError(format!(
                "expected a rank-2 tensor, got shape {:?}",
                other
            ))),
        }
    }
}
