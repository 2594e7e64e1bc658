//! Block-sparse matrices for constraint Jacobians.
//!
//! Constraint Jacobians in a contact problem are sparse at the block level:
//! a constraint couples at most two cliques, so each block row has at most
//! two non-zero blocks regardless of how many cliques the problem has.
//! Storing dense blocks keyed by `(block_row, block_col)` keeps products
//! proportional to the number of non-zero blocks rather than to the full
//! matrix size.
//!
//! # Layout
//!
//! ```text
//!            col 0   col 1   col 2
//! row 0    [ J00  |   0   |  J02 ]
//! row 1    [  0   |  J11  |   0  ]
//! ```
//!
//! Every block in a block row has the same number of rows and every block in
//! a block column the same number of columns. Sizes are inferred from the
//! pushed blocks, so each block row and block column needs at least one block.

use std::collections::HashSet;

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::error::check_size;
use crate::{Result, SapError};

/// A dense block stored at `(row, col)` in block coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockTriplet {
    /// Block row index.
    pub row: usize,
    /// Block column index.
    pub col: usize,
    /// Dense block values.
    pub value: DMatrix<f64>,
}

/// Immutable block-sparse matrix.
///
/// Built with [`BlockSparseMatrixBuilder`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockSparseMatrix {
    /// Scalar row offset of each block row, plus the total row count at the end.
    row_starts: Vec<usize>,
    /// Scalar column offset of each block column, plus the total column count at the end.
    col_starts: Vec<usize>,
    /// Blocks sorted by `(row, col)`.
    blocks: Vec<BlockTriplet>,
    /// Range into `blocks` for each block row.
    row_ranges: Vec<std::ops::Range<usize>>,
}

impl BlockSparseMatrix {
    /// Number of scalar rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.row_starts.last().copied().unwrap_or(0)
    }

    /// Number of scalar columns.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.col_starts.last().copied().unwrap_or(0)
    }

    /// Number of block rows.
    #[must_use]
    pub fn block_rows(&self) -> usize {
        self.row_ranges.len()
    }

    /// Number of block columns.
    #[must_use]
    pub fn block_cols(&self) -> usize {
        self.col_starts.len().saturating_sub(1)
    }

    /// Number of non-zero blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// First scalar row of block row `i`.
    #[must_use]
    pub fn row_start(&self, i: usize) -> usize {
        self.row_starts[i]
    }

    /// First scalar column of block column `j`.
    #[must_use]
    pub fn col_start(&self, j: usize) -> usize {
        self.col_starts[j]
    }

    /// Number of scalar rows in block row `i`.
    #[must_use]
    pub fn block_row_size(&self, i: usize) -> usize {
        self.row_starts[i + 1] - self.row_starts[i]
    }

    /// Number of scalar columns in block column `j`.
    #[must_use]
    pub fn block_col_size(&self, j: usize) -> usize {
        self.col_starts[j + 1] - self.col_starts[j]
    }

    /// All non-zero blocks, sorted by block row then block column.
    #[must_use]
    pub fn blocks(&self) -> &[BlockTriplet] {
        &self.blocks
    }

    /// Non-zero blocks of block row `i`.
    #[must_use]
    pub fn row_blocks(&self, i: usize) -> &[BlockTriplet] {
        &self.blocks[self.row_ranges[i].clone()]
    }

    /// The block at `(i, j)`, if non-zero.
    #[must_use]
    pub fn block(&self, i: usize, j: usize) -> Option<&DMatrix<f64>> {
        let row = self.row_ranges.get(i)?;
        self.blocks[row.clone()]
            .iter()
            .find(|b| b.col == j)
            .map(|b| &b.value)
    }

    /// Compute `y += A * x`.
    pub fn mul_add(&self, x: &DVector<f64>, y: &mut DVector<f64>) -> Result<()> {
        check_size("x", self.cols(), x.len())?;
        check_size("y", self.rows(), y.len())?;
        for b in &self.blocks {
            let (r0, nr) = (self.row_starts[b.row], b.value.nrows());
            let (c0, nc) = (self.col_starts[b.col], b.value.ncols());
            let mut yi = y.rows_mut(r0, nr);
            yi.gemv(1.0, &b.value, &x.rows(c0, nc), 1.0);
        }
        Ok(())
    }

    /// Compute `A * x`.
    pub fn mul_vec(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        let mut y = DVector::zeros(self.rows());
        self.mul_add(x, &mut y)?;
        Ok(y)
    }

    /// Compute `y += Aᵀ * x`.
    pub fn mul_transpose_add(&self, x: &DVector<f64>, y: &mut DVector<f64>) -> Result<()> {
        check_size("x", self.rows(), x.len())?;
        check_size("y", self.cols(), y.len())?;
        for b in &self.blocks {
            let (r0, nr) = (self.row_starts[b.row], b.value.nrows());
            let (c0, nc) = (self.col_starts[b.col], b.value.ncols());
            let mut yj = y.rows_mut(c0, nc);
            yj.gemv_tr(1.0, &b.value, &x.rows(r0, nr), 1.0);
        }
        Ok(())
    }

    /// Compute `Aᵀ * x`.
    pub fn mul_transpose_vec(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        let mut y = DVector::zeros(self.cols());
        self.mul_transpose_add(x, &mut y)?;
        Ok(y)
    }

    /// Convert to a dense matrix (for testing or small systems).
    #[must_use]
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.rows(), self.cols());
        for b in &self.blocks {
            let (r0, c0) = (self.row_starts[b.row], self.col_starts[b.col]);
            dense
                .view_mut((r0, c0), (b.value.nrows(), b.value.ncols()))
                .copy_from(&b.value);
        }
        dense
    }

    /// Convert to a scalar CSR matrix, dropping explicit zeros inside blocks.
    #[must_use]
    pub fn to_csr(&self) -> CsrMatrix<f64> {
        let mut coo = CooMatrix::new(self.rows(), self.cols());
        for b in &self.blocks {
            let (r0, c0) = (self.row_starts[b.row], self.col_starts[b.col]);
            for j in 0..b.value.ncols() {
                for i in 0..b.value.nrows() {
                    let v = b.value[(i, j)];
                    if v != 0.0 {
                        coo.push(r0 + i, c0 + j, v);
                    }
                }
            }
        }
        CsrMatrix::from(&coo)
    }
}

/// Builder for [`BlockSparseMatrix`] from `(block_row, block_col, block)` triplets.
///
/// Blocks can be pushed in any order. Sizes are checked as blocks arrive.
#[derive(Debug, Clone)]
pub struct BlockSparseMatrixBuilder {
    row_sizes: Vec<Option<usize>>,
    col_sizes: Vec<Option<usize>>,
    blocks: Vec<BlockTriplet>,
    occupied: HashSet<(usize, usize)>,
}

impl BlockSparseMatrixBuilder {
    /// Create a builder for a `block_rows x block_cols` block layout,
    /// reserving room for `nonzero_blocks` blocks.
    #[must_use]
    pub fn new(block_rows: usize, block_cols: usize, nonzero_blocks: usize) -> Self {
        Self {
            row_sizes: vec![None; block_rows],
            col_sizes: vec![None; block_cols],
            blocks: Vec::with_capacity(nonzero_blocks),
            occupied: HashSet::with_capacity(nonzero_blocks),
        }
    }

    /// Push the dense block at `(i, j)`.
    pub fn push_block(&mut self, i: usize, j: usize, block: DMatrix<f64>) -> Result<()> {
        if i >= self.row_sizes.len() || j >= self.col_sizes.len() {
            return Err(SapError::BlockOutOfRange {
                block_row: i,
                block_col: j,
                block_rows: self.row_sizes.len(),
                block_cols: self.col_sizes.len(),
            });
        }
        if !self.occupied.insert((i, j)) {
            return Err(SapError::DuplicateBlock {
                block_row: i,
                block_col: j,
            });
        }
        Self::record_size(&mut self.row_sizes[i], block.nrows(), i, j)?;
        Self::record_size(&mut self.col_sizes[j], block.ncols(), i, j)?;
        self.blocks.push(BlockTriplet {
            row: i,
            col: j,
            value: block,
        });
        Ok(())
    }

    fn record_size(slot: &mut Option<usize>, size: usize, i: usize, j: usize) -> Result<()> {
        match *slot {
            Some(expected) if expected != size => Err(SapError::BlockShapeMismatch {
                block_row: i,
                block_col: j,
                expected,
                actual: size,
            }),
            _ => {
                *slot = Some(size);
                Ok(())
            }
        }
    }

    /// Finalize into a compressed block-sparse matrix.
    pub fn build(mut self) -> Result<BlockSparseMatrix> {
        let row_starts = Self::prefix_sum("row", &self.row_sizes)?;
        let col_starts = Self::prefix_sum("column", &self.col_sizes)?;

        self.blocks.sort_by_key(|b| (b.row, b.col));
        let mut row_ranges = Vec::with_capacity(self.row_sizes.len());
        let mut cursor = 0;
        for i in 0..self.row_sizes.len() {
            let start = cursor;
            while cursor < self.blocks.len() && self.blocks[cursor].row == i {
                cursor += 1;
            }
            row_ranges.push(start..cursor);
        }

        Ok(BlockSparseMatrix {
            row_starts,
            col_starts,
            blocks: self.blocks,
            row_ranges,
        })
    }

    fn prefix_sum(kind: &'static str, sizes: &[Option<usize>]) -> Result<Vec<usize>> {
        let mut starts = Vec::with_capacity(sizes.len() + 1);
        let mut acc = 0;
        starts.push(0);
        for (index, size) in sizes.iter().enumerate() {
            acc += size.ok_or(SapError::EmptyBlockLine { kind, index })?;
            starts.push(acc);
        }
        Ok(starts)
    }
}
