//! Partial permutations.
//!
//! A partial permutation maps a subset of a domain `0..n` one-to-one onto a
//! contiguous range `0..m`, with `m <= n`. Indices outside the subset do not
//! participate. The contact problem graph uses one to enumerate the cliques
//! that take part in at least one constraint; these become the block columns
//! of the bundle Jacobian.

use nalgebra::DVector;

use crate::error::check_size;
use crate::{Result, SapError};

/// Maps participating indices of `0..n` onto `0..m`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialPermutation {
    /// `permutation[i]` is the permuted index of `i`, if `i` participates.
    permutation: Vec<Option<usize>>,
    /// Inverse map, `inverse[k]` is the domain index mapped to `k`.
    inverse: Vec<usize>,
}

impl PartialPermutation {
    /// Build from the permuted index of every domain entry.
    ///
    /// The participating images must cover `0..m` exactly once.
    pub fn new(permutation: Vec<Option<usize>>) -> Result<Self> {
        let m = permutation.iter().flatten().count();
        let mut inverse = vec![usize::MAX; m];
        for (i, image) in permutation.iter().enumerate() {
            let Some(k) = *image else { continue };
            if k >= m {
                return Err(SapError::invalid_parameter(format!(
                    "permuted index {k} of entry {i} outside 0..{m}"
                )));
            }
            if inverse[k] != usize::MAX {
                return Err(SapError::invalid_parameter(format!(
                    "permuted index {k} assigned to both {} and {i}",
                    inverse[k]
                )));
            }
            inverse[k] = i;
        }
        Ok(Self {
            permutation,
            inverse,
        })
    }

    /// Build the permutation that keeps the flagged entries in increasing order.
    #[must_use]
    pub fn from_participation(participates: &[bool]) -> Self {
        let mut inverse = Vec::new();
        let permutation = participates
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                p.then(|| {
                    inverse.push(i);
                    inverse.len() - 1
                })
            })
            .collect();
        Self {
            permutation,
            inverse,
        }
    }

    /// Size of the full domain.
    #[must_use]
    pub fn domain_size(&self) -> usize {
        self.permutation.len()
    }

    /// Number of participating entries.
    #[must_use]
    pub fn permuted_domain_size(&self) -> usize {
        self.inverse.len()
    }

    /// Whether domain entry `i` participates.
    #[must_use]
    pub fn participates(&self, i: usize) -> bool {
        self.permuted_index(i).is_some()
    }

    /// Permuted index of domain entry `i`, `None` if it does not participate
    /// or lies outside the domain.
    #[must_use]
    pub fn permuted_index(&self, i: usize) -> Option<usize> {
        self.permutation.get(i).copied().flatten()
    }

    /// Domain index mapped onto permuted index `k`.
    #[must_use]
    pub fn domain_index(&self, k: usize) -> Option<usize> {
        self.inverse.get(k).copied()
    }

    /// Participating domain indices, in permuted order.
    #[must_use]
    pub fn participating(&self) -> &[usize] {
        &self.inverse
    }

    /// Expand a permutation over blocks into one over their scalar entries.
    ///
    /// Domain entry `i` stands for a block of `block_sizes[i]` scalars. The
    /// result maps every scalar of a participating block, keeping blocks in
    /// permuted order and scalars in order within each block. Applied to the
    /// clique permutation with clique velocity counts, this maps generalized
    /// velocities onto the columns of the bundle Jacobian.
    pub fn expand(&self, block_sizes: &[usize]) -> Result<Self> {
        check_size("block_sizes", self.domain_size(), block_sizes.len())?;

        let mut permuted_offsets = Vec::with_capacity(self.inverse.len());
        let mut offset = 0;
        for &i in &self.inverse {
            permuted_offsets.push(offset);
            offset += block_sizes[i];
        }

        let mut permutation = Vec::with_capacity(block_sizes.iter().sum());
        for (i, &size) in block_sizes.iter().enumerate() {
            match self.permuted_index(i) {
                Some(k) => permutation.extend((0..size).map(|j| Some(permuted_offsets[k] + j))),
                None => permutation.extend(std::iter::repeat_n(None, size)),
            }
        }
        Self::new(permutation)
    }

    /// Gather the participating entries of `x` into permuted order.
    pub fn apply(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        check_size("x", self.domain_size(), x.len())?;
        Ok(DVector::from_iterator(
            self.inverse.len(),
            self.inverse.iter().map(|&i| x[i]),
        ))
    }

    /// Scatter permuted entries back into the domain. Non-participating
    /// entries of `x` are left untouched.
    pub fn apply_transpose(&self, x_permuted: &DVector<f64>, x: &mut DVector<f64>) -> Result<()> {
        check_size("x_permuted", self.permuted_domain_size(), x_permuted.len())?;
        check_size("x", self.domain_size(), x.len())?;
        for (k, &i) in self.inverse.iter().enumerate() {
            x[i] = x_permuted[k];
        }
        Ok(())
    }
}
