//! Contact problem graph.
//!
//! Nodes of the graph are cliques (groups of generalized velocities, one per
//! tree or deformable body). Edges are *clusters*: all constraints acting on
//! the same pair of cliques are grouped into one cluster, and a constraint
//! acting on a single clique forms a self-loop `(c, c)`.
//!
//! The graph fixes the ordering used by the constraint bundle:
//!
//! - Clusters are enumerated in the order their clique pair is first seen.
//! - Within a cluster, constraints keep their insertion order.
//! - Cliques that take part in at least one constraint are enumerated in
//!   increasing clique index by [`ContactProblemGraph::participating_cliques`].
//!
//! # Example
//!
//! ```
//! use sim_sap::{CliquePair, ContactProblemGraph};
//!
//! let mut graph = ContactProblemGraph::new(4);
//! graph.add_constraint(0, CliquePair::new(2, 0), 3)?;
//! graph.add_constraint(1, CliquePair::single(3), 1)?;
//! graph.add_constraint(2, CliquePair::new(0, 2), 3)?;
//!
//! assert_eq!(graph.num_clusters(), 2);
//! assert_eq!(graph.clusters()[0].constraint_indices(), &[0, 2]);
//! assert_eq!(graph.participating_cliques().participating(), &[0, 2, 3]);
//! # Ok::<(), sim_sap::SapError>(())
//! ```

use std::collections::HashMap;

use crate::{PartialPermutation, Result, SapError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Unordered pair of cliques, stored sorted.
///
/// A pair with equal entries denotes a single-clique constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CliquePair {
    first: usize,
    second: usize,
}

impl CliquePair {
    /// Pair of two cliques, in any order.
    #[must_use]
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            first: a.min(b),
            second: a.max(b),
        }
    }

    /// Pair for a constraint acting on a single clique.
    #[must_use]
    pub fn single(clique: usize) -> Self {
        Self::new(clique, clique)
    }

    /// Smaller clique index.
    #[must_use]
    pub fn first(&self) -> usize {
        self.first
    }

    /// Larger clique index.
    #[must_use]
    pub fn second(&self) -> usize {
        self.second
    }

    /// 1 for a self-loop, 2 otherwise.
    #[must_use]
    pub fn num_cliques(&self) -> usize {
        if self.first == self.second { 1 } else { 2 }
    }

    /// Distinct cliques of the pair.
    pub fn members(self) -> impl Iterator<Item = usize> {
        let second = (self.first != self.second).then_some(self.second);
        std::iter::once(self.first).chain(second)
    }
}

/// Constraints sharing the same clique pair.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstraintCluster {
    cliques: CliquePair,
    constraint_indices: Vec<usize>,
    num_equations: usize,
}

impl ConstraintCluster {
    fn new(cliques: CliquePair) -> Self {
        Self {
            cliques,
            constraint_indices: Vec::new(),
            num_equations: 0,
        }
    }

    /// The clique pair of this cluster.
    #[must_use]
    pub fn cliques(&self) -> CliquePair {
        self.cliques
    }

    /// Number of distinct cliques (1 or 2).
    #[must_use]
    pub fn num_cliques(&self) -> usize {
        self.cliques.num_cliques()
    }

    /// Problem indices of the constraints in this cluster, in insertion order.
    #[must_use]
    pub fn constraint_indices(&self) -> &[usize] {
        &self.constraint_indices
    }

    /// Number of constraints in this cluster.
    #[must_use]
    pub fn num_constraints(&self) -> usize {
        self.constraint_indices.len()
    }

    /// Sum of the equation counts of all constraints in this cluster.
    #[must_use]
    pub fn num_total_constraint_equations(&self) -> usize {
        self.num_equations
    }
}

/// A connected group of cliques and the clusters between them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CliqueIsland {
    /// Cliques in this island, sorted.
    pub cliques: Vec<usize>,
    /// Indices of the clusters belonging to this island.
    pub cluster_indices: Vec<usize>,
}

/// Graph of cliques connected by constraint clusters.
#[derive(Debug, Clone, Default)]
pub struct ContactProblemGraph {
    num_cliques: usize,
    clusters: Vec<ConstraintCluster>,
    pair_to_cluster: HashMap<CliquePair, usize>,
    num_constraints: usize,
    num_equations: usize,
}

impl ContactProblemGraph {
    /// Empty graph over `num_cliques` cliques.
    #[must_use]
    pub fn new(num_cliques: usize) -> Self {
        Self {
            num_cliques,
            ..Default::default()
        }
    }

    /// Register constraint `constraint_index` with `num_equations` equations
    /// acting on `cliques`. Returns the index of the cluster it joined.
    ///
    /// Fails with [`SapError::InvalidClique`] if a clique lies outside the
    /// graph; the graph is left unchanged in that case.
    pub fn add_constraint(
        &mut self,
        constraint_index: usize,
        cliques: CliquePair,
        num_equations: usize,
    ) -> Result<usize> {
        // Pairs are sorted, the second clique is the largest.
        if cliques.second() >= self.num_cliques {
            return Err(SapError::InvalidClique {
                clique: cliques.second(),
                num_cliques: self.num_cliques,
            });
        }

        let next = self.clusters.len();
        let cluster_index = *self.pair_to_cluster.entry(cliques).or_insert(next);
        if cluster_index == next {
            self.clusters.push(ConstraintCluster::new(cliques));
        }

        let cluster = &mut self.clusters[cluster_index];
        cluster.constraint_indices.push(constraint_index);
        cluster.num_equations += num_equations;
        self.num_constraints += 1;
        self.num_equations += num_equations;
        Ok(cluster_index)
    }

    /// Number of cliques (graph nodes), participating or not.
    #[must_use]
    pub fn num_cliques(&self) -> usize {
        self.num_cliques
    }

    /// Clusters in enumeration order.
    #[must_use]
    pub fn clusters(&self) -> &[ConstraintCluster] {
        &self.clusters
    }

    /// Number of clusters (graph edges).
    #[must_use]
    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Cluster index for a clique pair, if any constraint uses it.
    #[must_use]
    pub fn cluster_for(&self, cliques: CliquePair) -> Option<usize> {
        self.pair_to_cluster.get(&cliques).copied()
    }

    /// Number of registered constraints.
    #[must_use]
    pub fn num_constraints(&self) -> usize {
        self.num_constraints
    }

    /// Total number of constraint equations.
    #[must_use]
    pub fn num_constraint_equations(&self) -> usize {
        self.num_equations
    }

    /// Participating cliques, in increasing clique order.
    #[must_use]
    pub fn participating_cliques(&self) -> PartialPermutation {
        let mut participates = vec![false; self.num_cliques];
        for cluster in &self.clusters {
            for c in cluster.cliques.members() {
                participates[c] = true;
            }
        }
        PartialPermutation::from_participation(&participates)
    }

    /// Number of participating cliques.
    #[must_use]
    pub fn num_participating_cliques(&self) -> usize {
        self.participating_cliques().permuted_domain_size()
    }

    /// Connected components of the participating cliques.
    ///
    /// Islands are ordered by their smallest clique; cliques that take part in
    /// no constraint are not reported.
    #[must_use]
    pub fn islands(&self) -> Vec<CliqueIsland> {
        let mut uf = UnionFind::new(self.num_cliques);
        for cluster in &self.clusters {
            uf.union(cluster.cliques.first(), cluster.cliques.second());
        }

        let mut root_to_island: HashMap<usize, usize> = HashMap::new();
        let mut islands: Vec<CliqueIsland> = Vec::new();
        for c in self.participating_cliques().participating().iter().copied() {
            let root = uf.find(c);
            let island_index = *root_to_island.entry(root).or_insert_with(|| {
                islands.push(CliqueIsland::default());
                islands.len() - 1
            });
            islands[island_index].cliques.push(c);
        }

        for (cluster_index, cluster) in self.clusters.iter().enumerate() {
            let root = uf.find(cluster.cliques.first());
            if let Some(&island_index) = root_to_island.get(&root) {
                islands[island_index].cluster_indices.push(cluster_index);
            }
        }

        islands
    }
}

/// Union-find with path compression and union by rank.
#[derive(Debug, Clone)]
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u32>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_clique_pair_is_sorted() {
        let p = CliquePair::new(5, 2);
        assert_eq!((p.first(), p.second()), (2, 5));
        assert_eq!(p, CliquePair::new(2, 5));
        assert_eq!(p.num_cliques(), 2);
        assert_eq!(p.members().collect::<Vec<_>>(), vec![2, 5]);

        let s = CliquePair::single(3);
        assert_eq!(s.num_cliques(), 1);
        assert_eq!(s.members().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_clusters_group_by_pair() {
        let mut graph = ContactProblemGraph::new(3);
        assert_eq!(graph.add_constraint(0, CliquePair::new(0, 1), 3).unwrap(), 0);
        assert_eq!(graph.add_constraint(1, CliquePair::single(2), 2).unwrap(), 1);
        assert_eq!(graph.add_constraint(2, CliquePair::new(1, 0), 3).unwrap(), 0);
        assert_eq!(graph.add_constraint(3, CliquePair::single(2), 1).unwrap(), 1);

        assert_eq!(graph.num_clusters(), 2);
        assert_eq!(graph.num_constraints(), 4);
        assert_eq!(graph.num_constraint_equations(), 9);

        let c0 = &graph.clusters()[0];
        assert_eq!(c0.constraint_indices(), &[0, 2]);
        assert_eq!(c0.num_total_constraint_equations(), 6);
        assert_eq!(c0.num_cliques(), 2);

        let c1 = &graph.clusters()[1];
        assert_eq!(c1.constraint_indices(), &[1, 3]);
        assert_eq!(c1.num_total_constraint_equations(), 3);
        assert_eq!(c1.num_cliques(), 1);

        assert_eq!(graph.cluster_for(CliquePair::new(1, 0)), Some(0));
        assert_eq!(graph.cluster_for(CliquePair::new(1, 2)), None);
    }

    #[test]
    fn test_participating_cliques_skip_unused() {
        let mut graph = ContactProblemGraph::new(5);
        graph.add_constraint(0, CliquePair::new(4, 1), 3).unwrap();
        graph.add_constraint(1, CliquePair::single(3), 1).unwrap();

        let p = graph.participating_cliques();
        assert_eq!(p.participating(), &[1, 3, 4]);
        assert_eq!(p.permuted_index(0), None);
        assert_eq!(p.permuted_index(4), Some(2));
        assert_eq!(graph.num_participating_cliques(), 3);
    }

    #[test]
    fn test_islands() {
        let mut graph = ContactProblemGraph::new(6);
        graph.add_constraint(0, CliquePair::new(0, 1), 3).unwrap();
        graph.add_constraint(1, CliquePair::new(1, 2), 3).unwrap();
        graph.add_constraint(2, CliquePair::new(4, 5), 3).unwrap();
        graph.add_constraint(3, CliquePair::single(5), 1).unwrap();

        let islands = graph.islands();
        assert_eq!(islands.len(), 2);
        assert_eq!(islands[0].cliques, vec![0, 1, 2]);
        assert_eq!(islands[0].cluster_indices, vec![0, 1]);
        assert_eq!(islands[1].cliques, vec![4, 5]);
        assert_eq!(islands[1].cluster_indices, vec![2, 3]);
    }

    #[test]
    fn test_rejects_out_of_range_cliques() {
        let mut graph = ContactProblemGraph::new(2);
        assert_eq!(
            graph.add_constraint(0, CliquePair::single(5), 1).unwrap_err(),
            SapError::InvalidClique {
                clique: 5,
                num_cliques: 2
            }
        );
        assert!(graph.add_constraint(0, CliquePair::new(2, 0), 3).is_err());

        // Nothing was registered, and the queries stay well defined.
        assert_eq!(graph.num_constraints(), 0);
        assert_eq!(graph.num_clusters(), 0);
        assert_eq!(graph.cluster_for(CliquePair::single(5)), None);
        assert_eq!(graph.num_participating_cliques(), 0);
        assert!(graph.islands().is_empty());

        assert_eq!(graph.add_constraint(0, CliquePair::new(1, 0), 3).unwrap(), 0);
        assert_eq!(graph.participating_cliques().participating(), &[0, 1]);
    }

    #[test]
    fn test_empty_graph() {
        let graph = ContactProblemGraph::new(2);
        assert_eq!(graph.num_clusters(), 0);
        assert_eq!(graph.num_participating_cliques(), 0);
        assert!(graph.islands().is_empty());
    }
}
