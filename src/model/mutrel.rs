use crate::make_error;
use eyre::Report;
use ndarray::{Array2, Array3};

pub const NUM_RELATIONS: usize = 5;

/// Pairwise relation between two mutation clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
  /// First cluster is an ancestor of the second
  Ancestor = 0,
  /// First cluster is a descendant of the second
  Descendant = 1,
  /// Both clusters belong to the same subclone
  Cocluster = 2,
  /// Clusters lie on different branches
  Unrelated = 3,
  /// Pair carries no usable signal
  Garbage = 4,
}

/// Precomputed posterior over pairwise relations between tree nodes, consumed
/// as the likelihood evaluation signal for proposed structures. Indexed by
/// ordered node pair; the root's rows and columns are unused.
#[derive(Debug, Clone)]
pub struct ClustrelPosterior {
  rels: Array3<f64>,
}

impl ClustrelPosterior {
  pub fn from_tensor(rels: Array3<f64>) -> Result<Self, Report> {
    let (a, b, r) = rels.dim();
    if a != b || r != NUM_RELATIONS {
      return make_error!("Pairwise posterior must have shape KxKx{NUM_RELATIONS}, got {a}x{b}x{r}");
    }
    if rels.iter().any(|&p| !(0.0..=1.0).contains(&p)) {
      return make_error!("Pairwise posterior contains probabilities outside [0, 1]");
    }
    Ok(Self { rels })
  }

  /// Builds the node-indexed posterior from a cluster-indexed tensor (as
  /// produced by the upstream pairwise-relation stage, which knows nothing of
  /// the root). The root is prepended as a certain ancestor of every cluster.
  pub fn from_cluster_tensor(cluster_rels: Array3<f64>) -> Result<Self, Report> {
    let (a, b, r) = cluster_rels.dim();
    if a != b || r != NUM_RELATIONS {
      return make_error!("Cluster pairwise posterior must have shape MxMx{NUM_RELATIONS}, got {a}x{b}x{r}");
    }
    let n = a + 1;
    let mut rels = Array3::<f64>::zeros((n, n, NUM_RELATIONS));
    for i in 0..a {
      for j in 0..b {
        for rel in 0..NUM_RELATIONS {
          rels[[i + 1, j + 1, rel]] = cluster_rels[[i, j, rel]];
        }
      }
    }
    for j in 1..n {
      rels[[0, j, Relation::Ancestor as usize]] = 1.0;
      rels[[j, 0, Relation::Descendant as usize]] = 1.0;
    }
    rels[[0, 0, Relation::Cocluster as usize]] = 1.0;
    Self::from_tensor(rels)
  }

  pub fn num_nodes(&self) -> usize {
    self.rels.dim().0
  }

  pub fn prob(&self, i: usize, j: usize, rel: Relation) -> f64 {
    self.rels[[i, j, rel as usize]]
  }
}

/// Relation between nodes `i` and `j` implied by the ancestry matrix of a
/// valid structure. Cocluster and Garbage never arise from a tree.
pub fn implied_relation(z: &Array2<f64>, i: usize, j: usize) -> Relation {
  if z[[i, j]] != 0.0 {
    Relation::Ancestor
  } else if z[[j, i]] != 0.0 {
    Relation::Descendant
  } else {
    Relation::Unrelated
  }
}
