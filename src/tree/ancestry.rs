use crate::make_error;
use crate::tree::adjacency::TreeStructure;
use eyre::Report;
use ndarray::Array2;

/// Computes the ancestor-or-self reachability matrix `Z` for a tree, where
/// `Z[i, j] = 1` iff node `i` is an ancestor of or equal to node `j`. The
/// diagonal is all ones and `Z` is the transitive closure of the parent
/// relation.
pub fn ancestry(structure: &TreeStructure) -> Result<Array2<f64>, Report> {
  let n = structure.num_nodes();
  let mut z = Array2::<f64>::zeros((n, n));
  for j in 0..n {
    z[[j, j]] = 1.0;
    let mut node = j;
    let mut steps = 0;
    while let Some(parent) = structure.parent_of(node) {
      steps += 1;
      if steps > n {
        return make_error!("Invalid tree structure: parent chain of node {j} exceeds node count (cycle)");
      }
      z[[parent, j]] = 1.0;
      node = parent;
    }
  }
  Ok(z)
}
