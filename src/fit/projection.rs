use crate::model::supervariant::{common_num_samples, Supervariant};
use crate::tree::adjacency::TreeStructure;
use eyre::Report;
use ndarray::{Array1, Array2};
use rayon::prelude::*;

/// Closed-form projection backend: solves the constrained fit directly, one
/// sample column at a time, without an iteration budget.
///
/// Per sample, the implied per-node prevalence estimates are made
/// tree-consistent in two passes: a bottom-up pass raises each node's
/// prevalence to cover the demand of its children, then a top-down pass
/// scales each subtree into its parent's budget starting from `phi[root] = 1`.
/// Eta then falls out as the telescoping difference between a node and its
/// children, which guarantees nonnegativity, the per-sample simplex sum and
/// root-to-leaf monotonicity by construction.
pub fn fit_etas(structure: &TreeStructure, supervariants: &[Supervariant]) -> Result<Array2<f64>, Report> {
  let n = structure.num_nodes();
  if n == 1 {
    return Ok(Array2::ones((1, common_num_samples(supervariants).unwrap_or(1))));
  }
  let num_samples = common_num_samples(supervariants)?;

  let mut phi_hat = Array2::<f64>::zeros((n, num_samples));
  phi_hat.row_mut(0).fill(1.0);
  for (k, sv) in supervariants.iter().enumerate() {
    phi_hat.row_mut(k + 1).assign(&sv.phi_hat());
  }

  let columns: Vec<Array1<f64>> = (0..num_samples)
    .into_par_iter()
    .map(|s| project_column(structure, &phi_hat.column(s).to_owned()))
    .collect();

  let mut eta = Array2::<f64>::zeros((n, num_samples));
  for (s, col) in columns.iter().enumerate() {
    eta.column_mut(s).assign(col);
  }
  Ok(eta)
}

fn project_column(structure: &TreeStructure, phi_hat: &Array1<f64>) -> Array1<f64> {
  let n = structure.num_nodes();
  let depths = structure.depths();

  // Children must be finalized before their parent: visit by decreasing depth.
  let mut bottom_up: Vec<usize> = (0..n).collect();
  bottom_up.sort_by_key(|&node| std::cmp::Reverse(depths[node]));

  let mut tentative = phi_hat.to_vec();
  for &node in &bottom_up {
    let child_demand: f64 = structure.children_of(node).iter().map(|&c| tentative[c]).sum();
    tentative[node] = tentative[node].max(child_demand);
  }

  let mut phi = vec![0.0; n];
  phi[0] = 1.0;
  let mut stack = vec![0];
  while let Some(node) = stack.pop() {
    let children = structure.children_of(node);
    let demand: f64 = children.iter().map(|&c| tentative[c]).sum();
    let scale = if demand > phi[node] { phi[node] / demand } else { 1.0 };
    for &child in &children {
      phi[child] = tentative[child] * scale;
      stack.push(child);
    }
  }

  Array1::from_iter((0..n).map(|node| {
    let child_mass: f64 = structure.children_of(node).iter().map(|&c| phi[c]).sum();
    phi[node] - child_mass
  }))
}
