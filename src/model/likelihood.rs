use crate::model::mutrel::{implied_relation, ClustrelPosterior};
use crate::model::supervariant::Supervariant;
use itertools::Itertools;
use ndarray::Array2;

/// Probabilities are clamped away from {0, 1} so that log terms stay finite
/// and likelihood differences between structures remain comparable.
const PROB_FLOOR: f64 = 1e-10;

/// Binomial log-likelihood of the supervariant read counts given a fitted phi
/// matrix, summed over nodes and samples. The binomial coefficient is
/// constant across structures and omitted.
pub fn calc_llh_phi(phi: &Array2<f64>, supervariants: &[Supervariant]) -> f64 {
  let mut llh = 0.0;
  for (k, sv) in supervariants.iter().enumerate() {
    let node = k + 1;
    for s in 0..sv.num_samples() {
      let p = (sv.omega[s] * phi[[node, s]]).clamp(PROB_FLOOR, 1.0 - PROB_FLOOR);
      let var = sv.var_reads[s] as f64;
      let refr = (sv.total_reads[s] - sv.var_reads[s]) as f64;
      llh += var * p.ln() + refr * (1.0 - p).ln();
    }
  }
  llh
}

/// Log-likelihood of the pairwise-relation posterior under the relations
/// implied by the ancestry matrix, summed over unordered non-root pairs.
pub fn calc_llh_mutrel(z: &Array2<f64>, posterior: &ClustrelPosterior) -> f64 {
  let n = posterior.num_nodes();
  (1..n)
    .tuple_combinations::<(usize, usize)>()
    .map(|(i, j)| posterior.prob(i, j, implied_relation(z, i, j)).max(PROB_FLOOR).ln())
    .sum()
}

/// Combined structure score: read-count likelihood of the fitted phi plus the
/// pairwise-relation term.
pub fn tree_llh(phi: &Array2<f64>, z: &Array2<f64>, supervariants: &[Supervariant], posterior: &ClustrelPosterior) -> f64 {
  calc_llh_phi(phi, supervariants) + calc_llh_mutrel(z, posterior)
}

/// Mean pairwise-posterior mismatch of one node's current placement: how much
/// probability mass the posterior puts on relations other than the ones the
/// structure implies. In [0, 1]; drives the rho-weighted node choice.
pub fn node_mutrel_mismatch(z: &Array2<f64>, posterior: &ClustrelPosterior, node: usize) -> f64 {
  let n = posterior.num_nodes();
  if n <= 2 {
    return 0.0;
  }
  let total: f64 = (1..n)
    .filter(|&j| j != node)
    .map(|j| 1.0 - posterior.prob(node, j, implied_relation(z, node, j)))
    .sum();
  total / (n - 2) as f64
}
