use crate::model::likelihood::node_mutrel_mismatch;
use crate::model::mutrel::{ClustrelPosterior, Relation};
use crate::tree::adjacency::TreeStructure;
use crate::utils::random::choose_weighted;
use eyre::Report;
use ndarray::Array2;
use rand::Rng;

/// Tunable weights governing the proposal distribution over (node, new-parent)
/// relocation moves.
#[derive(Debug, Clone)]
pub struct ProposalWeights {
  /// Weight of the pairwise-posterior mismatch when selecting the node to
  /// move: higher values concentrate proposals on poorly-placed nodes.
  pub rho: f64,

  /// Sharpness of the beta-PDF-like depth score over candidate parents:
  /// higher values favour parents near the middle depths of the tree.
  pub psi: f64,

  /// Weight of the ancestral pairwise probability when choosing the new
  /// parent: higher values prefer parents the posterior believes are true
  /// ancestors of the moved node.
  pub theta: f64,

  /// Weight of raw candidate-parent depth: higher values prefer deeper
  /// parents (finer subclonal branching) independent of posterior evidence.
  pub kappa: f64,
}

impl Default for ProposalWeights {
  fn default() -> Self {
    Self {
      rho: 5.0,
      psi: 3.0,
      theta: 4.0,
      kappa: 1.0,
    }
  }
}

/// One proposed relocation move, together with the log-density with which it
/// was drawn (needed for the Metropolis-Hastings correction, since the
/// proposal distribution is not symmetric).
#[derive(Debug, Clone, Copy)]
pub struct Proposal {
  pub node: usize,
  pub new_parent: usize,
  pub log_q_fwd: f64,
}

/// Candidate parents for relocating `node`: everything except the node
/// itself, its descendants (moves that would create a cycle never enter the
/// distribution) and its current parent.
fn valid_parents(structure: &TreeStructure, z: &Array2<f64>, node: usize) -> Vec<usize> {
  let current_parent = structure.parent_of(node);
  (0..structure.num_nodes())
    .filter(|&p| z[[node, p]] == 0.0 && Some(p) != current_parent)
    .collect()
}

/// Unnormalized weight of selecting each non-root node for relocation:
/// `exp(rho * mismatch)`, strictly positive for every node that has at least
/// one valid candidate parent, zero otherwise.
fn node_weights(structure: &TreeStructure, z: &Array2<f64>, posterior: &ClustrelPosterior, weights: &ProposalWeights) -> Vec<f64> {
  let n = structure.num_nodes();
  (0..n)
    .map(|node| {
      if node == 0 || valid_parents(structure, z, node).is_empty() {
        0.0
      } else {
        (weights.rho * node_mutrel_mismatch(z, posterior, node)).exp()
      }
    })
    .collect()
}

/// Unnormalized weights over candidate parents for the moved node: a
/// log-linear mix of ancestral posterior probability (theta), normalized
/// depth (kappa) and a strictly positive beta-PDF-like depth score (psi).
fn parent_weights(
  structure: &TreeStructure,
  posterior: &ClustrelPosterior,
  weights: &ProposalWeights,
  node: usize,
  candidates: &[usize],
) -> Vec<f64> {
  let depths = structure.depths();
  let max_depth = depths.iter().copied().max().unwrap_or(0).max(1);
  candidates
    .iter()
    .map(|&p| {
      let anc_post = posterior.prob(p, node, Relation::Ancestor);
      let depth_norm = depths[p] as f64 / max_depth as f64;
      // x stays strictly inside (0, 1) so the depth score never vanishes
      let x = (depths[p] + 1) as f64 / (max_depth + 2) as f64;
      let depth_score = (4.0 * x * (1.0 - x)).powf(weights.psi);
      (weights.theta * anc_post + weights.kappa * depth_norm).exp() * depth_score
    })
    .collect()
}

/// Draws one relocation move from the weighted proposal distribution.
/// Returns `None` when no node has a valid candidate parent (degenerate
/// trees), in which case the sampler repeats the current structure.
pub fn propose(
  structure: &TreeStructure,
  z: &Array2<f64>,
  posterior: &ClustrelPosterior,
  weights: &ProposalWeights,
  rng: &mut impl Rng,
) -> Result<Option<Proposal>, Report> {
  let node_w = node_weights(structure, z, posterior, weights);
  let node_total: f64 = node_w.iter().sum();
  if node_total <= 0.0 {
    return Ok(None);
  }
  let node = choose_weighted(&node_w, rng)?;

  let candidates = valid_parents(structure, z, node);
  let parent_w = parent_weights(structure, posterior, weights, node, &candidates);
  let parent_idx = choose_weighted(&parent_w, rng)?;
  let parent_total: f64 = parent_w.iter().sum();

  let log_q_fwd = (node_w[node] / node_total).ln() + (parent_w[parent_idx] / parent_total).ln();
  Ok(Some(Proposal {
    node,
    new_parent: candidates[parent_idx],
    log_q_fwd,
  }))
}

/// Log-density of proposing the relocation of `node` under `new_parent` from
/// the given structure; used to evaluate the reverse move for the acceptance
/// correction. `None` if the move is not in the proposal's support.
pub fn proposal_log_density(
  structure: &TreeStructure,
  z: &Array2<f64>,
  posterior: &ClustrelPosterior,
  weights: &ProposalWeights,
  node: usize,
  new_parent: usize,
) -> Option<f64> {
  let node_w = node_weights(structure, z, posterior, weights);
  let node_total: f64 = node_w.iter().sum();
  if node_total <= 0.0 || node_w[node] <= 0.0 {
    return None;
  }
  let candidates = valid_parents(structure, z, node);
  let parent_idx = candidates.iter().position(|&p| p == new_parent)?;
  let parent_w = parent_weights(structure, posterior, weights, node, &candidates);
  let parent_total: f64 = parent_w.iter().sum();
  Some((node_w[node] / node_total).ln() + (parent_w[parent_idx] / parent_total).ln())
}
