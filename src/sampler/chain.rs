use crate::fit::cache::{FitCache, FitMethod};
use crate::make_internal_report;
use crate::model::likelihood::tree_llh;
use crate::model::mutrel::ClustrelPosterior;
use crate::model::supervariant::Supervariant;
use crate::sampler::proposal::{proposal_log_density, propose, Proposal, ProposalWeights};
use crate::tree::adjacency::TreeStructure;
use crate::tree::ancestry::ancestry;
use eyre::Report;
use log::{debug, trace};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_isaac::Isaac64Rng;

/// One retained (structure, phi, log-likelihood) triple from a chain.
#[derive(Debug, Clone)]
pub struct ChainSample {
  pub structure: TreeStructure,
  pub phi: Array2<f64>,
  pub llh: f64,
}

#[derive(Debug, Clone)]
pub struct ChainParams {
  pub trees_per_chain: usize,
  pub burnin: f64,
  pub thinned_frac: f64,
  pub fit_method: FitMethod,
  pub fit_iterations: usize,
  pub weights: ProposalWeights,
}

/// Random valid initial structure: each node attaches to a uniformly chosen
/// lower-indexed node, which can never create a cycle.
fn init_structure(num_nodes: usize, rng: &mut impl Rng) -> Result<TreeStructure, Report> {
  let parents: Vec<usize> = (1..num_nodes).map(|node| rng.gen_range(0..node)).collect();
  TreeStructure::from_parents(&parents)
}

/// Runs one Metropolis-Hastings chain over tree-structure space. Every
/// iteration records the current structure (repeats included), then burn-in
/// and thinning reduce the raw trace to the retained samples.
pub fn run_chain(
  posterior: &ClustrelPosterior,
  supervariants: &[Supervariant],
  params: &ChainParams,
  seed: u64,
) -> Result<Vec<ChainSample>, Report> {
  let mut rng = Isaac64Rng::seed_from_u64(seed);
  let num_nodes = supervariants.len() + 1;
  let mut cache = FitCache::new();

  let mut structure = init_structure(num_nodes, &mut rng)?;
  let mut z = ancestry(&structure)?;
  let (mut phi, _eta) = cache.fit(&structure, supervariants, params.fit_method, params.fit_iterations)?;
  let mut llh = tree_llh(&phi, &z, supervariants, posterior);

  let mut accepted = 0_usize;
  let mut raw = Vec::with_capacity(params.trees_per_chain);

  for iteration in 0..params.trees_per_chain {
    if let Some(Proposal {
      node,
      new_parent,
      log_q_fwd,
    }) = propose(&structure, &z, posterior, &params.weights, &mut rng)?
    {
      let old_parent = structure
        .parent_of(node)
        .ok_or_else(|| make_internal_report!("Proposed to move the parentless node {node}"))?;
      let proposed = structure.with_moved_node(node, new_parent)?;
      let z_new = ancestry(&proposed)?;
      let (phi_new, _eta) = cache.fit(&proposed, supervariants, params.fit_method, params.fit_iterations)?;
      let llh_new = tree_llh(&phi_new, &z_new, supervariants, posterior);

      // The proposal is not symmetric, so the acceptance ratio carries the
      // reverse/forward proposal-density correction.
      let log_q_rev = proposal_log_density(&proposed, &z_new, posterior, &params.weights, node, old_parent)
        .ok_or_else(|| make_internal_report!("Reverse move of node {node} to parent {old_parent} is not in the proposal support"))?;
      let log_alpha = (llh_new - llh) + (log_q_rev - log_q_fwd);

      if log_alpha >= 0.0 || rng.gen::<f64>() < log_alpha.exp() {
        trace!("iteration {iteration}: accepted move of {node} under {new_parent} (llh {llh:.3} -> {llh_new:.3})");
        structure = proposed;
        z = z_new;
        phi = phi_new;
        llh = llh_new;
        accepted += 1;
      }
    }

    raw.push(ChainSample {
      structure: structure.clone(),
      phi: phi.clone(),
      llh,
    });
  }

  debug!(
    "chain done: {accepted}/{} accepted, cache {} hits / {} misses",
    params.trees_per_chain,
    cache.hits(),
    cache.misses()
  );

  Ok(retain(raw, params.burnin, params.thinned_frac))
}

/// Discards the first `burnin` fraction of the raw trace, then keeps every
/// `round(1/thinned_frac)`-th of the remaining samples.
pub fn retain(raw: Vec<ChainSample>, burnin: f64, thinned_frac: f64) -> Vec<ChainSample> {
  let discard = ((burnin * raw.len() as f64).round() as usize).min(raw.len());
  let stride = ((1.0 / thinned_frac).round() as usize).max(1);
  raw.into_iter().skip(discard).step_by(stride).collect()
}
