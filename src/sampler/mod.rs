pub mod chain;
pub mod proposal;

use crate::fit::cache::{fit_phis, FitMethod};
use crate::make_error;
use crate::model::likelihood::calc_llh_phi;
use crate::model::mutrel::ClustrelPosterior;
use crate::model::supervariant::Supervariant;
use crate::sampler::chain::{run_chain, ChainParams};
use crate::sampler::proposal::ProposalWeights;
use crate::tree::adjacency::TreeStructure;
use crate::utils::random::derive_subseed;
use eyre::{eyre, Report};
use log::info;
use ndarray::Array2;
use rayon::prelude::*;

/// Aggregated posterior sample set: one (adjacency, phi, log-likelihood)
/// triple per retained chain sample, concatenated across chains.
pub type PosteriorSamples = (Vec<Array2<u8>>, Vec<Array2<f64>>, Vec<f64>);

fn check_superclusters(superclusters: &[Vec<usize>], supervariants: &[Supervariant]) -> Result<(), Report> {
  if superclusters.len() != supervariants.len() + 1 {
    return make_error!(
      "Expected {} superclusters (one per supervariant plus the root), got {}",
      supervariants.len() + 1,
      superclusters.len()
    );
  }
  if !superclusters[0].is_empty() {
    return make_error!("Supercluster 0 is reserved for the empty root, but contains {} mutations", superclusters[0].len());
  }
  Ok(())
}

/// Runs `tree_chains` independent MCMC chains over tree-structure space and
/// concatenates their retained samples. Chains are parallelized across a pool
/// bounded by `parallelism`; each chain derives its own sub-seed from `seed`
/// and owns its own fit cache, so chain count never changes any individual
/// chain's trajectory.
#[allow(clippy::too_many_arguments)]
pub fn sample_trees(
  posterior: &ClustrelPosterior,
  supervariants: &[Supervariant],
  superclusters: &[Vec<usize>],
  trees_per_chain: usize,
  burnin: f64,
  tree_chains: usize,
  thinned_frac: f64,
  fit_method: FitMethod,
  fit_iterations: usize,
  weights: &ProposalWeights,
  seed: u64,
  parallelism: usize,
) -> Result<PosteriorSamples, Report> {
  check_superclusters(superclusters, supervariants)?;
  if posterior.num_nodes() != supervariants.len() + 1 {
    return make_error!(
      "Pairwise posterior covers {} nodes but {} supervariants were provided",
      posterior.num_nodes(),
      supervariants.len()
    );
  }
  if !(0.0..=1.0).contains(&burnin) {
    return make_error!("burnin must lie in [0, 1], got {burnin}");
  }
  if !(thinned_frac > 0.0 && thinned_frac <= 1.0) {
    return make_error!("thinned_frac must lie in (0, 1], got {thinned_frac}");
  }

  let params = ChainParams {
    trees_per_chain,
    burnin,
    thinned_frac,
    fit_method,
    fit_iterations,
    weights: weights.clone(),
  };

  let pool = rayon::ThreadPoolBuilder::new()
    .num_threads(parallelism)
    .build()
    .map_err(|err| eyre!("Unable to build thread pool: {err}"))?;

  let chains: Vec<_> = pool.install(|| {
    (0..tree_chains)
      .into_par_iter()
      .map(|chain_idx| run_chain(posterior, supervariants, &params, derive_subseed(seed, chain_idx)))
      .collect::<Result<Vec<_>, Report>>()
  })?;

  let mut adjms = Vec::new();
  let mut phis = Vec::new();
  let mut llhs = Vec::new();
  for (chain_idx, samples) in chains.into_iter().enumerate() {
    info!("chain {chain_idx}: retained {} samples", samples.len());
    for sample in samples {
      adjms.push(sample.structure.adjacency().clone());
      phis.push(sample.phi);
      llhs.push(sample.llh);
    }
  }
  Ok((adjms, phis, llhs))
}

/// Fixed-structure mode: fits phi and scores each caller-supplied structure
/// through the same dispatcher, with no proposal/acceptance machinery.
pub fn use_existing_structures(
  adjms: &[Array2<u8>],
  supervariants: &[Supervariant],
  superclusters: &[Vec<usize>],
  fit_method: FitMethod,
  fit_iterations: usize,
  parallelism: usize,
) -> Result<PosteriorSamples, Report> {
  check_superclusters(superclusters, supervariants)?;

  let pool = rayon::ThreadPoolBuilder::new()
    .num_threads(parallelism)
    .build()
    .map_err(|err| eyre!("Unable to build thread pool: {err}"))?;

  let fitted: Vec<(Array2<u8>, Array2<f64>, f64)> = pool.install(|| {
    adjms
      .par_iter()
      .map(|adj| {
        let structure = TreeStructure::from_adjacency(adj.clone())?;
        let (phi, _eta) = fit_phis(&structure, supervariants, fit_method, fit_iterations)?;
        // No pairwise posterior in this mode: structures are externally
        // fixed, so only the read-count likelihood ranks them.
        let llh = calc_llh_phi(&phi, supervariants);
        Ok((adj.clone(), phi, llh))
      })
      .collect::<Result<Vec<_>, Report>>()
  })?;

  let mut adjms_out = Vec::new();
  let mut phis = Vec::new();
  let mut llhs = Vec::new();
  for (adj, phi, llh) in fitted {
    adjms_out.push(adj);
    phis.push(phi);
    llhs.push(llh);
  }
  Ok((adjms_out, phis, llhs))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::mutrel::{Relation, NUM_RELATIONS};
  use crate::tree::ancestry::ancestry;
  use ndarray::Array3;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  fn sv(name: &str, var: Vec<u64>, total: Vec<u64>) -> Supervariant {
    let omega = vec![0.5; var.len()];
    Supervariant {
      name: name.to_owned(),
      var_reads: var,
      total_reads: total,
      omega,
    }
  }

  /// Root plus two clusters A (node 1) and B (node 2), two samples, where A
  /// clearly dominates B in variant fraction. The pairwise posterior mildly
  /// favours A and B being unrelated.
  fn scenario() -> (ClustrelPosterior, Vec<Supervariant>, Vec<Vec<usize>>) {
    let mut rels = Array3::from_elem((2, 2, NUM_RELATIONS), 0.15);
    rels[[0, 1, Relation::Unrelated as usize]] = 0.4;
    rels[[1, 0, Relation::Unrelated as usize]] = 0.4;
    let posterior = ClustrelPosterior::from_cluster_tensor(rels).unwrap();
    let supervariants = vec![
      sv("A", vec![40, 45], vec![100, 100]),
      sv("B", vec![10, 5], vec![100, 100]),
    ];
    let superclusters = vec![vec![], vec![0], vec![1]];
    (posterior, supervariants, superclusters)
  }

  #[rstest]
  fn identical_seeds_give_identical_posteriors() {
    let (posterior, supervariants, superclusters) = scenario();
    let run = || {
      sample_trees(
        &posterior,
        &supervariants,
        &superclusters,
        50,
        0.2,
        2,
        1.0,
        FitMethod::Projection,
        100,
        &ProposalWeights::default(),
        1234,
        2,
      )
      .unwrap()
    };
    let (adjms_a, phis_a, llhs_a) = run();
    let (adjms_b, phis_b, llhs_b) = run();
    assert_eq!(llhs_a, llhs_b);
    assert_eq!(adjms_a, adjms_b);
    assert_eq!(phis_a, phis_b);
  }

  #[rstest]
  fn chain_count_does_not_change_individual_trajectories() {
    let (posterior, supervariants, superclusters) = scenario();
    let run = |tree_chains: usize| {
      sample_trees(
        &posterior,
        &supervariants,
        &superclusters,
        30,
        0.0,
        tree_chains,
        1.0,
        FitMethod::Projection,
        100,
        &ProposalWeights::default(),
        99,
        2,
      )
      .unwrap()
    };
    let (_, _, llhs_one) = run(1);
    let (_, _, llhs_two) = run(2);
    assert_eq!(llhs_one.len(), 30);
    assert_eq!(llhs_two.len(), 60);
    assert_eq!(llhs_one, llhs_two[..30].to_vec());
  }

  #[rstest]
  fn burnin_and_thinning_control_sample_count() {
    let (posterior, supervariants, superclusters) = scenario();
    let (adjms, phis, llhs) = sample_trees(
      &posterior,
      &supervariants,
      &superclusters,
      100,
      0.5,
      1,
      0.1,
      FitMethod::Projection,
      100,
      &ProposalWeights::default(),
      7,
      1,
    )
    .unwrap();
    assert_eq!(llhs.len(), 5);
    assert_eq!(adjms.len(), 5);
    assert_eq!(phis.len(), 5);
  }

  #[rstest]
  fn dominant_cluster_ends_up_above_or_beside_the_weak_one() {
    let (posterior, supervariants, superclusters) = scenario();
    let (adjms, phis, llhs) = sample_trees(
      &posterior,
      &supervariants,
      &superclusters,
      200,
      0.25,
      2,
      1.0,
      FitMethod::Projection,
      100,
      &ProposalWeights::default(),
      42,
      2,
    )
    .unwrap();

    let best = llhs
      .iter()
      .enumerate()
      .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
      .map(|(i, _)| i)
      .unwrap();
    let structure = TreeStructure::from_adjacency(adjms[best].clone()).unwrap();
    let z = ancestry(&structure).unwrap();
    // A (node 1) must not be nested under B (node 2), and its prevalence
    // dominates B's in every sample.
    assert_eq!(z[[2, 1]], 0.0);
    for s in 0..2 {
      assert!(phis[best][[1, s]] >= phis[best][[2, s]]);
    }
  }

  #[rstest]
  fn fixed_structures_are_fitted_without_sampling() {
    let (_posterior, supervariants, superclusters) = scenario();
    let chain = TreeStructure::from_parents(&[0, 1]).unwrap();
    let branched = TreeStructure::from_parents(&[0, 0]).unwrap();
    let adjms = vec![chain.adjacency().clone(), branched.adjacency().clone()];
    let (adjms_out, phis, llhs) = use_existing_structures(
      &adjms,
      &supervariants,
      &superclusters,
      FitMethod::ProjRprop,
      200,
      1,
    )
    .unwrap();
    assert_eq!(adjms_out.len(), 2);
    assert_eq!(phis.len(), 2);
    assert_eq!(llhs.len(), 2);
    assert_eq!(adjms_out, adjms);
    assert!(llhs.iter().all(|llh| llh.is_finite()));
  }

  #[rstest]
  fn malformed_fixed_structure_is_rejected() {
    let (_posterior, supervariants, superclusters) = scenario();
    let mut adj = ndarray::Array2::<u8>::zeros((3, 3));
    adj[[1, 2]] = 1;
    adj[[2, 1]] = 1;
    let result = use_existing_structures(&[adj], &supervariants, &superclusters, FitMethod::Projection, 10, 1);
    assert!(result.is_err());
  }

  #[rstest]
  fn invalid_fractions_are_rejected() {
    let (posterior, supervariants, superclusters) = scenario();
    let run = |burnin: f64, thinned_frac: f64| {
      sample_trees(
        &posterior,
        &supervariants,
        &superclusters,
        10,
        burnin,
        1,
        thinned_frac,
        FitMethod::Projection,
        10,
        &ProposalWeights::default(),
        1,
        1,
      )
    };
    assert!(run(1.5, 1.0).is_err());
    assert!(run(0.5, 0.0).is_err());
  }

  #[rstest]
  fn root_supercluster_must_be_empty() {
    let (posterior, supervariants, _) = scenario();
    let bad = vec![vec![7], vec![0], vec![1]];
    let result = sample_trees(
      &posterior,
      &supervariants,
      &bad,
      10,
      0.0,
      1,
      1.0,
      FitMethod::Projection,
      10,
      &ProposalWeights::default(),
      1,
      1,
    );
    assert!(result.is_err());
  }
}
