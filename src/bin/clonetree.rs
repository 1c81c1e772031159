use clonetree::cli::clonetree_cli::parse_cli_args;
use clonetree::io::input::load_input;
use clonetree::io::results::{matrices_to_rows, Results};
use clonetree::sampler::{sample_trees, use_existing_structures};
use clonetree::tree::adjacency::TreeStructure;
use clonetree::utils::global_init::{global_init, setup_logger};
use eyre::Report;
use log::info;
use rand::Rng;

fn main() -> Result<(), Report> {
  let args = parse_cli_args();
  setup_logger(args.log_level());
  global_init();

  let seed = args
    .seed
    .unwrap_or_else(|| rand::thread_rng().gen::<u32>() as u64);
  let parallel = args.parallel.unwrap_or_else(num_cpus::get);
  let tree_chains = args.tree_chains.unwrap_or(parallel);

  let input = load_input(&args.input)?;
  let mut results = Results::load_or_new(&args.results)?;
  if !results.has("seed") {
    results.set("seed", &seed)?;
    results.save()?;
  }

  if results.has("adjm") {
    info!("Tree structures already present in {:?}, nothing to do", args.results);
    return Ok(());
  }

  let supervariants = &input.supervariants;
  let superclusters = input.superclusters();

  let (adjms, phis, llhs) = match &input.structures {
    Some(parent_vectors) => {
      info!("Fitting {} user-supplied structures", parent_vectors.len());
      let adjms = parent_vectors
        .iter()
        .map(|parents| Ok(TreeStructure::from_parents(parents)?.adjacency().clone()))
        .collect::<Result<Vec<_>, Report>>()?;
      use_existing_structures(
        &adjms,
        supervariants,
        &superclusters,
        args.phi_fitter,
        args.phi_iterations,
        parallel,
      )?
    }
    None => {
      info!("Sampling trees: {tree_chains} chains x {} iterations (seed {seed})", args.trees_per_chain);
      let posterior = input.posterior()?;
      sample_trees(
        &posterior,
        supervariants,
        &superclusters,
        args.trees_per_chain,
        args.burnin,
        tree_chains,
        args.thinned_frac,
        args.phi_fitter,
        args.phi_iterations,
        &args.proposal_weights(),
        seed,
        parallel,
      )?
    }
  };

  info!("Retained {} posterior samples", llhs.len());
  results.set("adjm", &matrices_to_rows(&adjms))?;
  results.set("phi", &matrices_to_rows(&phis))?;
  results.set("llh", &llhs)?;
  results.save()?;

  Ok(())
}
