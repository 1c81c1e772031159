use crate::fit::cache::FitMethod;
use crate::sampler::proposal::ProposalWeights;
use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

/// Infers the subclonal evolutionary tree of a tumor from clustered mutation
/// frequency data, producing a posterior distribution over trees and the
/// corresponding cellular-prevalence estimates.
#[derive(Parser, Debug)]
#[command(name = "clonetree", author, version)]
pub struct ClonetreeArgs {
  /// Random seed; drawn from entropy when omitted
  #[arg(long)]
  pub seed: Option<u64>,

  /// Degree of parallelism; defaults to the number of logical cores
  #[arg(long)]
  pub parallel: Option<usize>,

  /// MCMC iterations per chain
  #[arg(long, default_value_t = 2000)]
  pub trees_per_chain: usize,

  /// Number of independent chains; defaults to the degree of parallelism
  #[arg(long)]
  pub tree_chains: Option<usize>,

  /// Fraction of samples to discard from the beginning of each chain
  #[arg(long, default_value_t = 1.0 / 3.0)]
  pub burnin: f64,

  /// Fraction of post-burn-in samples to retain
  #[arg(long, default_value_t = 1.0)]
  pub thinned_frac: f64,

  /// Iteration budget for the iterative phi fitters
  #[arg(long, default_value_t = 10000)]
  pub phi_iterations: usize,

  /// Phi fitting strategy
  #[arg(long, value_enum, default_value_t = FitMethod::Rprop)]
  pub phi_fitter: FitMethod,

  /// Weight of the pairwise mismatch term when selecting the node to move,
  /// such that nodes with high mismatch are preferred
  #[arg(long, default_value_t = 5.0)]
  pub rho: f64,

  /// How strongly peaked the depth term is in the beta-PDF-like depth score,
  /// such that higher values favour parents at the preferred depth
  #[arg(long, default_value_t = 3.0)]
  pub psi: f64,

  /// Weight of ancestral pairwise probabilities when choosing the new parent,
  /// such that likely true ancestors are preferred
  #[arg(long, default_value_t = 4.0)]
  pub theta: f64,

  /// Weight of tree depth when choosing the new parent, such that deeper
  /// parents are preferred
  #[arg(long, default_value_t = 1.0)]
  pub kappa: f64,

  /// Make output more verbose (-v: debug, -vv: trace)
  #[arg(short, long, action = clap::ArgAction::Count)]
  pub verbose: u8,

  /// Input JSON with supervariants and the pairwise posterior
  pub input: PathBuf,

  /// Results JSON, written incrementally and reused on restart
  pub results: PathBuf,
}

impl ClonetreeArgs {
  pub fn proposal_weights(&self) -> ProposalWeights {
    ProposalWeights {
      rho: self.rho,
      psi: self.psi,
      theta: self.theta,
      kappa: self.kappa,
    }
  }

  pub fn log_level(&self) -> LevelFilter {
    match self.verbose {
      0 => LevelFilter::Info,
      1 => LevelFilter::Debug,
      _ => LevelFilter::Trace,
    }
  }
}

pub fn parse_cli_args() -> ClonetreeArgs {
  ClonetreeArgs::parse()
}
