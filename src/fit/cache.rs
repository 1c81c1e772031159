use crate::fit::iterative::{self, IterativeVariant};
use crate::fit::projection;
use crate::make_error;
use crate::model::supervariant::Supervariant;
use crate::tree::adjacency::TreeStructure;
use crate::tree::ancestry::ancestry;
use clap::ValueEnum;
use eyre::Report;
use ndarray::Array2;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::str::FromStr;

const ETA_SUM_TOLERANCE: f64 = 1e-6;

/// Phi fitting strategy, resolved once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FitMethod {
  /// Iterative gradient descent in softmax parameterization
  #[value(name = "graddesc")]
  GradDesc,

  /// Iterative resilient backpropagation in softmax parameterization
  #[value(name = "rprop")]
  Rprop,

  /// Closed-form tree-consistent projection
  #[value(name = "projection")]
  Projection,

  /// Projection warm start refined by rprop; at least as accurate as either
  /// alone and the recommended default when both backends are available
  #[value(name = "proj_rprop")]
  ProjRprop,
}

impl FitMethod {
  pub const fn tag(self) -> &'static str {
    match self {
      FitMethod::GradDesc => "graddesc",
      FitMethod::Rprop => "rprop",
      FitMethod::Projection => "projection",
      FitMethod::ProjRprop => "proj_rprop",
    }
  }
}

impl std::fmt::Display for FitMethod {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.tag())
  }
}

impl FromStr for FitMethod {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Report> {
    match s {
      "graddesc" => Ok(FitMethod::GradDesc),
      "rprop" => Ok(FitMethod::Rprop),
      "projection" => Ok(FitMethod::Projection),
      "proj_rprop" => Ok(FitMethod::ProjRprop),
      other => make_error!("Unknown phi fitter method '{other}'"),
    }
  }
}

/// Memoizes fitting results across an MCMC trajectory that revisits
/// structures. Owned by one sampling session (one chain); counters are fields
/// here rather than process-wide globals so concurrent sessions do not
/// interfere.
#[derive(Debug, Default)]
pub struct FitCache {
  cache: HashMap<[u8; 32], (Array2<f64>, Array2<f64>)>,
  hits: u64,
  misses: u64,
}

impl FitCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub const fn hits(&self) -> u64 {
    self.hits
  }

  pub const fn misses(&self) -> u64 {
    self.misses
  }

  /// Fits `(phi, eta)` for the given structure, reusing a cached result when
  /// the same structure was already fitted with the same method and iteration
  /// budget. The method tag is part of the key: switching strategy between
  /// calls must never return a stale result from a different algorithm.
  pub fn fit(
    &mut self,
    structure: &TreeStructure,
    supervariants: &[Supervariant],
    method: FitMethod,
    iterations: usize,
  ) -> Result<(Array2<f64>, Array2<f64>), Report> {
    let key = fingerprint(structure, method, iterations);
    if let Some(result) = self.cache.get(&key) {
      self.hits += 1;
      return Ok(result.clone());
    }
    let result = fit_phis(structure, supervariants, method, iterations)?;
    self.misses += 1;
    self.cache.insert(key, result.clone());
    Ok(result)
  }
}

/// Collision-resistant fingerprint over the full adjacency content, the
/// method tag and the iteration budget.
fn fingerprint(structure: &TreeStructure, method: FitMethod, iterations: usize) -> [u8; 32] {
  let mut hasher = Sha256::new();
  hasher.update((structure.num_nodes() as u64).to_le_bytes());
  hasher.update(structure.canonical_bytes());
  hasher.update(method.tag().as_bytes());
  hasher.update((iterations as u64).to_le_bytes());
  hasher.finalize().into()
}

/// Uncached fit: dispatches to the selected backend, enforces the per-sample
/// eta simplex invariant and derives `phi = Z · eta`. Phi is never
/// independently fit.
pub fn fit_phis(
  structure: &TreeStructure,
  supervariants: &[Supervariant],
  method: FitMethod,
  iterations: usize,
) -> Result<(Array2<f64>, Array2<f64>), Report> {
  if structure.num_nodes() != supervariants.len() + 1 {
    return make_error!(
      "Structure has {} nodes but {} supervariants were provided (expected nodes = supervariants + root)",
      structure.num_nodes(),
      supervariants.len()
    );
  }

  let eta = match method {
    FitMethod::GradDesc => iterative::fit_etas(structure, supervariants, IterativeVariant::GradDesc, iterations, None)?,
    FitMethod::Rprop => iterative::fit_etas(structure, supervariants, IterativeVariant::Rprop, iterations, None)?,
    FitMethod::Projection => projection::fit_etas(structure, supervariants)?,
    FitMethod::ProjRprop => {
      let warm = projection::fit_etas(structure, supervariants)?;
      iterative::fit_etas(structure, supervariants, IterativeVariant::Rprop, iterations, Some(&warm))?
    }
  };

  for s in 0..eta.ncols() {
    let sum = eta.column(s).sum();
    if (sum - 1.0).abs() > ETA_SUM_TOLERANCE {
      return make_error!(
        "Numerical invariant violated: eta for sample {s} sums to {sum} (method {}, {iterations} iterations); refusing to return an inconsistent fit",
        method.tag()
      );
    }
  }

  let z = ancestry(structure)?;
  let phi = z.dot(&eta);
  Ok((phi, eta))
}

#[cfg(test)]
mod tests {
  use super::*;
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

  fn test_data() -> (TreeStructure, Vec<Supervariant>) {
    let t = TreeStructure::from_parents(&[0, 0]).unwrap();
    let supervariants = vec![
      sv("A", vec![40, 45], vec![100, 100]),
      sv("B", vec![10, 5], vec![100, 100]),
    ];
    (t, supervariants)
  }

  #[rstest]
  fn repeated_fit_hits_cache_with_identical_result() {
    let (t, supervariants) = test_data();
    let mut cache = FitCache::new();
    let (phi1, eta1) = cache.fit(&t, &supervariants, FitMethod::Projection, 100).unwrap();
    assert_eq!(cache.hits(), 0);
    assert_eq!(cache.misses(), 1);
    let (phi2, eta2) = cache.fit(&t, &supervariants, FitMethod::Projection, 100).unwrap();
    assert_eq!(cache.hits(), 1);
    assert_eq!(cache.misses(), 1);
    assert_eq!(phi1, phi2);
    assert_eq!(eta1, eta2);
  }

  #[rstest]
  fn method_change_misses_cache() {
    // Same structure and iteration budget, different method: the second call
    // must not return the first method's result.
    let (t, supervariants) = test_data();
    let mut cache = FitCache::new();
    let (_, eta_proj) = cache.fit(&t, &supervariants, FitMethod::Projection, 100).unwrap();
    let (_, eta_rprop) = cache.fit(&t, &supervariants, FitMethod::Rprop, 100).unwrap();
    assert_eq!(cache.hits(), 0);
    assert_eq!(cache.misses(), 2);
    assert_ne!(eta_proj, eta_rprop);
  }

  #[rstest]
  fn iteration_budget_change_misses_cache() {
    let (t, supervariants) = test_data();
    let mut cache = FitCache::new();
    cache.fit(&t, &supervariants, FitMethod::Rprop, 10).unwrap();
    cache.fit(&t, &supervariants, FitMethod::Rprop, 20).unwrap();
    assert_eq!(cache.misses(), 2);
  }

  #[rstest]
  fn distinct_structures_have_distinct_fingerprints() {
    let a = TreeStructure::from_parents(&[0, 0]).unwrap();
    let b = TreeStructure::from_parents(&[0, 1]).unwrap();
    assert_ne!(
      fingerprint(&a, FitMethod::Rprop, 100),
      fingerprint(&b, FitMethod::Rprop, 100)
    );
  }

  #[rstest]
  fn unknown_method_string_is_rejected() {
    let err = <FitMethod as FromStr>::from_str("newton").unwrap_err();
    assert!(err.to_string().contains("Unknown phi fitter method"));
    assert_eq!(
      <FitMethod as FromStr>::from_str("proj_rprop").unwrap(),
      FitMethod::ProjRprop
    );
  }

  #[rstest]
  fn supervariant_count_mismatch_is_rejected() {
    let t = TreeStructure::from_parents(&[0]).unwrap();
    let supervariants = vec![sv("A", vec![1], vec![10]), sv("B", vec![1], vec![10])];
    assert!(fit_phis(&t, &supervariants, FitMethod::Projection, 10).is_err());
  }

  #[rstest]
  #[case::graddesc(FitMethod::GradDesc)]
  #[case::rprop(FitMethod::Rprop)]
  #[case::projection(FitMethod::Projection)]
  #[case::proj_rprop(FitMethod::ProjRprop)]
  fn every_method_satisfies_simplex_and_monotonicity(#[case] method: FitMethod) {
    let (t, supervariants) = test_data();
    let (phi, eta) = fit_phis(&t, &supervariants, method, 300).unwrap();
    for s in 0..eta.ncols() {
      let sum: f64 = eta.column(s).sum();
      assert!((sum - 1.0).abs() < 1e-6, "eta column {s} sums to {sum}");
    }
    for child in 1..t.num_nodes() {
      let parent = t.parent_of(child).unwrap();
      for s in 0..phi.ncols() {
        assert!(phi[[parent, s]] >= phi[[child, s]] - 1e-9);
      }
    }
  }
}
