use crate::make_internal_report;
use eyre::Report;
use rand::{Rng, SeedableRng};
use rand_isaac::Isaac64Rng;

pub fn get_random_number_generator(seed: Option<u64>) -> (impl Rng + Send + Sync + Clone) {
  match seed {
    None => Isaac64Rng::from_entropy(),
    Some(seed) => Isaac64Rng::seed_from_u64(seed),
  }
}

/// Derives an independent sub-seed for one chain from the top-level seed, so
/// that chain count does not change any individual chain's trajectory.
pub fn derive_subseed(seed: u64, chain_idx: usize) -> u64 {
  // splitmix64 finalizer over (seed, chain index)
  let mut z = seed ^ (chain_idx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
  z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
  z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
  z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
  z ^ (z >> 31)
}

/// Samples an index proportionally to the given nonnegative weights.
pub fn choose_weighted(weights: &[f64], rng: &mut impl Rng) -> Result<usize, Report> {
  let total: f64 = weights.iter().sum();
  if !(total > 0.0) {
    return Err(make_internal_report!(
      "choose_weighted: expected positive total weight, got {total}"
    ));
  }
  let mut draw = rng.gen::<f64>() * total;
  for (i, w) in weights.iter().enumerate() {
    draw -= w;
    if draw <= 0.0 {
      return Ok(i);
    }
  }
  Ok(weights.len() - 1)
}
