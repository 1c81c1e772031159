use crate::make_error;
use eyre::Report;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Aggregated read-count summary for one mutation supercluster, produced by
/// upstream clustering. Supervariant `k` corresponds to tree node `k + 1`
/// (node 0 is the empty root).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supervariant {
  pub name: String,

  /// Variant read count per sample
  pub var_reads: Vec<u64>,

  /// Total read count per sample
  pub total_reads: Vec<u64>,

  /// Probability of sampling a variant read from a cell carrying the variant
  /// (0.5 for diploid autosomal clusters)
  pub omega: Vec<f64>,
}

impl Supervariant {
  pub fn num_samples(&self) -> usize {
    self.var_reads.len()
  }

  pub fn validate(&self) -> Result<(), Report> {
    let s = self.var_reads.len();
    if self.total_reads.len() != s || self.omega.len() != s {
      return make_error!(
        "Supervariant '{}': var_reads, total_reads and omega must have equal length",
        self.name
      );
    }
    for (i, (&v, &t)) in self.var_reads.iter().zip(self.total_reads.iter()).enumerate() {
      if v > t {
        return make_error!(
          "Supervariant '{}': sample {i} has more variant reads ({v}) than total reads ({t})",
          self.name
        );
      }
    }
    if self.omega.iter().any(|&w| !(0.0..=1.0).contains(&w) || w == 0.0) {
      return make_error!("Supervariant '{}': omega values must lie in (0, 1]", self.name);
    }
    Ok(())
  }

  /// Implied prevalence estimate per sample: `clamp(vaf / omega, 0, 1)`.
  pub fn phi_hat(&self) -> Array1<f64> {
    Array1::from_iter((0..self.num_samples()).map(|s| {
      let total = self.total_reads[s] as f64;
      if total == 0.0 {
        return 0.0;
      }
      let vaf = self.var_reads[s] as f64 / total;
      (vaf / self.omega[s]).clamp(0.0, 1.0)
    }))
  }
}

/// Checks that all supervariants agree on sample count and returns it.
pub fn common_num_samples(supervariants: &[Supervariant]) -> Result<usize, Report> {
  let mut num_samples = None;
  for sv in supervariants {
    sv.validate()?;
    match num_samples {
      None => num_samples = Some(sv.num_samples()),
      Some(n) if n != sv.num_samples() => {
        return make_error!(
          "Supervariant '{}' has {} samples, expected {n}",
          sv.name,
          sv.num_samples()
        );
      }
      _ => {}
    }
  }
  num_samples.map_or_else(|| make_error!("Expected at least one supervariant"), Ok)
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;
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

  #[rstest]
  fn phi_hat_scales_vaf_by_omega() {
    let v = sv("C1", vec![25, 50], vec![100, 100]);
    let phi_hat = v.phi_hat();
    assert_abs_diff_eq!(phi_hat[0], 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(phi_hat[1], 1.0, epsilon = 1e-12);
  }

  #[rstest]
  fn phi_hat_clamps_to_unit_interval() {
    let v = sv("C1", vec![90], vec![100]);
    assert_abs_diff_eq!(v.phi_hat()[0], 1.0, epsilon = 1e-12);
  }

  #[rstest]
  fn phi_hat_handles_zero_coverage() {
    let v = sv("C1", vec![0], vec![0]);
    assert_abs_diff_eq!(v.phi_hat()[0], 0.0, epsilon = 1e-12);
  }

  #[rstest]
  fn validate_rejects_excess_variant_reads() {
    let v = sv("C1", vec![101], vec![100]);
    assert!(v.validate().is_err());
  }

  #[rstest]
  fn common_num_samples_rejects_mismatch() {
    let a = sv("C1", vec![1, 2], vec![10, 10]);
    let b = sv("C2", vec![1], vec![10]);
    assert!(common_num_samples(&[a.clone(), b]).is_err());
    assert_eq!(common_num_samples(&[a]).unwrap(), 2);
  }
}
