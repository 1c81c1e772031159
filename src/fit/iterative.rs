use crate::model::supervariant::{common_num_samples, Supervariant};
use crate::tree::adjacency::TreeStructure;
use crate::tree::ancestry::ancestry;
use crate::utils::ndarray::softmax;
use eyre::Report;
use ndarray::{Array1, Array2};
use rayon::prelude::*;

const PROB_FLOOR: f64 = 1e-10;

const RPROP_STEP_INIT: f64 = 1e-2;
const RPROP_STEP_GROW: f64 = 1.2;
const RPROP_STEP_SHRINK: f64 = 0.5;
const RPROP_STEP_MIN: f64 = 1e-8;
const RPROP_STEP_MAX: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterativeVariant {
  GradDesc,
  Rprop,
}

/// Iterative backend: maximizes the per-sample read-count likelihood over eta
/// in an unconstrained softmax (logit) parameterization, so every update step
/// lands back on the simplex. `iterations` bounds the number of update steps;
/// sample columns are independent and fit in parallel. An optional warm start
/// seeds the logits from a previously fitted eta.
pub fn fit_etas(
  structure: &TreeStructure,
  supervariants: &[Supervariant],
  variant: IterativeVariant,
  iterations: usize,
  eta_init: Option<&Array2<f64>>,
) -> Result<Array2<f64>, Report> {
  let n = structure.num_nodes();
  if n == 1 {
    return Ok(Array2::ones((1, common_num_samples(supervariants).unwrap_or(1))));
  }
  let num_samples = common_num_samples(supervariants)?;
  let z = ancestry(structure)?;

  let columns: Vec<Array1<f64>> = (0..num_samples)
    .into_par_iter()
    .map(|s| {
      let init = eta_init.map(|eta| eta.column(s).to_owned());
      fit_column(&z, supervariants, s, variant, iterations, init)
    })
    .collect();

  let mut eta = Array2::<f64>::zeros((n, num_samples));
  for (s, col) in columns.iter().enumerate() {
    eta.column_mut(s).assign(col);
  }
  Ok(eta)
}

fn fit_column(
  z: &Array2<f64>,
  supervariants: &[Supervariant],
  sample: usize,
  variant: IterativeVariant,
  iterations: usize,
  eta_init: Option<Array1<f64>>,
) -> Array1<f64> {
  let n = z.nrows();
  let mut logits = match eta_init {
    Some(eta) => eta.mapv(|e| (e + 1e-8).ln()),
    None => Array1::<f64>::zeros(n),
  };

  match variant {
    IterativeVariant::Rprop => {
      let mut steps = Array1::<f64>::from_elem(n, RPROP_STEP_INIT);
      let mut prev_grad = Array1::<f64>::zeros(n);
      for _ in 0..iterations {
        let grad = logit_gradient(z, supervariants, sample, &logits);
        for m in 0..n {
          let sign_product = grad[m] * prev_grad[m];
          if sign_product > 0.0 {
            steps[m] = (steps[m] * RPROP_STEP_GROW).min(RPROP_STEP_MAX);
          } else if sign_product < 0.0 {
            steps[m] = (steps[m] * RPROP_STEP_SHRINK).max(RPROP_STEP_MIN);
          }
          if grad[m] > 0.0 {
            logits[m] += steps[m];
          } else if grad[m] < 0.0 {
            logits[m] -= steps[m];
          }
        }
        prev_grad = grad;
      }
    }
    IterativeVariant::GradDesc => {
      let mut learning_rate = 1e-2;
      let mut llh = column_llh(z, supervariants, sample, &logits);
      for _ in 0..iterations {
        let grad = logit_gradient(z, supervariants, sample, &logits);
        let candidate = &logits + &(grad * learning_rate);
        let candidate_llh = column_llh(z, supervariants, sample, &candidate);
        if candidate_llh >= llh {
          logits = candidate;
          llh = candidate_llh;
          learning_rate *= 1.1;
        } else {
          learning_rate *= 0.5;
        }
      }
    }
  }

  softmax(logits.view())
}

fn column_llh(z: &Array2<f64>, supervariants: &[Supervariant], sample: usize, logits: &Array1<f64>) -> f64 {
  let eta = softmax(logits.view());
  let phi = z.dot(&eta);
  let mut llh = 0.0;
  for (k, sv) in supervariants.iter().enumerate() {
    let p = (sv.omega[sample] * phi[k + 1]).clamp(PROB_FLOOR, 1.0 - PROB_FLOOR);
    let var = sv.var_reads[sample] as f64;
    let refr = (sv.total_reads[sample] - sv.var_reads[sample]) as f64;
    llh += var * p.ln() + refr * (1.0 - p).ln();
  }
  llh
}

/// Analytic gradient of the column likelihood with respect to the logits,
/// chained through `phi = Z · softmax(logits)`.
fn logit_gradient(z: &Array2<f64>, supervariants: &[Supervariant], sample: usize, logits: &Array1<f64>) -> Array1<f64> {
  let n = z.nrows();
  let eta = softmax(logits.view());
  let phi = z.dot(&eta);

  let mut grad_phi = Array1::<f64>::zeros(n);
  for (k, sv) in supervariants.iter().enumerate() {
    let node = k + 1;
    let p = (sv.omega[sample] * phi[node]).clamp(PROB_FLOOR, 1.0 - PROB_FLOOR);
    let var = sv.var_reads[sample] as f64;
    let refr = (sv.total_reads[sample] - sv.var_reads[sample]) as f64;
    grad_phi[node] = sv.omega[sample] * (var / p - refr / (1.0 - p));
  }

  let grad_eta = z.t().dot(&grad_phi);
  let pull = eta.dot(&grad_eta);
  Array1::from_iter((0..n).map(|m| eta[m] * (grad_eta[m] - pull)))
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

  fn simplex_ok(eta: &Array2<f64>) {
    for s in 0..eta.ncols() {
      assert_abs_diff_eq!(eta.column(s).sum(), 1.0, epsilon = 1e-9);
    }
    assert!(eta.iter().all(|&e| e >= 0.0));
  }

  #[rstest]
  #[case::rprop(IterativeVariant::Rprop)]
  #[case::graddesc(IterativeVariant::GradDesc)]
  fn fitted_eta_stays_on_simplex(#[case] variant: IterativeVariant) {
    let t = TreeStructure::from_parents(&[0, 0]).unwrap();
    let supervariants = vec![
      sv("A", vec![40, 35], vec![100, 100]),
      sv("B", vec![10, 15], vec![100, 100]),
    ];
    let eta = fit_etas(&t, &supervariants, variant, 500, None).unwrap();
    simplex_ok(&eta);
  }

  #[rstest]
  fn rprop_recovers_dominant_node() {
    let t = TreeStructure::from_parents(&[0, 0]).unwrap();
    let supervariants = vec![sv("A", vec![40], vec![100]), sv("B", vec![10], vec![100])];
    let eta = fit_etas(&t, &supervariants, IterativeVariant::Rprop, 2000, None).unwrap();
    let z = ancestry(&t).unwrap();
    let phi = z.dot(&eta);
    assert!(phi[[1, 0]] > phi[[2, 0]]);
    assert_abs_diff_eq!(phi[[1, 0]], 0.8, epsilon = 0.05);
    assert_abs_diff_eq!(phi[[2, 0]], 0.2, epsilon = 0.05);
  }

  #[rstest]
  fn iterations_improve_fit() {
    let t = TreeStructure::from_parents(&[0, 0]).unwrap();
    let supervariants = vec![sv("A", vec![40], vec![100]), sv("B", vec![10], vec![100])];
    let z = ancestry(&t).unwrap();

    let llh_of = |eta: &Array2<f64>| {
      let logits = eta.column(0).mapv(|e| (e + 1e-8).ln());
      column_llh(&z, &supervariants, 0, &logits)
    };

    let coarse = fit_etas(&t, &supervariants, IterativeVariant::Rprop, 5, None).unwrap();
    let fine = fit_etas(&t, &supervariants, IterativeVariant::Rprop, 1000, None).unwrap();
    // Tiny tolerance: rprop is not strictly monotone near convergence.
    assert!(llh_of(&fine) >= llh_of(&coarse) - 1e-6);
  }

  #[rstest]
  fn warm_start_is_respected() {
    let t = TreeStructure::from_parents(&[0, 0]).unwrap();
    let supervariants = vec![sv("A", vec![40], vec![100]), sv("B", vec![10], vec![100])];
    let mut warm = Array2::<f64>::zeros((3, 1));
    warm[[0, 0]] = 0.2;
    warm[[1, 0]] = 0.6;
    warm[[2, 0]] = 0.2;
    // Zero iterations: the result is exactly the (renormalized) warm start.
    let eta = fit_etas(&t, &supervariants, IterativeVariant::Rprop, 0, Some(&warm)).unwrap();
    simplex_ok(&eta);
    assert_abs_diff_eq!(eta[[1, 0]], 0.6, epsilon = 1e-6);
  }

  #[rstest]
  fn gradient_matches_finite_differences() {
    let t = TreeStructure::from_parents(&[0, 1]).unwrap();
    let supervariants = vec![sv("A", vec![30], vec![100]), sv("B", vec![20], vec![100])];
    let z = ancestry(&t).unwrap();
    let logits = ndarray::array![0.1, -0.4, 0.7];
    let grad = logit_gradient(&z, &supervariants, 0, &logits);
    let h = 1e-6;
    for m in 0..3 {
      let mut up = logits.clone();
      up[m] += h;
      let mut down = logits.clone();
      down[m] -= h;
      let numeric = (column_llh(&z, &supervariants, 0, &up) - column_llh(&z, &supervariants, 0, &down)) / (2.0 * h);
      assert_abs_diff_eq!(grad[m], numeric, epsilon = 1e-3);
    }
  }
}
