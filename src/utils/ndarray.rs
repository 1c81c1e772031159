use ndarray::{Array1, ArrayView1};

#[inline]
pub fn log_sum_exp(x: ArrayView1<f64>) -> f64 {
  let max = x.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
  if max.is_infinite() {
    return max;
  }
  max + x.mapv(|v| (v - max).exp()).sum().ln()
}

/// Numerically stable softmax of a vector of unconstrained logits.
pub fn softmax(x: ArrayView1<f64>) -> Array1<f64> {
  let lse = log_sum_exp(x);
  x.mapv(|v| (v - lse).exp())
}
