use std::cmp::Reverse;

use ndarray::Array1;
use ordered_float::OrderedFloat;

/// Applies a numerically stable softmax to a logit vector.
pub fn softmax(logits: &Array1<f32>) -> Array1<f32> {
    let max_val = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Array1<f32> = logits.mapv(|x| (x - max_val).exp());
    let sum_exp: f32 = exp_vals.sum();
    exp_vals.mapv(|v| v / sum_exp)
}

/// Selects the `k` most probable indices, descending by probability. Equal
/// probabilities rank the lower index first, so the ordering is
/// deterministic.
pub fn top_k(probabilities: &Array1<f32>, k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    ranked.sort_by_key(|&(index, prob)| (Reverse(OrderedFloat(prob)), index));
    ranked.truncate(k);
    ranked
}
