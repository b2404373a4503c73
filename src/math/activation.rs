//! Activation functions for the recurrent classifier.
//!
//! - **Sigmoid**: gate squashing, written in the overflow-safe form
//! - **Softmax**: max-shifted so large logits cannot overflow `exp`

use nalgebra::DVector;

/// Logistic sigmoid.
///
/// # Example
///
/// ```
/// use exercise_form::math::sigmoid;
///
/// assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
/// assert!(sigmoid(800.0) <= 1.0);
/// ```
#[inline]
#[must_use]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Numerically stable softmax.
///
/// Falls back to a uniform distribution when the exponentials do not sum to
/// a finite positive value.
#[must_use]
pub fn softmax(logits: &DVector<f64>) -> DVector<f64> {
    if logits.is_empty() {
        return DVector::zeros(0);
    }
    let max = logits.max();
    let exps = logits.map(|l| (l - max).exp());
    let sum: f64 = exps.sum();

    if sum > 0.0 && sum.is_finite() {
        exps / sum
    } else {
        DVector::from_element(logits.len(), 1.0 / logits.len() as f64)
    }
}

/// Index and value of the largest element. Ties resolve to the lowest index.
#[must_use]
pub fn argmax(values: &DVector<f64>) -> Option<(usize, f64)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}
