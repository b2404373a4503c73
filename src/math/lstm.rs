//! Long short-term memory cells and bidirectional layers.
//!
//! Gate rows of the stacked weight matrices are ordered input, forget,
//! cell candidate, output:
//!
//! ```text
//! z = W x + U h_prev + b          (4H)
//! i = σ(z_i)   f = σ(z_f)   g = tanh(z_g)   o = σ(z_o)
//! c = f ⊙ c_prev + i ⊙ g
//! h = o ⊙ tanh(c)
//! ```
//!
//! Forward passes return a trace holding every intermediate needed for
//! backpropagation through time.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::activation::sigmoid;

/// Single-direction LSTM cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmCell {
    /// Input weights, `4H × I`.
    pub(crate) w_input: DMatrix<f64>,
    /// Recurrent weights, `4H × H`.
    pub(crate) w_hidden: DMatrix<f64>,
    /// Gate bias, `4H`.
    pub(crate) bias: DVector<f64>,
}

/// Gradients with the same shapes as an [`LstmCell`].
#[derive(Debug, Clone, PartialEq)]
pub struct CellGrads {
    pub w_input: DMatrix<f64>,
    pub w_hidden: DMatrix<f64>,
    pub bias: DVector<f64>,
}

#[derive(Debug, Clone)]
struct CellStep {
    x: DVector<f64>,
    h_prev: DVector<f64>,
    c_prev: DVector<f64>,
    i: DVector<f64>,
    f: DVector<f64>,
    g: DVector<f64>,
    o: DVector<f64>,
    c: DVector<f64>,
    h: DVector<f64>,
}

/// Intermediates of one [`LstmCell::forward`] pass.
#[derive(Debug, Clone, Default)]
pub struct CellTrace {
    steps: Vec<CellStep>,
}

impl CellTrace {
    /// Hidden state after each step.
    pub fn hidden_states(&self) -> impl Iterator<Item = &DVector<f64>> {
        self.steps.iter().map(|s| &s.h)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl LstmCell {
    /// Uniform initialization in `[-1/√H, 1/√H]`.
    pub fn new<R: Rng>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let k = 1.0 / (hidden_size.max(1) as f64).sqrt();
        let gates = 4 * hidden_size;
        Self {
            w_input: DMatrix::from_fn(gates, input_size, |_, _| rng.random_range(-k..=k)),
            w_hidden: DMatrix::from_fn(gates, hidden_size, |_, _| rng.random_range(-k..=k)),
            bias: DVector::from_fn(gates, |_, _| rng.random_range(-k..=k)),
        }
    }

    #[must_use]
    pub fn input_size(&self) -> usize {
        self.w_input.ncols()
    }

    #[must_use]
    pub fn hidden_size(&self) -> usize {
        self.w_hidden.ncols()
    }

    /// Shapes agree with each other.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let h = self.hidden_size();
        self.w_input.nrows() == 4 * h && self.w_hidden.nrows() == 4 * h && self.bias.len() == 4 * h
    }

    /// Run the cell over `xs` from zero initial state.
    #[must_use]
    pub fn forward(&self, xs: &[DVector<f64>]) -> CellTrace {
        let h = self.hidden_size();
        let mut h_prev = DVector::<f64>::zeros(h);
        let mut c_prev = DVector::<f64>::zeros(h);
        let mut steps = Vec::with_capacity(xs.len());

        for x in xs {
            let z = &self.w_input * x + &self.w_hidden * &h_prev + &self.bias;

            let i = z.rows(0, h).map(sigmoid);
            let f = z.rows(h, h).map(sigmoid);
            let g = z.rows(2 * h, h).map(f64::tanh);
            let o = z.rows(3 * h, h).map(sigmoid);

            let c = f.component_mul(&c_prev) + i.component_mul(&g);
            let h_t = o.component_mul(&c.map(f64::tanh));

            steps.push(CellStep {
                x: x.clone(),
                h_prev: std::mem::replace(&mut h_prev, h_t.clone()),
                c_prev: std::mem::replace(&mut c_prev, c.clone()),
                i,
                f,
                g,
                o,
                c,
                h: h_t,
            });
        }

        CellTrace { steps }
    }

    /// Backpropagate through time.
    ///
    /// `dhs[t]` is the loss gradient arriving at the hidden output of step
    /// `t`. Returns the parameter gradients and the gradient with respect to
    /// each input.
    #[must_use]
    pub fn backward(&self, trace: &CellTrace, dhs: &[DVector<f64>]) -> (CellGrads, Vec<DVector<f64>>) {
        let h = self.hidden_size();
        let mut grads = CellGrads::zeros_like(self);
        let mut dxs = vec![DVector::zeros(self.input_size()); trace.steps.len()];

        let mut dh_next = DVector::<f64>::zeros(h);
        let mut dc_next = DVector::<f64>::zeros(h);
        let mut dz = DVector::<f64>::zeros(4 * h);

        for (t, step) in trace.steps.iter().enumerate().rev() {
            let dh = match dhs.get(t) {
                Some(d) => d + &dh_next,
                None => dh_next.clone(),
            };

            let tc = step.c.map(f64::tanh);
            let d_o = dh.component_mul(&tc);
            let dc = dh.component_mul(&step.o).component_mul(&tc.map(|v| 1.0 - v * v)) + &dc_next;

            let d_i = dc.component_mul(&step.g);
            let d_g = dc.component_mul(&step.i);
            let d_f = dc.component_mul(&step.c_prev);
            dc_next = dc.component_mul(&step.f);

            dz.rows_mut(0, h)
                .copy_from(&d_i.component_mul(&step.i.map(|v| v * (1.0 - v))));
            dz.rows_mut(h, h)
                .copy_from(&d_f.component_mul(&step.f.map(|v| v * (1.0 - v))));
            dz.rows_mut(2 * h, h)
                .copy_from(&d_g.component_mul(&step.g.map(|v| 1.0 - v * v)));
            dz.rows_mut(3 * h, h)
                .copy_from(&d_o.component_mul(&step.o.map(|v| v * (1.0 - v))));

            grads.w_input.ger(1.0, &dz, &step.x, 1.0);
            grads.w_hidden.ger(1.0, &dz, &step.h_prev, 1.0);
            grads.bias += &dz;

            dxs[t] = self.w_input.tr_mul(&dz);
            dh_next = self.w_hidden.tr_mul(&dz);
        }

        (grads, dxs)
    }

    /// `θ ← θ - rate · ∇θ`.
    pub fn apply(&mut self, grads: &CellGrads, rate: f64) {
        self.w_input -= &grads.w_input * rate;
        self.w_hidden -= &grads.w_hidden * rate;
        self.bias -= &grads.bias * rate;
    }
}

impl CellGrads {
    #[must_use]
    pub fn zeros_like(cell: &LstmCell) -> Self {
        Self {
            w_input: DMatrix::zeros(cell.w_input.nrows(), cell.w_input.ncols()),
            w_hidden: DMatrix::zeros(cell.w_hidden.nrows(), cell.w_hidden.ncols()),
            bias: DVector::zeros(cell.bias.len()),
        }
    }

    /// Sum of squared entries.
    #[must_use]
    pub fn squared_norm(&self) -> f64 {
        self.w_input.norm_squared() + self.w_hidden.norm_squared() + self.bias.norm_squared()
    }
}

/// A forward and a backward [`LstmCell`] over the same input.
///
/// The output at step `t` is `[h_fwd(t); h_bwd(t)]`, where the backward cell
/// has consumed the input from the end down to `t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiLstmLayer {
    pub(crate) forward: LstmCell,
    pub(crate) backward: LstmCell,
}

/// Gradients of a [`BiLstmLayer`].
#[derive(Debug, Clone, PartialEq)]
pub struct LayerGrads {
    pub forward: CellGrads,
    pub backward: CellGrads,
}

/// Intermediates of one [`BiLstmLayer::forward`] pass.
#[derive(Debug, Clone, Default)]
pub struct LayerTrace {
    forward: CellTrace,
    /// Trace over the reversed input.
    backward: CellTrace,
}

impl BiLstmLayer {
    pub fn new<R: Rng>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        Self {
            forward: LstmCell::new(input_size, hidden_size, rng),
            backward: LstmCell::new(input_size, hidden_size, rng),
        }
    }

    #[must_use]
    pub fn input_size(&self) -> usize {
        self.forward.input_size()
    }

    #[must_use]
    pub fn hidden_size(&self) -> usize {
        self.forward.hidden_size()
    }

    /// Width of each output step, `2H`.
    #[must_use]
    pub fn output_size(&self) -> usize {
        2 * self.hidden_size()
    }

    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.forward.is_consistent()
            && self.backward.is_consistent()
            && self.forward.input_size() == self.backward.input_size()
            && self.forward.hidden_size() == self.backward.hidden_size()
    }

    /// Run both directions and return the trace plus the per-step outputs.
    #[must_use]
    pub fn forward(&self, xs: &[DVector<f64>]) -> (LayerTrace, Vec<DVector<f64>>) {
        let reversed: Vec<DVector<f64>> = xs.iter().rev().cloned().collect();
        let trace = LayerTrace {
            forward: self.forward.forward(xs),
            backward: self.backward.forward(&reversed),
        };

        let fwd: Vec<&DVector<f64>> = trace.forward.hidden_states().collect();
        let bwd: Vec<&DVector<f64>> = trace.backward.hidden_states().collect();
        let n = xs.len();
        let outputs = (0..n)
            .map(|t| concat(fwd[t], bwd[n - 1 - t]))
            .collect();

        (trace, outputs)
    }

    /// Backpropagate output gradients `douts` (one `2H` vector per step).
    #[must_use]
    pub fn backward(&self, trace: &LayerTrace, douts: &[DVector<f64>]) -> (LayerGrads, Vec<DVector<f64>>) {
        let h = self.hidden_size();
        let n = douts.len();

        let d_fwd: Vec<DVector<f64>> = douts.iter().map(|d| d.rows(0, h).into_owned()).collect();
        let d_bwd: Vec<DVector<f64>> = douts
            .iter()
            .rev()
            .map(|d| d.rows(h, h).into_owned())
            .collect();

        let (g_fwd, dx_fwd) = self.forward.backward(&trace.forward, &d_fwd);
        let (g_bwd, dx_bwd) = self.backward.backward(&trace.backward, &d_bwd);

        let dxs = (0..n).map(|t| &dx_fwd[t] + &dx_bwd[n - 1 - t]).collect();

        (
            LayerGrads {
                forward: g_fwd,
                backward: g_bwd,
            },
            dxs,
        )
    }

    pub fn apply(&mut self, grads: &LayerGrads, rate: f64) {
        self.forward.apply(&grads.forward, rate);
        self.backward.apply(&grads.backward, rate);
    }
}

impl LayerGrads {
    #[must_use]
    pub fn squared_norm(&self) -> f64 {
        self.forward.squared_norm() + self.backward.squared_norm()
    }
}

/// Stack two column vectors.
#[must_use]
pub fn concat(a: &DVector<f64>, b: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(a.len() + b.len(), a.iter().chain(b.iter()).copied())
}
