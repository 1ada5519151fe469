//! Stacked LSTM backbone.
//!
//! Built from explicit cells rather than a framework recurrence so
//! that the exact same single-step operation drives both the batched
//! teacher-forced training pass and the autoregressive inference walk,
//! and so the gate weights can be initialised Xavier-uniform
//! (input-hidden) / orthogonal (hidden-hidden) with zero biases.

use burn::module::{Module, Param};
use burn::nn::{Dropout, DropoutConfig};
use burn::tensor::activation::{sigmoid, tanh};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::init;

/// (cell, hidden), each (batch, d_hidden).
pub type CellState<B> = (Tensor<B, 2>, Tensor<B, 2>);

/// One cell state per layer.
pub type StackState<B> = Vec<CellState<B>>;

/// Single LSTM layer. Gates are packed [input, forget, cell, output]
/// along the last axis of both weight matrices.
#[derive(Module, Debug)]
pub struct LstmCell<B: Backend> {
    weight_ih: Param<Tensor<B, 2>>,
    weight_hh: Param<Tensor<B, 2>>,
    bias: Param<Tensor<B, 1>>,
    d_hidden: usize,
}

impl<B: Backend> LstmCell<B> {
    pub fn new(d_input: usize, d_hidden: usize, device: &B::Device) -> Self {
        Self {
            weight_ih: Param::from(init::xavier_uniform(d_input, 4 * d_hidden, device)),
            weight_hh: Param::from(init::orthogonal(d_hidden, 4 * d_hidden, device)),
            bias: Param::from(Tensor::zeros_device([4 * d_hidden], device)),
            d_hidden,
        }
    }

    /// Advance the cell by one step.
    pub fn step(
        &self,
        input: Tensor<B, 2>,
        state: Option<CellState<B>>,
    ) -> (Tensor<B, 2>, CellState<B>) {
        let [batch, _] = input.dims();
        let device = input.device();
        let (cell, hidden) = state.unwrap_or_else(|| {
            (
                Tensor::zeros_device([batch, self.d_hidden], &device),
                Tensor::zeros_device([batch, self.d_hidden], &device),
            )
        });

        let gates = input.matmul(self.weight_ih.val())
            + hidden.matmul(self.weight_hh.val())
            + self.bias.val().unsqueeze::<2>();

        let h = self.d_hidden;
        let input_gate = sigmoid(gates.clone().slice([0..batch, 0..h]));
        let forget_gate = sigmoid(gates.clone().slice([0..batch, h..2 * h]));
        let cell_gate = tanh(gates.clone().slice([0..batch, 2 * h..3 * h]));
        let output_gate = sigmoid(gates.slice([0..batch, 3 * h..4 * h]));

        let cell = forget_gate * cell + input_gate * cell_gate;
        let hidden = output_gate * tanh(cell.clone());
        (hidden.clone(), (cell, hidden))
    }
}

/// L stacked cells with inter-layer dropout (active only when L > 1,
/// and only on an autodiff backend).
#[derive(Module, Debug)]
pub struct StackedLstm<B: Backend> {
    layers: Vec<LstmCell<B>>,
    dropout: Dropout,
}

impl<B: Backend> StackedLstm<B> {
    pub fn new(
        d_input: usize,
        d_hidden: usize,
        num_layers: usize,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        assert!(num_layers >= 1, "backbone needs at least one layer");
        let layers = (0..num_layers)
            .map(|layer| {
                let input = if layer == 0 { d_input } else { d_hidden };
                LstmCell::new(input, d_hidden, device)
            })
            .collect();
        let prob = if num_layers > 1 { dropout } else { 0.0 };
        Self {
            layers,
            dropout: DropoutConfig::new(prob).init(),
        }
    }

    pub fn d_hidden(&self) -> usize {
        self.layers[0].d_hidden
    }

    /// One step through every layer, carrying per-layer state.
    pub fn step(
        &self,
        input: Tensor<B, 2>,
        state: Option<StackState<B>>,
    ) -> (Tensor<B, 2>, StackState<B>) {
        let mut states = Vec::with_capacity(self.layers.len());
        let mut x = input;
        for (layer_idx, layer) in self.layers.iter().enumerate() {
            let layer_state = state.as_ref().map(|s| s[layer_idx].clone());
            let (out, new_state) = layer.step(x, layer_state);
            x = if layer_idx + 1 < self.layers.len() {
                self.dropout.forward(out)
            } else {
                out
            };
            states.push(new_state);
        }
        (x, states)
    }

    /// Consume a whole (batch, seq, features) sequence; returns the
    /// top-layer hidden output at every step.
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, seq, features] = input.dims();
        let mut state = None;
        let mut outputs = Vec::with_capacity(seq);
        for t in 0..seq {
            let step_input = input
                .clone()
                .slice([0..batch, t..t + 1, 0..features])
                .reshape([batch, features]);
            let (out, new_state) = self.step(step_input, state);
            state = Some(new_state);
            outputs.push(out.reshape([batch, 1, self.d_hidden()]));
        }
        Tensor::cat(outputs, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    #[test]
    fn step_produces_expected_shapes_and_state() {
        <B as Backend>::seed(1);
        let device = Default::default();
        let lstm = StackedLstm::<B>::new(5, 4, 2, 0.1, &device);

        let input = Tensor::random_device([3, 5], Distribution::Normal(0.0, 1.0), &device);
        let (out, state) = lstm.step(input.clone(), None);
        assert_eq!(out.dims(), [3, 4]);
        assert_eq!(state.len(), 2);
        assert_eq!(state[0].0.dims(), [3, 4]);
        assert_eq!(state[0].1.dims(), [3, 4]);

        // carried state changes the output
        let (out2, _) = lstm.step(input, Some(state));
        let diff = (out2 - out).abs().mean().into_scalar();
        assert!(diff > 0.0);
    }

    #[test]
    fn sequence_forward_matches_manual_steps() {
        <B as Backend>::seed(2);
        let device = Default::default();
        let lstm = StackedLstm::<B>::new(3, 4, 1, 0.0, &device);

        let seq = Tensor::<B, 3>::random_device([2, 6, 3], Distribution::Normal(0.0, 1.0), &device);
        let full = lstm.forward(seq.clone());

        let mut state = None;
        for t in 0..6 {
            let step_input = seq.clone().slice([0..2, t..t + 1, 0..3]).reshape([2, 3]);
            let (out, new_state) = lstm.step(step_input, state);
            state = Some(new_state);

            let expected = full.clone().slice([0..2, t..t + 1, 0..4]).reshape([2, 4]);
            let max_diff = (out - expected).abs().max().into_scalar();
            assert_relative_eq!(max_diff, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn zero_biases_at_init() {
        <B as Backend>::seed(3);
        let device = Default::default();
        let cell = LstmCell::<B>::new(3, 4, &device);
        for v in cell.bias.val().into_data().value {
            assert_eq!(v, 0.0);
        }
    }
}
