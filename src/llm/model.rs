//! Bidirectional RNN language model with a factored softmax output
//!
//! Layout:
//! - Embedding (vocab_size × word_dim), id 0 masks padded timesteps
//! - Forward and backward recurrent layers, `word_dim / 2` wide each
//! - Per-timestep concatenation of both directions
//! - One dense softmax head per factor digit, `factor_base` wide
//!
//! At timestep `t` the model predicts input `t + 1`, so the backward context
//! used there summarises inputs `t + 2..` only.

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{embedding, linear, linear_no_bias, ops, Embedding, Linear, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};

use crate::llm::vocab::PAD_ID;

/// Per-factor probabilities, indexed `[row][timestep][digit]`
pub type FactorPredictions = Vec<Vec<Vec<f32>>>;

/// Recurrence used by both directions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellKind {
    SimpleRnn,
    Lstm,
}

/// Architecture description, persisted next to the weights
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub word_dim: usize,
    pub factor_base: usize,
    pub num_factors: usize,
    /// Input timesteps the model was trained on
    pub sequence_length: usize,
    pub cell: CellKind,
    pub embedding_dropout: f32,
    pub recurrent_dropout: f32,
}

impl ModelConfig {
    /// Width of each recurrent direction
    pub fn hidden_size(&self) -> usize {
        self.word_dim / 2
    }

    /// Parameter count per layer, in construction order
    pub fn parameter_counts(&self) -> Vec<(String, usize)> {
        let h = self.hidden_size();
        let gates = match self.cell {
            CellKind::SimpleRnn => 1,
            CellKind::Lstm => 4,
        };
        let rnn = gates * (self.word_dim * h + h + h * h);

        let mut counts = vec![
            ("embedding".to_string(), self.vocab_size * self.word_dim),
            ("forward_rnn".to_string(), rnn),
            ("backward_rnn".to_string(), rnn),
        ];
        for i in 0..self.num_factors {
            counts.push((
                format!("factor_output_{}", i),
                2 * h * self.factor_base + self.factor_base,
            ));
        }
        counts
    }

    /// Total number of trainable parameters
    pub fn parameter_count(&self) -> usize {
        self.parameter_counts().iter().map(|(_, n)| n).sum()
    }
}

/// Hidden state carried between timesteps
#[derive(Clone, Debug)]
pub struct RecurrentState {
    pub h: Tensor,
    /// Cell memory, LSTM only
    pub c: Option<Tensor>,
}

/// One recurrent layer, stepped a timestep at a time
pub trait RecurrentCell {
    fn zero_state(&self, batch_size: usize) -> candle_core::Result<RecurrentState>;

    /// Advance the state by one input of shape `(batch, in_dim)`
    fn step(&self, input: &Tensor, state: &RecurrentState) -> candle_core::Result<RecurrentState>;
}

/// Elman cell: `h' = tanh(x W + h U + b)`
pub struct SimpleRnnCell {
    input: Linear,
    recurrent: Linear,
    hidden_size: usize,
    device: Device,
}

impl SimpleRnnCell {
    pub fn new(in_dim: usize, hidden_size: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            input: linear(in_dim, hidden_size, vb.pp("input"))?,
            recurrent: linear_no_bias(hidden_size, hidden_size, vb.pp("recurrent"))?,
            hidden_size,
            device: vb.device().clone(),
        })
    }
}

impl RecurrentCell for SimpleRnnCell {
    fn zero_state(&self, batch_size: usize) -> candle_core::Result<RecurrentState> {
        Ok(RecurrentState {
            h: Tensor::zeros((batch_size, self.hidden_size), DType::F32, &self.device)?,
            c: None,
        })
    }

    fn step(&self, input: &Tensor, state: &RecurrentState) -> candle_core::Result<RecurrentState> {
        let h = (self.input.forward(input)? + self.recurrent.forward(&state.h)?)?.tanh()?;
        Ok(RecurrentState { h, c: None })
    }
}

/// LSTM cell with gates in input, forget, cell, output order
pub struct LstmCell {
    input: Linear,
    recurrent: Linear,
    hidden_size: usize,
    device: Device,
}

impl LstmCell {
    pub fn new(in_dim: usize, hidden_size: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            input: linear(in_dim, 4 * hidden_size, vb.pp("input"))?,
            recurrent: linear_no_bias(hidden_size, 4 * hidden_size, vb.pp("recurrent"))?,
            hidden_size,
            device: vb.device().clone(),
        })
    }
}

impl RecurrentCell for LstmCell {
    fn zero_state(&self, batch_size: usize) -> candle_core::Result<RecurrentState> {
        let zeros = Tensor::zeros((batch_size, self.hidden_size), DType::F32, &self.device)?;
        Ok(RecurrentState {
            h: zeros.clone(),
            c: Some(zeros),
        })
    }

    fn step(&self, input: &Tensor, state: &RecurrentState) -> candle_core::Result<RecurrentState> {
        let gates = (self.input.forward(input)? + self.recurrent.forward(&state.h)?)?;
        let chunks = gates.chunk(4, 1)?;
        let i = ops::sigmoid(&chunks[0])?;
        let f = ops::sigmoid(&chunks[1])?;
        let g = chunks[2].tanh()?;
        let o = ops::sigmoid(&chunks[3])?;

        let c_prev = match &state.c {
            Some(c) => c.clone(),
            None => state.h.zeros_like()?,
        };
        let c = ((f * c_prev)? + (i * g)?)?;
        let h = (o * c.tanh()?)?;
        Ok(RecurrentState { h, c: Some(c) })
    }
}

/// Step a cell, keeping the previous state wherever `mask` (batch, 1) is 0
fn masked_step(
    cell: &dyn RecurrentCell,
    input: &Tensor,
    state: &RecurrentState,
    mask: &Tensor,
) -> candle_core::Result<RecurrentState> {
    let next = cell.step(input, state)?;
    let blend = |new: &Tensor, old: &Tensor| -> candle_core::Result<Tensor> {
        old + mask.broadcast_mul(&(new - old)?)?
    };

    let h = blend(&next.h, &state.h)?;
    let c = match (&next.c, &state.c) {
        (Some(new), Some(old)) => Some(blend(new, old)?),
        (new, _) => new.clone(),
    };
    Ok(RecurrentState { h, c })
}

fn build_cell(
    kind: CellKind,
    in_dim: usize,
    hidden_size: usize,
    vb: VarBuilder,
) -> candle_core::Result<Box<dyn RecurrentCell>> {
    Ok(match kind {
        CellKind::SimpleRnn => Box::new(SimpleRnnCell::new(in_dim, hidden_size, vb)?),
        CellKind::Lstm => Box::new(LstmCell::new(in_dim, hidden_size, vb)?),
    })
}

/// Use Metal GPU on macOS when available, CPU otherwise
pub fn select_device() -> Device {
    #[cfg(target_os = "macos")]
    let device = Device::new_metal(0).unwrap_or(Device::Cpu);
    #[cfg(not(target_os = "macos"))]
    let device = Device::Cpu;
    device
}

/// The trainable network
pub struct LexicalModel {
    config: ModelConfig,
    device: Device,
    embedding: Embedding,
    forward_rnn: Box<dyn RecurrentCell>,
    backward_rnn: Box<dyn RecurrentCell>,
    factor_outputs: Vec<Linear>,
}

impl LexicalModel {
    /// Build the network, creating (or reusing) its variables in `varmap`
    pub fn new(config: ModelConfig, varmap: &VarMap, device: &Device) -> candle_core::Result<Self> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        let hidden = config.hidden_size();

        let embedding = embedding(config.vocab_size, config.word_dim, vb.pp("embedding"))?;
        let forward_rnn = build_cell(config.cell, config.word_dim, hidden, vb.pp("forward_rnn"))?;
        let backward_rnn = build_cell(config.cell, config.word_dim, hidden, vb.pp("backward_rnn"))?;
        let factor_outputs = (0..config.num_factors)
            .map(|i| linear(2 * hidden, config.factor_base, vb.pp(format!("factor_output_{}", i))))
            .collect::<candle_core::Result<Vec<_>>>()?;

        Ok(Self {
            config,
            device: device.clone(),
            embedding,
            forward_rnn,
            backward_rnn,
            factor_outputs,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// `(rows, timesteps)` id tensor for a rectangular batch
    pub fn ids_tensor(&self, rows: &[Vec<u32>]) -> candle_core::Result<Tensor> {
        let steps = rows.first().map(Vec::len).unwrap_or(0);
        let flat: Vec<u32> = rows.iter().flatten().copied().collect();
        Tensor::from_vec(flat, (rows.len(), steps), &self.device)
    }

    /// `(rows, timesteps)` mask, 1.0 for real tokens and 0.0 for padding
    pub fn mask_tensor(&self, rows: &[Vec<u32>]) -> candle_core::Result<Tensor> {
        let steps = rows.first().map(Vec::len).unwrap_or(0);
        let flat: Vec<f32> = rows
            .iter()
            .flatten()
            .map(|&id| if id == PAD_ID { 0.0 } else { 1.0 })
            .collect();
        Tensor::from_vec(flat, (rows.len(), steps), &self.device)
    }

    fn dropout(xs: Tensor, p: f32, train: bool) -> candle_core::Result<Tensor> {
        if train && p > 0.0 {
            ops::dropout(&xs, p)
        } else {
            Ok(xs)
        }
    }

    /// Run one direction over every timestep, returning states in forward time
    fn run_direction(
        cell: &dyn RecurrentCell,
        embedded: &Tensor,
        mask: &Tensor,
        reverse: bool,
    ) -> candle_core::Result<Vec<Tensor>> {
        let (batch, steps, _) = embedded.dims3()?;
        let mut state = cell.zero_state(batch)?;
        let mut outputs = Vec::with_capacity(steps);

        let order: Box<dyn Iterator<Item = usize>> = if reverse {
            Box::new((0..steps).rev())
        } else {
            Box::new(0..steps)
        };
        for t in order {
            let x = embedded.narrow(1, t, 1)?.squeeze(1)?;
            let m = mask.narrow(1, t, 1)?;
            state = masked_step(cell, &x, &state, &m)?;
            outputs.push(state.h.clone());
        }

        if reverse {
            outputs.reverse();
        }
        Ok(outputs)
    }

    /// Per-factor logits, each `(rows, timesteps, factor_base)`
    pub fn forward(
        &self,
        ids: &Tensor,
        mask: &Tensor,
        train: bool,
    ) -> candle_core::Result<Vec<Tensor>> {
        let (batch, steps) = ids.dims2()?;
        let embedded = self.embedding.forward(ids)?;
        let embedded = Self::dropout(embedded, self.config.embedding_dropout, train)?;

        let forward_states = Self::run_direction(&*self.forward_rnn, &embedded, mask, false)?;
        let backward_states = Self::run_direction(&*self.backward_rnn, &embedded, mask, true)?;

        // Backward context for target t+1 starts after it, at input t+2
        let zeros = Tensor::zeros((batch, self.config.hidden_size()), DType::F32, &self.device)?;
        let backward_context: Vec<Tensor> = (0..steps)
            .map(|t| backward_states.get(t + 2).cloned().unwrap_or_else(|| zeros.clone()))
            .collect();

        let forward_out = Tensor::stack(&forward_states, 1)?;
        let backward_out = Tensor::stack(&backward_context, 1)?;
        let merged = Tensor::cat(&[&forward_out, &backward_out], 2)?;
        let merged = Self::dropout(merged, self.config.recurrent_dropout, train)?;

        self.factor_outputs.iter().map(|head| head.forward(&merged)).collect()
    }

    /// Summed masked cross-entropy over all factors
    ///
    /// `targets` are one-hot `(rows, timesteps, factor_base)` tensors, one per
    /// factor; `mask` is `(rows, timesteps)`.
    pub fn loss(
        &self,
        logits: &[Tensor],
        targets: &[Tensor],
        mask: &Tensor,
    ) -> candle_core::Result<Tensor> {
        let tokens = mask.sum_all()?;
        let mut losses = Vec::with_capacity(logits.len());
        for (logit, target) in logits.iter().zip(targets) {
            let log_probs = ops::log_softmax(logit, D::Minus1)?;
            let nll = log_probs.mul(target)?.sum(D::Minus1)?.neg()?;
            let masked = nll.mul(mask)?.sum_all()?;
            losses.push(masked.div(&tokens)?);
        }
        Tensor::stack(&losses, 0)?.sum_all()
    }

    /// Inference forward pass: per-factor softmax probabilities, no dropout
    pub fn predict(&self, rows: &[Vec<u32>]) -> candle_core::Result<Vec<FactorPredictions>> {
        let ids = self.ids_tensor(rows)?;
        let mask = self.mask_tensor(rows)?;
        self.forward(&ids, &mask, false)?
            .iter()
            .map(|logits| ops::softmax_last_dim(logits)?.to_vec3::<f32>())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config(cell: CellKind) -> ModelConfig {
        ModelConfig {
            vocab_size: 9,
            word_dim: 6,
            factor_base: 3,
            num_factors: 2,
            sequence_length: 5,
            cell,
            embedding_dropout: 0.5,
            recurrent_dropout: 0.2,
        }
    }

    #[test]
    fn test_parameter_count() {
        let config = tiny_config(CellKind::SimpleRnn);
        // 54 + 2 * (18 + 3 + 9) + 2 * (18 + 3)
        assert_eq!(config.parameter_count(), 54 + 60 + 42);

        let lstm = tiny_config(CellKind::Lstm);
        assert_eq!(lstm.parameter_count(), 54 + 240 + 42);
    }

    #[test]
    fn test_output_shapes_and_distributions() {
        for cell in [CellKind::SimpleRnn, CellKind::Lstm] {
            let varmap = VarMap::new();
            let model = LexicalModel::new(tiny_config(cell), &varmap, &Device::Cpu).unwrap();
            let rows = vec![vec![0, 0, 2, 4, 5], vec![2, 6, 7, 8, 4]];

            let predictions = model.predict(&rows).unwrap();
            assert_eq!(predictions.len(), 2);
            for factor in &predictions {
                assert_eq!(factor.len(), 2);
                assert_eq!(factor[0].len(), 5);
                for dist in factor.iter().flatten() {
                    assert_eq!(dist.len(), 3);
                    let total: f32 = dist.iter().sum();
                    assert!((total - 1.0).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_leading_padding_does_not_change_predictions() {
        let varmap = VarMap::new();
        let model = LexicalModel::new(tiny_config(CellKind::Lstm), &varmap, &Device::Cpu).unwrap();

        let short = model.predict(&[vec![2, 4, 5]]).unwrap();
        let padded = model.predict(&[vec![0, 0, 2, 4, 5]]).unwrap();
        for (a, b) in short.iter().zip(&padded) {
            for (x, y) in a[0].iter().zip(&b[0][2..]) {
                for (p, q) in x.iter().zip(y) {
                    assert!((p - q).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_next_input_does_not_reach_its_own_prediction() {
        for cell in [CellKind::SimpleRnn, CellKind::Lstm] {
            let varmap = VarMap::new();
            let model = LexicalModel::new(tiny_config(cell), &varmap, &Device::Cpu).unwrap();

            // Only input 2 differs, so timesteps 0 and 1 (predicting inputs 1 and 2) must agree
            let base = model.predict(&[vec![2, 4, 5, 6, 3]]).unwrap();
            let swapped = model.predict(&[vec![2, 4, 7, 6, 3]]).unwrap();
            for (a, b) in base.iter().zip(&swapped) {
                for t in 0..2 {
                    for (p, q) in a[0][t].iter().zip(&b[0][t]) {
                        assert!((p - q).abs() < 1e-6, "{cell:?} timestep {t}: {p} vs {q}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_loss_is_finite_and_positive() {
        let varmap = VarMap::new();
        let model =
            LexicalModel::new(tiny_config(CellKind::SimpleRnn), &varmap, &Device::Cpu).unwrap();
        let rows = vec![vec![0, 2, 4, 5]];
        let ids = model.ids_tensor(&rows).unwrap();
        let mask = model.mask_tensor(&rows).unwrap();
        let logits = model.forward(&ids, &mask, true).unwrap();

        let one_hot = Tensor::from_vec(
            vec![1f32, 0., 0., 0., 1., 0., 0., 0., 1., 1., 0., 0.],
            (1, 4, 3),
            &Device::Cpu,
        )
        .unwrap();
        let targets = vec![one_hot.clone(), one_hot];
        let loss = model.loss(&logits, &targets, &mask).unwrap().to_vec0::<f32>().unwrap();
        assert!(loss.is_finite());
        assert!(loss > 0.0);
    }
}
