//! Training loop: minibatches, validation split and early stopping
//!
//! The last `validation_split` fraction of rows is held out. Training rows are
//! reshuffled every epoch, and training stops once validation loss has failed
//! to improve for more than `patience` epochs.

use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TrainOptions;
use crate::error::{LexsubError, Result};
use crate::llm::model::LexicalModel;
use crate::llm::vocab::FactoredTarget;

/// Losses of one finished epoch
#[derive(Clone, Debug, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: Option<f32>,
}

/// Outcome of a training run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingReport {
    pub epochs: Vec<EpochStats>,
    pub stopped_early: bool,
    pub best_val_loss: Option<f32>,
}

impl TrainingReport {
    pub fn epochs_run(&self) -> usize {
        self.epochs.len()
    }
}

/// Tracks validation loss and decides when to stop
#[derive(Clone, Debug)]
pub struct EarlyStopping {
    patience: usize,
    best: f32,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        EarlyStopping {
            patience,
            best: f32::INFINITY,
            wait: 0,
        }
    }

    /// Record an epoch's validation loss; true means stop now
    pub fn should_stop(&mut self, val_loss: f32) -> bool {
        if val_loss < self.best {
            self.best = val_loss;
            self.wait = 0;
            return false;
        }
        if self.wait >= self.patience {
            return true;
        }
        self.wait += 1;
        false
    }

    pub fn best(&self) -> Option<f32> {
        self.best.is_finite().then_some(self.best)
    }
}

/// Keep only `rows` of a factored target
fn select_rows(target: &FactoredTarget, rows: &[usize]) -> FactoredTarget {
    FactoredTarget {
        base: target.base,
        digits: rows.iter().map(|&r| target.digits[r].clone()).collect(),
    }
}

/// Tensors for one minibatch: ids, mask and one-hot targets per factor
fn batch_tensors(
    model: &LexicalModel,
    inputs: &[Vec<u32>],
    targets: &[FactoredTarget],
    rows: &[usize],
) -> Result<(Tensor, Tensor, Vec<Tensor>)> {
    let batch_inputs: Vec<Vec<u32>> = rows.iter().map(|&r| inputs[r].clone()).collect();
    let ids = model.ids_tensor(&batch_inputs)?;
    let mask = model.mask_tensor(&batch_inputs)?;

    let one_hot = targets
        .iter()
        .map(|target| {
            let selected = select_rows(target, rows);
            Tensor::from_vec(selected.one_hot(), selected.shape(), model.device())
        })
        .collect::<candle_core::Result<Vec<_>>>()?;

    Ok((ids, mask, one_hot))
}

/// Accumulates per-token batch losses into a mean over all unmasked tokens
#[derive(Clone, Copy, Debug, Default)]
struct TokenMean {
    weighted: f32,
    tokens: f32,
}

impl TokenMean {
    /// `loss` is the batch loss, already averaged over the batch's `tokens`
    fn add(&mut self, loss: f32, tokens: f32) {
        self.weighted += loss * tokens;
        self.tokens += tokens;
    }

    fn mean(&self) -> f32 {
        if self.tokens > 0.0 {
            self.weighted / self.tokens
        } else {
            0.0
        }
    }
}

/// Mean per-token loss over `rows`, without dropout or updates
fn evaluate(
    model: &LexicalModel,
    inputs: &[Vec<u32>],
    targets: &[FactoredTarget],
    rows: &[usize],
    batch_size: usize,
) -> Result<f32> {
    let mut total = TokenMean::default();
    for chunk in rows.chunks(batch_size) {
        let (ids, mask, one_hot) = batch_tensors(model, inputs, targets, chunk)?;
        let logits = model.forward(&ids, &mask, false)?;
        let loss = model.loss(&logits, &one_hot, &mask)?.to_vec0::<f32>()?;
        total.add(loss, mask.sum_all()?.to_vec0::<f32>()?);
    }
    Ok(total.mean())
}

/// Split row indices into (train, validation), Keras style: validation is the tail
pub fn validation_split(num_rows: usize, fraction: f64) -> (Vec<usize>, Vec<usize>) {
    let split_at = (num_rows as f64 * (1.0 - fraction)) as usize;
    if fraction <= 0.0 || split_at == 0 || split_at >= num_rows {
        return ((0..num_rows).collect(), Vec::new());
    }
    ((0..split_at).collect(), (split_at..num_rows).collect())
}

/// Fit `model` (whose variables live in `varmap`) on inputs and factored targets
pub fn train(
    model: &LexicalModel,
    varmap: &VarMap,
    inputs: &[Vec<u32>],
    targets: &[FactoredTarget],
    options: &TrainOptions,
) -> Result<TrainingReport> {
    if inputs.is_empty() {
        return Err(LexsubError::invalid_input("no training sentences"));
    }
    if options.batch_size == 0 {
        return Err(LexsubError::config("batch_size must be positive"));
    }
    if targets.len() != model.config().num_factors {
        return Err(LexsubError::invalid_input(format!(
            "expected {} factored targets, got {}",
            model.config().num_factors,
            targets.len()
        )));
    }

    let (mut train_rows, val_rows) = validation_split(inputs.len(), options.validation_split);
    if val_rows.is_empty() {
        warn!(
            rows = inputs.len(),
            "Validation split is empty, training on all rows without early stopping"
        );
    }
    info!(
        train = train_rows.len(),
        validation = val_rows.len(),
        "Training split"
    );

    let mut optimizer = AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: options.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        },
    )?;

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut early_stopping = EarlyStopping::new(options.patience);
    let mut report = TrainingReport::default();
    let start_time = Instant::now();

    for epoch in 1..=options.num_epochs {
        let epoch_start = Instant::now();
        train_rows.shuffle(&mut rng);

        let mut total_loss = TokenMean::default();
        for (batch_idx, chunk) in train_rows.chunks(options.batch_size).enumerate() {
            let (ids, mask, one_hot) = batch_tensors(model, inputs, targets, chunk)?;
            let logits = model.forward(&ids, &mask, true)?;
            let loss = model.loss(&logits, &one_hot, &mask)?;
            optimizer.backward_step(&loss)?;

            let loss = loss.to_vec0::<f32>()?;
            total_loss.add(loss, mask.sum_all()?.to_vec0::<f32>()?);
            debug!(epoch, batch = batch_idx, loss, "Batch done");
        }
        let train_loss = total_loss.mean();

        let val_loss = if val_rows.is_empty() {
            None
        } else {
            Some(evaluate(model, inputs, targets, &val_rows, options.batch_size)?)
        };

        info!(
            epoch,
            max_epochs = options.num_epochs,
            train_loss,
            val_loss = ?val_loss,
            secs = epoch_start.elapsed().as_secs_f32(),
            "Epoch finished"
        );
        report.epochs.push(EpochStats {
            epoch,
            train_loss,
            val_loss,
        });

        if let Some(val_loss) = val_loss {
            if early_stopping.should_stop(val_loss) {
                info!(epoch, "Validation loss stopped improving, stopping early");
                report.stopped_early = true;
                break;
            }
        }
    }

    report.best_val_loss = early_stopping.best();
    info!(
        epochs = report.epochs_run(),
        secs = start_time.elapsed().as_secs_f32(),
        "Training complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_split_takes_tail() {
        let (train, val) = validation_split(20, 0.1);
        assert_eq!(train, (0..18).collect::<Vec<_>>());
        assert_eq!(val, vec![18, 19]);
    }

    #[test]
    fn test_validation_split_small_batches() {
        // 2 rows: 1 train, 1 validation
        let (train, val) = validation_split(2, 0.1);
        assert_eq!((train.len(), val.len()), (1, 1));

        // 1 row cannot be split
        let (train, val) = validation_split(1, 0.1);
        assert_eq!((train.len(), val.len()), (1, 0));

        let (train, val) = validation_split(5, 0.0);
        assert_eq!((train.len(), val.len()), (5, 0));
    }

    #[test]
    fn test_early_stopping_patience_zero() {
        let mut stopper = EarlyStopping::new(0);
        assert!(!stopper.should_stop(1.0));
        assert!(!stopper.should_stop(0.8));
        assert!(stopper.should_stop(0.9));
        assert_eq!(stopper.best(), Some(0.8));
    }

    #[test]
    fn test_early_stopping_patience_two() {
        let mut stopper = EarlyStopping::new(2);
        assert!(!stopper.should_stop(1.0));
        assert!(!stopper.should_stop(1.1));
        assert!(!stopper.should_stop(1.2));
        assert!(stopper.should_stop(1.3));
    }

    #[test]
    fn test_token_mean_weights_by_tokens() {
        let mut total = TokenMean::default();
        total.add(1.0, 3.0);
        total.add(3.0, 1.0);
        assert!((total.mean() - 1.5).abs() < 1e-6);
        assert_eq!(TokenMean::default().mean(), 0.0);
    }

    #[test]
    fn test_select_rows() {
        let target = FactoredTarget {
            base: 2,
            digits: vec![vec![0, 1], vec![1, 1], vec![1, 0]],
        };
        let selected = select_rows(&target, &[2, 0]);
        assert_eq!(selected.digits, vec![vec![1, 0], vec![0, 1]]);
    }
}
