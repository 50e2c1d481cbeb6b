//! WordReplacer: the train / save / load / substitute pipeline
//!
//! One instance owns the vocabulary and the network. Training and loading
//! replace both; substitute queries only read them.

use candle_core::Device;
use candle_nn::VarMap;
use tracing::{debug, info, warn};

use crate::config::TrainOptions;
use crate::error::{LexsubError, Result};
use crate::llm::factoring;
use crate::llm::model::{select_device, CellKind, FactorPredictions, LexicalModel, ModelConfig};
use crate::llm::scoring::Substitute;
use crate::llm::train::{self, TrainingReport};
use crate::llm::vocab::{DataIndexer, FactoredTarget, IndexMode};
use crate::persistence::{self, ModelArchive};

/// A built network together with the variables it reads
struct TrainedModel {
    model: LexicalModel,
    varmap: VarMap,
}

/// Inputs and factored targets prepared from raw sentences
pub struct ProcessedData {
    pub lengths: Vec<usize>,
    pub inputs: Vec<Vec<u32>>,
    pub targets: Vec<FactoredTarget>,
}

/// Lexical substitution pipeline
pub struct WordReplacer {
    data_indexer: DataIndexer,
    trained: Option<TrainedModel>,
    device: Device,
}

impl WordReplacer {
    pub fn new() -> Self {
        Self::with_device(select_device())
    }

    pub fn with_device(device: Device) -> Self {
        WordReplacer {
            data_indexer: DataIndexer::new(),
            trained: None,
            device,
        }
    }

    pub fn data_indexer(&self) -> &DataIndexer {
        &self.data_indexer
    }

    pub fn model_config(&self) -> Option<&ModelConfig> {
        self.trained.as_ref().map(|t| t.model.config())
    }

    fn trained(&self) -> Result<&TrainedModel> {
        self.trained.as_ref().ok_or(LexsubError::ModelNotTrained)
    }

    /// Index sentences and split them into next-word inputs and targets
    ///
    /// Inputs are positions `0..n-1` and targets `1..n`, so timestep `t`
    /// predicts the word after it.
    pub fn process_data(
        &mut self,
        sentences: &[String],
        max_length: Option<usize>,
        factor_base: usize,
        tokenize: bool,
        mode: IndexMode,
    ) -> Result<ProcessedData> {
        let batch = self
            .data_indexer
            .index_data(sentences, max_length, tokenize, mode);
        let targets = self
            .data_indexer
            .factor_target_indices(&batch.targets(), factor_base)?;
        Ok(ProcessedData {
            inputs: batch.inputs(),
            lengths: batch.lengths,
            targets,
        })
    }

    fn log_summary(config: &ModelConfig) {
        for (layer, params) in config.parameter_counts() {
            info!(layer = %layer, params, "Layer");
        }
        info!(
            total = config.parameter_count(),
            cell = ?config.cell,
            sequence_length = config.sequence_length,
            "Model summary"
        );
    }

    /// Build the vocabulary from `sentences`, then construct and fit a new model
    pub fn train_model(
        &mut self,
        sentences: &[String],
        options: &TrainOptions,
    ) -> Result<TrainingReport> {
        if sentences.is_empty() {
            return Err(LexsubError::invalid_input("no training sentences"));
        }
        if options.word_dim < 2 {
            return Err(LexsubError::config("word_dim must be at least 2"));
        }

        self.data_indexer = DataIndexer::new();
        self.trained = None;
        let data = self.process_data(
            sentences,
            None,
            options.factor_base,
            options.tokenize,
            IndexMode::Train,
        )?;

        let vocab_size = self.data_indexer.get_vocab_size();
        let num_factors = data.targets.len();
        info!(
            vocab_size,
            num_factors,
            factor_base = options.factor_base,
            capacity = factoring::capacity(options.factor_base, num_factors),
            "Vocabulary built"
        );

        let config = ModelConfig {
            vocab_size,
            word_dim: options.word_dim,
            factor_base: options.factor_base,
            num_factors,
            sequence_length: data.inputs.first().map(Vec::len).unwrap_or(0),
            cell: if options.use_lstm {
                CellKind::Lstm
            } else {
                CellKind::SimpleRnn
            },
            embedding_dropout: options.embedding_dropout,
            recurrent_dropout: options.recurrent_dropout,
        };

        let varmap = VarMap::new();
        let model = LexicalModel::new(config, &varmap, &self.device)?;
        Self::log_summary(model.config());

        let report = train::train(&model, &varmap, &data.inputs, &data.targets, options)?;
        self.trained = Some(TrainedModel { model, varmap });
        Ok(report)
    }

    /// Keep training the current model on more sentences
    ///
    /// The vocabulary is frozen: unseen words become `UNK`, and sentences are
    /// cut to the length the model was built for.
    pub fn continue_training(
        &mut self,
        sentences: &[String],
        options: &TrainOptions,
    ) -> Result<TrainingReport> {
        let config = self.trained()?.model.config().clone();
        let data = self.process_data(
            sentences,
            Some(config.sequence_length + 1),
            config.factor_base,
            options.tokenize,
            IndexMode::Lookup,
        )?;

        let trained = self.trained()?;
        train::train(&trained.model, &trained.varmap, &data.inputs, &data.targets, options)
    }

    /// Write vocabulary, architecture and weights to `<prefix>.lexsub`
    pub fn save_model(&self, model_serialization_prefix: &str) -> Result<()> {
        let trained = self.trained()?;
        let archive = ModelArchive::new(
            self.data_indexer.clone(),
            trained.model.config().clone(),
            persistence::export_tensors(&trained.varmap)?,
        );
        archive.save(&persistence::archive_path(model_serialization_prefix))
    }

    /// Restore a model saved with `save_model`, ready for inference or more training
    pub fn load_model(&mut self, model_serialization_prefix: &str) -> Result<()> {
        let archive = ModelArchive::load(&persistence::archive_path(model_serialization_prefix))?;
        if archive.indexer.get_vocab_size() != archive.config.vocab_size {
            return Err(LexsubError::persistence(format!(
                "vocabulary has {} words, model expects {}",
                archive.indexer.get_vocab_size(),
                archive.config.vocab_size
            )));
        }

        let mut varmap = VarMap::new();
        let model = LexicalModel::new(archive.config, &varmap, &self.device)?;
        persistence::import_tensors(&mut varmap, &archive.tensors, &self.device)?;
        Self::log_summary(model.config());

        self.data_indexer = archive.indexer;
        self.trained = Some(TrainedModel { model, varmap });
        Ok(())
    }

    /// `(batch, sequence_length)`; the batch dimension is unconstrained
    pub fn get_model_input_shape(&self) -> Result<(Option<usize>, usize)> {
        Ok((None, self.trained()?.model.config().sequence_length))
    }

    /// Per-factor probabilities for already indexed rows
    pub fn predict(&self, rows: &[Vec<u32>]) -> Result<Vec<FactorPredictions>> {
        Ok(self.trained()?.model.predict(rows)?)
    }

    /// Ranked substitutes for the word at `locations[i]` of `sentences[i]`
    ///
    /// A location that falls into the part of a sentence cut off at
    /// `train_sequence_length` gets an empty list.
    pub fn get_substitutes(
        &self,
        sentences: &[String],
        locations: &[usize],
        train_sequence_length: usize,
        num_substitutes: usize,
        tokenize: bool,
        search_space_size: usize,
    ) -> Result<Vec<Vec<Substitute>>> {
        if sentences.len() != locations.len() {
            return Err(LexsubError::invalid_input(format!(
                "{} sentences but {} locations",
                sentences.len(),
                locations.len()
            )));
        }
        let trained = self.trained()?;
        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        // +1 because the last position is dropped from the inputs
        let max_train_length = train_sequence_length + 1;
        let batch = self
            .data_indexer
            .lookup_data(sentences, Some(max_train_length), tokenize);
        let predictions = trained.model.predict(&batch.inputs())?;
        let search_space = self.data_indexer.search_space(search_space_size);

        let mut all_substitutes = Vec::with_capacity(sentences.len());
        for (sentence_id, (&length, &location)) in batch.lengths.iter().zip(locations).enumerate() {
            let sentence_length = length.min(max_train_length);
            // Skip the prediction made from </s>'s slot, which is not an input
            let prediction_length = sentence_length - 1;
            if location >= prediction_length {
                warn!(
                    sentence_id,
                    location, prediction_length, "Location beyond truncated sentence"
                );
                all_substitutes.push(Vec::new());
                continue;
            }

            // Predictions are right-aligned: padding sits in front
            let word_predictions: Vec<Vec<f32>> = predictions
                .iter()
                .map(|factor| {
                    let row = &factor[sentence_id];
                    row[row.len() - prediction_length + location].clone()
                })
                .collect();

            let mut sorted = self
                .data_indexer
                .score_candidates(&word_predictions, &search_space)?;
            sorted.truncate(num_substitutes);
            debug!(sentence_id, location, candidates = sorted.len(), "Substitutes ranked");
            all_substitutes.push(sorted);
        }

        Ok(all_substitutes)
    }
}

impl Default for WordReplacer {
    fn default() -> Self {
        Self::new()
    }
}
