//! Lexical substitution CLI
//!
//! Trains (or loads) a factored bidirectional RNN language model, then
//! corrupts test sentences by replacing one content word each.
//! Usage: lexsub --train-file train.txt --test-file test.txt --output-file out.tsv

use clap::Parser;
use lexsub::cli::{self, corpus, CorruptOptions};
use lexsub::llm::Constraints;
use lexsub::{LexsubConfig, LexsubError, WordReplacer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "lexsub")]
#[command(about = "Generate lexical substitutes using a bidirectional RNN")]
struct Args {
    /// File with sentences to train on, one per line
    #[arg(long)]
    train_file: Option<PathBuf>,

    /// File with sentences to replace words in, one per line
    #[arg(long)]
    test_file: Option<PathBuf>,

    /// JSON file with pipeline settings; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Word dimensionality [default: 50]
    #[arg(long)]
    word_dim: Option<usize>,

    /// Maximum number of training examples to use
    #[arg(long)]
    max_instances: Option<usize>,

    /// Use LSTM instead of simple RNN
    #[arg(long)]
    use_lstm: bool,

    /// Base of factored indices [default: 2]
    #[arg(long)]
    factor_base: Option<usize>,

    /// Number of most frequent words to search over as replacement candidates [default: 5000]
    #[arg(long)]
    search_space_size: Option<usize>,

    /// Maximum number of epochs, training may stop early [default: 20]
    #[arg(long)]
    num_epochs: Option<usize>,

    /// Substitutes ranked per test sentence [default: 5]
    #[arg(long)]
    num_substitutes: Option<usize>,

    /// Do not tokenize input
    #[arg(long)]
    no_tokenize: bool,

    /// Prefix for saving and loading the model archive
    #[arg(long, default_value = "lexsub")]
    model_serialization_prefix: String,

    /// Place to save the corrupted test file
    #[arg(long)]
    output_file: Option<PathBuf>,

    /// Seed for shuffling and location sampling
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    /// Loaded (or default) config with flags applied on top
    fn resolve_config(&self) -> lexsub::Result<LexsubConfig> {
        let mut config = match &self.config {
            Some(path) => LexsubConfig::load(path)?,
            None => LexsubConfig::default(),
        };
        if let Some(word_dim) = self.word_dim {
            config.word_dim = word_dim;
        }
        if let Some(factor_base) = self.factor_base {
            config.factor_base = factor_base;
        }
        if let Some(num_epochs) = self.num_epochs {
            config.num_epochs = num_epochs;
        }
        if let Some(search_space_size) = self.search_space_size {
            config.search_space_size = search_space_size;
        }
        if let Some(num_substitutes) = self.num_substitutes {
            config.num_substitutes = num_substitutes;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.use_lstm {
            config.use_lstm = true;
        }
        if self.no_tokenize {
            config.tokenize = false;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.resolve_config()?;

    if args.test_file.is_some() && args.output_file.is_none() {
        return Err(LexsubError::config(
            "need to specify where to save output with --output-file",
        )
        .into());
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut word_replacer = WordReplacer::new();

    match &args.train_file {
        Some(train_file) => {
            info!(path = %train_file.display(), "Reading training data");
            let sentences = corpus::read_sentences(train_file)?;
            let sentences = corpus::sample_training(sentences, args.max_instances, &mut rng);
            let report = word_replacer.train_model(&sentences, &config.train_options())?;
            info!(
                epochs = report.epochs_run(),
                stopped_early = report.stopped_early,
                "Model trained"
            );
            word_replacer.save_model(&args.model_serialization_prefix)?;
        }
        None => {
            info!(prefix = %args.model_serialization_prefix, "Loading saved model");
            word_replacer.load_model(&args.model_serialization_prefix)?;
        }
    }

    if let (Some(test_file), Some(output_file)) = (&args.test_file, &args.output_file) {
        info!(path = %test_file.display(), "Reading test data");
        let lines = corpus::read_sentences(test_file)?;
        let options = CorruptOptions {
            num_substitutes: config.num_substitutes,
            tokenize: config.tokenize,
            search_space_size: config.search_space_size,
        };
        let pairs = cli::corrupt_sentences(
            &word_replacer,
            &lines,
            &options,
            &Constraints::new(),
            &mut rng,
        )?;
        cli::write_pairs(output_file, &pairs)?;
        info!(path = %output_file.display(), lines = pairs.len(), "Corrupted sentences written");
    }

    Ok(())
}
