//! src/loader.rs
//!
//! Batch loading for sentence-pair datasets.
//!
//! `PairBatchLoader` ties the pieces together:
//!
//! ```text
//!   PairDataset::ordered_indices   (shuffle -> target len -> source len)
//!              │
//!              ↓
//!   filter_by_size                 (drop/reject examples over max positions)
//!              │
//!              ↓
//!   batch_by_size                  (token budget, sentence cap, size multiple)
//!              │
//!              ↓
//!   TokenBudgetBatchSampler        (per-epoch batch order)
//!              │
//!              ↓
//!   prefetch + get + collate       → MiniBatch
//! ```
//!
//! Batches are fixed once at construction; each epoch only reorders them.
//! Everything runs on the calling thread.
//!
//! Example:
//! ```ignore
//! let config = LoaderConfig::builder()
//!     .max_tokens(4096)
//!     .required_batch_size_multiple(8)
//!     .seed(42)
//!     .build();
//! let loader = PairBatchLoader::new(dataset, config)?;
//! for epoch in 0..num_epochs {
//!     for batch in loader.iter(epoch) {
//!         let batch = batch?;
//!         // ... forward/backward ...
//!     }
//! }
//! ```

use crate::dataset::PairDataset;
use crate::error::DataError;
use crate::minibatch::MiniBatch;
use crate::sampler::{filter_by_size, BatchBudget, Sampler, TokenBudgetBatchSampler};
use crate::vocab::Vocabulary;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Configuration for PairBatchLoader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Maximum padded tokens per batch
    pub max_tokens: Option<usize>,
    /// Maximum sentences per batch. If neither limit is set, defaults to 1.
    pub max_sentences: Option<usize>,
    /// Optional `(source, target)` limit, combined with the dataset's own
    /// max positions by taking the smaller of each
    pub max_positions: Option<(usize, usize)>,
    /// Skip oversized examples instead of failing
    pub ignore_invalid_inputs: bool,
    /// Batch sizes are trimmed to a multiple of this (defaults to 1)
    pub required_batch_size_multiple: usize,
    /// Whether to shuffle batch order every epoch
    pub shuffle: bool,
    /// Random seed for reproducible batch order (defaults to 1)
    pub seed: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_tokens: None,
            max_sentences: None,
            max_positions: None,
            ignore_invalid_inputs: false,
            required_batch_size_multiple: 1,
            shuffle: true,
            seed: 1,
        }
    }
}

impl LoaderConfig {
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }

    fn budget(&self) -> BatchBudget {
        BatchBudget {
            max_tokens: self.max_tokens,
            max_sentences: self.max_sentences,
            required_batch_size_multiple: self.required_batch_size_multiple,
        }
    }
}

/// Builder for LoaderConfig with method chaining
#[derive(Default)]
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    /// Set the token budget per batch (must be > 0)
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.config.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sentence cap per batch (must be > 0)
    pub fn max_sentences(mut self, max_sentences: usize) -> Self {
        self.config.max_sentences = Some(max_sentences);
        self
    }

    pub fn max_positions(mut self, max_source: usize, max_target: usize) -> Self {
        self.config.max_positions = Some((max_source, max_target));
        self
    }

    pub fn ignore_invalid_inputs(mut self, ignore: bool) -> Self {
        self.config.ignore_invalid_inputs = ignore;
        self
    }

    pub fn required_batch_size_multiple(mut self, multiple: usize) -> Self {
        self.config.required_batch_size_multiple = multiple;
        self
    }

    /// Set whether to shuffle batch order every epoch
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = shuffle;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> LoaderConfig {
        self.config
    }
}

// ================================================================================================
/// Produces collated [`MiniBatch`]es from a [`PairDataset`] under a token budget.
pub struct PairBatchLoader {
    dataset: PairDataset,
    batch_sampler: TokenBudgetBatchSampler,
    config: LoaderConfig,
}

impl PairBatchLoader {
    /// Creates a loader and precomputes its batches.
    ///
    /// # Errors
    /// - [`DataError::InvalidConfig`] for zero limits
    /// - [`DataError::ExceedsMaxPositions`] for an oversized example when
    ///   `ignore_invalid_inputs` is off
    /// - [`DataError::ExceedsMaxTokens`] for an example longer than `max_tokens`
    pub fn new(dataset: PairDataset, mut config: LoaderConfig) -> Result<Self> {
        if config.max_tokens.is_none() && config.max_sentences.is_none() {
            config.max_sentences = Some(1);
        }
        let budget = config.budget();
        budget.validate()?;

        let max_positions = resolve_max_positions(dataset.max_positions(), config.max_positions);
        ensure!(
            max_positions.0 > 0 && max_positions.1 > 0,
            DataError::InvalidConfig(format!(
                "max_positions must be > 0, but got {:?}",
                max_positions
            ))
        );

        let indices = dataset.ordered_indices(0);
        let indices = filter_by_size(
            &indices,
            &dataset,
            max_positions,
            config.ignore_invalid_inputs,
        )?;
        let batch_sampler = TokenBudgetBatchSampler::from_dataset(
            &dataset,
            &indices,
            &budget,
            config.shuffle,
            config.seed,
        )
        .context("Failed to group examples into batches")?;

        info!(
            "Prepared {} batches over {} of {} examples (max_tokens={:?}, max_sentences={:?}, max_positions={:?})",
            batch_sampler.len(),
            indices.len(),
            dataset.len(),
            config.max_tokens,
            config.max_sentences,
            max_positions
        );

        Ok(Self {
            dataset,
            batch_sampler,
            config,
        })
    }

    /// Loader over freshly tokenized source lines, for on-the-fly translation.
    ///
    /// Batches always keep their length-sorted order: `config.shuffle` is
    /// ignored. Each yielded batch's `ids` index into `src_tokens`.
    pub fn for_inference(
        src_tokens: Vec<Vec<i64>>,
        vocab: &(impl Vocabulary + ?Sized),
        mut config: LoaderConfig,
    ) -> Result<Self> {
        config.shuffle = false;
        let lengths = src_tokens.iter().map(Vec::len).collect();
        let dataset = PairDataset::for_inference(src_tokens, lengths, vocab)?;
        Self::new(dataset, config)
    }

    pub fn dataset(&self) -> &PairDataset {
        &self.dataset
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn num_batches(&self) -> usize {
        self.batch_sampler.len()
    }

    /// Index batches for `epoch`, in the order [`iter`](Self::iter) collates them.
    pub fn batch_indices(&self, epoch: usize) -> impl Iterator<Item = Vec<usize>> + '_ {
        self.batch_sampler.iter(epoch)
    }

    /// Iterates over the collated batches of `epoch`.
    pub fn iter(&self, epoch: usize) -> impl Iterator<Item = Result<MiniBatch>> + '_ {
        self.batch_sampler
            .iter(epoch)
            .filter_map(move |indices| self.load_batch(&indices).transpose())
    }

    fn load_batch(&self, indices: &[usize]) -> Result<Option<MiniBatch>> {
        if self.dataset.supports_prefetch() {
            self.dataset.prefetch(indices)?;
        }
        let examples = indices
            .iter()
            .map(|&i| self.dataset.get(i))
            .collect::<Result<Vec<_>>>()?;
        debug!("Collating batch of {} examples", examples.len());
        self.dataset
            .collate(&examples)
            .with_context(|| format!("Failed to collate batch {:?}", indices))
    }
}

/// Element-wise minimum of the dataset's limits and an optional override.
fn resolve_max_positions(
    dataset: (usize, usize),
    requested: Option<(usize, usize)>,
) -> (usize, usize) {
    match requested {
        Some((src, tgt)) => (dataset.0.min(src), dataset.1.min(tgt)),
        None => dataset,
    }
}

#[cfg(test)]
mod loader_tests {
    use super::*;
    use crate::dataset::PairDatasetConfig;
    use crate::tokens::InMemoryTokens;
    use crate::vocab::SpecialTokens;

    const EOS: i64 = 2;

    /// `n` pairs; pair `i` has a source of `1 + i % 5` tokens and a target of `1 + i % 3`.
    fn make_dataset(n: usize) -> Result<PairDataset> {
        let vocab = SpecialTokens::default();
        let src: Vec<Vec<i64>> = (0..n)
            .map(|i| {
                let mut s = vec![10 + i as i64; i % 5];
                s.push(EOS);
                s
            })
            .collect();
        let tgt: Vec<Vec<i64>> = (0..n)
            .map(|i| {
                let mut t = vec![20; i % 3];
                t.push(EOS);
                t
            })
            .collect();
        let (src, tgt) = (InMemoryTokens::new(src), InMemoryTokens::new(tgt));
        let (src_sizes, tgt_sizes) = (src.lengths(), tgt.lengths());
        PairDataset::builder(src, src_sizes, &vocab)
            .target(tgt, tgt_sizes, &vocab)
            .config(PairDatasetConfig::builder().seed(3).build())
            .build()
    }

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert_eq!(config.required_batch_size_multiple, 1);
        assert!(config.shuffle);
        assert_eq!(config.seed, 1);
    }

    #[test]
    fn test_defaults_to_single_sentence_batches() -> Result<()> {
        let loader = PairBatchLoader::new(make_dataset(6)?, LoaderConfig::default())?;
        assert_eq!(loader.config().max_sentences, Some(1));
        assert_eq!(loader.num_batches(), 6);
        for batch in loader.iter(0) {
            assert_eq!(batch?.batch_size(), 1);
        }
        Ok(())
    }

    #[test]
    fn test_every_example_is_batched_once() -> Result<()> {
        let config = LoaderConfig::builder().max_tokens(12).seed(9).build();
        let loader = PairBatchLoader::new(make_dataset(40)?, config)?;

        let mut ids = Vec::new();
        let mut count = 0;
        for batch in loader.iter(2) {
            let batch = batch?;
            let src = &batch.net_input.src_tokens;
            assert!((src.size()[0] * src.size()[1]) as usize <= 12);
            ids.extend(batch.ids.iter().copied());
            count += 1;
        }
        assert_eq!(count, loader.num_batches());
        ids.sort_unstable();
        assert_eq!(ids, (0..40).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_batch_order_is_reproducible_per_epoch() -> Result<()> {
        let config = LoaderConfig::builder().max_sentences(4).seed(5).build();
        let loader = PairBatchLoader::new(make_dataset(40)?, config)?;

        let epoch0: Vec<_> = loader.batch_indices(0).collect();
        assert_eq!(epoch0, loader.batch_indices(0).collect::<Vec<_>>());
        assert_ne!(epoch0, loader.batch_indices(1).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_unshuffled_batches_follow_length_order() -> Result<()> {
        let config = LoaderConfig::builder().max_sentences(8).shuffle(false).build();
        let loader = PairBatchLoader::new(make_dataset(40)?, config)?;
        let dataset = loader.dataset();

        let longest: Vec<usize> = loader
            .batch_indices(0)
            .map(|b| b.iter().map(|&i| dataset.size(i).0).max().unwrap_or(0))
            .collect();
        assert!(longest.windows(2).all(|w| w[0] <= w[1]));
        Ok(())
    }

    #[test]
    fn test_oversized_examples() -> Result<()> {
        // Sources are up to 5 tokens long; cap at 3.
        let strict = LoaderConfig::builder().max_sentences(4).max_positions(3, 1024).build();
        let err = PairBatchLoader::new(make_dataset(10)?, strict).err().expect("must fail");
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::ExceedsMaxPositions { .. })
        ));

        let lenient = LoaderConfig::builder()
            .max_sentences(4)
            .max_positions(3, 1024)
            .ignore_invalid_inputs(true)
            .build();
        let loader = PairBatchLoader::new(make_dataset(10)?, lenient)?;
        let kept: usize = loader.batch_indices(0).map(|b| b.len()).sum();
        // i % 5 in {0, 1, 2} -> source length <= 3
        assert_eq!(kept, 6);
        Ok(())
    }

    #[test]
    fn test_rejects_zero_limits() -> Result<()> {
        let config = LoaderConfig::builder().max_tokens(0).build();
        assert!(PairBatchLoader::new(make_dataset(4)?, config).is_err());

        let config = LoaderConfig::builder().max_sentences(2).max_positions(0, 10).build();
        assert!(PairBatchLoader::new(make_dataset(4)?, config).is_err());
        Ok(())
    }

    #[test]
    fn test_for_inference_batches_source_only() -> Result<()> {
        let lines = vec![vec![4, 5, 6, EOS], vec![7, EOS], vec![8, 9, EOS]];
        let config = LoaderConfig::builder().max_sentences(2).shuffle(false).build();
        let loader = PairBatchLoader::for_inference(lines, &SpecialTokens::default(), config)?;

        let batches = loader.iter(0).collect::<Result<Vec<_>>>()?;
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.target.is_none()));

        let mut ids: Vec<usize> = batches.iter().flat_map(|b| b.ids.clone()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_for_inference_never_shuffles_batches() -> Result<()> {
        let lines: Vec<Vec<i64>> = (0..20)
            .map(|i| {
                let mut line = vec![4; i % 7];
                line.push(EOS);
                line
            })
            .collect();
        let lengths: Vec<usize> = lines.iter().map(Vec::len).collect();

        let loader =
            PairBatchLoader::for_inference(lines, &SpecialTokens::default(), LoaderConfig::default())?;
        assert!(!loader.config().shuffle);
        assert_eq!(loader.num_batches(), 20);

        for epoch in 0..3 {
            let order: Vec<usize> = loader.batch_indices(epoch).map(|b| lengths[b[0]]).collect();
            assert!(order.windows(2).all(|w| w[0] <= w[1]));
        }
        Ok(())
    }

    #[test]
    fn test_config_from_json() -> Result<()> {
        let config: LoaderConfig = serde_json::from_str(
            r#"{"max_tokens": 4096, "max_positions": [128, 256], "shuffle": false}"#,
        )?;
        assert_eq!(config.max_tokens, Some(4096));
        assert_eq!(config.max_positions, Some((128, 256)));
        assert!(!config.shuffle);
        assert_eq!(config.required_batch_size_multiple, 1);
        Ok(())
    }

    #[test]
    fn test_resolve_max_positions() {
        assert_eq!(resolve_max_positions((1024, 1024), None), (1024, 1024));
        assert_eq!(resolve_max_positions((1024, 512), Some((256, 4096))), (256, 512));
    }
}
