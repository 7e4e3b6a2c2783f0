use crate::collator::{Collator, PairCollator};
use crate::error::DataError;
use crate::minibatch::MiniBatch;
use crate::sample::Example;
use crate::sampler::{RandomSampler, Sampler, SequentialSampler};
use crate::tokens::{InMemoryTokens, TokenSource};
use crate::vocab::{SpecialTokens, Vocabulary};
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Per-example size queries used by the batching layer.
///
/// Token-budget batch samplers read `num_tokens`, max-position filtering reads
/// `size`. Neither touches the underlying token storage.
pub trait SizedDataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cost of `index` in tokens: `max(source_len, target_len)`.
    fn num_tokens(&self, index: usize) -> usize;

    /// `(source_len, target_len)`, with `target_len = 0` when there is no target.
    fn size(&self, index: usize) -> (usize, usize);
}

/// Behaviour of a [`PairDataset`].
///
/// # Example
/// ```ignore
/// let config = PairDatasetConfig::builder()
///     .left_pad_source(true)
///     .append_eos_to_target(true)
///     .shuffle(false)
///     .build();
/// ```
///
/// Deserializes from JSON with missing fields taking their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairDatasetConfig {
    /// Pad sources on the left (content right-aligned). Default: true
    pub left_pad_source: bool,
    /// Pad targets on the left (content right-aligned). Default: false
    pub left_pad_target: bool,
    /// Longest source accepted by max-position filtering. Default: 1024
    pub max_source_positions: usize,
    /// Longest target accepted by max-position filtering. Default: 1024
    pub max_target_positions: usize,
    /// Shuffle before length sorting in `ordered_indices`. Default: true
    pub shuffle: bool,
    /// Produce `prev_output_tokens` for teacher forcing. Default: true
    pub input_feeding: bool,
    /// Strip a trailing eos from sources. Default: false
    pub remove_eos_from_source: bool,
    /// Append eos to targets that do not end with one. Default: false
    pub append_eos_to_target: bool,
    /// Base seed for the shuffle; the permutation of epoch `e` uses `seed + e`. Default: 1
    pub seed: u64,
}

impl Default for PairDatasetConfig {
    fn default() -> Self {
        Self {
            left_pad_source: true,
            left_pad_target: false,
            max_source_positions: 1024,
            max_target_positions: 1024,
            shuffle: true,
            input_feeding: true,
            remove_eos_from_source: false,
            append_eos_to_target: false,
            seed: 1,
        }
    }
}

impl PairDatasetConfig {
    pub fn builder() -> PairDatasetConfigBuilder {
        PairDatasetConfigBuilder::default()
    }
}

/// Builder for PairDatasetConfig with method chaining
#[derive(Default)]
pub struct PairDatasetConfigBuilder {
    config: PairDatasetConfig,
}

impl PairDatasetConfigBuilder {
    pub fn left_pad_source(mut self, left_pad: bool) -> Self {
        self.config.left_pad_source = left_pad;
        self
    }

    pub fn left_pad_target(mut self, left_pad: bool) -> Self {
        self.config.left_pad_target = left_pad;
        self
    }

    pub fn max_source_positions(mut self, max: usize) -> Self {
        self.config.max_source_positions = max;
        self
    }

    pub fn max_target_positions(mut self, max: usize) -> Self {
        self.config.max_target_positions = max;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = shuffle;
        self
    }

    pub fn input_feeding(mut self, enabled: bool) -> Self {
        self.config.input_feeding = enabled;
        self
    }

    pub fn remove_eos_from_source(mut self, remove: bool) -> Self {
        self.config.remove_eos_from_source = remove;
        self
    }

    pub fn append_eos_to_target(mut self, append: bool) -> Self {
        self.config.append_eos_to_target = append;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> PairDatasetConfig {
        self.config
    }
}

//=======================================================================================================
#[derive(Clone)]
struct TargetSide {
    tokens: Arc<dyn TokenSource>,
    sizes: Arc<[usize]>,
}

/// A parallel (or monolingual) corpus exposed as indexable [`Example`]s.
///
/// Token storage is shared through `Arc`, so clones are cheap and the
/// dataset can be read from several threads at once. Lookups never mutate
/// anything.
///
/// # Example
/// ```ignore
/// let dataset = PairDataset::builder(src_tokens, src_sizes, &src_vocab)
///     .target(tgt_tokens, tgt_sizes, &tgt_vocab)
///     .config(PairDatasetConfig::builder().shuffle(false).build())
///     .build()?;
///
/// let examples = dataset.ordered_indices(0)[..8]
///     .iter()
///     .map(|&i| dataset.get(i))
///     .collect::<Result<Vec<_>>>()?;
/// let batch = dataset.collate(&examples)?;
/// ```
#[derive(Clone)]
pub struct PairDataset {
    src: Arc<dyn TokenSource>,
    src_sizes: Arc<[usize]>,
    tgt: Option<TargetSide>,
    constraints: Option<Arc<dyn TokenSource>>,
    vocab: SpecialTokens,
    config: PairDatasetConfig,
}

impl fmt::Debug for PairDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairDataset")
            .field("len", &self.src_sizes.len())
            .field("has_target", &self.tgt.is_some())
            .field("has_constraints", &self.constraints.is_some())
            .field("vocab", &self.vocab)
            .field("config", &self.config)
            .finish()
    }
}

/// Collects construction parameters for a [`PairDataset`]; validation happens in
/// [`build`](Self::build).
pub struct PairDatasetBuilder {
    src: Arc<dyn TokenSource>,
    src_sizes: Vec<usize>,
    src_vocab: SpecialTokens,
    tgt: Option<(Arc<dyn TokenSource>, Vec<usize>, SpecialTokens)>,
    constraints: Option<Arc<dyn TokenSource>>,
    config: PairDatasetConfig,
}

impl PairDatasetBuilder {
    /// Adds the target side. `sizes[i]` is the length of target `i`.
    pub fn target(
        mut self,
        tokens: impl TokenSource + 'static,
        sizes: Vec<usize>,
        vocab: &(impl Vocabulary + ?Sized),
    ) -> Self {
        let tokens: Arc<dyn TokenSource> = Arc::new(tokens);
        self.tgt = Some((tokens, sizes, SpecialTokens::of(vocab)));
        self
    }

    /// Adds per-example constraint sequences.
    pub fn constraints(mut self, constraints: impl TokenSource + 'static) -> Self {
        let constraints: Arc<dyn TokenSource> = Arc::new(constraints);
        self.constraints = Some(constraints);
        self
    }

    pub fn config(mut self, config: PairDatasetConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the parameters and builds the dataset.
    ///
    /// # Errors
    /// - [`DataError::VocabularyMismatch`] if the target vocabulary's pad/eos/unk
    ///   differ from the source vocabulary's
    /// - [`DataError::InvalidConfig`] if a sizes array does not match its
    ///   collection, if source/target/constraint collections differ in length,
    ///   or if a max position is zero
    pub fn build(self) -> Result<PairDataset> {
        let len = self.src.len();
        ensure!(
            self.src_sizes.len() == len,
            DataError::InvalidConfig(format!(
                "{} source sizes given for {} source sequences",
                self.src_sizes.len(),
                len
            ))
        );
        ensure!(
            self.config.max_source_positions > 0 && self.config.max_target_positions > 0,
            DataError::InvalidConfig("max source/target positions must be > 0".into())
        );

        let tgt = match self.tgt {
            Some((tokens, sizes, tgt_vocab)) => {
                self.src_vocab
                    .ensure_compatible(&tgt_vocab)
                    .context("Source and target vocabularies are incompatible")?;
                ensure!(
                    tokens.len() == len,
                    DataError::InvalidConfig(format!(
                        "source has {} sequences but target has {}",
                        len,
                        tokens.len()
                    ))
                );
                ensure!(
                    sizes.len() == tokens.len(),
                    DataError::InvalidConfig(format!(
                        "{} target sizes given for {} target sequences",
                        sizes.len(),
                        tokens.len()
                    ))
                );
                Some(TargetSide {
                    tokens,
                    sizes: sizes.into(),
                })
            }
            None => None,
        };

        if let Some(constraints) = &self.constraints {
            ensure!(
                constraints.len() == len,
                DataError::InvalidConfig(format!(
                    "source has {} sequences but constraints have {}",
                    len,
                    constraints.len()
                ))
            );
        }

        debug!(
            "Built pair dataset: {} examples, target={}, constraints={}",
            len,
            tgt.is_some(),
            self.constraints.is_some()
        );

        Ok(PairDataset {
            src: self.src,
            src_sizes: self.src_sizes.into(),
            tgt,
            constraints: self.constraints,
            vocab: self.src_vocab,
            config: self.config,
        })
    }
}

impl PairDataset {
    /// Starts building a dataset over `src`, whose `i`-th sequence has length `src_sizes[i]`.
    pub fn builder(
        src: impl TokenSource + 'static,
        src_sizes: Vec<usize>,
        src_vocab: &(impl Vocabulary + ?Sized),
    ) -> PairDatasetBuilder {
        PairDatasetBuilder {
            src: Arc::new(src),
            src_sizes,
            src_vocab: SpecialTokens::of(src_vocab),
            tgt: None,
            constraints: None,
            config: PairDatasetConfig::default(),
        }
    }

    /// Source-only dataset over freshly tokenized lines, for translating
    /// input on the fly. Uses the default configuration.
    pub fn for_inference(
        src_tokens: Vec<Vec<i64>>,
        src_lengths: Vec<usize>,
        vocab: &(impl Vocabulary + ?Sized),
    ) -> Result<Self> {
        Self::builder(InMemoryTokens::new(src_tokens), src_lengths, vocab).build()
    }

    /// Returns the example at `index`.
    ///
    /// Applies `append_eos_to_target` and `remove_eos_from_source`. Errors from
    /// the underlying collections (e.g. out-of-range indices) are propagated.
    pub fn get(&self, index: usize) -> Result<Example> {
        let eos = self.vocab.eos;
        let mut source = self
            .src
            .get(index)
            .with_context(|| format!("Failed to read source sequence {}", index))?;

        let target = match &self.tgt {
            Some(tgt) => {
                let mut target = tgt
                    .tokens
                    .get(index)
                    .with_context(|| format!("Failed to read target sequence {}", index))?;
                if self.config.append_eos_to_target && target.last() != Some(&eos) {
                    target.push(eos);
                }
                Some(target)
            }
            None => None,
        };

        if self.config.remove_eos_from_source && source.last() == Some(&eos) {
            source.pop();
        }

        let constraints = match &self.constraints {
            Some(constraints) => Some(
                constraints
                    .get(index)
                    .with_context(|| format!("Failed to read constraints {}", index))?,
            ),
            None => None,
        };

        Ok(Example {
            id: index,
            source,
            target,
            constraints,
        })
    }

    /// Number of examples (size of the source collection).
    pub fn len(&self) -> usize {
        self.src.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_target(&self) -> bool {
        self.tgt.is_some()
    }

    pub fn config(&self) -> &PairDatasetConfig {
        &self.config
    }

    pub fn vocab(&self) -> &SpecialTokens {
        &self.vocab
    }

    /// Collator configured with this dataset's pad/eos and flags.
    pub fn collator(&self) -> PairCollator {
        PairCollator::new(self.vocab.pad, self.vocab.eos)
            .left_pad_source(self.config.left_pad_source)
            .left_pad_target(self.config.left_pad_target)
            .input_feeding(self.config.input_feeding)
    }

    /// Collates examples of this dataset into a [`MiniBatch`].
    pub fn collate(&self, examples: &[Example]) -> Result<Option<MiniBatch>> {
        self.collator().collate(examples)
    }

    /// `max(source_len, target_len)` for `index`.
    ///
    /// # Panics
    /// If `index >= self.len()`, like [`size`](Self::size).
    pub fn num_tokens(&self, index: usize) -> usize {
        let (src_len, tgt_len) = self.size(index);
        src_len.max(tgt_len)
    }

    /// `(source_len, target_len)` for `index`, target length `0` when absent.
    ///
    /// Reads only the size arrays validated at construction, so the batching
    /// layer can call it in tight loops.
    ///
    /// # Panics
    /// If `index >= self.len()`. Use [`get`](Self::get) for a fallible lookup.
    pub fn size(&self, index: usize) -> (usize, usize) {
        let tgt_len = self.tgt.as_ref().map_or(0, |tgt| tgt.sizes[index]);
        (self.src_sizes[index], tgt_len)
    }

    /// `(max_source_positions, max_target_positions)`.
    pub fn max_positions(&self) -> (usize, usize) {
        (
            self.config.max_source_positions,
            self.config.max_target_positions,
        )
    }

    /// Returns every index ordered for batching.
    ///
    /// 1. Start from a uniformly random permutation (seeded `seed + epoch`)
    ///    if `shuffle` is set, otherwise from the identity order.
    /// 2. Stable sort by target length, if there are targets.
    /// 3. Stable sort by source length.
    ///
    /// Source length is applied last and so dominates; ties keep the order
    /// of the previous pass. The order is ascending, unlike the descending
    /// order rows get inside a collated batch.
    pub fn ordered_indices(&self, epoch: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = if self.config.shuffle {
            RandomSampler::new(self.len(), self.config.seed)
                .iter(epoch)
                .collect()
        } else {
            SequentialSampler::new(self.len()).iter(epoch).collect()
        };

        if let Some(tgt) = &self.tgt {
            indices.sort_by_key(|&i| tgt.sizes[i]);
        }
        indices.sort_by_key(|&i| self.src_sizes[i]);
        indices
    }

    /// True only if the source and (if present) target collections support prefetch.
    pub fn supports_prefetch(&self) -> bool {
        self.src.supports_prefetch()
            && self
                .tgt
                .as_ref()
                .map_or(true, |tgt| tgt.tokens.supports_prefetch())
    }

    /// Forwards a prefetch hint to the source and target collections.
    pub fn prefetch(&self, indices: &[usize]) -> Result<()> {
        self.src.prefetch(indices)?;
        if let Some(tgt) = &self.tgt {
            tgt.tokens.prefetch(indices)?;
        }
        Ok(())
    }
}

impl SizedDataset for PairDataset {
    fn len(&self) -> usize {
        PairDataset::len(self)
    }

    fn num_tokens(&self, index: usize) -> usize {
        PairDataset::num_tokens(self, index)
    }

    fn size(&self, index: usize) -> (usize, usize) {
        PairDataset::size(self, index)
    }
}

impl Collator for PairDataset {
    fn collate(&self, examples: &[Example]) -> Result<Option<MiniBatch>> {
        PairDataset::collate(self, examples)
    }
}

/// Lazily yields [`ordered_indices`](PairDataset::ordered_indices) for an epoch.
impl Sampler for PairDataset {
    type Item = usize;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        Box::new(self.ordered_indices(epoch).into_iter())
    }
}
