use crate::dataset::SizedDataset;
use crate::error::DataError;
use anyhow::{ensure, Result};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A `Sampler` defines the strategy for how to iterate and draw samples from
/// a dataset.
///
/// # Associated type
/// - `Item`: The handle yielded by the iterator
///    - For index samplers this is a `usize` index
///    - For batch samplers this is a `Vec<usize>` of indices
///
/// # Method
/// - `iter(epoch)`: returns a sequential or shuffled sequence for that epoch.
///    - Users pass the `epoch` parameter so internally the sampler uses it
///      together with the base RNG seed to shuffle in a reproducible way across epochs.
///
/// Implementations must be `Send + Sync` so the same sampler instance can be
/// safely shared across threads.
pub trait Sampler: Send + Sync {
    type Item: Send + Sync;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Self::Item> + Send + '_>;
}

/// Derives a deterministic random number generator for the given epoch:
/// `base_seed + epoch`, so each epoch gets a fresh but reproducible order.
#[inline]
pub(crate) fn derive_rng_for_epoch(base_seed: u64, epoch: usize) -> StdRng {
    StdRng::seed_from_u64(base_seed.wrapping_add(epoch as u64))
}

/// ============================================================================
/// Yields indices sequentially in order `(0,1,2,...,dataset_size-1)`.
///
/// # Examples
/// ```ignore
/// let sampler = SequentialSampler::new(5);
/// let indices: Vec<_> = sampler.iter(0).collect();
/// assert_eq!(indices, vec![0, 1, 2, 3, 4]);
/// ```
#[derive(Debug, Clone)]
pub struct SequentialSampler {
    dataset_size: usize,
}

impl SequentialSampler {
    pub fn new(dataset_size: usize) -> Self {
        Self { dataset_size }
    }
}

impl Sampler for SequentialSampler {
    type Item = usize;

    fn iter(&self, _epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        Box::new(0..self.dataset_size)
    }
}

/// ============================================================================
/// Uniformly random permutation of `0..dataset_size`.
///
/// The RNG for each epoch is derived as `base_seed + epoch`: a fixed seed
/// gives an identical order every run, a new epoch gives a new order.
/// An empty dataset yields an empty permutation.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    dataset_size: usize,
    base_seed: u64,
}

impl RandomSampler {
    pub fn new(dataset_size: usize, base_seed: u64) -> Self {
        Self {
            dataset_size,
            base_seed,
        }
    }
}

impl Sampler for RandomSampler {
    type Item = usize;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        let mut rng = derive_rng_for_epoch(self.base_seed, epoch);
        let mut indices: Vec<_> = (0..self.dataset_size).collect();
        indices.shuffle(&mut rng);
        Box::new(indices.into_iter())
    }
}

/// ============================================================================
/// Wraps a [`Sampler`] to yield fixed-size mini-batches of items.
///
/// Each call to `.iter(epoch)` produces successive `Vec<S::Item>` batches, where each
/// mini-batch contains up to `batch_size` elements drawn from the underlying sampler.
/// If `drop_last` is `true`, any final mini-batch smaller than `batch_size` will be discarded.
///
/// # Example
/// ```ignore
/// // Fixed 32-sentence batches over a dataset's length-sorted order.
/// let batch_sampler = BatchSampler::new(dataset.clone(), 32, false)?;
/// for indices in batch_sampler.iter(epoch) {
///     let examples = indices.iter().map(|&i| dataset.get(i)).collect::<Result<Vec<_>>>()?;
///     let batch = dataset.collate(&examples)?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct BatchSampler<S> {
    sampler: S,
    batch_size: usize,
    drop_last: bool,
}

impl<S: Sampler> BatchSampler<S> {
    pub fn new(sampler: S, batch_size: usize, drop_last: bool) -> Result<Self> {
        ensure!(
            batch_size > 0,
            DataError::InvalidConfig(format!("batch_size must be > 0, but got {}", batch_size))
        );
        Ok(Self {
            sampler,
            batch_size,
            drop_last,
        })
    }
}

impl<S: Sampler> Sampler for BatchSampler<S> {
    type Item = Vec<S::Item>;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Self::Item> + Send + '_> {
        let mut sampler_iter = self.sampler.iter(epoch);
        let batch_size = self.batch_size;
        let drop_last = self.drop_last;

        Box::new(std::iter::from_fn(move || {
            let mut mini_batch = Vec::with_capacity(batch_size);
            for _ in 0..batch_size {
                if let Some(item) = sampler_iter.next() {
                    mini_batch.push(item);
                } else {
                    break;
                }
            }
            if mini_batch.len() == batch_size || (!drop_last && !mini_batch.is_empty()) {
                Some(mini_batch)
            } else {
                None
            }
        }))
    }
}

/// ============================================================================
/// Drops indices whose `(source, target)` size exceeds `max_positions`.
///
/// # Arguments:
/// - `indices`: candidate indices, order is preserved
/// - `dataset`: provides `size(index)`
/// - `max_positions`: `(max_source_positions, max_target_positions)`
/// - `ignore_invalid`: if `false`, the first oversized example is an error
///                     ([`DataError::ExceedsMaxPositions`]); if `true` it is
///                     skipped and the skipped count is logged as a warning.
pub fn filter_by_size<D: SizedDataset + ?Sized>(
    indices: &[usize],
    dataset: &D,
    max_positions: (usize, usize),
    ignore_invalid: bool,
) -> Result<Vec<usize>> {
    let mut kept = Vec::with_capacity(indices.len());
    let mut ignored = Vec::new();

    for &index in indices {
        let size = dataset.size(index);
        if size.0 <= max_positions.0 && size.1 <= max_positions.1 {
            kept.push(index);
        } else if ignore_invalid {
            ignored.push(index);
        } else {
            return Err(DataError::ExceedsMaxPositions {
                index,
                size,
                max_positions,
            }
            .into());
        }
    }

    if !ignored.is_empty() {
        warn!(
            "{} samples have invalid sizes and will be skipped, max_positions={:?}, first few sample ids={:?}",
            ignored.len(),
            max_positions,
            &ignored[..ignored.len().min(10)]
        );
    }
    Ok(kept)
}

/// Limits applied by [`batch_by_size`].
///
/// - `max_tokens`: upper bound on `batch_len * longest_example` (padded size)
/// - `max_sentences`: upper bound on the number of examples per batch
/// - `required_batch_size_multiple`: closed batches are trimmed to a multiple
///   of this value whenever they hold at least that many examples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchBudget {
    pub max_tokens: Option<usize>,
    pub max_sentences: Option<usize>,
    pub required_batch_size_multiple: usize,
}

impl Default for BatchBudget {
    fn default() -> Self {
        Self {
            max_tokens: None,
            max_sentences: None,
            required_batch_size_multiple: 1,
        }
    }
}

impl BatchBudget {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_tokens != Some(0),
            DataError::InvalidConfig("max_tokens must be > 0".into())
        );
        ensure!(
            self.max_sentences != Some(0),
            DataError::InvalidConfig("max_sentences must be > 0".into())
        );
        ensure!(
            self.required_batch_size_multiple > 0,
            DataError::InvalidConfig("required_batch_size_multiple must be > 0".into())
        );
        Ok(())
    }
}

/// Greedily groups `indices` (in the given order) into batches that respect
/// `budget`.
///
/// A batch is closed when appending the next index would make it exceed
/// `max_sentences`, or make `(batch_len + 1) * longest` exceed `max_tokens`.
/// When closing, only the largest multiple of `required_batch_size_multiple`
/// is emitted (or the whole batch if it is smaller than the multiple) and
/// the rest carries over into the next batch.
///
/// # Errors
/// - [`DataError::ExceedsMaxTokens`] if one example alone exceeds `max_tokens`
pub fn batch_by_size<F>(indices: &[usize], num_tokens_fn: F, budget: &BatchBudget) -> Result<Vec<Vec<usize>>>
where
    F: Fn(usize) -> usize,
{
    budget.validate()?;
    let max_tokens = budget.max_tokens.unwrap_or(usize::MAX);
    let max_sentences = budget.max_sentences.unwrap_or(usize::MAX);
    let bsz_mult = budget.required_batch_size_multiple;

    let mut batches = Vec::new();
    let mut batch: Vec<usize> = Vec::new();
    let mut sample_lens: Vec<usize> = Vec::new();
    let mut longest = 0;

    for &index in indices {
        let num_tokens = num_tokens_fn(index);
        if num_tokens > max_tokens {
            return Err(DataError::ExceedsMaxTokens {
                index,
                num_tokens,
                max_tokens,
            }
            .into());
        }
        sample_lens.push(num_tokens);
        longest = longest.max(num_tokens);

        let padded_tokens = (batch.len() + 1).saturating_mul(longest);
        let is_full =
            !batch.is_empty() && (batch.len() == max_sentences || padded_tokens > max_tokens);
        if is_full {
            let keep = (bsz_mult * (batch.len() / bsz_mult)).max(batch.len() % bsz_mult);
            let rest = batch.split_off(keep);
            batches.push(std::mem::replace(&mut batch, rest));
            sample_lens.drain(..keep);
            longest = sample_lens.iter().copied().max().unwrap_or(0);
        }
        batch.push(index);
    }

    if !batch.is_empty() {
        batches.push(batch);
    }
    Ok(batches)
}

/// ============================================================================
/// Yields precomputed token-budget batches, optionally reshuffled each epoch.
///
/// Batches are fixed at construction (see [`batch_by_size`]); with `shuffle`
/// only their order changes between epochs, seeded as `base_seed + epoch`.
/// The examples inside a batch never move, so length grouping is preserved.
///
/// # Example
/// ```ignore
/// let indices = dataset.ordered_indices(0);
/// let budget = BatchBudget { max_tokens: Some(4096), ..Default::default() };
/// let sampler = TokenBudgetBatchSampler::new(
///     batch_by_size(&indices, |i| dataset.num_tokens(i), &budget)?,
///     true,   // shuffle batches every epoch
///     42,     // base_seed
/// );
/// ```
#[derive(Debug, Clone)]
pub struct TokenBudgetBatchSampler {
    batches: Vec<Vec<usize>>,
    shuffle: bool,
    base_seed: u64,
}

impl TokenBudgetBatchSampler {
    pub fn new(batches: Vec<Vec<usize>>, shuffle: bool, base_seed: u64) -> Self {
        Self {
            batches,
            shuffle,
            base_seed,
        }
    }

    /// Builds batches over `indices` of `dataset` using its per-example token counts.
    pub fn from_dataset<D: SizedDataset + ?Sized>(
        dataset: &D,
        indices: &[usize],
        budget: &BatchBudget,
        shuffle: bool,
        base_seed: u64,
    ) -> Result<Self> {
        let batches = batch_by_size(indices, |i| dataset.num_tokens(i), budget)?;
        Ok(Self::new(batches, shuffle, base_seed))
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn batches(&self) -> &[Vec<usize>] {
        &self.batches
    }
}

impl Sampler for TokenBudgetBatchSampler {
    type Item = Vec<usize>;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Vec<usize>> + Send + '_> {
        if !self.shuffle {
            return Box::new(self.batches.iter().cloned());
        }
        let mut order: Vec<usize> = (0..self.batches.len()).collect();
        order.shuffle(&mut derive_rng_for_epoch(self.base_seed, epoch));
        Box::new(order.into_iter().map(move |i| self.batches[i].clone()))
    }
}
