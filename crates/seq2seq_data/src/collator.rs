use crate::error::DataError;
use crate::minibatch::{MiniBatch, NetInput};
use crate::sample::Example;
use anyhow::{Context, Result};
use tch::Tensor;

/// A `Collator` defines how to pad and combine multiple [`Example`]s into a [`MiniBatch`].
///
/// An empty example list is not an error: it collates to `Ok(None)`, the
/// empty-batch placeholder, so callers can skip it.
pub trait Collator {
    fn collate(&self, examples: &[Example]) -> Result<Option<MiniBatch>>;
}

//=======================================================================================================
/// A row-major `[rows, width]` matrix of token ids produced by [`collate_tokens`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddedTokens {
    values: Vec<i64>,
    rows: usize,
    width: usize,
}

impl PaddedTokens {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns row `i` including its padding.
    pub fn row(&self, i: usize) -> &[i64] {
        &self.values[i * self.width..(i + 1) * self.width]
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.values
    }

    /// Converts into an `Int64` tensor of shape `[rows, width]`.
    pub fn to_tensor(&self) -> Tensor {
        Tensor::from_slice(&self.values).reshape([self.rows as i64, self.width as i64])
    }
}

/// Merges variable-length sequences into one padded matrix.
///
/// # Arguments:
/// - `values`: sequences to merge, one per row
/// - `pad`: fill value for the unused cells
/// - `eos`: end-of-sequence id, only consulted when `move_eos_to_beginning` is set
/// - `left_pad`: if `true`, rows are right-aligned and padding comes first;
///               otherwise padding trails
/// - `move_eos_to_beginning`: if `true`, every sequence must end with `eos`,
///               which is moved to the front: `[a, b, eos]` -> `[eos, a, b]`
///
/// The width is the longest sequence in `values`.
pub fn collate_tokens<S: AsRef<[i64]>>(
    values: &[S],
    pad: i64,
    eos: i64,
    left_pad: bool,
    move_eos_to_beginning: bool,
) -> Result<PaddedTokens> {
    let width = values
        .iter()
        .map(|v| v.as_ref().len())
        .max()
        .unwrap_or(0);
    let mut merged = vec![pad; values.len() * width];

    for (position, value) in values.iter().enumerate() {
        let value = value.as_ref();
        let offset = if left_pad { width - value.len() } else { 0 };
        let start = position * width + offset;
        let dst = &mut merged[start..start + value.len()];

        if move_eos_to_beginning {
            match value.split_last() {
                Some((&last, rest)) if last == eos => {
                    dst[0] = eos;
                    dst[1..].copy_from_slice(rest);
                }
                _ => return Err(DataError::MissingEos { position, eos }.into()),
            }
        } else {
            dst.copy_from_slice(value);
        }
    }

    Ok(PaddedTokens {
        values: merged,
        rows: values.len(),
        width,
    })
}

/// Removes every `pad` id from a row of a padded batch.
pub fn strip_pad(row: &[i64], pad: i64) -> Vec<i64> {
    row.iter().copied().filter(|&t| t != pad).collect()
}

/// Collates sentence pairs into a [`MiniBatch`].
///
/// Rows are ordered by descending source length; ties keep their input order.
/// The same order applies to ids, source tokens, source lengths, targets,
/// shifted targets and constraints.
///
/// - With targets, `ntokens` is the sum of target lengths, otherwise the sum
///   of source lengths.
/// - `input_feeding` adds `net_input.prev_output_tokens` (targets with their
///   trailing eos moved to the front, padded like the targets).
/// - Constraints are zero-filled and left-aligned; examples without
///   constraints in a constrained batch get an all-zero row.
///
/// # Errors
/// - [`DataError::InconsistentBatch`] if only some examples have a target
/// - [`DataError::MissingEos`] if input feeding meets a target not ending in `eos`
pub fn collate_pairs(
    examples: &[Example],
    pad: i64,
    eos: i64,
    left_pad_source: bool,
    left_pad_target: bool,
    input_feeding: bool,
) -> Result<Option<MiniBatch>> {
    if examples.is_empty() {
        return Ok(None);
    }

    let has_target = examples.iter().any(|e| e.target.is_some());
    if has_target {
        if let Some(position) = examples.iter().position(|e| e.target.is_none()) {
            return Err(DataError::InconsistentBatch { position }.into());
        }
    }

    // Stable sort, longest source first.
    let mut sort_order: Vec<usize> = (0..examples.len()).collect();
    sort_order.sort_by(|&a, &b| examples[b].source_len().cmp(&examples[a].source_len()));
    let sorted: Vec<&Example> = sort_order.iter().map(|&i| &examples[i]).collect();

    let ids: Vec<usize> = sorted.iter().map(|e| e.id).collect();
    let sources: Vec<&[i64]> = sorted.iter().map(|e| e.source.as_slice()).collect();
    let src_tokens = collate_tokens(&sources, pad, eos, left_pad_source, false)?;
    let src_lengths: Vec<i64> = sources.iter().map(|s| s.len() as i64).collect();

    let mut target = None;
    let mut prev_output_tokens = None;
    let ntokens = if has_target {
        let targets: Vec<&[i64]> = sorted
            .iter()
            .map(|e| e.target.as_deref().unwrap_or_default())
            .collect();
        target = Some(collate_tokens(&targets, pad, eos, left_pad_target, false)?.to_tensor());
        if input_feeding {
            let shifted = collate_tokens(&targets, pad, eos, left_pad_target, true)
                .context("Failed to build shifted targets for input feeding")?;
            prev_output_tokens = Some(shifted.to_tensor());
        }
        targets.iter().map(|t| t.len()).sum()
    } else {
        sources.iter().map(|s| s.len()).sum()
    };

    let constraints = if examples.iter().any(|e| e.constraints.is_some()) {
        let rows: Vec<&[i64]> = sorted
            .iter()
            .map(|e| e.constraints.as_deref().unwrap_or_default())
            .collect();
        Some(collate_tokens(&rows, 0, eos, false, false)?.to_tensor())
    } else {
        None
    };

    Ok(Some(MiniBatch {
        ids,
        nsentences: examples.len(),
        ntokens,
        net_input: NetInput {
            src_tokens: src_tokens.to_tensor(),
            src_lengths: Tensor::from_slice(&src_lengths),
            prev_output_tokens,
        },
        target,
        constraints,
    }))
}

//=======================================================================================================
/// A `Collator` for sentence pairs, configured with the dataset's special ids
/// and padding sides.
///
/// Defaults: left-padded sources, right-padded targets, input feeding on.
///
/// # Example
/// ```ignore
/// let collator = PairCollator::new(vocab.pad(), vocab.eos())
///     .left_pad_source(false)
///     .input_feeding(false);
/// let batch = collator.collate(&examples)?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairCollator {
    pad: i64,
    eos: i64,
    left_pad_source: bool,
    left_pad_target: bool,
    input_feeding: bool,
}

impl PairCollator {
    /// Creates a new `PairCollator` with default padding sides.
    pub fn new(pad: i64, eos: i64) -> Self {
        Self {
            pad,
            eos,
            left_pad_source: true,
            left_pad_target: false,
            input_feeding: true,
        }
    }

    pub fn left_pad_source(mut self, left_pad: bool) -> Self {
        self.left_pad_source = left_pad;
        self
    }

    pub fn left_pad_target(mut self, left_pad: bool) -> Self {
        self.left_pad_target = left_pad;
        self
    }

    /// Whether to produce `prev_output_tokens` for teacher forcing.
    pub fn input_feeding(mut self, enabled: bool) -> Self {
        self.input_feeding = enabled;
        self
    }

    pub fn pad(&self) -> i64 {
        self.pad
    }

    pub fn eos(&self) -> i64 {
        self.eos
    }
}

impl Collator for PairCollator {
    fn collate(&self, examples: &[Example]) -> Result<Option<MiniBatch>> {
        collate_pairs(
            examples,
            self.pad,
            self.eos,
            self.left_pad_source,
            self.left_pad_target,
            self.input_feeding,
        )
    }
}
