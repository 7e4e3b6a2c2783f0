//! Typed error kinds for dataset construction, collation and batching.
//!
//! Functions in this crate return `anyhow::Result`; the variants below are
//! what ends up inside the `anyhow::Error`. Callers that need to branch on
//! the failure kind can recover it with `err.downcast_ref::<DataError>()`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// Source and target vocabularies disagree on a special token id.
    #[error(
        "Vocabulary mismatch: source {token} id is {src_id} but target {token} id is {tgt_id}"
    )]
    VocabularyMismatch {
        token: &'static str,
        src_id: i64,
        tgt_id: i64,
    },

    /// Any other construction-time validation failure.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A token collection was asked for an index it does not hold.
    #[error("Index {index} out of bounds for collection of size {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Some examples in a batch carry a target and others do not.
    #[error("Example #{position} in batch has no target while other examples do")]
    InconsistentBatch { position: usize },

    /// A sequence had to end with eos (to be shifted for input feeding) but did not.
    #[error("Sequence #{position} does not end with eos ({eos}) and cannot be shifted")]
    MissingEos { position: usize, eos: i64 },

    /// An example is longer than the configured maximum positions.
    #[error(
        "Example {index} has size {size:?} which exceeds max positions {max_positions:?}"
    )]
    ExceedsMaxPositions {
        index: usize,
        size: (usize, usize),
        max_positions: (usize, usize),
    },

    /// A single example does not fit in the token budget of a batch.
    #[error("Example {index} has {num_tokens} tokens which exceeds max_tokens={max_tokens}")]
    ExceedsMaxTokens {
        index: usize,
        num_tokens: usize,
        max_tokens: usize,
    },
}
