//! Sentence-pair datasets and batch collation for sequence-to-sequence models.

pub mod collator;
pub mod dataset;
pub mod error;
pub mod loader;
pub mod minibatch;
pub mod sample;
pub mod sampler;
pub mod tokens;
pub mod vocab;

pub use collator::{collate_pairs, collate_tokens, strip_pad, Collator, PairCollator, PaddedTokens};
pub use dataset::{PairDataset, PairDatasetBuilder, PairDatasetConfig, SizedDataset};
pub use error::DataError;
pub use loader::{LoaderConfig, PairBatchLoader};
pub use minibatch::{MiniBatch, NetInput};
pub use sample::Example;
pub use sampler::{
    batch_by_size, filter_by_size, BatchBudget, BatchSampler, RandomSampler, Sampler,
    SequentialSampler, TokenBudgetBatchSampler,
};
pub use tokens::{InMemoryTokens, TokenSource};
pub use vocab::{SpecialTokens, Vocabulary};
