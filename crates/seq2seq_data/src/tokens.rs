use crate::error::DataError;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// A `TokenSource` provides indexed access to tokenized sequences.
///
/// Source, target and constraint sides of a [`PairDataset`](crate::dataset::PairDataset)
/// are each backed by one. Implementations can be in-memory (`InMemoryTokens`)
/// or wrap disk-backed indexed storage; the latter may declare prefetch support
/// so the batching layer can hint upcoming reads.
///
/// All implementations must be `Send + Sync` to allow for safe
/// sharing across threads.
pub trait TokenSource: Send + Sync {
    /// Returns the sequence at `index`.
    /// Out-of-range indices are an error, never a panic.
    fn get(&self, index: usize) -> Result<Vec<i64>>;

    /// Returns the number of sequences.
    fn len(&self) -> usize;

    /// Checks if the collection is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`prefetch`](Self::prefetch) does anything useful.
    fn supports_prefetch(&self) -> bool {
        false
    }

    /// Hints that `indices` are about to be read. Default is a no-op.
    fn prefetch(&self, _indices: &[usize]) -> Result<()> {
        Ok(())
    }
}

/// A collection that stores all sequences in contiguous memory
/// with atomic-reference counting (`Arc<[Vec<i64>]>`).
///
/// This enables:
/// - Zero-copy clone: Cloning only bumps the `Arc` counter
/// - Thread-safe sharing: Safe concurrent read access (`Send + Sync`)
///
/// Ideal for corpora that comfortably fit into RAM, and for the
/// on-the-fly inference path where lines are tokenized just before batching.
#[derive(Debug, Clone)]
pub struct InMemoryTokens {
    sequences: Arc<[Vec<i64>]>,
    prefetch: bool,
    metadata: HashMap<String, String>,
}

impl InMemoryTokens {
    /// Creates a new in-memory collection from a vector of sequences.
    pub fn new(sequences: Vec<Vec<i64>>) -> Self {
        Self {
            sequences: sequences.into(),
            prefetch: false,
            metadata: HashMap::new(),
        }
    }

    /// Reads a pre-tokenized text file: one sequence per line, token ids
    /// separated by whitespace.
    ///
    /// Blank lines become empty sequences so that line `i` of a source file
    /// stays aligned with line `i` of its target file. When `eos` is given it
    /// is appended to every sequence.
    ///
    /// # Example
    /// ```ignore
    /// let src = InMemoryTokens::from_id_file("train.de.ids", Some(2))?;
    /// ```
    pub fn from_id_file(path: impl AsRef<Path>, eos: Option<i64>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open token file: {}", path.display()))?;

        let mut sequences = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Error reading line {}", line_num + 1))?;
            let mut ids = line
                .split_whitespace()
                .map(|tok| {
                    tok.parse::<i64>().with_context(|| {
                        format!(
                            "Invalid token id '{}' at {}:{}",
                            tok,
                            path.display(),
                            line_num + 1
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            ids.extend(eos);
            sequences.push(ids);
        }
        Ok(Self::new(sequences).with_metadata("path", path.display().to_string()))
    }

    /// Declares prefetch support. Prefetching stays a no-op since the data
    /// is already resident; this exists so wrappers can be exercised against
    /// collections that advertise the capability.
    pub fn with_prefetch(mut self, enabled: bool) -> Self {
        self.prefetch = enabled;
        self
    }

    /// Adds/updates metadata and returns the modified collection.
    /// Enables chaining: `tokens.with_metadata("lang", "de")`.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the value of a metadata field, if it exists.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    /// Length of every sequence, in storage order.
    pub fn lengths(&self) -> Vec<usize> {
        self.sequences.iter().map(Vec::len).collect()
    }

    /// Borrows the sequence at `index` without copying.
    pub fn sequence(&self, index: usize) -> Option<&[i64]> {
        self.sequences.get(index).map(Vec::as_slice)
    }
}

impl TokenSource for InMemoryTokens {
    fn get(&self, index: usize) -> Result<Vec<i64>> {
        self.sequence(index)
            .map(<[i64]>::to_vec)
            .ok_or_else(|| {
                DataError::IndexOutOfBounds {
                    index,
                    len: self.sequences.len(),
                }
                .into()
            })
    }

    fn len(&self) -> usize {
        self.sequences.len()
    }

    fn supports_prefetch(&self) -> bool {
        self.prefetch
    }
}
