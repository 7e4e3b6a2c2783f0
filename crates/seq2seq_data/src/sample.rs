/// The `Example` struct represents a single sentence pair as handed to the
/// collation step.
///
/// - `id`: index of the example in its dataset. Kept through batching so
///   outputs can be put back into input order.
/// - `source`: source token ids.
/// - `target`: target token ids, absent for monolingual/inference data.
/// - `constraints`: optional auxiliary constraint ids (e.g. lexical
///   constraints for constrained decoding).
///
/// Examples are produced on demand by a dataset lookup and are never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub id: usize,
    pub source: Vec<i64>,
    pub target: Option<Vec<i64>>,
    pub constraints: Option<Vec<i64>>,
}

impl Example {
    /// Creates a source-only `Example`.
    ///
    /// Chain with [`with_target`](Self::with_target) and
    /// [`with_constraints`](Self::with_constraints) to fill in the rest.
    pub fn new(id: usize, source: Vec<i64>) -> Self {
        Self {
            id,
            source,
            target: None,
            constraints: None,
        }
    }

    /// Adds or overwrites the target sequence.
    pub fn with_target(mut self, target: Vec<i64>) -> Self {
        self.target = Some(target);
        self
    }

    /// Adds or overwrites the constraint sequence.
    pub fn with_constraints(mut self, constraints: Vec<i64>) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn source_len(&self) -> usize {
        self.source.len()
    }

    /// Target length, `0` when there is no target.
    pub fn target_len(&self) -> usize {
        self.target.as_ref().map_or(0, Vec::len)
    }
}
