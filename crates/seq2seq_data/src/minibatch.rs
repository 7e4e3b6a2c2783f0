use tch::{Device, Tensor};

/// Encoder/decoder inputs of a [`MiniBatch`].
///
/// - `src_tokens`: `[batch_size, max_src_len]`, padded with the pad id.
/// - `src_lengths`: `[batch_size]`, unpadded source lengths.
/// - `prev_output_tokens`: `[batch_size, max_tgt_len]`, the target shifted
///   right by one with eos in front (teacher forcing). Only present when the
///   batch has targets and input feeding is enabled.
#[derive(Debug)]
pub struct NetInput {
    pub src_tokens: Tensor,
    pub src_lengths: Tensor,
    pub prev_output_tokens: Option<Tensor>,
}

/// The `MiniBatch` struct is one collated group of sentence pairs, ready for
/// the model.
///
/// Rows of every tensor follow the same order as `ids`: descending source
/// length, ties kept in input order. All tensors are `Int64`.
///
/// # Examples
/// Suppose we collate 3 pairs with source lengths `[2, 4, 3]` and target
/// lengths `[3, 2, 5]`. The resulting `MiniBatch` holds:
/// - `ids` -> the three example ids, reordered as `[1, 2, 0]`
/// - `net_input.src_tokens` -> shape `[3, 4]`
/// - `net_input.src_lengths` -> `[4, 3, 2]`
/// - `target` / `net_input.prev_output_tokens` -> shape `[3, 5]`
/// - `ntokens` -> `10`, the sum of target lengths
#[derive(Debug)]
pub struct MiniBatch {
    pub ids: Vec<usize>,
    pub nsentences: usize,
    pub ntokens: usize,
    pub net_input: NetInput,
    pub target: Option<Tensor>,
    pub constraints: Option<Tensor>,
}

impl MiniBatch {
    /// Returns the number of sentences in the batch.
    pub fn batch_size(&self) -> usize {
        self.nsentences
    }

    /// Whether the batch carries shifted decoder inputs.
    pub fn has_input_feeding(&self) -> bool {
        self.net_input.prev_output_tokens.is_some()
    }

    /// Transfers all tensors to the target device (CPU/GPU)
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            ids: self.ids.clone(),
            nsentences: self.nsentences,
            ntokens: self.ntokens,
            net_input: NetInput {
                src_tokens: self.net_input.src_tokens.to_device(device),
                src_lengths: self.net_input.src_lengths.to_device(device),
                prev_output_tokens: self
                    .net_input
                    .prev_output_tokens
                    .as_ref()
                    .map(|t| t.to_device(device)),
            },
            target: self.target.as_ref().map(|t| t.to_device(device)),
            constraints: self.constraints.as_ref().map(|t| t.to_device(device)),
        }
    }
}
