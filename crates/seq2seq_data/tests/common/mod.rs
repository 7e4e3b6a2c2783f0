#![allow(dead_code)]

use seq2seq_data::{InMemoryTokens, PairDataset, PairDatasetConfig, SpecialTokens};

use anyhow::Result;
use std::io::Write;
use tch::Tensor;
use tempfile::NamedTempFile;

pub const PAD: i64 = 1;
pub const EOS: i64 = 2;

pub fn vocab() -> SpecialTokens {
    SpecialTokens::default()
}

/// Deterministic toy parallel corpus without eos. Line `i` has a source of
/// `1 + i % 7` ids and a target of `1 + (i * 3) % 5` ids, all >= 4.
pub fn toy_corpus(n: usize) -> (Vec<Vec<i64>>, Vec<Vec<i64>>) {
    let src = (0..n)
        .map(|i| (0..1 + i % 7).map(|j| 4 + ((i + j) % 50) as i64).collect())
        .collect();
    let tgt = (0..n)
        .map(|i| (0..1 + (i * 3) % 5).map(|j| 100 + ((i * j) % 50) as i64).collect())
        .collect();
    (src, tgt)
}

/// Writes sequences as one whitespace-separated line each.
pub fn write_id_file(sequences: &[Vec<i64>]) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    for seq in sequences {
        let line: Vec<String> = seq.iter().map(|t| t.to_string()).collect();
        writeln!(file, "{}", line.join(" "))?;
    }
    Ok(file)
}

/// Builds an in-memory pair dataset, appending eos to every sequence.
pub fn make_dataset(
    src: &[Vec<i64>],
    tgt: &[Vec<i64>],
    config: PairDatasetConfig,
) -> Result<PairDataset> {
    let with_eos = |seqs: &[Vec<i64>]| -> Vec<Vec<i64>> {
        seqs.iter()
            .map(|s| s.iter().copied().chain([EOS]).collect())
            .collect()
    };
    let src = InMemoryTokens::new(with_eos(src));
    let tgt = InMemoryTokens::new(with_eos(tgt));
    let (src_sizes, tgt_sizes) = (src.lengths(), tgt.lengths());
    PairDataset::builder(src, src_sizes, &vocab())
        .target(tgt, tgt_sizes, &vocab())
        .config(config)
        .build()
}

/// Row `r` of a 2-D token tensor.
pub fn row(tensor: &Tensor, r: usize) -> Result<Vec<i64>> {
    Ok(Vec::<i64>::try_from(&tensor.get(r as i64))?)
}
