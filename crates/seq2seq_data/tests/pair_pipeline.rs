//! End-to-end tests: token files -> PairDataset -> PairBatchLoader -> MiniBatch.
//!
//! Tests cover:
//! - Training batches built from pre-tokenized files
//! - Mapping padded rows back to their examples through `ids`
//! - Per-epoch batch shuffling
//! - Constraints and batch size multiples
//! - Source-only batching for inference

mod common;
use common::{make_dataset, row, toy_corpus, vocab, write_id_file, EOS, PAD};
use seq2seq_data::{
    strip_pad, InMemoryTokens, LoaderConfig, PairBatchLoader, PairDataset,
    PairDatasetConfig, TokenSource,
};

use anyhow::Result;
use std::collections::HashMap;
use tch::Device;

// ================================================================================================
// 1. Training
// ================================================================================================
#[test]
fn test_training_batches_from_files() -> Result<()> {
    let (src, tgt) = toy_corpus(60);
    let src_file = write_id_file(&src)?;
    let tgt_file = write_id_file(&tgt)?;

    let src_tokens = InMemoryTokens::from_id_file(src_file.path(), Some(EOS))?;
    let tgt_tokens = InMemoryTokens::from_id_file(tgt_file.path(), Some(EOS))?;
    let (src_sizes, tgt_sizes) = (src_tokens.lengths(), tgt_tokens.lengths());
    let dataset = PairDataset::builder(src_tokens, src_sizes, &vocab())
        .target(tgt_tokens, tgt_sizes, &vocab())
        .build()?;

    let config = LoaderConfig::builder().max_tokens(24).seed(7).build();
    let loader = PairBatchLoader::new(dataset, config)?;

    let mut seen = Vec::new();
    for batch in loader.iter(0) {
        let batch = batch?;
        let n = batch.ids.len();
        assert_eq!(batch.batch_size(), n);
        assert_eq!(batch.net_input.src_tokens.size()[0], n as i64);

        let lengths = Vec::<i64>::try_from(&batch.net_input.src_lengths)?;
        assert!(lengths.windows(2).all(|w| w[0] >= w[1]));

        let target = batch.target.as_ref().expect("training batch has targets");
        let prev = batch
            .net_input
            .prev_output_tokens
            .as_ref()
            .expect("input feeding is on by default");

        let mut ntokens = 0;
        for (r, &id) in batch.ids.iter().enumerate() {
            let expected_src: Vec<i64> = src[id].iter().copied().chain([EOS]).collect();
            let expected_tgt: Vec<i64> = tgt[id].iter().copied().chain([EOS]).collect();
            let shifted: Vec<i64> = [EOS].into_iter().chain(tgt[id].iter().copied()).collect();

            assert_eq!(strip_pad(&row(&batch.net_input.src_tokens, r)?, PAD), expected_src);
            assert_eq!(lengths[r], expected_src.len() as i64);
            assert_eq!(strip_pad(&row(target, r)?, PAD), expected_tgt);
            assert_eq!(strip_pad(&row(prev, r)?, PAD), shifted);
            ntokens += expected_tgt.len();
        }
        assert_eq!(batch.ntokens, ntokens);
        seen.extend(batch.ids);
    }

    seen.sort_unstable();
    assert_eq!(seen, (0..60).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_batches_are_reshuffled_between_epochs() -> Result<()> {
    let (src, tgt) = toy_corpus(50);
    let dataset = make_dataset(&src, &tgt, PairDatasetConfig::default())?;
    let config = LoaderConfig::builder().max_sentences(5).seed(11).build();
    let loader = PairBatchLoader::new(dataset, config)?;

    let epoch_ids = |epoch: usize| -> Result<Vec<Vec<usize>>> {
        loader.iter(epoch).map(|b| Ok(b?.ids)).collect()
    };
    let epoch0 = epoch_ids(0)?;
    let epoch1 = epoch_ids(1)?;

    assert_eq!(epoch0, epoch_ids(0)?);
    assert_ne!(epoch0, epoch1);

    // Same batches, different order.
    let (mut a, mut b) = (epoch0, epoch1);
    a.sort();
    b.sort();
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn test_required_batch_size_multiple() -> Result<()> {
    let (src, tgt) = toy_corpus(45);
    let dataset = make_dataset(&src, &tgt, PairDatasetConfig::default())?;
    let config = LoaderConfig::builder()
        .max_tokens(30)
        .required_batch_size_multiple(4)
        .shuffle(false)
        .build();
    let loader = PairBatchLoader::new(dataset, config)?;

    let sizes: Vec<usize> = loader.batch_indices(0).map(|b| b.len()).collect();
    let (last, rest) = sizes.split_last().expect("at least one batch");
    assert!(*last > 0);
    assert!(rest.iter().all(|&n| n % 4 == 0 || n < 4));
    assert_eq!(sizes.iter().sum::<usize>(), 45);
    Ok(())
}

#[test]
fn test_constraints_follow_batch_order() -> Result<()> {
    let src = InMemoryTokens::new(vec![vec![4, EOS], vec![5, 6, 7, EOS], vec![8, 9, EOS]]);
    let tgt = InMemoryTokens::new(vec![vec![10, EOS], vec![11, EOS], vec![12, EOS]]);
    let constraints = InMemoryTokens::new(vec![vec![200], vec![201, 301], vec![202]]);
    let (src_sizes, tgt_sizes) = (src.lengths(), tgt.lengths());
    let dataset = PairDataset::builder(src, src_sizes, &vocab())
        .target(tgt, tgt_sizes, &vocab())
        .constraints(constraints.clone())
        .build()?;

    let examples = (0..dataset.len())
        .map(|i| dataset.get(i))
        .collect::<Result<Vec<_>>>()?;
    let batch = dataset.collate(&examples)?.expect("non-empty batch");

    assert_eq!(batch.ids, vec![1, 2, 0]);
    let collated = batch.constraints.as_ref().expect("constraints collated");
    assert_eq!(collated.size(), &[3, 2]);
    for (r, &id) in batch.ids.iter().enumerate() {
        // Constraint rows are zero-filled on the right.
        let expected = constraints.get(id)?;
        assert_eq!(strip_pad(&row(collated, r)?, 0), expected);
    }
    Ok(())
}

#[test]
fn test_batches_move_to_device() -> Result<()> {
    let (src, tgt) = toy_corpus(8);
    let dataset = make_dataset(&src, &tgt, PairDatasetConfig::default())?;
    let loader = PairBatchLoader::new(dataset, LoaderConfig::builder().max_sentences(8).build())?;

    let batch = loader.iter(0).next().expect("one batch")?;
    let moved = batch.to_device(Device::Cpu);
    assert_eq!(moved.ids, batch.ids);
    assert_eq!(moved.net_input.src_tokens.size(), batch.net_input.src_tokens.size());
    assert!(moved.has_input_feeding());
    Ok(())
}

// ================================================================================================
// 2. Inference
// ================================================================================================
#[test]
fn test_inference_outputs_map_back_to_input_lines() -> Result<()> {
    let (src, _) = toy_corpus(25);
    let lines: Vec<Vec<i64>> = src
        .iter()
        .map(|s| s.iter().copied().chain([EOS]).collect())
        .collect();

    let config = LoaderConfig::builder().max_tokens(16).shuffle(false).build();
    let loader = PairBatchLoader::for_inference(lines.clone(), &vocab(), config)?;
    assert!(!loader.dataset().has_target());

    let mut restored: HashMap<usize, Vec<i64>> = HashMap::new();
    for batch in loader.iter(0) {
        let batch = batch?;
        assert!(batch.target.is_none());
        assert!(!batch.has_input_feeding());
        assert_eq!(batch.ntokens, batch.ids.iter().map(|&id| lines[id].len()).sum::<usize>());

        // Sources are left-padded: padding only before the first real token.
        for (r, &id) in batch.ids.iter().enumerate() {
            let padded = row(&batch.net_input.src_tokens, r)?;
            let first_real = padded.iter().position(|&t| t != PAD).unwrap_or(padded.len());
            assert!(padded[first_real..].iter().all(|&t| t != PAD));
            restored.insert(id, strip_pad(&padded, PAD));
        }
    }

    assert_eq!(restored.len(), lines.len());
    for (id, line) in lines.iter().enumerate() {
        assert_eq!(&restored[&id], line);
    }
    Ok(())
}

#[test]
fn test_inference_rejects_overlong_lines() -> Result<()> {
    let lines = vec![vec![4, 5, EOS], vec![4; 20]];

    let strict = LoaderConfig::builder().max_positions(10, 10).build();
    assert!(PairBatchLoader::for_inference(lines.clone(), &vocab(), strict).is_err());

    let lenient = LoaderConfig::builder()
        .max_positions(10, 10)
        .ignore_invalid_inputs(true)
        .build();
    let loader = PairBatchLoader::for_inference(lines, &vocab(), lenient)?;
    let ids: Vec<usize> = loader
        .iter(0)
        .map(|b| Ok(b?.ids))
        .collect::<Result<Vec<_>>>()?
        .concat();
    assert_eq!(ids, vec![0]);
    Ok(())
}
