// Copyright 2019 Ilya Gusev
// Copyright 2019 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::common::error::RustSummarusError;
use std::convert::TryFrom;
use tch::{Kind, Tensor};

/// # Per-batch extended vocabulary
/// Out-of-vocabulary source words are rewritten to transient indices appended
/// beyond the fixed vocabulary (the first such word of an example maps to
/// `vocab_size`, the second to `vocab_size + 1`, ...), so that the copy
/// mechanism can place probability mass on specific source words. The mapping
/// is example-local and is rebuilt for every batch.
pub struct ExtendedBatch {
    /// Zero probability mass buffer for the extra slots, shaped
    /// (batch size, largest source out-of-vocabulary count in the batch).
    pub extra_zeros: Tensor,
    /// Source tokens in the target namespace with out-of-vocabulary entries
    /// rewritten to extended indices, shaped (batch size, source length).
    pub source_tokens: Tensor,
    /// Target tokens rewritten the same way, with words that cannot be copied
    /// from the source collapsed back to the out-of-vocabulary index.
    pub target_tokens: Option<Tensor>,
}

/// Arena of out-of-vocabulary slots for a single example. Slots are assigned
/// by first occurrence over the concatenated source and target sequences, so
/// the slot order matches the order in which the words appear in the source.
struct OovSlots {
    identities: Vec<i64>,
}

impl OovSlots {
    fn new() -> OovSlots {
        OovSlots {
            identities: Vec::new(),
        }
    }

    fn rank(&mut self, identity: i64) -> i64 {
        match self
            .identities
            .iter()
            .position(|&existing| existing == identity)
        {
            Some(rank) => rank as i64,
            None => {
                self.identities.push(identity);
                (self.identities.len() - 1) as i64
            }
        }
    }

    fn len(&self) -> i64 {
        self.identities.len() as i64
    }
}

pub(crate) fn tensor_to_rows(tensor: &Tensor) -> Result<Vec<Vec<i64>>, RustSummarusError> {
    let size = tensor.size();
    let (batch_size, sequence_length) = (size[0] as usize, size[1] as usize);
    let flat = Vec::<i64>::try_from(&tensor.to_kind(Kind::Int64).reshape([-1]))?;
    Ok(flat
        .chunks(sequence_length)
        .take(batch_size)
        .map(|row| row.to_vec())
        .collect())
}

/// Rewrites a batch of source (and optionally target) token indices against
/// the batch's extended vocabulary.
///
/// # Arguments
///
/// * `source_to_target` - source tokens mapped to the target namespace, shape (batch size, source length).
/// * `source_token_ids` - per-example word identity ids for the source, shape (batch size, source length).
/// * `target_tokens` - optional target tokens including start/end symbols, shape (batch size, target length).
/// * `target_token_ids` - word identity ids for the target, sharing the source numbering space.
/// * `vocab_size` - fixed target vocabulary size.
/// * `oov_index` - index of the out-of-vocabulary token.
///
/// Word identities must be assigned in order of first occurrence over the
/// concatenated source and target sequences of each example; identical words
/// then share a single extended index within an example. Target words absent
/// from the source span cannot be copied and collapse to `oov_index`.
pub fn extend_batch(
    source_to_target: &Tensor,
    source_token_ids: &Tensor,
    target_tokens: Option<&Tensor>,
    target_token_ids: Option<&Tensor>,
    vocab_size: i64,
    oov_index: i64,
) -> Result<ExtendedBatch, RustSummarusError> {
    let device = source_to_target.device();
    let source_rows = tensor_to_rows(source_to_target)?;
    let source_identity_rows = tensor_to_rows(source_token_ids)?;
    let target_rows = match target_tokens {
        Some(tokens) => Some(tensor_to_rows(tokens)?),
        None => None,
    };
    let target_identity_rows = match target_token_ids {
        Some(ids) => Some(tensor_to_rows(ids)?),
        None => None,
    };
    if target_rows.is_some() != target_identity_rows.is_some() {
        return Err(RustSummarusError::ValueError(
            "target tokens and target token ids must be provided together".into(),
        ));
    }

    let batch_size = source_rows.len();
    let source_length = source_rows.first().map(Vec::len).unwrap_or(0);
    let target_length = target_rows
        .as_ref()
        .and_then(|rows| rows.first().map(Vec::len))
        .unwrap_or(0);

    let mut extended_source = Vec::with_capacity(batch_size * source_length);
    let mut extended_target = Vec::with_capacity(batch_size * target_length);
    let mut max_source_oov_count = 0;

    for example in 0..batch_size {
        let mut slots = OovSlots::new();
        for (&token, &identity) in source_rows[example]
            .iter()
            .zip(source_identity_rows[example].iter())
        {
            if token == oov_index {
                extended_source.push(vocab_size + slots.rank(identity));
            } else {
                extended_source.push(token);
            }
        }
        let source_oov_count = slots.len();
        max_source_oov_count = max_source_oov_count.max(source_oov_count);

        if let (Some(target_rows), Some(target_identity_rows)) =
            (target_rows.as_ref(), target_identity_rows.as_ref())
        {
            // The largest index copyable from this example's source span.
            let max_source_index = vocab_size - 1 + source_oov_count;
            for (&token, &identity) in target_rows[example]
                .iter()
                .zip(target_identity_rows[example].iter())
            {
                if token == oov_index {
                    let extended = vocab_size + slots.rank(identity);
                    if extended > max_source_index {
                        extended_target.push(oov_index);
                    } else {
                        extended_target.push(extended);
                    }
                } else {
                    extended_target.push(token);
                }
            }
        }
    }

    let source_tokens = Tensor::from_slice(&extended_source)
        .view([batch_size as i64, source_length as i64])
        .to_device(device);
    let target_tokens = if target_rows.is_some() {
        Some(
            Tensor::from_slice(&extended_target)
                .view([batch_size as i64, target_length as i64])
                .to_device(device),
        )
    } else {
        None
    };
    let extra_zeros = Tensor::zeros(
        [batch_size as i64, max_source_oov_count],
        (Kind::Float, device),
    );

    Ok(ExtendedBatch {
        extra_zeros,
        source_tokens,
        target_tokens,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    // Vocabulary layout used below: 0 padding, 1 OOV, 2 @start@, 3 @end@,
    // 4.. regular tokens, vocab_size = 10.
    const VOCAB_SIZE: i64 = 10;
    const OOV: i64 = 1;

    #[test]
    fn oov_words_shared_between_source_and_target() -> anyhow::Result<()> {
        // source: "the zorblax ran", target: "@start@ zorblax ran fast @end@"
        // with "zorblax" and "fast" missing from the vocabulary.
        let source_to_target = Tensor::from_slice(&[4, OOV, 5]).view([1, 3]);
        let source_token_ids = Tensor::from_slice(&[1, 2, 3]).view([1, 3]);
        let target_tokens = Tensor::from_slice(&[2, OOV, 5, OOV, 3]).view([1, 5]);
        let target_token_ids = Tensor::from_slice(&[4, 2, 3, 5, 6]).view([1, 5]);

        let extended = extend_batch(
            &source_to_target,
            &source_token_ids,
            Some(&target_tokens),
            Some(&target_token_ids),
            VOCAB_SIZE,
            OOV,
        )?;

        // "zorblax" takes the first extra slot in both source and target.
        assert_eq!(extended.source_tokens.int64_value(&[0, 1]), VOCAB_SIZE);
        let target = extended.target_tokens.unwrap();
        assert_eq!(target.int64_value(&[0, 1]), VOCAB_SIZE);
        // "fast" cannot be copied from the source and collapses to OOV.
        assert_eq!(target.int64_value(&[0, 3]), OOV);
        // A single distinct source OOV word drives the extra slot width.
        assert_eq!(extended.extra_zeros.size(), vec![1, 1]);
        Ok(())
    }

    #[test]
    fn example_without_oov_words_keeps_zero_slots() -> anyhow::Result<()> {
        let source_to_target = Tensor::from_slice(&[4, 5, 6, 4, OOV, 6]).view([2, 3]);
        let source_token_ids = Tensor::from_slice(&[1, 2, 3, 1, 2, 3]).view([2, 3]);

        let extended = extend_batch(
            &source_to_target,
            &source_token_ids,
            None,
            None,
            VOCAB_SIZE,
            OOV,
        )?;

        // Slot width is the batch-wide maximum, zero-padded for the first example.
        assert_eq!(extended.extra_zeros.size(), vec![2, 1]);
        assert_eq!(extended.extra_zeros.sum(Kind::Float).double_value(&[]), 0.0);
        let first_row = extended.source_tokens.get(0);
        assert_eq!(
            first_row.ge(VOCAB_SIZE).sum(Kind::Int64).int64_value(&[]),
            0,
            "example without OOV words must not receive extended indices"
        );
        Ok(())
    }

    #[test]
    fn repeated_oov_word_maps_to_a_single_slot() -> anyhow::Result<()> {
        let source_to_target = Tensor::from_slice(&[OOV, 5, OOV]).view([1, 3]);
        let source_token_ids = Tensor::from_slice(&[1, 2, 1]).view([1, 3]);

        let extended = extend_batch(
            &source_to_target,
            &source_token_ids,
            None,
            None,
            VOCAB_SIZE,
            OOV,
        )?;

        assert_eq!(extended.source_tokens.int64_value(&[0, 0]), VOCAB_SIZE);
        assert_eq!(extended.source_tokens.int64_value(&[0, 2]), VOCAB_SIZE);
        assert_eq!(extended.extra_zeros.size(), vec![1, 1]);
        Ok(())
    }

    #[test]
    fn extension_is_idempotent() -> anyhow::Result<()> {
        let source_to_target = Tensor::from_slice(&[4, OOV, 5, OOV, OOV, 6]).view([2, 3]);
        let source_token_ids = Tensor::from_slice(&[1, 2, 3, 1, 2, 3]).view([2, 3]);

        let first = extend_batch(
            &source_to_target,
            &source_token_ids,
            None,
            None,
            VOCAB_SIZE,
            OOV,
        )?;
        let second = extend_batch(
            &source_to_target,
            &source_token_ids,
            None,
            None,
            VOCAB_SIZE,
            OOV,
        )?;

        assert!(first.source_tokens.equal(&second.source_tokens));
        assert_eq!(first.extra_zeros.size(), second.extra_zeros.size());
        Ok(())
    }
}
