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

use std::borrow::Borrow;
use tch::nn::{Path, RNN, RNNConfig};
use tch::{nn, Kind, Tensor};

/// # Source sequence encoder
/// Embeds the source tokens, masks padding positions and runs an (optionally
/// bidirectional) LSTM to produce per-position encoder outputs.
#[derive(Debug)]
pub struct PointerGeneratorEncoder {
    embedding: nn::Embedding,
    lstm: nn::LSTM,
    pad_index: i64,
    hidden_size: i64,
    bidirectional: bool,
}

impl PointerGeneratorEncoder {
    pub fn new<'p, P>(
        p: P,
        vocab_size: i64,
        embedding_dim: i64,
        hidden_size: i64,
        bidirectional: bool,
        pad_index: i64,
    ) -> PointerGeneratorEncoder
    where
        P: Borrow<Path<'p>>,
    {
        let p = p.borrow();
        let embedding = nn::embedding(p / "embedding", vocab_size, embedding_dim, Default::default());
        let lstm = nn::lstm(
            p / "lstm",
            embedding_dim,
            hidden_size,
            RNNConfig {
                bidirectional,
                ..Default::default()
            },
        );
        PointerGeneratorEncoder {
            embedding,
            lstm,
            pad_index,
            hidden_size,
            bidirectional,
        }
    }

    pub fn output_dim(&self) -> i64 {
        if self.bidirectional {
            self.hidden_size * 2
        } else {
            self.hidden_size
        }
    }

    pub fn is_bidirectional(&self) -> bool {
        self.bidirectional
    }

    /// Encodes a batch of source token indices.
    ///
    /// Returns the encoder outputs, shaped (batch size, source length,
    /// output dimension), and the boolean source padding mask, shaped
    /// (batch size, source length).
    pub fn forward(&self, source_tokens: &Tensor) -> (Tensor, Tensor) {
        let source_mask = source_tokens.ne(self.pad_index);
        let embedded_input = source_tokens.apply(&self.embedding);
        let embedded_input = embedded_input * source_mask.unsqueeze(-1).to_kind(Kind::Float);
        let (encoder_outputs, _) = self.lstm.seq(&embedded_input);
        (encoder_outputs, source_mask)
    }
}

/// Extracts the encoder output at the last valid (non padding) position of
/// each example. For a bidirectional encoder the backward pass ends at
/// position 0, so its final state is read there and concatenated with the
/// final forward state.
pub(crate) fn final_encoder_states(
    encoder_outputs: &Tensor,
    source_mask: &Tensor,
    bidirectional: bool,
) -> Tensor {
    let output_dim = encoder_outputs.size()[2];
    let last_positions = (source_mask
        .to_kind(Kind::Int64)
        .sum_dim_intlist([-1].as_slice(), false, Kind::Int64)
        - 1)
    .clamp_min(0);
    let index = last_positions
        .view([-1, 1, 1])
        .expand([-1, 1, output_dim], true);
    let final_states = encoder_outputs.gather(1, &index, false).squeeze_dim(1);
    if bidirectional {
        let half = output_dim / 2;
        let final_forward = final_states.narrow(-1, 0, half);
        let final_backward = encoder_outputs.select(1, 0).narrow(-1, half, half);
        Tensor::cat(&[final_forward, final_backward], -1)
    } else {
        final_states
    }
}
