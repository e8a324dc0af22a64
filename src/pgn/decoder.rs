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

use crate::pipelines::beam_search::DecodingState;
use tch::Tensor;

/// # Incremental decoding state
/// Everything the decoder carries across timesteps, one row per decoded
/// sequence (batch examples during training, batch x beam during search).
/// The encoder-derived fields are fixed for the whole decode; `hidden`,
/// `context` and `coverage` evolve step by step, while the `Option` fields
/// are only populated once the first decoder step has run.
pub struct DecoderState {
    /// Encoder outputs, shape (group size, source length, encoder output dim).
    pub encoder_outputs: Tensor,
    /// Boolean source padding mask, shape (group size, source length).
    pub source_mask: Tensor,
    /// Source tokens rewritten against the extended vocabulary.
    pub source_tokens: Tensor,
    /// Zero mass buffer appended to the vocabulary distribution.
    pub extra_zeros: Tensor,
    /// Decoder LSTM hidden state, shape (group size, decoder output dim).
    pub hidden: Tensor,
    /// Decoder LSTM cell state, shape (group size, decoder output dim).
    pub context: Tensor,
    /// Attention distribution produced by the last step.
    pub attention_scores: Option<Tensor>,
    /// Attention-weighted encoder context from the last step.
    pub attention_context: Option<Tensor>,
    /// Concatenated decoder input from the last step.
    pub decoder_input: Option<Tensor>,
    /// Accumulated attention mass per source position, present only when
    /// coverage is enabled.
    pub coverage: Option<Tensor>,
}

/// Duplicates each row of `tensor` `beam_size` times, keeping rows of the
/// same example contiguous.
fn expand_rows(tensor: &Tensor, beam_size: i64) -> Tensor {
    let size = tensor.size();
    let mut expanded_size = size.clone();
    expanded_size.insert(1, beam_size);
    let mut merged_size = size;
    merged_size[0] *= beam_size;
    tensor
        .unsqueeze(1)
        .expand(expanded_size.as_slice(), true)
        .reshape(merged_size.as_slice())
}

fn expand_optional_rows(tensor: &Option<Tensor>, beam_size: i64) -> Option<Tensor> {
    tensor
        .as_ref()
        .map(|tensor| expand_rows(tensor, beam_size))
}

fn reorder_optional_rows(tensor: &Option<Tensor>, row_indices: &Tensor) -> Option<Tensor> {
    tensor
        .as_ref()
        .map(|tensor| tensor.index_select(0, row_indices))
}

impl DecodingState for DecoderState {
    fn expand_to_beam(&mut self, beam_size: i64) {
        self.encoder_outputs = expand_rows(&self.encoder_outputs, beam_size);
        self.source_mask = expand_rows(&self.source_mask, beam_size);
        self.source_tokens = expand_rows(&self.source_tokens, beam_size);
        self.extra_zeros = expand_rows(&self.extra_zeros, beam_size);
        self.hidden = expand_rows(&self.hidden, beam_size);
        self.context = expand_rows(&self.context, beam_size);
        self.attention_scores = expand_optional_rows(&self.attention_scores, beam_size);
        self.attention_context = expand_optional_rows(&self.attention_context, beam_size);
        self.decoder_input = expand_optional_rows(&self.decoder_input, beam_size);
        self.coverage = expand_optional_rows(&self.coverage, beam_size);
    }

    fn reorder(&mut self, row_indices: &Tensor) {
        self.encoder_outputs = self.encoder_outputs.index_select(0, row_indices);
        self.source_mask = self.source_mask.index_select(0, row_indices);
        self.source_tokens = self.source_tokens.index_select(0, row_indices);
        self.extra_zeros = self.extra_zeros.index_select(0, row_indices);
        self.hidden = self.hidden.index_select(0, row_indices);
        self.context = self.context.index_select(0, row_indices);
        self.attention_scores = reorder_optional_rows(&self.attention_scores, row_indices);
        self.attention_context = reorder_optional_rows(&self.attention_context, row_indices);
        self.decoder_input = reorder_optional_rows(&self.decoder_input, row_indices);
        self.coverage = reorder_optional_rows(&self.coverage, row_indices);
    }
}
