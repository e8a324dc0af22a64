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

use crate::common::config::Config;
use crate::common::error::RustSummarusError;
use crate::common::vocab::Vocabulary;
use crate::pgn::attention::CoverageAttention;
use crate::pgn::decoder::DecoderState;
use crate::pgn::encoder::{final_encoder_states, PointerGeneratorEncoder};
use crate::pgn::extended_vocab::{extend_batch, tensor_to_rows, ExtendedBatch};
use crate::pipelines::beam_search::BeamSearch;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use tch::nn::{LSTMState, Path, RNN};
use tch::{nn, Kind, Tensor};

/// Additive term keeping log computations finite on zero probabilities.
const PROBABILITY_EPSILON: f64 = 1e-31;

/// # Pointer-Generator Network configuration
/// Defines the network hyper-parameters, deserialized from `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointerGeneratorConfig {
    pub embedding_dim: i64,
    pub hidden_size: i64,
    pub bidirectional: Option<bool>,
    pub target_embedding_dim: Option<i64>,
    pub projection_dim: Option<i64>,
    pub attention_dim: Option<i64>,
    pub max_decoding_steps: i64,
    pub beam_size: Option<i64>,
    pub use_coverage: Option<bool>,
    pub coverage_loss_weight: Option<f64>,
    pub scheduled_sampling_ratio: Option<f64>,
}

impl Config for PointerGeneratorConfig {}

/// Output of the pointer-generator forward pass.
pub struct PointerGeneratorOutput {
    /// Predicted token indices in the extended vocabulary. Shape
    /// (batch size, sequence length) for the training loop, (batch size,
    /// beam size, sequence length) after beam search.
    pub predictions: Tensor,
    /// Combined negative log likelihood and coverage loss, present when
    /// target tokens were supplied.
    pub loss: Option<Tensor>,
    /// Cumulative log probabilities of the beam hypotheses, present after
    /// beam search.
    pub class_log_probabilities: Option<Tensor>,
}

/// # Pointer-Generator Network (See et al., 2017)
/// Abstractive summarization model mixing a generation distribution over a
/// fixed vocabulary with a copy distribution over the source sequence. A
/// learned gate interpolates the two, and the copy distribution targets a
/// per-batch extended vocabulary so that out-of-vocabulary source words can
/// be produced verbatim.
pub struct PointerGeneratorNetwork {
    vocabulary: Vocabulary,
    start_index: i64,
    end_index: i64,
    oov_index: i64,
    pad_index: i64,
    vocab_size: i64,
    encoder: PointerGeneratorEncoder,
    target_embedder: nn::Embedding,
    decoder_cell: nn::LSTM,
    hidden_projection: nn::Linear,
    output_projection: nn::Linear,
    p_gen_layer: nn::Linear,
    attention: CoverageAttention,
    decoder_output_dim: i64,
    use_coverage: bool,
    coverage_loss_weight: f64,
    scheduled_sampling_ratio: f64,
    beam_search: BeamSearch,
}

impl PointerGeneratorNetwork {
    /// Builds a new `PointerGeneratorNetwork`.
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the model parameters.
    /// * `config` - `PointerGeneratorConfig` holding the hyper-parameters.
    /// * `vocabulary` - Shared source/target vocabulary.
    pub fn new<'p, P>(
        p: P,
        config: &PointerGeneratorConfig,
        vocabulary: Vocabulary,
    ) -> PointerGeneratorNetwork
    where
        P: Borrow<Path<'p>>,
    {
        let p = p.borrow();
        let vocab_size = vocabulary.size();
        let bidirectional = config.bidirectional.unwrap_or(true);
        let encoder = PointerGeneratorEncoder::new(
            p / "encoder",
            vocab_size,
            config.embedding_dim,
            config.hidden_size,
            bidirectional,
            vocabulary.pad_index(),
        );
        let encoder_output_dim = encoder.output_dim();
        let decoder_output_dim = encoder_output_dim;

        let target_embedding_dim = config.target_embedding_dim.unwrap_or(config.embedding_dim);
        let target_embedder = nn::embedding(
            p / "target_embedder",
            vocab_size,
            target_embedding_dim,
            Default::default(),
        );
        let decoder_input_dim = encoder_output_dim + target_embedding_dim;
        let decoder_cell = nn::lstm(
            p / "decoder_cell",
            decoder_input_dim,
            decoder_output_dim,
            Default::default(),
        );

        let projection_dim = config.projection_dim.unwrap_or(config.embedding_dim);
        let hidden_projection = nn::linear(
            p / "hidden_projection",
            decoder_output_dim,
            projection_dim,
            Default::default(),
        );
        let output_projection = nn::linear(
            p / "output_projection",
            projection_dim,
            vocab_size,
            Default::default(),
        );
        // Gate inputs: attention context, decoder hidden and cell states, and
        // the concatenated decoder input.
        let p_gen_layer = nn::linear(
            p / "p_gen_layer",
            decoder_output_dim * 3 + decoder_input_dim,
            1,
            Default::default(),
        );

        let use_coverage = config.use_coverage.unwrap_or(false);
        let attention = CoverageAttention::new(
            p / "attention",
            encoder_output_dim,
            decoder_output_dim,
            config.attention_dim.unwrap_or(encoder_output_dim),
            use_coverage,
        );
        let beam_search = BeamSearch::new(
            vocabulary.end_index(),
            config.max_decoding_steps,
            config.beam_size.unwrap_or(1),
        );

        PointerGeneratorNetwork {
            start_index: vocabulary.start_index(),
            end_index: vocabulary.end_index(),
            oov_index: vocabulary.oov_index(),
            pad_index: vocabulary.pad_index(),
            vocab_size,
            vocabulary,
            encoder,
            target_embedder,
            decoder_cell,
            hidden_projection,
            output_projection,
            p_gen_layer,
            attention,
            decoder_output_dim,
            use_coverage,
            coverage_loss_weight: config.coverage_loss_weight.unwrap_or(1.0),
            scheduled_sampling_ratio: config.scheduled_sampling_ratio.unwrap_or(0.0),
            beam_search,
        }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Forward pass through the network.
    ///
    /// When `target_tokens` (and their identity ids) are given, runs the
    /// teacher-forced decoding loop and computes the loss; when `train` is
    /// false, additionally runs beam search and reports its predictions.
    ///
    /// # Arguments
    ///
    /// * `source_tokens` - Source token indices, shape (batch size, source length).
    /// * `source_token_ids` - Per-example word identity ids for the source.
    /// * `source_to_target` - Source tokens mapped to the target namespace.
    /// * `target_tokens` - Optional target token indices including the start and end symbols.
    /// * `target_token_ids` - Optional word identity ids for the target.
    /// * `train` - Whether scheduled sampling may replace teacher forcing.
    pub fn forward_t(
        &self,
        source_tokens: &Tensor,
        source_token_ids: &Tensor,
        source_to_target: &Tensor,
        target_tokens: Option<&Tensor>,
        target_token_ids: Option<&Tensor>,
        train: bool,
    ) -> Result<PointerGeneratorOutput, RustSummarusError> {
        let (encoder_outputs, source_mask) = self.encoder.forward(source_tokens);
        let ExtendedBatch {
            extra_zeros,
            source_tokens: extended_source,
            target_tokens: modified_targets,
        } = extend_batch(
            source_to_target,
            source_token_ids,
            target_tokens,
            target_token_ids,
            self.vocab_size,
            self.oov_index,
        )?;

        let mut predictions = None;
        let mut loss = None;
        let mut class_log_probabilities = None;

        if let (Some(target_tokens), Some(modified_targets)) =
            (target_tokens, modified_targets.as_ref())
        {
            let mut state = self.build_state(
                encoder_outputs.shallow_clone(),
                source_mask.shallow_clone(),
                extended_source.shallow_clone(),
                extra_zeros.shallow_clone(),
            );
            let (loop_predictions, loop_loss) =
                self.forward_loop(&mut state, target_tokens, modified_targets, train)?;
            predictions = Some(loop_predictions);
            loss = Some(loop_loss);
        }

        if !train {
            let mut state =
                self.build_state(encoder_outputs, source_mask, extended_source, extra_zeros);
            let batch_size = source_tokens.size()[0];
            let start_predictions = Tensor::full(
                [batch_size],
                self.start_index,
                (Kind::Int64, source_tokens.device()),
            );
            let (beam_predictions, log_probabilities) =
                self.beam_search
                    .search(&start_predictions, &mut state, |last, state| {
                        self.take_step(last, state)
                    })?;
            predictions = Some(beam_predictions);
            class_log_probabilities = Some(log_probabilities);
        }

        let predictions = predictions.ok_or_else(|| {
            RustSummarusError::ValueError(
                "target tokens are required for a training forward pass".into(),
            )
        })?;
        Ok(PointerGeneratorOutput {
            predictions,
            loss,
            class_log_probabilities,
        })
    }

    /// Prepares the decoding state for a batch of encoded sources. The hidden
    /// state starts from the final encoder states and the cell state from
    /// zeros.
    pub fn init_decoder_state(
        &self,
        source_tokens: &Tensor,
        source_token_ids: &Tensor,
        source_to_target: &Tensor,
    ) -> Result<DecoderState, RustSummarusError> {
        let (encoder_outputs, source_mask) = self.encoder.forward(source_tokens);
        let extended = extend_batch(
            source_to_target,
            source_token_ids,
            None,
            None,
            self.vocab_size,
            self.oov_index,
        )?;
        Ok(self.build_state(
            encoder_outputs,
            source_mask,
            extended.source_tokens,
            extended.extra_zeros,
        ))
    }

    fn build_state(
        &self,
        encoder_outputs: Tensor,
        source_mask: Tensor,
        source_tokens: Tensor,
        extra_zeros: Tensor,
    ) -> DecoderState {
        let device = encoder_outputs.device();
        let batch_size = source_mask.size()[0];
        let source_length = source_mask.size()[1];
        let hidden =
            final_encoder_states(&encoder_outputs, &source_mask, self.encoder.is_bidirectional());
        let context = Tensor::zeros([batch_size, self.decoder_output_dim], (Kind::Float, device));
        let coverage = if self.use_coverage {
            Some(Tensor::zeros(
                [batch_size, source_length],
                (Kind::Float, device),
            ))
        } else {
            None
        };
        DecoderState {
            encoder_outputs,
            source_mask,
            source_tokens,
            extra_zeros,
            hidden,
            context,
            attention_scores: None,
            attention_context: None,
            decoder_input: None,
            coverage,
        }
    }

    /// Teacher-forced decoding loop. With a positive scheduled sampling
    /// ratio, individual steps are fed the model's own last prediction
    /// instead of the gold token.
    fn forward_loop(
        &self,
        state: &mut DecoderState,
        target_tokens: &Tensor,
        modified_targets: &Tensor,
        train: bool,
    ) -> Result<(Tensor, Tensor), RustSummarusError> {
        let device = state.source_mask.device();
        let batch_size = state.source_mask.size()[0];
        let num_decoding_steps = target_tokens.size()[1] - 1;

        let mut last_predictions =
            Tensor::full([batch_size], self.start_index, (Kind::Int64, device));
        let mut step_predictions: Vec<Tensor> = Vec::with_capacity(num_decoding_steps as usize);
        let mut step_probabilities: Vec<Tensor> = Vec::with_capacity(num_decoding_steps as usize);
        let mut coverage_loss: Option<Tensor> = None;

        for timestep in 0..num_decoding_steps {
            let input_choices = if train
                && self.scheduled_sampling_ratio > 0.0
                && Tensor::rand([1], (Kind::Float, device)).double_value(&[0])
                    < self.scheduled_sampling_ratio
            {
                last_predictions.shallow_clone()
            } else {
                target_tokens.select(1, timestep)
            };

            let coverage_before = state
                .coverage
                .as_ref()
                .map(|coverage| coverage.shallow_clone());
            let output_projections = self.decoder_step(&input_choices, state);
            let final_distribution = self.final_distribution(state, &output_projections)?;

            if let (Some(coverage_before), Some(attention_scores)) =
                (coverage_before, state.attention_scores.as_ref())
            {
                let step_coverage_loss = attention_scores
                    .minimum(&coverage_before)
                    .sum_dim_intlist([-1].as_slice(), false, Kind::Float);
                coverage_loss = Some(match coverage_loss {
                    Some(accumulated) => accumulated + step_coverage_loss,
                    None => step_coverage_loss,
                });
            }

            last_predictions = final_distribution.argmax(-1, false);
            step_predictions.push(last_predictions.unsqueeze(1));
            step_probabilities.push(final_distribution);
        }

        let predictions = Tensor::cat(&step_predictions, 1);
        let probabilities = Tensor::stack(&step_probabilities, 2);
        let mut loss = self.negative_log_likelihood(&probabilities, modified_targets);
        if let Some(coverage_loss) = coverage_loss {
            let coverage_loss = (coverage_loss / num_decoding_steps as f64).mean(Kind::Float);
            loss = loss + self.coverage_loss_weight * coverage_loss;
        }
        Ok((predictions, loss))
    }

    /// Runs one decoder step: embeds the input token (extended indices fall
    /// back to the out-of-vocabulary embedding), attends over the encoder
    /// outputs and advances the LSTM cell. Returns the unnormalized
    /// vocabulary projections and updates the step fields of `state`.
    fn decoder_step(&self, last_predictions: &Tensor, state: &mut DecoderState) -> Tensor {
        let is_extended = last_predictions
            .ge(self.vocab_size)
            .to_kind(Kind::Int64);
        let fixed_predictions =
            last_predictions - last_predictions * &is_extended + self.oov_index * is_extended;
        let embedded_input = fixed_predictions.apply(&self.target_embedder);

        let attention_scores = self.attention.forward(
            &state.hidden,
            &state.encoder_outputs,
            &state.source_mask,
            state.coverage.as_ref(),
        );
        if let Some(coverage) = &state.coverage {
            state.coverage = Some(coverage + &attention_scores);
        }
        let attention_context = attention_scores
            .unsqueeze(1)
            .bmm(&state.encoder_outputs)
            .squeeze_dim(1);
        let decoder_input = Tensor::cat(&[&attention_context, &embedded_input], -1);

        let lstm_state = LSTMState((state.hidden.unsqueeze(0), state.context.unsqueeze(0)));
        let new_state = self.decoder_cell.step(&decoder_input, &lstm_state);
        state.hidden = new_state.h().squeeze_dim(0);
        state.context = new_state.c().squeeze_dim(0);

        let output_projections = state
            .hidden
            .apply(&self.hidden_projection)
            .apply(&self.output_projection);

        state.attention_scores = Some(attention_scores);
        state.attention_context = Some(attention_context);
        state.decoder_input = Some(decoder_input);
        output_projections
    }

    /// Mixes the generation and copy distributions over the extended
    /// vocabulary. Copy mass lands on the extended source indices via
    /// scatter-add, so repeated source words accumulate their attention.
    fn final_distribution(
        &self,
        state: &DecoderState,
        output_projections: &Tensor,
    ) -> Result<Tensor, RustSummarusError> {
        let (attention_scores, attention_context, decoder_input) = match (
            &state.attention_scores,
            &state.attention_context,
            &state.decoder_input,
        ) {
            (Some(scores), Some(context), Some(input)) => (scores, context, input),
            _ => {
                return Err(RustSummarusError::ValueError(
                    "a decoder step must run before the distributions can be mixed".into(),
                ))
            }
        };

        let decoder_state = Tensor::cat(&[&state.hidden, &state.context], 1);
        let p_gen = Tensor::cat(&[attention_context, &decoder_state, decoder_input], 1)
            .apply(&self.p_gen_layer)
            .sigmoid();

        let vocab_distribution = output_projections.softmax(-1, Kind::Float) * &p_gen;
        let attention_distribution = attention_scores * (1.0 - &p_gen);

        let vocab_distribution = if state.extra_zeros.size()[1] > 0 {
            Tensor::cat(&[&vocab_distribution, &state.extra_zeros], 1)
        } else {
            vocab_distribution
        };
        let final_distribution =
            vocab_distribution.scatter_add(1, &state.source_tokens, &attention_distribution);
        let normalization_factor =
            final_distribution.sum_dim_intlist([-1].as_slice(), true, Kind::Float);
        debug_assert!(
            normalization_factor.min().double_value(&[]) > 0.0,
            "combined distribution lost all probability mass"
        );
        Ok(final_distribution / normalization_factor)
    }

    /// Log probabilities for one beam search step over the extended
    /// vocabulary.
    pub fn take_step(
        &self,
        last_predictions: &Tensor,
        state: &mut DecoderState,
    ) -> Result<Tensor, RustSummarusError> {
        let output_projections = self.decoder_step(last_predictions, state);
        let final_distribution = self.final_distribution(state, &output_projections)?;
        Ok((final_distribution + PROBABILITY_EPSILON).log())
    }

    /// Sequence negative log likelihood averaged over non-padding target
    /// positions. `probabilities` is shaped (batch size, extended vocabulary
    /// size, steps) and `targets` still carries the leading start symbol.
    fn negative_log_likelihood(&self, probabilities: &Tensor, targets: &Tensor) -> Tensor {
        let num_steps = probabilities.size()[2];
        let targets = targets.narrow(1, 1, num_steps);
        let log_probabilities = (probabilities + PROBABILITY_EPSILON).log();
        let gathered = log_probabilities
            .gather(1, &targets.unsqueeze(1), false)
            .squeeze_dim(1);
        let mask = targets.ne(self.pad_index).to_kind(Kind::Float);
        -(gathered * &mask).sum(Kind::Float) / mask.sum(Kind::Float)
    }

    /// Turns predicted extended-vocabulary indices back into token strings.
    /// Sequences are truncated at the first end symbol; extended indices are
    /// resolved against the out-of-vocabulary words of the corresponding
    /// source, ordered by first occurrence.
    ///
    /// # Arguments
    ///
    /// * `predictions` - Predicted indices, shape (batch size, sequence length) or (batch size, beam size, sequence length); only the top beam is decoded.
    /// * `source_to_target` - Source tokens mapped to the target namespace.
    /// * `source_tokens_text` - The literal source tokens of each example.
    pub fn decode(
        &self,
        predictions: &Tensor,
        source_to_target: &Tensor,
        source_tokens_text: &[Vec<String>],
    ) -> Result<Vec<Vec<String>>, RustSummarusError> {
        let top_predictions = if predictions.dim() == 3 {
            predictions.select(1, 0)
        } else {
            predictions.shallow_clone()
        };
        let prediction_rows = tensor_to_rows(&top_predictions)?;
        let source_rows = tensor_to_rows(source_to_target)?;

        let mut all_predicted_tokens = Vec::with_capacity(prediction_rows.len());
        for (example, indices) in prediction_rows.iter().enumerate() {
            // Out-of-vocabulary words of this source, by first occurrence.
            // Identical literal words share a single extended index.
            let mut oov_tokens: Vec<&str> = Vec::new();
            for (position, &token) in source_rows[example].iter().enumerate() {
                if token == self.oov_index {
                    if let Some(literal) = source_tokens_text[example].get(position) {
                        let literal = literal.as_str();
                        if !oov_tokens.contains(&literal) {
                            oov_tokens.push(literal);
                        }
                    }
                }
            }

            let mut predicted_tokens = Vec::new();
            for &index in indices {
                if index == self.end_index {
                    break;
                }
                if index < self.vocab_size {
                    match self.vocabulary.id_to_token(index) {
                        Some(token) => predicted_tokens.push(token.to_string()),
                        None => {
                            return Err(RustSummarusError::ValueError(format!(
                                "predicted index {} is outside the vocabulary",
                                index
                            )))
                        }
                    }
                } else {
                    let rank = (index - self.vocab_size) as usize;
                    match oov_tokens.get(rank) {
                        Some(token) => predicted_tokens.push((*token).to_string()),
                        None => {
                            return Err(RustSummarusError::ValueError(format!(
                                "predicted extended index {} has no out-of-vocabulary source word (example {} has {})",
                                index,
                                example,
                                oov_tokens.len()
                            )))
                        }
                    }
                }
            }
            all_predicted_tokens.push(predicted_tokens);
        }
        Ok(all_predicted_tokens)
    }
}
