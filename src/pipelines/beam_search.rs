// Copyright 2017 The AllenNLP Authors
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
use tch::{Kind, Tensor};

/// State threaded through a beam search. The search widens the state from one
/// row per example to one row per hypothesis before the second step, and
/// reorders rows after every step so that they stay aligned with the
/// surviving hypotheses.
pub trait DecodingState {
    /// Duplicates every row `beam_size` times, keeping the rows of one
    /// example contiguous.
    fn expand_to_beam(&mut self, beam_size: i64);
    /// Rearranges rows according to `row_indices` (shape: group size).
    fn reorder(&mut self, row_indices: &Tensor);
}

/// # Beam search over a stepwise log-probability function
/// Maintains the `beam_size` highest scoring partial sequences per example.
/// A hypothesis that emits the end index is kept in the beam but frozen: at
/// every later step its only zero-cost continuation is the end index again,
/// so its score no longer changes.
pub struct BeamSearch {
    end_index: i64,
    max_steps: i64,
    beam_size: i64,
}

impl BeamSearch {
    pub fn new(end_index: i64, max_steps: i64, beam_size: i64) -> BeamSearch {
        assert!(max_steps > 0, "max_steps must be positive");
        assert!(beam_size > 0, "beam_size must be positive");
        BeamSearch {
            end_index,
            max_steps,
            beam_size,
        }
    }

    /// Runs the search from `start_predictions` (shape: batch size).
    ///
    /// `step` receives the last predictions for every live hypothesis (shape:
    /// group size) together with the mutable state and must return the log
    /// probabilities of every candidate class (shape: group size x number of
    /// classes).
    ///
    /// Returns the decoded sequences, shaped (batch size, beam size, sequence
    /// length) with hypotheses sorted by descending score, and their
    /// cumulative log probabilities, shaped (batch size, beam size).
    pub fn search<S, F>(
        &self,
        start_predictions: &Tensor,
        state: &mut S,
        mut step: F,
    ) -> Result<(Tensor, Tensor), RustSummarusError>
    where
        S: DecodingState,
        F: FnMut(&Tensor, &mut S) -> Result<Tensor, RustSummarusError>,
    {
        let device = start_predictions.device();
        let batch_size = start_predictions.size()[0];

        let start_log_probabilities = step(start_predictions, state)?;
        let num_classes = start_log_probabilities.size()[1];
        if self.beam_size > num_classes {
            return Err(RustSummarusError::ValueError(format!(
                "beam size {} cannot exceed the number of candidate classes {}",
                self.beam_size, num_classes
            )));
        }

        let (mut last_log_probabilities, start_predicted_classes) =
            start_log_probabilities.topk(self.beam_size, 1, true, true);
        let mut predictions: Vec<Tensor> = vec![start_predicted_classes];
        let mut backpointers: Vec<Tensor> = Vec::new();

        // Frozen hypotheses may only repeat the end index, at no cost.
        let mut log_probs_after_end = Tensor::full(
            [1, num_classes],
            f64::NEG_INFINITY,
            (Kind::Float, device),
        );
        let _ = log_probs_after_end.index_fill_(
            1,
            &Tensor::from_slice(&[self.end_index]).to_device(device),
            0.0,
        );

        // Candidate slot c of the flattened (beam * beam) ranking descends
        // from beam c / beam_size; gathering from this grid recovers the
        // backpointers without integer tensor division.
        let beam_origin: Vec<i64> = (0..self.beam_size * self.beam_size)
            .map(|slot| slot / self.beam_size)
            .collect();
        let beam_origin = Tensor::from_slice(&beam_origin)
            .to_device(device)
            .unsqueeze(0)
            .expand([batch_size, self.beam_size * self.beam_size], true);
        let batch_offset = (Tensor::arange(batch_size, (Kind::Int64, device)) * self.beam_size)
            .unsqueeze(1);

        state.expand_to_beam(self.beam_size);

        for _ in 1..self.max_steps {
            let last_predictions = predictions
                .last()
                .map(|tensor| tensor.reshape([batch_size * self.beam_size]))
                .ok_or_else(|| {
                    RustSummarusError::ValueError("beam search lost its predictions".into())
                })?;
            let unfinished = last_predictions
                .ne(self.end_index)
                .sum(Kind::Int64)
                .int64_value(&[]);
            if unfinished == 0 {
                break;
            }

            let class_log_probabilities = step(&last_predictions, state)?;
            let last_predictions_expanded = last_predictions
                .unsqueeze(-1)
                .expand([batch_size * self.beam_size, num_classes], true);
            let cleaned_log_probabilities = class_log_probabilities.where_self(
                &last_predictions_expanded.ne(self.end_index),
                &log_probs_after_end.expand([batch_size * self.beam_size, num_classes], true),
            );

            let (top_log_probabilities, predicted_classes) =
                cleaned_log_probabilities.topk(self.beam_size, 1, true, true);
            let expanded_last_log_probabilities = last_log_probabilities
                .unsqueeze(2)
                .expand([batch_size, self.beam_size, self.beam_size], true)
                .reshape([batch_size * self.beam_size, self.beam_size]);
            let summed_top_log_probabilities =
                top_log_probabilities + expanded_last_log_probabilities;

            let reshaped_summed =
                summed_top_log_probabilities.reshape([batch_size, self.beam_size * self.beam_size]);
            let reshaped_predicted_classes =
                predicted_classes.reshape([batch_size, self.beam_size * self.beam_size]);
            let (restricted_beam_log_probabilities, restricted_beam_indices) =
                reshaped_summed.topk(self.beam_size, 1, true, true);
            let restricted_predicted_classes =
                reshaped_predicted_classes.gather(1, &restricted_beam_indices, false);

            predictions.push(restricted_predicted_classes);
            last_log_probabilities = restricted_beam_log_probabilities;

            let backpointer = beam_origin.gather(1, &restricted_beam_indices, false);
            let reorder_rows = (&backpointer + &batch_offset).reshape([batch_size * self.beam_size]);
            state.reorder(&reorder_rows);
            backpointers.push(backpointer);
        }

        // Walk the backpointers from the last step to reconstruct the
        // surviving sequences.
        let mut reconstructed = vec![predictions[predictions.len() - 1].unsqueeze(2)];
        if let Some(last_backpointers) = backpointers.last() {
            let mut cur_backpointers = last_backpointers.shallow_clone();
            for timestep in (1..predictions.len() - 1).rev() {
                reconstructed.push(
                    predictions[timestep]
                        .gather(1, &cur_backpointers, false)
                        .unsqueeze(2),
                );
                cur_backpointers = backpointers[timestep - 1].gather(1, &cur_backpointers, false);
            }
            reconstructed.push(
                predictions[0]
                    .gather(1, &cur_backpointers, false)
                    .unsqueeze(2),
            );
        }
        reconstructed.reverse();
        let all_predictions = Tensor::cat(&reconstructed, 2);

        Ok((all_predictions, last_log_probabilities))
    }
}
