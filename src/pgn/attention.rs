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

use crate::common::linear::{linear_no_bias, LinearNoBias};
use std::borrow::Borrow;
use tch::nn::Path;
use tch::{nn, Kind, Tensor};

/// # Additive attention with optional coverage
/// Computes `v^T tanh(W_dec h + W_enc e + w_cov c)` scores over source
/// positions, masked-softmax normalized. When coverage is enabled the running
/// coverage vector feeds into the scores so that positions already attended
/// to are penalized. The score and coverage projections carry no bias.
#[derive(Debug)]
pub struct CoverageAttention {
    encoder_projection: nn::Linear,
    decoder_projection: nn::Linear,
    coverage_projection: Option<LinearNoBias>,
    score_projection: LinearNoBias,
}

impl CoverageAttention {
    pub fn new<'p, P>(
        p: P,
        encoder_dim: i64,
        decoder_dim: i64,
        attention_dim: i64,
        use_coverage: bool,
    ) -> CoverageAttention
    where
        P: Borrow<Path<'p>>,
    {
        let p = p.borrow();
        let encoder_projection = nn::linear(
            p / "encoder_projection",
            encoder_dim,
            attention_dim,
            Default::default(),
        );
        let decoder_projection = nn::linear(
            p / "decoder_projection",
            decoder_dim,
            attention_dim,
            Default::default(),
        );
        let coverage_projection = if use_coverage {
            Some(linear_no_bias(p / "coverage_projection", 1, attention_dim))
        } else {
            None
        };
        let score_projection = linear_no_bias(p / "score_projection", attention_dim, 1);
        CoverageAttention {
            encoder_projection,
            decoder_projection,
            coverage_projection,
            score_projection,
        }
    }

    /// Returns the attention distribution over source positions, shaped
    /// (group size, source length). Padding positions receive zero mass.
    pub fn forward(
        &self,
        decoder_hidden: &Tensor,
        encoder_outputs: &Tensor,
        source_mask: &Tensor,
        coverage: Option<&Tensor>,
    ) -> Tensor {
        let mut features = encoder_outputs.apply(&self.encoder_projection)
            + decoder_hidden.apply(&self.decoder_projection).unsqueeze(1);
        if let (Some(coverage_projection), Some(coverage)) = (&self.coverage_projection, coverage) {
            features = features + coverage.unsqueeze(-1).apply(coverage_projection);
        }
        let scores = features.tanh().apply(&self.score_projection).squeeze_dim(-1);
        scores
            .masked_fill(&source_mask.logical_not(), f64::NEG_INFINITY)
            .softmax(-1, Kind::Float)
    }
}
