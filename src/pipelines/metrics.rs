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

//! # Summary quality metrics
//! Corpus BLEU and averaged ROUGE-1/2/L over whitespace-tokenized texts,
//! with a single reference per hypothesis.

use std::collections::HashMap;

const BLEU_MAX_ORDER: usize = 4;

/// Precision, recall and F1 of one ROUGE variant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RougeScore {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// ROUGE-1, ROUGE-2 and ROUGE-L scores averaged over a corpus.
#[derive(Debug, Clone, Copy, Default)]
pub struct RougeScores {
    pub rouge_1: RougeScore,
    pub rouge_2: RougeScore,
    pub rouge_l: RougeScore,
}

fn ngram_counts<'a>(tokens: &[&'a str], order: usize) -> HashMap<Vec<&'a str>, usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= order {
        for ngram in tokens.windows(order) {
            *counts.entry(ngram.to_vec()).or_insert(0) += 1;
        }
    }
    counts
}

/// Corpus-level BLEU with uniform weights up to 4-grams and the standard
/// brevity penalty. Returns 0 when any n-gram order has no overlap at all.
pub fn corpus_bleu(hypotheses: &[String], references: &[String]) -> f64 {
    let mut clipped_counts = [0usize; BLEU_MAX_ORDER];
    let mut total_counts = [0usize; BLEU_MAX_ORDER];
    let mut hypothesis_length = 0usize;
    let mut reference_length = 0usize;

    for (hypothesis, reference) in hypotheses.iter().zip(references) {
        let hypothesis_tokens: Vec<&str> = hypothesis.split_whitespace().collect();
        let reference_tokens: Vec<&str> = reference.split_whitespace().collect();
        hypothesis_length += hypothesis_tokens.len();
        reference_length += reference_tokens.len();
        for order in 1..=BLEU_MAX_ORDER {
            let hypothesis_counts = ngram_counts(&hypothesis_tokens, order);
            let reference_counts = ngram_counts(&reference_tokens, order);
            for (ngram, count) in hypothesis_counts {
                let reference_count = reference_counts.get(&ngram).copied().unwrap_or(0);
                clipped_counts[order - 1] += count.min(reference_count);
                total_counts[order - 1] += count;
            }
        }
    }

    let mut log_precision_sum = 0f64;
    for order in 0..BLEU_MAX_ORDER {
        if clipped_counts[order] == 0 || total_counts[order] == 0 {
            return 0.0;
        }
        log_precision_sum += (clipped_counts[order] as f64 / total_counts[order] as f64).ln()
            / BLEU_MAX_ORDER as f64;
    }

    let brevity_penalty = if hypothesis_length == 0 {
        0.0
    } else if hypothesis_length >= reference_length {
        1.0
    } else {
        (1.0 - reference_length as f64 / hypothesis_length as f64).exp()
    };
    brevity_penalty * log_precision_sum.exp()
}

fn f1_score(precision: f64, recall: f64) -> f64 {
    if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    }
}

fn rouge_n(hypothesis_tokens: &[&str], reference_tokens: &[&str], order: usize) -> RougeScore {
    let hypothesis_counts = ngram_counts(hypothesis_tokens, order);
    let reference_counts = ngram_counts(reference_tokens, order);
    let hypothesis_total: usize = hypothesis_counts.values().sum();
    let reference_total: usize = reference_counts.values().sum();
    let overlap: usize = hypothesis_counts
        .iter()
        .map(|(ngram, count)| (*count).min(reference_counts.get(ngram).copied().unwrap_or(0)))
        .sum();

    let precision = if hypothesis_total > 0 {
        overlap as f64 / hypothesis_total as f64
    } else {
        0.0
    };
    let recall = if reference_total > 0 {
        overlap as f64 / reference_total as f64
    } else {
        0.0
    };
    RougeScore {
        precision,
        recall,
        f1: f1_score(precision, recall),
    }
}

fn lcs_length(a: &[&str], b: &[&str]) -> usize {
    let mut previous_row = vec![0usize; b.len() + 1];
    let mut current_row = vec![0usize; b.len() + 1];
    for token_a in a {
        for (j, token_b) in b.iter().enumerate() {
            current_row[j + 1] = if token_a == token_b {
                previous_row[j] + 1
            } else {
                previous_row[j + 1].max(current_row[j])
            };
        }
        std::mem::swap(&mut previous_row, &mut current_row);
    }
    previous_row[b.len()]
}

fn rouge_l(hypothesis_tokens: &[&str], reference_tokens: &[&str]) -> RougeScore {
    let lcs = lcs_length(hypothesis_tokens, reference_tokens);
    let precision = if !hypothesis_tokens.is_empty() {
        lcs as f64 / hypothesis_tokens.len() as f64
    } else {
        0.0
    };
    let recall = if !reference_tokens.is_empty() {
        lcs as f64 / reference_tokens.len() as f64
    } else {
        0.0
    };
    RougeScore {
        precision,
        recall,
        f1: f1_score(precision, recall),
    }
}

/// ROUGE-1/2/L averaged over all hypothesis/reference pairs.
pub fn average_rouge(hypotheses: &[String], references: &[String]) -> RougeScores {
    let pair_count = hypotheses.len().min(references.len());
    if pair_count == 0 {
        return RougeScores::default();
    }
    let mut accumulated = [RougeScore::default(); 3];
    for (hypothesis, reference) in hypotheses.iter().zip(references) {
        let hypothesis_tokens: Vec<&str> = hypothesis.split_whitespace().collect();
        let reference_tokens: Vec<&str> = reference.split_whitespace().collect();
        let scores = [
            rouge_n(&hypothesis_tokens, &reference_tokens, 1),
            rouge_n(&hypothesis_tokens, &reference_tokens, 2),
            rouge_l(&hypothesis_tokens, &reference_tokens),
        ];
        for (accumulated, score) in accumulated.iter_mut().zip(scores.iter()) {
            accumulated.precision += score.precision;
            accumulated.recall += score.recall;
            accumulated.f1 += score.f1;
        }
    }
    for accumulated in accumulated.iter_mut() {
        accumulated.precision /= pair_count as f64;
        accumulated.recall /= pair_count as f64;
        accumulated.f1 /= pair_count as f64;
    }
    RougeScores {
        rouge_1: accumulated[0],
        rouge_2: accumulated[1],
        rouge_l: accumulated[2],
    }
}
