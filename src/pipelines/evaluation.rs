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

//! # Evaluation pipeline
//! Scores a trained model against a tab-separated test set, reporting BLEU
//! and ROUGE over detokenized summaries.

use crate::common::error::RustSummarusError;
use crate::pipelines::metrics::{average_rouge, corpus_bleu, RougeScores};
use crate::pipelines::summarization::SummarizationModel;
use regex::Regex;
use std::path::Path;
use std::str::FromStr;
use tch::Device;

/// Joins model tokens back into readable text: removes the space before
/// punctuation and closing brackets, after opening brackets, and just inside
/// paired quotes.
pub fn detokenize(text: &str) -> String {
    let mut text = text.to_owned();
    for ch in [',', '.', '!', '?', ':', ';', '%', ')', ']', '}'] {
        text = text.replace(&format!(" {}", ch), &ch.to_string());
    }
    for ch in ['(', '[', '{'] {
        text = text.replace(&format!("{} ", ch), &ch.to_string());
    }
    let text = tighten_quotes(&text, r#"(")\s([^"]+)\s(")"#);
    tighten_quotes(&text, r"(')\s([^']+)\s(')")
}

/// Removes the whitespace right inside a `quote ... quote` pair, leaving
/// unpaired quotes untouched.
fn tighten_quotes(text: &str, pattern: &str) -> String {
    let quoted = Regex::new(pattern).unwrap();
    quoted.replace_all(text, "$1$2$3").into_owned()
}

/// Metric selection for the evaluation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Rouge,
    Bleu,
    All,
}

impl FromStr for Metric {
    type Err = RustSummarusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "rouge" => Ok(Metric::Rouge),
            "bleu" => Ok(Metric::Bleu),
            "all" => Ok(Metric::All),
            _ => Err(RustSummarusError::InvalidConfigurationError(format!(
                "unknown metric {}, expected rouge, bleu or all", value
            ))),
        }
    }
}

/// Settings of an evaluation run.
pub struct EvaluationConfig {
    pub metric: Metric,
    /// Stop after this many scored examples.
    pub max_count: Option<usize>,
    /// Print intermediate metrics every `report_every` examples.
    pub report_every: usize,
    pub batch_size: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig {
            metric: Metric::All,
            max_count: None,
            report_every: 100,
            batch_size: 32,
        }
    }
}

/// Final scores of an evaluation run.
#[derive(Debug)]
pub struct EvaluationReport {
    pub count: usize,
    pub bleu: Option<f64>,
    pub rouge: Option<RougeScores>,
}

fn compute_metrics(
    metric: Metric,
    hypotheses: &[String],
    references: &[String],
) -> (Option<f64>, Option<RougeScores>) {
    let bleu = match metric {
        Metric::Bleu | Metric::All => Some(corpus_bleu(hypotheses, references)),
        Metric::Rouge => None,
    };
    let rouge = match metric {
        Metric::Rouge | Metric::All => Some(average_rouge(hypotheses, references)),
        Metric::Bleu => None,
    };
    (bleu, rouge)
}

/// Evaluates the model under `model_dir` on the test set at `test_path`.
///
/// Summaries too short to score and empty references are replaced by the
/// literal string `"empty"` so that the metrics stay defined.
pub fn evaluate<M, T>(
    model_dir: M,
    test_path: T,
    config: &EvaluationConfig,
    device: Device,
) -> Result<EvaluationReport, RustSummarusError>
where
    M: AsRef<Path>,
    T: AsRef<Path>,
{
    let model = SummarizationModel::new(model_dir, device)?;
    let instances = model.reader().read_file(test_path)?;

    let mut hypotheses: Vec<String> = Vec::with_capacity(instances.len());
    let mut references: Vec<String> = Vec::with_capacity(instances.len());

    'batches: for chunk in instances.chunks(config.batch_size) {
        let predicted = model.predict_tokens(chunk)?;
        for (tokens, instance) in predicted.iter().zip(chunk) {
            let mut hypothesis = detokenize(&tokens.join(" "));
            if hypothesis.trim().len() <= 1 {
                hypothesis = "empty".to_owned();
                println!("Empty hyp");
            }
            let mut reference = instance
                .target_tokens
                .as_ref()
                .map(|tokens| tokens.join(" "))
                .unwrap_or_default();
            if reference.trim().len() <= 1 {
                reference = "empty".to_owned();
                println!("Empty target");
            }
            hypotheses.push(hypothesis);
            references.push(reference);

            if hypotheses.len() % config.report_every == 0 {
                println!("Count: {}", hypotheses.len());
                println!("Ref: {}", references[references.len() - 1]);
                println!("Hyp: {}", hypotheses[hypotheses.len() - 1]);
                let (bleu, rouge) = compute_metrics(config.metric, &hypotheses, &references);
                if let Some(bleu) = bleu {
                    println!("BLEU: {}", bleu);
                }
                if let Some(rouge) = rouge {
                    println!("ROUGE: {:?}", rouge);
                }
            }

            if let Some(max_count) = config.max_count {
                if hypotheses.len() >= max_count {
                    break 'batches;
                }
            }
        }
    }

    let (bleu, rouge) = compute_metrics(config.metric, &hypotheses, &references);
    Ok(EvaluationReport {
        count: hypotheses.len(),
        bleu,
        rouge,
    })
}
