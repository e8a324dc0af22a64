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

//! # Summarization pipeline
//! Dataset reading, batching and end-to-end summarization with a trained
//! pointer-generator model.

use crate::common::config::Config;
use crate::common::error::RustSummarusError;
use crate::common::vocab::Vocabulary;
use crate::pgn::{PointerGeneratorConfig, PointerGeneratorNetwork};
use crate::pipelines::evaluation::detokenize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tch::{nn, Device, Tensor};

/// A single summarization example: whitespace tokens of the source text and,
/// when available, of the reference summary.
pub struct SummarizationInstance {
    pub source_tokens: Vec<String>,
    pub target_tokens: Option<Vec<String>>,
}

/// # Tab-separated dataset reader
/// Reads `source \t target` lines, lowercases and whitespace-tokenizes both
/// sides and truncates them to the configured maximum lengths.
pub struct SummarizationReader {
    lowercase: bool,
    max_source_tokens: Option<usize>,
    max_target_tokens: Option<usize>,
}

impl Default for SummarizationReader {
    fn default() -> Self {
        SummarizationReader {
            lowercase: true,
            max_source_tokens: Some(400),
            max_target_tokens: Some(100),
        }
    }
}

impl SummarizationReader {
    pub fn new(
        lowercase: bool,
        max_source_tokens: Option<usize>,
        max_target_tokens: Option<usize>,
    ) -> SummarizationReader {
        SummarizationReader {
            lowercase,
            max_source_tokens,
            max_target_tokens,
        }
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let text = if self.lowercase {
            text.to_lowercase()
        } else {
            text.to_owned()
        };
        text.split_whitespace().map(str::to_owned).collect()
    }

    fn truncate(mut tokens: Vec<String>, max_tokens: Option<usize>) -> Vec<String> {
        if let Some(max_tokens) = max_tokens {
            tokens.truncate(max_tokens);
        }
        tokens
    }

    /// Parses a dataset file with one `source \t target` pair per line.
    /// Blank lines are skipped; lines without a tab are rejected.
    pub fn read_file<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<Vec<SummarizationInstance>, RustSummarusError> {
        let f = File::open(path.as_ref())?;
        let mut instances = Vec::new();
        for (line_index, line) in BufReader::new(f).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let (source, target) = line.split_once('\t').ok_or_else(|| {
                RustSummarusError::ValueError(format!(
                    "line {} of {:?} does not contain a tab separator",
                    line_index + 1,
                    path.as_ref()
                ))
            })?;
            instances.push(SummarizationInstance {
                source_tokens: Self::truncate(self.tokenize(source), self.max_source_tokens),
                target_tokens: Some(Self::truncate(self.tokenize(target), self.max_target_tokens)),
            });
        }
        Ok(instances)
    }
}

/// # Batched model inputs
/// Index tensors for a batch of instances, padded to the longest sequence.
/// Word identity ids are assigned per example in order of first occurrence
/// over the concatenated source and target tokens (the padding id is 0), so
/// that repeated words share an identity and the extended vocabulary can
/// reuse their slot.
pub struct SummarizationBatch {
    pub source_tokens: Tensor,
    pub source_token_ids: Tensor,
    pub source_to_target: Tensor,
    pub target_tokens: Option<Tensor>,
    pub target_token_ids: Option<Tensor>,
    /// Literal source tokens, needed to resolve copied words after decoding.
    pub source_tokens_text: Vec<Vec<String>>,
}

impl SummarizationBatch {
    pub fn new(
        instances: &[SummarizationInstance],
        vocabulary: &Vocabulary,
        device: Device,
    ) -> Result<SummarizationBatch, RustSummarusError> {
        if instances.is_empty() {
            return Err(RustSummarusError::ValueError(
                "cannot build a batch from zero instances".into(),
            ));
        }
        let batch_size = instances.len();
        let source_length = instances
            .iter()
            .map(|instance| instance.source_tokens.len())
            .max()
            .unwrap_or(0);
        let has_targets = instances
            .iter()
            .all(|instance| instance.target_tokens.is_some());
        // Two extra positions for the start and end symbols.
        let target_length = instances
            .iter()
            .filter_map(|instance| instance.target_tokens.as_ref().map(Vec::len))
            .max()
            .map(|length| length + 2)
            .unwrap_or(0);

        let pad = vocabulary.pad_index();
        let mut source_indices = Vec::with_capacity(batch_size * source_length);
        let mut source_identities = Vec::with_capacity(batch_size * source_length);
        let mut target_indices = Vec::with_capacity(batch_size * target_length);
        let mut target_identities = Vec::with_capacity(batch_size * target_length);
        let mut source_tokens_text = Vec::with_capacity(batch_size);

        for instance in instances {
            let mut identities: HashMap<String, i64> = HashMap::new();
            let mut identity_of = |token: &str| -> i64 {
                match identities.get(token) {
                    Some(identity) => *identity,
                    None => {
                        let next_identity = identities.len() as i64 + 1;
                        identities.insert(token.to_owned(), next_identity);
                        next_identity
                    }
                }
            };

            for token in &instance.source_tokens {
                source_indices.push(vocabulary.token_to_id(token));
                source_identities.push(identity_of(token));
            }
            for _ in instance.source_tokens.len()..source_length {
                source_indices.push(pad);
                source_identities.push(0);
            }

            if has_targets {
                if let Some(target_tokens) = &instance.target_tokens {
                    target_indices.push(vocabulary.start_index());
                    target_identities.push(0);
                    for token in target_tokens {
                        target_indices.push(vocabulary.token_to_id(token));
                        target_identities.push(identity_of(token));
                    }
                    target_indices.push(vocabulary.end_index());
                    target_identities.push(0);
                    for _ in target_tokens.len() + 2..target_length {
                        target_indices.push(pad);
                        target_identities.push(0);
                    }
                }
            }
            source_tokens_text.push(instance.source_tokens.clone());
        }

        let source_tokens = Tensor::from_slice(&source_indices)
            .view([batch_size as i64, source_length as i64])
            .to_device(device);
        let source_token_ids = Tensor::from_slice(&source_identities)
            .view([batch_size as i64, source_length as i64])
            .to_device(device);
        // Source and target share a single vocabulary namespace.
        let source_to_target = source_tokens.shallow_clone();
        let (target_tokens, target_token_ids) = if has_targets {
            (
                Some(
                    Tensor::from_slice(&target_indices)
                        .view([batch_size as i64, target_length as i64])
                        .to_device(device),
                ),
                Some(
                    Tensor::from_slice(&target_identities)
                        .view([batch_size as i64, target_length as i64])
                        .to_device(device),
                ),
            )
        } else {
            (None, None)
        };

        Ok(SummarizationBatch {
            source_tokens,
            source_token_ids,
            source_to_target,
            target_tokens,
            target_token_ids,
            source_tokens_text,
        })
    }
}

/// # Summarization model
/// Loads a trained pointer-generator from a directory holding `config.json`,
/// `vocabulary.txt` and `model.ot`, and generates summaries for raw texts.
pub struct SummarizationModel {
    model: PointerGeneratorNetwork,
    reader: SummarizationReader,
    var_store: nn::VarStore,
}

impl SummarizationModel {
    /// Loads a `SummarizationModel` from `model_dir`.
    pub fn new<P: AsRef<Path>>(
        model_dir: P,
        device: Device,
    ) -> Result<SummarizationModel, RustSummarusError> {
        let model_dir = model_dir.as_ref();
        let config = PointerGeneratorConfig::from_file(model_dir.join("config.json"));
        let vocabulary = Vocabulary::from_file(model_dir.join("vocabulary.txt"))?;
        let mut var_store = nn::VarStore::new(device);
        let model = PointerGeneratorNetwork::new(var_store.root(), &config, vocabulary);
        var_store.load(model_dir.join("model.ot"))?;
        Ok(SummarizationModel {
            model,
            reader: SummarizationReader::default(),
            var_store,
        })
    }

    pub fn reader(&self) -> &SummarizationReader {
        &self.reader
    }

    pub fn device(&self) -> Device {
        self.var_store.device()
    }

    /// Summarizes a batch of raw texts, returning detokenized summaries.
    pub fn summarize(&self, texts: &[&str]) -> Result<Vec<String>, RustSummarusError> {
        let instances = texts
            .iter()
            .map(|text| SummarizationInstance {
                source_tokens: self.reader.tokenize(text),
                target_tokens: None,
            })
            .collect::<Vec<_>>();
        let token_outputs = self.predict_tokens(&instances)?;
        Ok(token_outputs
            .into_iter()
            .map(|tokens| detokenize(&tokens.join(" ")))
            .collect())
    }

    /// Runs beam search over a batch of instances and returns the decoded
    /// token sequences of the top hypotheses.
    pub fn predict_tokens(
        &self,
        instances: &[SummarizationInstance],
    ) -> Result<Vec<Vec<String>>, RustSummarusError> {
        let batch = SummarizationBatch::new(instances, self.model.vocabulary(), self.device())?;
        let output = tch::no_grad(|| {
            self.model.forward_t(
                &batch.source_tokens,
                &batch.source_token_ids,
                &batch.source_to_target,
                None,
                None,
                false,
            )
        })?;
        self.model.decode(
            &output.predictions,
            &batch.source_to_target,
            &batch.source_tokens_text,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn reader_parses_tab_separated_pairs() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "The cat sat on the mat.\tA cat sat.")?;
        writeln!(file)?;
        writeln!(file, "Another Document here\tanother summary")?;

        let reader = SummarizationReader::default();
        let instances = reader.read_file(file.path())?;

        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].source_tokens[1], "cat");
        assert_eq!(
            instances[1].target_tokens.as_ref().map(|tokens| tokens.len()),
            Some(2)
        );
        Ok(())
    }

    #[test]
    fn reader_rejects_lines_without_separator() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "no separator on this line")?;

        let reader = SummarizationReader::default();
        assert!(reader.read_file(file.path()).is_err());
        Ok(())
    }

    #[test]
    fn batch_assigns_identities_by_first_occurrence() -> anyhow::Result<()> {
        let vocabulary = Vocabulary::from_tokens(&["the", "cat"]);
        let instances = [SummarizationInstance {
            source_tokens: vec!["the".into(), "zorblax".into(), "the".into()],
            target_tokens: Some(vec!["zorblax".into()]),
        }];

        let batch = SummarizationBatch::new(&instances, &vocabulary, Device::Cpu)?;

        // "the" gets identity 1 and reuses it at its second occurrence.
        assert_eq!(batch.source_token_ids.int64_value(&[0, 0]), 1);
        assert_eq!(batch.source_token_ids.int64_value(&[0, 2]), 1);
        // "zorblax" keeps its source identity in the target.
        let target_token_ids = batch.target_token_ids.unwrap();
        assert_eq!(
            batch.source_token_ids.int64_value(&[0, 1]),
            target_token_ids.int64_value(&[0, 1])
        );
        // Unknown words map to the out-of-vocabulary index.
        assert_eq!(
            batch.source_tokens.int64_value(&[0, 1]),
            vocabulary.oov_index()
        );
        Ok(())
    }

    #[test]
    fn batch_pads_to_longest_sequence() -> anyhow::Result<()> {
        let vocabulary = Vocabulary::from_tokens(&["a", "b", "c"]);
        let instances = [
            SummarizationInstance {
                source_tokens: vec!["a".into(), "b".into(), "c".into()],
                target_tokens: Some(vec!["a".into()]),
            },
            SummarizationInstance {
                source_tokens: vec!["b".into()],
                target_tokens: Some(vec!["b".into(), "c".into()]),
            },
        ];

        let batch = SummarizationBatch::new(&instances, &vocabulary, Device::Cpu)?;

        assert_eq!(batch.source_tokens.size(), vec![2, 3]);
        assert_eq!(
            batch.source_tokens.int64_value(&[1, 2]),
            vocabulary.pad_index()
        );
        // Targets carry the start and end symbols.
        let target_tokens = batch.target_tokens.unwrap();
        assert_eq!(target_tokens.size(), vec![2, 4]);
        assert_eq!(
            target_tokens.int64_value(&[0, 0]),
            vocabulary.start_index()
        );
        assert_eq!(target_tokens.int64_value(&[0, 2]), vocabulary.end_index());
        Ok(())
    }
}
