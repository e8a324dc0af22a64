//! # Ready-to-use summarization pipelines
//!
//! Based on the AllenNLP predictor and evaluation tooling of summarus
//! <https://github.com/IlyaGusev/summarus>. The modules cover the full path
//! from a raw text to a scored summary:
//!
//! - `beam_search`: generic beam search over a stepwise decoding function
//! - `summarization`: dataset reading, batching and the `SummarizationModel`
//! - `evaluation`: detokenization and the test set evaluation loop
//! - `metrics`: corpus BLEU and averaged ROUGE scores

pub mod beam_search;
pub mod evaluation;
pub mod metrics;
pub mod summarization;
