//! Ready-to-use abstractive summarization models based on tch-rs.
//!
//! This crate ports the summarus pointer-generator network to Rust. The
//! pointer-generator network ([Get To The Point: Summarization with
//! Pointer-Generator Networks](https://arxiv.org/abs/1704.04368), See, Liu,
//! Manning, 2017) extends a sequence-to-sequence model with attention by a
//! copy mechanism: at every decoding step a learned gate mixes a generation
//! distribution over the fixed target vocabulary with a copy distribution
//! over the source positions, so that out-of-vocabulary source words can be
//! reproduced verbatim. An optional coverage penalty discourages repeated
//! attention to the same source positions.
//!
//! The base model is implemented in the `pgn::PointerGeneratorNetwork`
//! struct. Inference utilities (beam search, dataset reading, batching and a
//! ready-to-use `SummarizationModel`) are available in the `pipelines`
//! module, together with an evaluation pipeline reporting BLEU and ROUGE
//! metrics for a trained model on a test set (see the `evaluate` binary).
//!
//! Model weights are expected in the `.ot` C-array format produced by the
//! tch-rs conversion utilities, together with a JSON configuration file and
//! a plain-text vocabulary file (one token per line, index 0 reserved for
//! padding).

pub mod common;
pub mod pgn;
pub mod pipelines;

pub use common::config::Config;
pub use common::error::RustSummarusError;
pub use common::vocab::Vocabulary;
