//! # Pointer-Generator Network (See et al.)
//!
//! Implementation of the pointer-generator summarization architecture from
//! [Get To The Point: Summarization with Pointer-Generator Networks](https://arxiv.org/abs/1704.04368)
//! (See, Liu, Manning, 2017), following the summarus training setup.
//!
//! The model combines:
//! - a bidirectional LSTM encoder over the source tokens
//! - an attentive LSTM decoder with an optional coverage mechanism
//! - a soft switch between generating from a fixed vocabulary and copying
//!   words from the source, allowing out-of-vocabulary source words to be
//!   reproduced verbatim through a per-batch extended vocabulary.
//!
//! Pre-trained weights converted from a summarus checkpoint can be loaded
//! through the [`SummarizationModel`](crate::pipelines::summarization::SummarizationModel)
//! pipeline.

mod attention;
mod decoder;
mod encoder;
mod extended_vocab;
mod pgn_model;

pub use attention::CoverageAttention;
pub use decoder::DecoderState;
pub use encoder::PointerGeneratorEncoder;
pub use extended_vocab::{extend_batch, ExtendedBatch};
pub use pgn_model::{PointerGeneratorConfig, PointerGeneratorNetwork, PointerGeneratorOutput};
