pub mod config;
pub mod error;
pub(crate) mod linear;
pub mod vocab;

pub use config::Config;
pub use vocab::Vocabulary;
