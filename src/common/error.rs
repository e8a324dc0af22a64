use tch::TchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RustSummarusError {
    #[error("IO error: {0}")]
    IOError(String),

    #[error("Tch tensor error: {0}")]
    TchError(String),

    #[error("Invalid configuration error: {0}")]
    InvalidConfigurationError(String),

    #[error("Value error: {0}")]
    ValueError(String),
}

impl From<std::io::Error> for RustSummarusError {
    fn from(error: std::io::Error) -> Self {
        RustSummarusError::IOError(error.to_string())
    }
}

impl From<TchError> for RustSummarusError {
    fn from(error: TchError) -> Self {
        RustSummarusError::TchError(error.to_string())
    }
}
