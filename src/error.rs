use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("numerical failure while reconstructing item {item_id}: {reason}")]
    Numerical { item_id: usize, reason: String },

    #[error("forward output has shape {got_rows}x{got_cols}, expected {expected_rows}x{expected_cols}")]
    ShapeMismatch {
        expected_rows: usize,
        expected_cols: usize,
        got_rows: usize,
        got_cols: usize,
    },

    #[error(transparent)]
    Model(#[from] anyhow::Error),
}

impl SynthesisError {
    pub fn numerical(item_id: usize, reason: impl Into<String>) -> Self {
        SynthesisError::Numerical {
            item_id,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SynthesisError>;
