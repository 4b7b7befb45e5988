use thiserror::Error;

/// Errors from selecting, decoding or encoding a document format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// No processor recognizes the file name.
    #[error("no processor for file name {file_name:?}")]
    NoProcessor { file_name: String },

    /// The bytes are not a valid document in the selected format.
    #[error("{format} decode error: {reason}")]
    Decode { format: &'static str, reason: String },

    /// The properties cannot be represented in the selected format.
    #[error("{format} encode error: {reason}")]
    Encode { format: &'static str, reason: String },
}

impl FormatError {
    pub(crate) fn decode(format: &'static str, reason: impl ToString) -> Self {
        Self::Decode {
            format,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn encode(format: &'static str, reason: impl ToString) -> Self {
        Self::Encode {
            format,
            reason: reason.to_string(),
        }
    }
}

pub type FormatResult<T> = Result<T, FormatError>;
