use std::sync::Arc;

use jamra_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{message}")]
    Validation { message: String },

    #[error("{message}")]
    Domain { message: String },

    /// Outcome of work shared between several waiters.
    #[error(transparent)]
    Shared(Arc<Error>),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

impl Error {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Validation { .. } | Self::Url(_) => true,
            Self::Shared(inner) => inner.is_validation(),
            Self::Domain { .. } | Self::Http(_) => false,
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Domain { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

jamra_common::impl_context!();
