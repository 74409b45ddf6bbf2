use {jamra_common::FromMessage, jamra_extensions::ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{message}")]
    Validation { message: String },

    #[error("{message}")]
    Domain { message: String },

    #[error("{feature} is not implemented yet")]
    NotImplemented { feature: String },

    #[error(transparent)]
    Extension(#[from] jamra_extensions::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
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
    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::NotImplemented {
            feature: feature.into(),
        }
    }

    /// Shares the classification used by the extension host.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::Json(_) => ErrorKind::Validation,
            Self::NotImplemented { .. } => ErrorKind::NotImplemented,
            Self::Extension(e) => e.kind(),
            Self::Domain { .. }
            | Self::Io(_)
            | Self::Sqlx(_)
            | Self::Migrate(_)
            | Self::Http(_)
            | Self::Join(_) => ErrorKind::Domain,
        }
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Domain { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

jamra_common::impl_context!();
