use std::time::Duration;

use jamra_common::FromMessage;

/// Coarse failure classes callers branch on (retry, report, fall back).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Client-correctable input problem. Never retried.
    Validation,
    /// Fetch, I/O or plugin failure that may succeed later.
    Domain,
    Timeout,
    NotImplemented,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{message}")]
    Validation { message: String },

    #[error("{message}")]
    Domain { message: String },

    #[error("extension {extension_id} timed out in {method} after {}ms", timeout.as_millis())]
    Timeout {
        extension_id: String,
        method: String,
        timeout: Duration,
    },

    #[error("extension {extension_id} failed in {method}: {message}")]
    Plugin {
        extension_id: String,
        method: String,
        message: String,
    },

    #[error("{feature} is not implemented yet")]
    NotImplemented { feature: String },

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
    Watch(#[from] notify_debouncer_full::notify::Error),
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

    #[must_use]
    pub fn plugin(
        extension_id: impl Into<String>,
        method: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Plugin {
            extension_id: extension_id.into(),
            method: method.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NotImplemented { .. } => ErrorKind::NotImplemented,
            Self::Json(_) => ErrorKind::Validation,
            Self::Domain { .. }
            | Self::Plugin { .. }
            | Self::Io(_)
            | Self::Sqlx(_)
            | Self::Migrate(_)
            | Self::Http(_)
            | Self::Watch(_) => ErrorKind::Domain,
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

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_extension_and_method() {
        let err = Error::Timeout {
            extension_id: "weebcentral".into(),
            method: "search".into(),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(
            err.to_string(),
            "extension weebcentral timed out in search after 250ms"
        );
    }

    #[test]
    fn context_produces_domain_errors() {
        let res: std::result::Result<(), &str> = Err("connection reset");
        let err = res.context("fetching chapter list").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Domain);
        assert_eq!(err.to_string(), "fetching chapter list: connection reset");
    }
}
