//! Repository URL normalization to raw `index.json` URLs.

use crate::error::{Error, Result};

pub const DEFAULT_BRANCH: &str = "main";

pub const INDEX_FILE: &str = "index.json";

/// Supported Git hosts and how each serves raw files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHost {
    GitHub,
    GitLab,
    Bitbucket,
}

impl GitHost {
    fn from_prefix(rest: &str) -> Option<(Self, &str)> {
        [
            (Self::GitHub, "github.com/"),
            (Self::GitLab, "gitlab.com/"),
            (Self::Bitbucket, "bitbucket.org/"),
        ]
        .into_iter()
        .find_map(|(host, prefix)| rest.strip_prefix(prefix).map(|path| (host, path)))
    }

    fn raw_url(self, path: &str, branch: &str, file: &str) -> String {
        match self {
            Self::GitHub => format!("https://raw.githubusercontent.com/{path}/{branch}/{file}"),
            Self::GitLab => format!("https://gitlab.com/{path}/-/raw/{branch}/{file}"),
            Self::Bitbucket => format!("https://bitbucket.org/{path}/raw/{branch}/{file}"),
        }
    }
}

/// Resolve the raw `index.json` URL for `repository_url` at `branch`. A blank
/// branch means [`DEFAULT_BRANCH`].
pub fn index_url(repository_url: &str, branch: &str) -> Result<String> {
    let trimmed = repository_url.trim();
    let mut rest = trimmed.trim_end_matches('/');
    rest = rest.strip_suffix(".git").unwrap_or(rest);
    rest = rest.trim_end_matches('/');
    rest = rest
        .strip_prefix("https://")
        .or_else(|| rest.strip_prefix("http://"))
        .unwrap_or(rest);

    let Some((host, path)) = GitHost::from_prefix(rest) else {
        return Err(Error::validation(format!(
            "Unsupported Git platform. URL must be from github.com, gitlab.com, or bitbucket.org. Received: {trimmed}"
        )));
    };
    if path.is_empty() {
        return Err(Error::validation(format!(
            "Repository URL is missing the repository path: {trimmed}"
        )));
    }

    let branch = match branch.trim() {
        "" => DEFAULT_BRANCH,
        b => b,
    };
    Ok(host.raw_url(path, branch, INDEX_FILE))
}
