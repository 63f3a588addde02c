use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Fatal failures of a build. None of them is retried.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Directory creation, file creation or an I/O failure while streaming
    #[error("Filesystem error: {context} {path:?}: {source}")]
    Filesystem {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The entry module or one of its transitive dependencies cannot be
    /// located or parsed
    #[error("Resolution error: cannot load module '{specifier}' from {referrer:?}: {reason}")]
    Resolution {
        specifier: String,
        referrer: PathBuf,
        reason: String,
    },

    /// The configured global namespace is not a dotted identifier path
    #[error("Invalid global namespace '{path}': {reason}")]
    InvalidNamespace { path: String, reason: String },
}

impl BuildError {
    pub fn filesystem(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            context,
            path: path.into(),
            source,
        }
    }

    pub fn resolution(specifier: &str, referrer: &Path, reason: impl Into<String>) -> Self {
        Self::Resolution {
            specifier: specifier.to_owned(),
            referrer: referrer.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub const fn is_resolution(&self) -> bool {
        matches!(self, Self::Resolution { .. })
    }

    pub const fn is_filesystem(&self) -> bool {
        matches!(self, Self::Filesystem { .. })
    }
}

pub type BuildResult<T> = Result<T, BuildError>;
