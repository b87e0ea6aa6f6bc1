use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = ComposerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ComposerError {
    /// Malformed build trace or malformed boolean surface syntax.
    #[error("could not parse {context}{}: {message}", .offset.map(|o| format!(" at offset {}", o)).unwrap_or_default())]
    Parse {
        context: String,
        offset: Option<usize>,
        message: String,
    },

    /// The secondary compiler invocation for a file failed.
    #[error("dependency resolution for {} failed with exit code {exit_code:?}", .file.display())]
    DependencyResolution {
        file: PathBuf,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` failed with exit code {exit_code:?}")]
    Subprocess {
        command: String,
        exit_code: Option<i32>,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    IoBare(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("interrupted")]
    Interrupted,

    #[error("composer is in state {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: crate::composer::ComposerState,
        actual: crate::composer::ComposerState,
    },

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ComposerError {
    pub fn parse(context: impl Into<String>, offset: Option<usize>, message: impl Into<String>) -> Self {
        ComposerError::Parse {
            context: context.into(),
            offset,
            message: message.into(),
        }
    }

    /// Attach the failing path to an I/O error.
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| ComposerError::Io { path, source }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, ComposerError::Interrupted)
    }
}
