//! Loader error types.

/// Kind of failure raised while running a logic section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScriptErrorKind {
    #[error("syntax error")]
    Syntax,
    #[error("runtime error")]
    Runtime,
}

/// A logic section failure, with its line expressed in the coordinates of
/// the whole component document when the script reported one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} in {url}{}: {message}", line_suffix(.line))]
pub struct ScriptError {
    pub url: String,
    pub kind: ScriptErrorKind,
    pub line: Option<usize>,
    pub message: String,
}

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|line| format!(":{}", line)).unwrap_or_default()
}

/// Errors surfaced by a component load.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// The fetch completed with a status outside the success range.
    #[error("request for {url} failed with status {status}")]
    Network { url: String, status: u16 },

    /// The fetch never produced a response.
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// A section declared a `lang` with no registered processor.
    #[error("no language processor registered for '{lang}'")]
    UnrecognizedLanguage { lang: String },

    /// The logic section failed to load or run.
    #[error(transparent)]
    Evaluation(#[from] ScriptError),

    /// The logic section produced something other than a table.
    #[error("exports of {url} must be a table, found {found}")]
    InvalidExports { url: String, found: &'static str },

    /// A scoped style sheet was still empty after its load notification.
    #[error("style sheet for {url} was never populated")]
    SheetUnavailable { url: String },

    /// A file URL climbed out of the fetcher's root directory.
    #[error("{url} resolves outside the component root")]
    OutsideRoot { url: String },

    /// Invalid loader configuration.
    #[error("invalid loader configuration: {0}")]
    Config(String),

    /// I/O error (local component reads, config files).
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl LoaderError {
    /// Status code carried by a network failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Network { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, LoaderError>;
