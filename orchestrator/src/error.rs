use std::fmt;

use machine_learning::MlErr;

/// All errors that can occur in the orchestrator.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration, caught before any training starts.
    InvalidConfig(String),
    /// The training engine failed.
    Ml(MlErr),
    /// A settings file isn't valid JSON or doesn't follow the schema.
    Json(serde_json::Error),
    /// A glob pattern couldn't be parsed or walked.
    Glob(String),
    /// A single fold failed, aborting the search.
    FoldFailed {
        settings_id: String,
        source: Box<OrchestratorError>,
    },
    /// An underlying I/O error not covered by the above variants.
    Io(std::io::Error),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Ml(e) => write!(f, "training error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::Glob(msg) => write!(f, "glob error: {msg}"),
            Self::FoldFailed {
                settings_id,
                source,
            } => write!(f, "fold {settings_id} failed: {source}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ml(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::FoldFailed { source, .. } => Some(source.as_ref()),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<MlErr> for OrchestratorError {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
