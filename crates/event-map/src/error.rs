use event_map_lib::{EngineError, EventId};

/// Errors surfaced by the command-line front end
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not fetch events: {0}")]
    Fetch(String),

    #[error("Details for event {0} are unavailable")]
    DetailsUnavailable(EventId),

    #[error("Script line {line}: {message}")]
    Script { line: usize, message: String },
}

pub type Result<T> = std::result::Result<T, AppError>;
