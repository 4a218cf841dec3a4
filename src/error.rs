use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid criterion: {0}")]
    InvalidCriterion(String),

    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    #[error("No cluster/command combination matched any of the {criteria} cluster criteria")]
    NoMatchFound { criteria: usize },

    #[error("Duplicate {kind} id in inventory: {id}")]
    DuplicateResource { kind: &'static str, id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
