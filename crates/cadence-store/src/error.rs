use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stored value could not be parsed: {0}")]
    Parse(String),

    #[error("Store not available: {0}")]
    Unavailable(String),
}
