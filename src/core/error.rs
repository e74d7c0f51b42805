#[derive(thiserror::Error, Debug)]
pub enum KestrelError {
    #[error("auth error: {0}")]
    Auth(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for KestrelError {
    fn from(err: reqwest::Error) -> Self {
        KestrelError::Transport(err.to_string())
    }
}

impl From<rusqlite::Error> for KestrelError {
    fn from(err: rusqlite::Error) -> Self {
        KestrelError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for KestrelError {
    fn from(err: serde_json::Error) -> Self {
        KestrelError::Storage(err.to_string())
    }
}
