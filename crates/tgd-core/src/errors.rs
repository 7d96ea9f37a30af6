/// Core error type for the dispatch engine.
///
/// Adapter crates map their specific errors into this type so the driving
/// loop can log and continue uniformly. A routing miss is not an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("sequence has no steps defined")]
    NoStepsDefined,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("external error: {0}")]
    External(String),

    #[error("worker queue is closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
