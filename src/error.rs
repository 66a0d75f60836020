use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The stream id does not exist, or its keys have expired.
    #[error("channel is not registered")]
    NotRegistered,

    #[error("store error: {0}")]
    Store(&'static str),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
