/// Errors surfaced by the job source, the saved-jobs store and the auth client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("network: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("decode: {0}")]
    Decode(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid: {0}")]
    Validation(String),

    #[error("not signed in")]
    Unauthenticated,
}

impl Error {
    /// Transport failures, non-2xx responses and unreadable bodies all count
    /// as the remote being unavailable; the UI offers a retry for these.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Http { .. } | Error::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Map a non-2xx response into `Error::Http`, keeping the body as message.
pub async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(Error::Http {
        status: status.as_u16(),
        message,
    })
}
