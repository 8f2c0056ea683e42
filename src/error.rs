use thiserror::Error;

/// Session lookup failures. None of these are fatal, the caller falls back
/// to the unauthenticated view.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session")]
    Missing,
    #[error("session rejected by identity provider: {0}")]
    Rejected(String),
    #[error("auth transport error")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch transport error")]
    Transport(#[from] reqwest::Error),
    #[error("fetch failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("fetch decode error: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("mutation transport error")]
    Transport(#[from] reqwest::Error),
    #[error("mutation failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("mutation decode error: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("realtime connect error: {0}")]
    Connect(String),
    #[error("realtime join rejected: {0}")]
    JoinRejected(String),
    #[error("realtime channel closed: {0}")]
    Closed(String),
    #[error("realtime protocol error: {0}")]
    Protocol(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for SubscriptionError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        SubscriptionError::Connect(error.to_string())
    }
}

impl From<serde_json::Error> for SubscriptionError {
    fn from(error: serde_json::Error) -> Self {
        SubscriptionError::Protocol(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_chain_is_unpacked() {
        let err = MutationError::Status {
            status: 409,
            body: "duplicate".to_string(),
        };
        assert_eq!(crate::unpack_error(&err), "mutation failed with status 409: duplicate");

        #[derive(Debug, Error)]
        #[error("create failed")]
        struct Wrapped(#[source] MutationError);
        assert_eq!(
            crate::unpack_error(&Wrapped(err)),
            "create failed: mutation failed with status 409: duplicate"
        );
        assert_eq!(MutationError::EmptyField("title").to_string(), "title must not be empty");
    }
}
