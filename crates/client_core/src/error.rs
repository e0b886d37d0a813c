use shared::error::{ApiError, ApiException, ErrorCode};
use thiserror::Error;

/// Failure of a client operation. `Clone` so one in-flight result can be
/// handed to every caller waiting on it and kept on fetch state.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("server rejected request: {0}")]
    Remote(#[from] ApiException),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error("not signed in")]
    SignedOut,
    #[error("no company selected")]
    NoCompany,
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ClientError {
    pub fn remote_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Remote(exception) => Some(exception.code),
            _ => None,
        }
    }
}

impl From<ApiError> for ClientError {
    fn from(value: ApiError) -> Self {
        Self::Remote(value.into())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {action} while {state}")]
pub struct SessionError {
    pub action: &'static str,
    pub state: &'static str,
}
