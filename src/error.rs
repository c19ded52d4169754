use std::fmt;

use tokio_tungstenite::tungstenite;

use crate::types::SystemMode;

#[derive(Debug)]
pub enum Error {
    Transport(tungstenite::Error),
    AuthRejected(String),
    Protocol(String),
    Timeout,
    AlreadySet(SystemMode),
    UnknownSchedule(String),
    InvalidRequest(String),
    ApplyFailed(Vec<String>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "transport error: {e}"),
            Error::AuthRejected(msg) => write!(f, "authentication rejected: {msg}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::Timeout => write!(f, "connect handshake timed out"),
            Error::AlreadySet(mode) => write!(f, "mode {mode} is already set"),
            Error::UnknownSchedule(id) => write!(f, "no schedule named {id}"),
            Error::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Error::ApplyFailed(entities) => {
                write!(f, "mode application failed for: {}", entities.join(", "))
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
