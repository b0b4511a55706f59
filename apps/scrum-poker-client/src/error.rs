use std::io;

use scrum_poker_core::{InvalidOptions, SessionId};
use thiserror::Error;

/// Local persistence failures. The identity store absorbs these and keeps
/// running in memory, so they only surface in logs.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("unable to determine a config directory")]
    NoConfigDir,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for IdentityError {
    fn from(value: toml::de::Error) -> Self {
        IdentityError::Toml(value.to_string())
    }
}

impl From<toml::ser::Error> for IdentityError {
    fn from(value: toml::ser::Error) -> Self {
        IdentityError::Toml(value.to_string())
    }
}

/// Session lookup/creation failures.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// User input rejected before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("display name must not be empty")]
    EmptyDisplayName,
    #[error("display name is longer than {0} characters")]
    DisplayNameTooLong(usize),
    #[error(transparent)]
    InvalidOptions(#[from] InvalidOptions),
    #[error("{0} is not one of the session's vote options")]
    UnknownVote(u32),
}
