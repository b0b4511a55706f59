//! Validation of user-supplied vote option lists such as `"1, 2, 3, 5, 8"`.
//!
//! Acceptance is all-or-nothing: one bad token rejects the whole string.

use thiserror::Error;

/// Options a freshly created session starts with.
pub const DEFAULT_VOTE_OPTIONS: [u32; 6] = [1, 2, 3, 5, 8, 12];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidOptions {
    #[error("option {position} is empty")]
    EmptyToken { position: usize },
    #[error("option {position} ({token:?}) is not an integer")]
    NotAnInteger { position: usize, token: String },
    #[error("option {position} ({token}) must be greater than zero")]
    NotPositive { position: usize, token: String },
    #[error("option {position} ({token}) is too large")]
    TooLarge { position: usize, token: String },
}

/// Splits `raw` on commas and parses every trimmed token as a strictly
/// positive integer, preserving input order and duplicates.
pub fn parse(raw: &str) -> Result<Vec<u32>, InvalidOptions> {
    raw.split(',')
        .enumerate()
        .map(|(index, token)| parse_token(index + 1, token.trim()))
        .collect()
}

fn parse_token(position: usize, token: &str) -> Result<u32, InvalidOptions> {
    if token.is_empty() {
        return Err(InvalidOptions::EmptyToken { position });
    }
    let value: i64 = token.parse().map_err(|_| InvalidOptions::NotAnInteger {
        position,
        token: token.to_string(),
    })?;
    if value <= 0 {
        return Err(InvalidOptions::NotPositive {
            position,
            token: token.to_string(),
        });
    }
    u32::try_from(value).map_err(|_| InvalidOptions::TooLarge {
        position,
        token: token.to_string(),
    })
}

/// Joins options into the comma separated form carried on the wire.
pub fn format(options: &[u32]) -> String {
    options
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
