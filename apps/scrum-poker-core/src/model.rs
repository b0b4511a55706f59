use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Wire value of [`Vote::NoVote`].
pub const NO_VOTE: i64 = -1;

/// Durable identifier of one client profile, reused across sessions and
/// reconnects so the server can resume the same member record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<Uuid> for ClientId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one voting session. Minted by the server only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<Uuid> for SessionId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A member's current vote. Travels as an integer where `-1` means no vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Vote {
    #[default]
    NoVote,
    Cast(u32),
}

impl Vote {
    pub fn value(self) -> Option<u32> {
        match self {
            Vote::NoVote => None,
            Vote::Cast(value) => Some(value),
        }
    }

    pub fn is_cast(self) -> bool {
        matches!(self, Vote::Cast(_))
    }
}

impl From<Option<u32>> for Vote {
    fn from(value: Option<u32>) -> Self {
        value.map_or(Vote::NoVote, Vote::Cast)
    }
}

impl TryFrom<i64> for Vote {
    type Error = VoteError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value == NO_VOTE {
            return Ok(Vote::NoVote);
        }
        match u32::try_from(value) {
            Ok(cast) if cast > 0 => Ok(Vote::Cast(cast)),
            _ => Err(VoteError::OutOfRange(value)),
        }
    }
}

impl From<Vote> for i64 {
    fn from(value: Vote) -> Self {
        match value {
            Vote::NoVote => NO_VOTE,
            Vote::Cast(cast) => i64::from(cast),
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vote::NoVote => f.write_str("No Vote"),
            Vote::Cast(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteError {
    #[error("vote {0} is neither -1 nor a positive integer")]
    OutOfRange(i64),
}

/// One participant as mirrored in a session snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub client_id: ClientId,
    pub display_name: String,
    pub vote: Vote,
    pub active: bool,
}

/// Authoritative shared state of a session. `members` keeps the server's
/// order and holds at most one entry per client id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub members: Vec<Member>,
    pub vote_options: Vec<u32>,
    pub votes_visible: bool,
}

impl SessionSnapshot {
    pub fn member(&self, client_id: &ClientId) -> Option<&Member> {
        self.members
            .iter()
            .find(|member| &member.client_id == client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn vote_sentinel_round_trips_through_integers() {
        assert_eq!(Vote::try_from(-1), Ok(Vote::NoVote));
        assert_eq!(Vote::try_from(5), Ok(Vote::Cast(5)));
        assert_eq!(i64::from(Vote::NoVote), -1);
        assert_eq!(i64::from(Vote::Cast(13)), 13);
    }

    #[test_timeout::timeout]
    fn vote_rejects_zero_and_other_negatives() {
        assert_eq!(Vote::try_from(0), Err(VoteError::OutOfRange(0)));
        assert_eq!(Vote::try_from(-2), Err(VoteError::OutOfRange(-2)));
        assert!(Vote::try_from(i64::from(u32::MAX) + 1).is_err());
    }

    #[test_timeout::timeout]
    fn member_uses_camel_case_fields() {
        let member = Member {
            client_id: ClientId::from("c1"),
            display_name: "Ann".into(),
            vote: Vote::NoVote,
            active: true,
        };
        let json = serde_json::to_value(&member).expect("serialize member");
        assert_eq!(
            json,
            serde_json::json!({
                "clientId": "c1",
                "displayName": "Ann",
                "vote": -1,
                "active": true
            })
        );
    }

    #[test_timeout::timeout]
    fn generated_client_ids_are_unique() {
        assert_ne!(ClientId::generate(), ClientId::generate());
    }
}
