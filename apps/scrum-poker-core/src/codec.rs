//! Translation between typed intents/snapshots and wire frames.
//!
//! Decoding is strict: a frame that is not valid JSON, carries an unknown
//! `type`, or whose `voteOptions` do not reduce to positive integers is
//! rejected as a whole. Callers drop rejected frames and keep their state.

use std::collections::HashSet;

use thiserror::Error;

use crate::model::{ClientId, SessionSnapshot, Vote};
use crate::options::{self, InvalidOptions};
use crate::protocol::{ClientFrame, MemberUpdate, ServerFrame, StateUpdateFrame};

/// Client-originated request to change session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Identify(ClientId),
    UpdateMember(MemberUpdate),
    SetVoteOptions(String),
    ClearVotes,
    RevealVotes,
}

impl Intent {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Intent::Identify(_) => "identify",
            Intent::UpdateMember(_) => "update_member",
            Intent::SetVoteOptions(_) => "set_vote_options",
            Intent::ClearVotes => "clear_votes",
            Intent::RevealVotes => "reveal_votes",
        }
    }
}

/// Decoded server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Welcome,
    StateUpdate(StateUpdate),
}

/// Validated full-state push for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub display_name: String,
    pub vote: Vote,
    pub active: bool,
    pub snapshot: SessionSnapshot,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid vote options: {0}")]
    Options(#[from] InvalidOptions),
    #[error("member {0} listed more than once")]
    DuplicateMember(ClientId),
}

#[derive(Debug, Error)]
#[error("failed to encode frame: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

impl From<Intent> for ClientFrame {
    fn from(intent: Intent) -> Self {
        match intent {
            Intent::Identify(client_id) => ClientFrame::Identify { client_id },
            Intent::UpdateMember(update) => ClientFrame::UpdateData(update),
            Intent::SetVoteOptions(raw) => ClientFrame::SetOptions { raw },
            Intent::ClearVotes => ClientFrame::ClearVotes,
            Intent::RevealVotes => ClientFrame::ShowVotes,
        }
    }
}

impl From<ClientFrame> for Intent {
    fn from(frame: ClientFrame) -> Self {
        match frame {
            ClientFrame::Identify { client_id } => Intent::Identify(client_id),
            ClientFrame::UpdateData(update) => Intent::UpdateMember(update),
            ClientFrame::SetOptions { raw } => Intent::SetVoteOptions(raw),
            ClientFrame::ClearVotes => Intent::ClearVotes,
            ClientFrame::ShowVotes => Intent::RevealVotes,
        }
    }
}

impl From<&StateUpdate> for StateUpdateFrame {
    fn from(update: &StateUpdate) -> Self {
        StateUpdateFrame {
            display_name: update.display_name.clone(),
            vote: update.vote,
            votes_visible: update.snapshot.votes_visible,
            active: update.active,
            vote_options: options::format(&update.snapshot.vote_options),
            members: update.snapshot.members.clone(),
        }
    }
}

impl TryFrom<StateUpdateFrame> for StateUpdate {
    type Error = DecodeError;

    fn try_from(frame: StateUpdateFrame) -> Result<Self, Self::Error> {
        let vote_options = options::parse(&frame.vote_options)?;
        let mut seen = HashSet::with_capacity(frame.members.len());
        for member in &frame.members {
            if !seen.insert(&member.client_id) {
                return Err(DecodeError::DuplicateMember(member.client_id.clone()));
            }
        }
        Ok(StateUpdate {
            display_name: frame.display_name,
            vote: frame.vote,
            active: frame.active,
            snapshot: SessionSnapshot {
                members: frame.members,
                vote_options,
                votes_visible: frame.votes_visible,
            },
        })
    }
}

pub fn encode_intent(intent: &Intent) -> Result<String, EncodeError> {
    let frame = ClientFrame::from(intent.clone());
    Ok(serde_json::to_string(&frame)?)
}

pub fn decode_intent(text: &str) -> Result<Intent, DecodeError> {
    let frame: ClientFrame = serde_json::from_str(text)?;
    Ok(frame.into())
}

pub fn encode_inbound(inbound: &Inbound) -> Result<String, EncodeError> {
    let frame = match inbound {
        Inbound::Welcome => ServerFrame::Welcome,
        Inbound::StateUpdate(update) => ServerFrame::StateUpdate(update.into()),
    };
    Ok(serde_json::to_string(&frame)?)
}

pub fn decode_inbound(text: &str) -> Result<Inbound, DecodeError> {
    match serde_json::from_str::<ServerFrame>(text)? {
        ServerFrame::Welcome => Ok(Inbound::Welcome),
        ServerFrame::StateUpdate(frame) => Ok(Inbound::StateUpdate(frame.try_into()?)),
    }
}
