//! One voting session: the member roster, vote options and visibility, and
//! the live channels bound to it.
//!
//! All state sits behind one lock. Every intent from an identified channel
//! is applied and then answered with a fresh per-recipient `StateUpdate` on
//! every bound channel, so clients converge on whatever the session holds.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use parking_lot::Mutex;
use scrum_poker_core::codec::{self, Inbound, Intent, StateUpdate};
use scrum_poker_core::{
    options, ClientId, InvalidOptions, Member, MemberUpdate, SessionId, SessionSnapshot, Vote,
    DEFAULT_VOTE_OPTIONS, MAX_DISPLAY_NAME_LEN,
};
use slab::Slab;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("intent received before identify")]
    NotIdentified,
    #[error("identify as {0} on a channel opened for another client")]
    IdentityMismatch(ClientId),
    #[error("unknown connection")]
    UnknownConnection,
    #[error("display name is empty")]
    EmptyDisplayName,
    #[error("display name exceeds {} characters", MAX_DISPLAY_NAME_LEN)]
    DisplayNameTooLong,
    #[error("vote {0} is not a current option")]
    UnknownVote(u32),
    #[error("invalid vote options: {0}")]
    InvalidOptions(#[from] InvalidOptions),
}

impl Rejection {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Rejection::NotIdentified => "not_identified",
            Rejection::IdentityMismatch(_) => "identity_mismatch",
            Rejection::UnknownConnection => "unknown_connection",
            Rejection::EmptyDisplayName => "empty_display_name",
            Rejection::DisplayNameTooLong => "display_name_too_long",
            Rejection::UnknownVote(_) => "unknown_vote",
            Rejection::InvalidOptions(_) => "invalid_options",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

/// Outcome of an intent from an identified channel. Field-level problems
/// are listed in `rejected`; the rest of the intent still applies.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub changed: bool,
    pub rejected: Vec<Rejection>,
    pub broadcast: BroadcastReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detached {
    pub remaining: usize,
    /// The client's last channel closed and its member was marked inactive.
    pub member_left: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey(usize);

struct Connection {
    client_id: ClientId,
    bound: bool,
    sender: mpsc::Sender<Message>,
}

struct SessionState {
    members: Vec<Member>,
    index: HashMap<ClientId, usize>,
    vote_options: Vec<u32>,
    votes_visible: bool,
    connections: Slab<Connection>,
    idle_since: Option<Instant>,
}

pub struct Session {
    id: SessionId,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(id: SessionId, now: Instant) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState {
                members: Vec::new(),
                index: HashMap::new(),
                vote_options: DEFAULT_VOTE_OPTIONS.to_vec(),
                votes_visible: false,
                connections: Slab::new(),
                idle_since: Some(now),
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Registers a channel opened for `client_id`. It stays unbound, and
    /// receives no state, until the client identifies.
    pub fn attach(&self, client_id: ClientId, sender: mpsc::Sender<Message>) -> ConnectionKey {
        let mut state = self.state.lock();
        state.idle_since = None;
        ConnectionKey(state.connections.insert(Connection {
            client_id,
            bound: false,
            sender,
        }))
    }

    pub fn apply(&self, key: ConnectionKey, intent: Intent) -> Result<ApplyReport, Rejection> {
        let mut state = self.state.lock();
        let connection = state
            .connections
            .get(key.0)
            .ok_or(Rejection::UnknownConnection)?;
        let client_id = connection.client_id.clone();
        let bound = connection.bound;

        let mut report = ApplyReport::default();
        match intent {
            Intent::Identify(claimed) => {
                if claimed != client_id {
                    return Err(Rejection::IdentityMismatch(claimed));
                }
                if let Some(connection) = state.connections.get_mut(key.0) {
                    connection.bound = true;
                }
                report.changed = state.ensure_member(&client_id);
            }
            _ if !bound => return Err(Rejection::NotIdentified),
            Intent::UpdateMember(update) => state.update_member(&client_id, update, &mut report),
            Intent::SetVoteOptions(raw) => match options::parse(&raw) {
                Ok(parsed) => {
                    report.changed = parsed != state.vote_options;
                    state.vote_options = parsed;
                }
                Err(err) => report.rejected.push(err.into()),
            },
            Intent::ClearVotes => {
                report.changed = state.votes_visible
                    || state.members.iter().any(|member| member.vote.is_cast());
                for member in &mut state.members {
                    member.vote = Vote::NoVote;
                }
                state.votes_visible = false;
            }
            Intent::RevealVotes => {
                report.changed = !state.votes_visible;
                state.votes_visible = true;
            }
        }
        report.broadcast = state.broadcast(&self.id);
        Ok(report)
    }

    pub fn detach(&self, key: ConnectionKey, now: Instant) -> Detached {
        let mut state = self.state.lock();
        let mut member_left = false;
        if state.connections.contains(key.0) {
            let connection = state.connections.remove(key.0);
            let still_bound = state
                .connections
                .iter()
                .any(|(_, other)| other.bound && other.client_id == connection.client_id);
            if connection.bound && !still_bound {
                if let Some(slot) = state.index.get(&connection.client_id).copied() {
                    state.members[slot].active = false;
                    member_left = true;
                }
                state.broadcast(&self.id);
            }
        }
        if state.connections.is_empty() && state.idle_since.is_none() {
            state.idle_since = Some(now);
        }
        Detached {
            remaining: state.connections.len(),
            member_left,
        }
    }

    /// Queues a ping on every channel; returns how many accepted it.
    pub fn ping(&self) -> usize {
        let state = self.state.lock();
        state
            .connections
            .iter()
            .filter(|(_, connection)| connection.sender.try_send(Message::Ping(Vec::new())).is_ok())
            .count()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().snapshot()
    }

    /// What `client_id` would be sent right now, if it is a member.
    pub fn state_for(&self, client_id: &ClientId) -> Option<StateUpdate> {
        let state = self.state.lock();
        state.state_for(client_id, state.snapshot())
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// How long the session has had no connections, `None` while any is open.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.state
            .lock()
            .idle_since
            .map(|since| now.saturating_duration_since(since))
    }
}

impl SessionState {
    fn ensure_member(&mut self, client_id: &ClientId) -> bool {
        if self.index.contains_key(client_id) {
            return false;
        }
        self.index.insert(client_id.clone(), self.members.len());
        self.members.push(Member {
            client_id: client_id.clone(),
            display_name: String::new(),
            vote: Vote::NoVote,
            active: true,
        });
        true
    }

    fn update_member(&mut self, client_id: &ClientId, update: MemberUpdate, report: &mut ApplyReport) {
        let Some(slot) = self.index.get(client_id).copied() else {
            return;
        };
        let vote = match update.vote {
            Some(Vote::Cast(value)) if !self.vote_options.contains(&value) => {
                report.rejected.push(Rejection::UnknownVote(value));
                None
            }
            other => other,
        };
        let member = &mut self.members[slot];

        if let Some(name) = update.display_name {
            let name = name.trim();
            if name.is_empty() {
                report.rejected.push(Rejection::EmptyDisplayName);
            } else if name.chars().count() > MAX_DISPLAY_NAME_LEN {
                report.rejected.push(Rejection::DisplayNameTooLong);
            } else if member.display_name != name {
                member.display_name = name.to_string();
                report.changed = true;
            }
        }
        if let Some(vote) = vote {
            if member.vote != vote {
                member.vote = vote;
                report.changed = true;
            }
        }
        if let Some(active) = update.active {
            if member.active != active {
                member.active = active;
                report.changed = true;
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            members: self.members.clone(),
            vote_options: self.vote_options.clone(),
            votes_visible: self.votes_visible,
        }
    }

    fn state_for(&self, client_id: &ClientId, snapshot: SessionSnapshot) -> Option<StateUpdate> {
        let member = &self.members[*self.index.get(client_id)?];
        Some(StateUpdate {
            display_name: member.display_name.clone(),
            vote: member.vote,
            active: member.active,
            snapshot,
        })
    }

    fn broadcast(&self, session_id: &SessionId) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let snapshot = self.snapshot();
        for (_, connection) in self.connections.iter().filter(|(_, c)| c.bound) {
            let Some(update) = self.state_for(&connection.client_id, snapshot.clone()) else {
                continue;
            };
            let text = match codec::encode_inbound(&Inbound::StateUpdate(update)) {
                Ok(text) => text,
                Err(err) => {
                    warn!(%session_id, error = %err, "failed to encode state update");
                    continue;
                }
            };
            match connection.sender.try_send(Message::Text(text)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    warn!(
                        %session_id,
                        client_id = %connection.client_id,
                        "outbound queue full; state update dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => report.closed += 1,
            }
        }
        report
    }
}
