//! Folds authoritative snapshots together with the user's not yet
//! acknowledged edits into the [`SessionView`].
//!
//! The server owns session state; the only local overlay is the last vote
//! this client cast. That vote shows immediately and is dropped as soon as
//! the server echoes it back or the round changes (votes revealed or
//! hidden). A vote still unconfirmed at reconnect is replayed together with
//! the cached name and voting flag; confirmed votes live on the server.

use scrum_poker_core::codec::{Intent, StateUpdate};
use scrum_poker_core::{options, ClientId, MemberUpdate, Vote, MAX_DISPLAY_NAME_LEN};
use tracing::debug;

use crate::error::InputError;
use crate::identity::IdentityStore;
use crate::view::{OwnState, SessionView, ViewTransition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Synchronized,
}

/// A vote sent to the server but not yet seen in one of its snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingLocalState {
    pub last_cast_vote: Option<u32>,
}

impl PendingLocalState {
    pub fn awaiting_echo(&self) -> bool {
        self.last_cast_vote.is_some()
    }

    fn clear(&mut self) {
        self.last_cast_vote = None;
    }
}

pub struct Reconciler {
    identity: IdentityStore,
    client_id: ClientId,
    phase: Phase,
    pending: PendingLocalState,
    server_vote: Vote,
    view: SessionView,
}

impl Reconciler {
    pub fn new(mut identity: IdentityStore) -> Self {
        let client_id = identity.get_or_create_client_id();
        let view = SessionView {
            own: OwnState {
                client_id: Some(client_id.clone()),
                display_name: identity.display_name().map(str::to_string),
                active: identity.voting(),
                ..OwnState::default()
            },
            ..SessionView::default()
        };
        Self {
            identity,
            client_id,
            phase: Phase::Uninitialized,
            pending: PendingLocalState::default(),
            server_vote: Vote::NoVote,
            view,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pending(&self) -> PendingLocalState {
        self.pending
    }

    pub fn view(&self) -> &SessionView {
        &self.view
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    /// Replay of local intent sent right after `Identify` on every
    /// (re)connect.
    pub fn on_welcome(&self) -> Intent {
        Intent::UpdateMember(MemberUpdate {
            display_name: self.identity.display_name().map(str::to_string),
            vote: self.pending.last_cast_vote.map(Vote::Cast),
            active: Some(self.identity.voting()),
        })
    }

    pub fn apply(&mut self, update: StateUpdate) -> Vec<ViewTransition> {
        let StateUpdate {
            display_name,
            vote,
            active,
            snapshot,
        } = update;
        let mut transitions = Vec::new();
        let first = self.phase == Phase::Uninitialized;
        let round_changed = self.view.votes_visible != snapshot.votes_visible;

        if round_changed {
            if let Some(pending) = self.pending.last_cast_vote {
                debug!(pending, "vote round changed; dropping pending vote");
            }
            self.pending.clear();
        } else if self.pending.last_cast_vote.map(Vote::Cast) == Some(vote) {
            self.pending.clear();
        }

        self.server_vote = vote;
        self.view.members = snapshot.members;
        self.view.votes_visible = snapshot.votes_visible;
        self.view.own.active = active;

        if snapshot.vote_options != self.view.vote_options {
            self.view.vote_options = snapshot.vote_options;
            transitions.push(ViewTransition::OptionsChanged(
                self.view.vote_options.clone(),
            ));
        }

        let echoed_name = display_name.trim();
        if !echoed_name.is_empty() && self.identity.display_name() != Some(echoed_name) {
            self.identity.set_display_name(echoed_name);
            self.view.own.display_name = Some(echoed_name.to_string());
            transitions.push(ViewTransition::DisplayNameAdopted(echoed_name.to_string()));
        }

        self.refresh_own_vote();

        if first {
            self.phase = Phase::Synchronized;
            self.view.synchronized = true;
            transitions.insert(0, ViewTransition::Synchronized);
        } else if round_changed {
            if self.view.votes_visible {
                transitions.push(ViewTransition::VotesRevealed);
                if let Some(value) = self.view.consensus() {
                    transitions.push(ViewTransition::Consensus(value));
                }
            } else {
                transitions.push(ViewTransition::VotesHidden);
            }
        }
        transitions
    }

    pub fn cast_vote(&mut self, value: u32) -> Result<Intent, InputError> {
        if !self.view.vote_options.contains(&value) {
            return Err(InputError::UnknownVote(value));
        }
        self.pending.last_cast_vote = Some(value);
        self.refresh_own_vote();
        Ok(Intent::UpdateMember(MemberUpdate {
            vote: Some(Vote::Cast(value)),
            ..MemberUpdate::default()
        }))
    }

    pub fn set_display_name(&mut self, name: &str) -> Result<Intent, InputError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(InputError::EmptyDisplayName);
        }
        if name.chars().count() > MAX_DISPLAY_NAME_LEN {
            return Err(InputError::DisplayNameTooLong(MAX_DISPLAY_NAME_LEN));
        }
        self.identity.set_display_name(name);
        self.view.own.display_name = Some(name.to_string());
        Ok(Intent::UpdateMember(MemberUpdate {
            display_name: Some(name.to_string()),
            ..MemberUpdate::default()
        }))
    }

    pub fn join_vote(&mut self) -> Intent {
        self.set_active(true)
    }

    pub fn leave_vote(&mut self) -> Intent {
        self.set_active(false)
    }

    fn set_active(&mut self, active: bool) -> Intent {
        self.identity.set_voting(active);
        self.view.own.active = active;
        Intent::UpdateMember(MemberUpdate {
            active: Some(active),
            ..MemberUpdate::default()
        })
    }

    pub fn set_vote_options(&self, raw: &str) -> Result<Intent, InputError> {
        options::parse(raw)?;
        Ok(Intent::SetVoteOptions(raw.trim().to_string()))
    }

    pub fn clear_votes(&self) -> Intent {
        Intent::ClearVotes
    }

    pub fn reveal_votes(&self) -> Intent {
        Intent::RevealVotes
    }

    fn refresh_own_vote(&mut self) {
        match self.pending.last_cast_vote {
            Some(cast) => {
                self.view.own.vote = Vote::Cast(cast);
                self.view.own.pending = true;
            }
            _ => {
                self.view.own.vote = self.server_vote;
                self.view.own.pending = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrum_poker_core::{InvalidOptions, Member, SessionSnapshot};

    struct Fixture {
        _dir: tempfile::TempDir,
        path: std::path::PathBuf,
    }

    fn stored_identity(client_id: &str, name: Option<&str>) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("identity.toml");
        let mut body = format!("client_id = \"{client_id}\"\nvoting = true\n");
        if let Some(name) = name {
            body.push_str(&format!("display_name = \"{name}\"\n"));
        }
        std::fs::write(&path, body).expect("write identity");
        Fixture { _dir: dir, path }
    }

    fn member(id: &str, name: &str, vote: Vote, active: bool) -> Member {
        Member {
            client_id: ClientId::from(id),
            display_name: name.into(),
            vote,
            active,
        }
    }

    fn state(vote: Vote, visible: bool, options: &[u32], members: Vec<Member>) -> StateUpdate {
        StateUpdate {
            display_name: "Ann".into(),
            vote,
            active: true,
            snapshot: SessionSnapshot {
                members,
                vote_options: options.to_vec(),
                votes_visible: visible,
            },
        }
    }

    fn synced() -> Reconciler {
        let mut engine = Reconciler::new(IdentityStore::ephemeral());
        engine.apply(state(Vote::NoVote, false, &[1, 3, 5, 8], Vec::new()));
        engine
    }

    #[test_timeout::timeout]
    fn reconnect_replays_cached_identity_and_adopts_roster() {
        let fixture = stored_identity("c1", Some("Ann"));
        let mut engine = Reconciler::new(IdentityStore::open(&fixture.path));
        assert_eq!(engine.client_id(), &ClientId::from("c1"));
        assert_eq!(engine.phase(), Phase::Uninitialized);

        assert_eq!(
            engine.on_welcome(),
            Intent::UpdateMember(MemberUpdate {
                display_name: Some("Ann".into()),
                vote: None,
                active: Some(true),
            })
        );

        let transitions = engine.apply(state(
            Vote::NoVote,
            false,
            &[1, 2, 3],
            vec![member("c1", "Ann", Vote::NoVote, true)],
        ));
        assert_eq!(transitions[0], ViewTransition::Synchronized);

        let view = engine.view();
        assert!(view.synchronized);
        assert_eq!(view.members.len(), 1);
        assert_eq!(view.members[0].display_name, "Ann");
        assert_eq!(view.members[0].vote, Vote::NoVote);
        assert_eq!(view.vote_options, vec![1, 2, 3]);
    }

    #[test_timeout::timeout]
    fn revealing_votes_clears_any_pending_vote() {
        for echoed in [false, true] {
            let mut engine = synced();
            engine.cast_vote(5).expect("valid vote");
            if echoed {
                engine.apply(state(Vote::Cast(5), false, &[1, 3, 5, 8], Vec::new()));
            }
            engine.apply(state(Vote::Cast(5), true, &[1, 3, 5, 8], Vec::new()));
            assert_eq!(engine.pending().last_cast_vote, None);
            assert_eq!(engine.view().own.vote, Vote::Cast(5));
        }
    }

    #[test_timeout::timeout]
    fn optimistic_vote_survives_until_echoed() {
        let mut engine = synced();
        let intent = engine.cast_vote(8).expect("valid vote");
        assert_eq!(
            intent,
            Intent::UpdateMember(MemberUpdate {
                vote: Some(Vote::Cast(8)),
                ..MemberUpdate::default()
            })
        );
        assert_eq!(engine.view().own.vote, Vote::Cast(8));
        assert!(engine.view().own.pending);

        // someone else's change arrives before our echo
        engine.apply(state(Vote::NoVote, false, &[1, 3, 5, 8], Vec::new()));
        assert_eq!(engine.view().own.vote, Vote::Cast(8));
        assert!(engine.pending().awaiting_echo());

        // unconfirmed votes are replayed on reconnect
        assert!(matches!(
            engine.on_welcome(),
            Intent::UpdateMember(MemberUpdate { vote: Some(Vote::Cast(8)), .. })
        ));

        engine.apply(state(Vote::Cast(8), false, &[1, 3, 5, 8], Vec::new()));
        assert!(!engine.view().own.pending);
        assert_eq!(engine.view().own.vote, Vote::Cast(8));
        assert_eq!(engine.pending().last_cast_vote, None);
    }

    #[test_timeout::timeout]
    fn confirmed_vote_is_not_replayed_over_a_server_clear() {
        let mut engine = synced();
        engine.cast_vote(3).expect("valid vote");
        engine.apply(state(Vote::Cast(3), false, &[1, 3, 5, 8], Vec::new()));
        assert!(matches!(
            engine.on_welcome(),
            Intent::UpdateMember(MemberUpdate { vote: None, .. })
        ));

        // votes cleared by someone else while the round stays hidden
        engine.apply(state(Vote::NoVote, false, &[1, 3, 5, 8], Vec::new()));
        assert_eq!(engine.view().own.vote, Vote::NoVote);
        assert!(matches!(
            engine.on_welcome(),
            Intent::UpdateMember(MemberUpdate { vote: None, .. })
        ));
    }

    #[test_timeout::timeout]
    fn identical_options_do_not_notify() {
        let mut engine = synced();
        let transitions = engine.apply(state(Vote::NoVote, false, &[1, 3, 5, 8], Vec::new()));
        assert!(transitions.is_empty());

        let transitions = engine.apply(state(Vote::NoVote, false, &[1, 2], Vec::new()));
        assert_eq!(transitions, vec![ViewTransition::OptionsChanged(vec![1, 2])]);
    }

    #[test_timeout::timeout]
    fn server_name_is_adopted_and_persisted() {
        let fixture = stored_identity("c1", Some("ann "));
        let mut engine = Reconciler::new(IdentityStore::open(&fixture.path));
        engine.apply(state(Vote::NoVote, false, &[1], Vec::new()));
        assert_eq!(engine.view().own.display_name.as_deref(), Some("Ann"));

        let reopened = IdentityStore::open(&fixture.path);
        assert_eq!(reopened.display_name(), Some("Ann"));
    }

    #[test_timeout::timeout]
    fn blank_server_name_keeps_the_cached_one() {
        let fixture = stored_identity("c1", Some("Ann"));
        let mut engine = Reconciler::new(IdentityStore::open(&fixture.path));
        let mut update = state(Vote::NoVote, false, &[1], Vec::new());
        update.display_name = String::new();
        let transitions = engine.apply(update);
        assert!(!transitions
            .iter()
            .any(|t| matches!(t, ViewTransition::DisplayNameAdopted(_))));
        assert_eq!(engine.identity().display_name(), Some("Ann"));
    }

    #[test_timeout::timeout]
    fn invalid_input_is_rejected_before_sending() {
        let mut engine = synced();
        assert_eq!(
            engine.set_display_name("   "),
            Err(InputError::EmptyDisplayName)
        );
        assert_eq!(
            engine.set_display_name(&"x".repeat(MAX_DISPLAY_NAME_LEN + 1)),
            Err(InputError::DisplayNameTooLong(MAX_DISPLAY_NAME_LEN))
        );
        assert_eq!(
            engine.set_vote_options("1,-2,x"),
            Err(InputError::InvalidOptions(InvalidOptions::NotPositive {
                position: 2,
                token: "-2".into(),
            }))
        );
        assert_eq!(engine.cast_vote(13), Err(InputError::UnknownVote(13)));
        assert_eq!(engine.pending().last_cast_vote, None);
    }

    #[test_timeout::timeout]
    fn voting_flag_is_cached_and_replayed() {
        let mut engine = synced();
        assert_eq!(
            engine.leave_vote(),
            Intent::UpdateMember(MemberUpdate {
                active: Some(false),
                ..MemberUpdate::default()
            })
        );
        assert!(!engine.identity().voting());
        assert!(matches!(
            engine.on_welcome(),
            Intent::UpdateMember(MemberUpdate { active: Some(false), .. })
        ));
    }

    #[test_timeout::timeout]
    fn reveal_with_agreement_reports_consensus() {
        let mut engine = synced();
        let members = vec![
            member("a", "A", Vote::Cast(5), true),
            member("b", "B", Vote::Cast(5), true),
            member("c", "C", Vote::Cast(1), false),
        ];
        engine.apply(state(Vote::NoVote, false, &[1, 3, 5, 8], members.clone()));
        let transitions = engine.apply(state(Vote::NoVote, true, &[1, 3, 5, 8], members));
        assert_eq!(
            transitions,
            vec![ViewTransition::VotesRevealed, ViewTransition::Consensus(5)]
        );
    }
}
