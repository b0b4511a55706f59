use scrum_poker_core::{aggregate, ClientId, Member, Vote};

/// The reconciled session state presentation reads from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionView {
    /// False until the first authoritative snapshot has been applied.
    pub synchronized: bool,
    pub members: Vec<Member>,
    pub vote_options: Vec<u32>,
    pub votes_visible: bool,
    pub own: OwnState,
}

/// The local participant's state, including optimistic overlays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnState {
    pub client_id: Option<ClientId>,
    pub display_name: Option<String>,
    /// Pending local vote if one is awaiting its echo, otherwise the
    /// server's value.
    pub vote: Vote,
    pub pending: bool,
    pub active: bool,
}

impl Default for OwnState {
    fn default() -> Self {
        Self {
            client_id: None,
            display_name: None,
            vote: Vote::NoVote,
            pending: false,
            active: true,
        }
    }
}

impl SessionView {
    pub fn member(&self, client_id: &ClientId) -> Option<&Member> {
        self.members
            .iter()
            .find(|member| &member.client_id == client_id)
    }

    pub fn average(&self) -> Option<f64> {
        aggregate::average(&self.members)
    }

    pub fn consensus(&self) -> Option<u32> {
        if !self.votes_visible {
            return None;
        }
        aggregate::consensus(&self.members)
    }

    /// How many active members have voted, without revealing values.
    pub fn votes_cast(&self) -> usize {
        self.members
            .iter()
            .filter(|member| member.active && member.vote.is_cast())
            .count()
    }
}

/// Noteworthy changes produced by applying a snapshot or a local edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewTransition {
    Synchronized,
    VotesRevealed,
    VotesHidden,
    OptionsChanged(Vec<u32>),
    DisplayNameAdopted(String),
    /// Votes were just revealed and every counted vote agrees.
    Consensus(u32),
}

/// Side-effect hooks (celebrations, sounds, ...) kept out of reconciliation.
pub trait ViewObserver: Send {
    fn on_transition(&mut self, view: &SessionView, transition: &ViewTransition);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, vote: Vote, active: bool) -> Member {
        Member {
            client_id: ClientId::from(id),
            display_name: id.into(),
            vote,
            active,
        }
    }

    #[test_timeout::timeout]
    fn consensus_needs_visible_votes() {
        let mut view = SessionView {
            members: vec![
                member("a", Vote::Cast(3), true),
                member("b", Vote::Cast(3), true),
            ],
            ..SessionView::default()
        };
        assert_eq!(view.consensus(), None);
        view.votes_visible = true;
        assert_eq!(view.consensus(), Some(3));
        assert_eq!(view.votes_cast(), 2);
    }
}
