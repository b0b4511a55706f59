//! Shared primitives for scrum-poker sessions: the member/session model, the
//! vote-option validator and the JSON wire vocabulary exchanged over a
//! session's streaming channel. Both the server and the client build on these
//! so message shapes never drift between the two sides.

pub mod aggregate;
pub mod codec;
pub mod model;
pub mod options;
pub mod protocol;

pub use aggregate::{average, consensus, AverageDisplay};
pub use codec::{DecodeError, EncodeError, Inbound, Intent, StateUpdate};
pub use model::{ClientId, Member, SessionId, SessionSnapshot, Vote, VoteError, NO_VOTE};
pub use options::{InvalidOptions, DEFAULT_VOTE_OPTIONS};
pub use protocol::MemberUpdate;

/// Longest display name either side accepts.
pub const MAX_DISPLAY_NAME_LEN: usize = 64;
