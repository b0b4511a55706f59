//! Client side of a scrum-poker session: durable identity, the self-healing
//! session connection, and the reconciliation of server snapshots with the
//! user's optimistic edits into one observable [`SessionView`].

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod logging;
pub mod reconcile;
pub mod session;
pub mod view;

pub use api::SessionApi;
pub use config::ServerEndpoint;
pub use connection::{
    BackoffPolicy, ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionState,
};
pub use error::{ApiError, InputError};
pub use identity::IdentityStore;
pub use reconcile::Reconciler;
pub use session::SessionClient;
pub use view::{SessionView, ViewObserver, ViewTransition};
