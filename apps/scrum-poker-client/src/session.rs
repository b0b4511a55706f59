//! Glue between one connection and one [`Reconciler`]: frames from the
//! connection feed the engine, user intents flow through the engine to the
//! connection, and every change to the view is published on a watch channel.

use std::sync::Arc;

use parking_lot::Mutex;
use scrum_poker_core::codec::{Inbound, Intent};
use scrum_poker_core::{ClientId, SessionId};
use tokio::sync::watch;
use tracing::debug;

use crate::config::ServerEndpoint;
use crate::connection::{
    ConnectionHandle, ConnectionManager, ConnectionState, Outbox, SessionListener,
};
use crate::error::{ApiError, InputError};
use crate::identity::IdentityStore;
use crate::reconcile::Reconciler;
use crate::view::{SessionView, ViewObserver, ViewTransition};

struct ClientInner {
    engine: Mutex<Reconciler>,
    view_tx: watch::Sender<SessionView>,
    status_tx: watch::Sender<ConnectionState>,
    observers: Mutex<Vec<Box<dyn ViewObserver>>>,
}

impl ClientInner {
    fn publish(&self, view: SessionView, transitions: &[ViewTransition]) {
        if !transitions.is_empty() {
            let mut observers = self.observers.lock();
            for transition in transitions {
                for observer in observers.iter_mut() {
                    observer.on_transition(&view, transition);
                }
            }
        }
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }
}

impl SessionListener for ClientInner {
    fn on_frame(&self, frame: Inbound, outbox: &Outbox<'_>) {
        match frame {
            Inbound::Welcome => {
                let replay = self.engine.lock().on_welcome();
                if !outbox.send(&replay) {
                    debug!("replay after welcome was not sent");
                }
            }
            Inbound::StateUpdate(update) => {
                // publish under the engine lock so views go out in apply order
                let mut engine = self.engine.lock();
                let transitions = engine.apply(update);
                self.publish(engine.view().clone(), &transitions);
            }
        }
    }

    fn on_status(&self, state: ConnectionState) {
        self.status_tx.send_replace(state);
    }
}

/// A live, reconciled view of one session.
///
/// Intent methods validate locally, update the optimistic view and return
/// whether the intent was handed to an open connection. A `false` return
/// means the channel is down; votes, names and the voting flag are replayed
/// automatically once it reconnects, everything else has to be retried.
pub struct SessionClient {
    inner: Arc<ClientInner>,
    handle: ConnectionHandle,
    session_id: SessionId,
    client_id: ClientId,
}

impl SessionClient {
    pub fn connect(
        manager: &ConnectionManager,
        endpoint: &ServerEndpoint,
        session_id: SessionId,
        identity: IdentityStore,
    ) -> Result<Self, ApiError> {
        let engine = Reconciler::new(identity);
        let client_id = engine.client_id().clone();
        let (view_tx, _) = watch::channel(engine.view().clone());
        let (status_tx, _) = watch::channel(ConnectionState::Connecting);
        let inner = Arc::new(ClientInner {
            engine: Mutex::new(engine),
            view_tx,
            status_tx,
            observers: Mutex::new(Vec::new()),
        });
        let handle = manager.start(endpoint, &session_id, &client_id, inner.clone())?;
        Ok(Self {
            inner,
            handle,
            session_id,
            client_id,
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn view(&self) -> SessionView {
        self.inner.view_tx.borrow().clone()
    }

    pub fn status(&self) -> ConnectionState {
        *self.inner.status_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.inner.view_tx.subscribe()
    }

    pub fn status_updates(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status_tx.subscribe()
    }

    /// Observers run on the connection task and must not block.
    pub fn add_observer(&self, observer: Box<dyn ViewObserver>) {
        self.inner.observers.lock().push(observer);
    }

    pub fn cast_vote(&self, value: u32) -> Result<bool, InputError> {
        self.dispatch(|engine| engine.cast_vote(value))
    }

    pub fn set_display_name(&self, name: &str) -> Result<bool, InputError> {
        self.dispatch(|engine| engine.set_display_name(name))
    }

    pub fn join_vote(&self) -> bool {
        self.dispatch_infallible(Reconciler::join_vote)
    }

    pub fn leave_vote(&self) -> bool {
        self.dispatch_infallible(Reconciler::leave_vote)
    }

    pub fn set_vote_options(&self, raw: &str) -> Result<bool, InputError> {
        self.dispatch(|engine| engine.set_vote_options(raw))
    }

    pub fn clear_votes(&self) -> bool {
        self.dispatch_infallible(|engine| engine.clear_votes())
    }

    pub fn reveal_votes(&self) -> bool {
        self.dispatch_infallible(|engine| engine.reveal_votes())
    }

    /// Closes the channel for good. No view or status update is published
    /// after this returns.
    pub fn stop(&self) {
        self.handle.stop();
    }

    fn dispatch<F>(&self, build: F) -> Result<bool, InputError>
    where
        F: FnOnce(&mut Reconciler) -> Result<Intent, InputError>,
    {
        let intent = {
            let mut engine = self.inner.engine.lock();
            let intent = build(&mut engine)?;
            self.inner.publish(engine.view().clone(), &[]);
            intent
        };
        Ok(self.handle.send(&intent))
    }

    fn dispatch_infallible<F>(&self, build: F) -> bool
    where
        F: FnOnce(&mut Reconciler) -> Intent,
    {
        matches!(self.dispatch(|engine| Ok(build(engine))), Ok(true))
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.handle.stop();
    }
}
