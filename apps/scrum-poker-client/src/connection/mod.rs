//! One self-healing logical connection per session view.
//!
//! A supervisor task opens the channel, performs the handshake (server
//! `Welcome` answered by `Identify`), forwards decoded frames to a
//! [`SessionListener`] and reconnects after losses with [`Backoff`] pacing.
//! Every attempt gets a new generation number; all listener callbacks and
//! outbound sends go through one gate that drops anything tagged with an
//! older generation, so a superseded socket can never resurrect old state.

mod backoff;
mod transport;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use scrum_poker_core::codec::{self, Inbound, Intent};
use scrum_poker_core::{ClientId, SessionId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

pub use backoff::{Backoff, BackoffPolicy};
pub use transport::{Channel, ConnectError, Connector, TransportEvent, WsConnector};

use crate::config::ServerEndpoint;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    /// Terminal: retries have stopped and only a fresh start can recover.
    FatalError,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub backoff: BackoffPolicy,
    /// An open channel with no inbound traffic for this long counts as lost.
    pub idle_timeout: Duration,
    /// A channel that stayed up this long reconnects immediately after a
    /// loss; shorter-lived ones are paced by the backoff.
    pub stable_after: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            idle_timeout: Duration::from_secs(25),
            stable_after: Duration::from_secs(5),
        }
    }
}

/// Receives everything a connection produces. Callbacks run synchronously
/// while the connection's gate is held and must not block or call
/// [`ConnectionHandle::stop`].
pub trait SessionListener: Send + Sync + 'static {
    fn on_frame(&self, frame: Inbound, outbox: &Outbox<'_>);
    fn on_status(&self, state: ConnectionState);
}

/// Send access handed to listener callbacks.
pub struct Outbox<'a> {
    shared: &'a Shared,
}

impl Outbox<'_> {
    pub fn send(&self, intent: &Intent) -> bool {
        self.shared.send(intent)
    }
}

struct Gate {
    generation: u64,
    stopped: bool,
    state: ConnectionState,
}

struct Route {
    generation: u64,
    identified: bool,
    tx: mpsc::UnboundedSender<String>,
}

struct Shared {
    session_id: SessionId,
    gate: Mutex<Gate>,
    route: Mutex<Option<Route>>,
    listener: Arc<dyn SessionListener>,
}

impl Shared {
    fn new(session_id: SessionId, listener: Arc<dyn SessionListener>) -> Self {
        Self {
            session_id,
            gate: Mutex::new(Gate {
                generation: 0,
                stopped: false,
                state: ConnectionState::Connecting,
            }),
            route: Mutex::new(None),
            listener,
        }
    }

    fn transition(&self, gate: &mut Gate, next: ConnectionState) {
        if gate.state != next {
            gate.state = next;
            self.listener.on_status(next);
        }
    }

    fn is_current(gate: &Gate, generation: u64) -> bool {
        !gate.stopped && gate.generation == generation
    }

    /// Opens a new generation; `None` once stopped.
    fn begin_attempt(&self) -> Option<u64> {
        let mut gate = self.gate.lock();
        if gate.stopped {
            return None;
        }
        gate.generation += 1;
        *self.route.lock() = None;
        let next = if gate.generation == 1 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };
        self.transition(&mut gate, next);
        Some(gate.generation)
    }

    fn attach(&self, generation: u64, tx: mpsc::UnboundedSender<String>) -> bool {
        let gate = self.gate.lock();
        if !Self::is_current(&gate, generation) {
            return false;
        }
        *self.route.lock() = Some(Route {
            generation,
            identified: false,
            tx,
        });
        true
    }

    /// Answers `Welcome` with `Identify` and marks the connection open.
    fn complete_handshake(&self, generation: u64, client_id: &ClientId) -> bool {
        let mut gate = self.gate.lock();
        if !Self::is_current(&gate, generation) {
            return false;
        }
        {
            let mut route = self.route.lock();
            let Some(route) = route.as_mut().filter(|r| r.generation == generation) else {
                return false;
            };
            let identify = Intent::Identify(client_id.clone());
            match codec::encode_intent(&identify) {
                Ok(text) => {
                    if route.tx.send(text).is_err() {
                        return false;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "failed to encode identify frame");
                    return false;
                }
            }
            route.identified = true;
        }
        self.transition(&mut gate, ConnectionState::Open);
        true
    }

    fn deliver(&self, generation: u64, frame: Inbound) {
        let gate = self.gate.lock();
        if !Self::is_current(&gate, generation) {
            debug!(
                session_id = %self.session_id,
                generation,
                current = gate.generation,
                "dropping frame from superseded connection"
            );
            return;
        }
        self.listener.on_frame(frame, &Outbox { shared: self });
    }

    /// Tears down the route of a lost channel and reports `Reconnecting`
    /// right away, before any backoff delay.
    fn lost(&self, generation: u64) {
        let mut gate = self.gate.lock();
        if !Self::is_current(&gate, generation) {
            return;
        }
        *self.route.lock() = None;
        self.transition(&mut gate, ConnectionState::Reconnecting);
    }

    fn fail(&self, generation: u64) {
        let mut gate = self.gate.lock();
        if !Self::is_current(&gate, generation) {
            return;
        }
        *self.route.lock() = None;
        self.transition(&mut gate, ConnectionState::FatalError);
    }

    fn send(&self, intent: &Intent) -> bool {
        let route = self.route.lock();
        let Some(route) = route.as_ref().filter(|r| r.identified) else {
            debug!(
                session_id = %self.session_id,
                kind = intent.kind(),
                "connection not open; dropping intent"
            );
            return false;
        };
        match codec::encode_intent(intent) {
            Ok(text) => route.tx.send(text).is_ok(),
            Err(err) => {
                warn!(kind = intent.kind(), error = %err, "failed to encode intent");
                false
            }
        }
    }

    fn stop(&self) -> bool {
        let mut gate = self.gate.lock();
        if gate.stopped {
            return false;
        }
        gate.stopped = true;
        gate.generation += 1;
        *self.route.lock() = None;
        true
    }
}

/// Caller-side handle of a started connection. Clones share the connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConnectionHandle {
    /// Queues an intent. Returns `false` and drops it unless the connection
    /// is open.
    pub fn send(&self, intent: &Intent) -> bool {
        self.shared.send(intent)
    }

    /// Closes the connection and stops reconnecting. Once this returns no
    /// listener callback runs again. Idempotent; must not be called from a
    /// listener callback.
    pub fn stop(&self) {
        if self.shared.stop() {
            info!(session_id = %self.shared.session_id, "connection stopped");
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_connector(Arc::new(WsConnector), config)
    }

    pub fn with_connector(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Self {
        Self { connector, config }
    }

    /// Starts connecting to the session's channel. Must be called from
    /// within a Tokio runtime.
    pub fn start(
        &self,
        endpoint: &ServerEndpoint,
        session_id: &SessionId,
        client_id: &ClientId,
        listener: Arc<dyn SessionListener>,
    ) -> Result<ConnectionHandle, ApiError> {
        let url = endpoint.channel_url(session_id, client_id)?;
        let shared = Arc::new(Shared::new(session_id.clone(), listener));
        let supervisor = Supervisor {
            shared: Arc::clone(&shared),
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
            url,
            client_id: client_id.clone(),
        };
        let task = tokio::spawn(supervisor.run());
        Ok(ConnectionHandle {
            shared,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }
}

#[derive(Debug)]
enum Loss {
    Closed(Option<String>),
    Idle,
    Superseded,
}

struct Supervisor {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    url: Url,
    client_id: ClientId,
}

impl Supervisor {
    async fn run(self) {
        let mut backoff = Backoff::new(self.config.backoff.clone());
        let session_id = self.shared.session_id.clone();

        while let Some(generation) = self.shared.begin_attempt() {
            let failure = match self.connector.connect(&self.url).await {
                Ok(channel) => {
                    let opened_at = Instant::now();
                    let loss = self.run_channel(generation, channel).await;
                    self.shared.lost(generation);
                    info!(%session_id, generation, reason = ?loss, "connection lost");
                    if opened_at.elapsed() >= self.config.stable_after {
                        backoff.reset();
                        continue;
                    }
                    format!("{loss:?}")
                }
                Err(err) if err.is_fatal() => {
                    warn!(%session_id, generation, error = %err, "connection rejected");
                    self.shared.fail(generation);
                    return;
                }
                Err(err) => err.to_string(),
            };

            match backoff.next_delay() {
                Some(delay) => {
                    debug!(
                        %session_id,
                        generation,
                        failures = backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "retrying connection"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        %session_id,
                        failures = backoff.failures(),
                        error = %failure,
                        "giving up after repeated connection failures"
                    );
                    self.shared.fail(generation);
                    return;
                }
            }
        }
    }

    async fn run_channel(&self, generation: u64, channel: Channel) -> Loss {
        let Channel {
            outbound,
            mut inbound,
        } = channel;
        if !self.shared.attach(generation, outbound) {
            return Loss::Superseded;
        }

        loop {
            let event = match timeout(self.config.idle_timeout, inbound.recv()).await {
                Err(_) => return Loss::Idle,
                Ok(None) => return Loss::Closed(None),
                Ok(Some(event)) => event,
            };
            match event {
                TransportEvent::Activity => {}
                TransportEvent::Closed(reason) => return Loss::Closed(reason),
                TransportEvent::Frame(text) => match codec::decode_inbound(&text) {
                    Ok(Inbound::Welcome) => {
                        if !self.shared.complete_handshake(generation, &self.client_id) {
                            return Loss::Superseded;
                        }
                        self.shared.deliver(generation, Inbound::Welcome);
                    }
                    Ok(frame) => self.shared.deliver(generation, frame),
                    Err(err) => {
                        warn!(
                            session_id = %self.shared.session_id,
                            generation,
                            error = %err,
                            "dropping malformed frame"
                        );
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrum_poker_core::{SessionSnapshot, StateUpdate, Vote};

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<Inbound>>,
        states: Mutex<Vec<ConnectionState>>,
    }

    impl SessionListener for Recorder {
        fn on_frame(&self, frame: Inbound, _outbox: &Outbox<'_>) {
            self.frames.lock().push(frame);
        }

        fn on_status(&self, state: ConnectionState) {
            self.states.lock().push(state);
        }
    }

    fn update(name: &str) -> Inbound {
        Inbound::StateUpdate(StateUpdate {
            display_name: name.into(),
            vote: Vote::NoVote,
            active: true,
            snapshot: SessionSnapshot {
                members: Vec::new(),
                vote_options: vec![1, 2, 3],
                votes_visible: false,
            },
        })
    }

    fn shared() -> (Arc<Recorder>, Shared) {
        let recorder = Arc::new(Recorder::default());
        let shared = Shared::new(SessionId::from("s1"), recorder.clone());
        (recorder, shared)
    }

    #[test_timeout::timeout]
    fn frames_from_a_superseded_generation_are_ignored() {
        let (recorder, shared) = shared();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let first = shared.begin_attempt().expect("first attempt");
        assert!(shared.attach(first, tx1));

        let (tx2, _rx2) = mpsc::unbounded_channel();
        let second = shared.begin_attempt().expect("second attempt");
        assert!(shared.attach(second, tx2));
        shared.deliver(second, update("fresh"));

        shared.deliver(first, update("stale"));
        assert!(!shared.attach(first, mpsc::unbounded_channel().0));

        let frames = recorder.frames.lock();
        assert_eq!(frames.as_slice(), &[update("fresh")]);
    }

    #[test_timeout::timeout]
    fn sends_are_dropped_until_the_handshake_completes() {
        let (recorder, shared) = shared();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let generation = shared.begin_attempt().expect("attempt");
        shared.attach(generation, tx);

        assert!(!shared.send(&Intent::RevealVotes));
        assert!(shared.complete_handshake(generation, &ClientId::from("c1")));
        assert!(shared.send(&Intent::RevealVotes));

        assert_eq!(
            rx.try_recv().expect("identify"),
            r#"{"type":"Identify","clientId":"c1"}"#
        );
        assert_eq!(rx.try_recv().expect("reveal"), r#"{"type":"ShowVotes"}"#);
        assert_eq!(recorder.states.lock().as_slice(), &[ConnectionState::Open]);
    }

    #[test_timeout::timeout]
    fn stop_silences_every_later_callback() {
        let (recorder, shared) = shared();
        let generation = shared.begin_attempt().expect("attempt");
        shared.attach(generation, mpsc::unbounded_channel().0);
        assert!(shared.stop());
        assert!(!shared.stop());

        shared.deliver(generation, update("late"));
        shared.fail(generation);
        assert!(shared.begin_attempt().is_none());

        assert!(recorder.frames.lock().is_empty());
        assert!(recorder.states.lock().is_empty());
    }

    #[test_timeout::timeout]
    fn status_reports_only_transitions() {
        let (recorder, shared) = shared();
        let (tx, _rx) = mpsc::unbounded_channel();
        let first = shared.begin_attempt().expect("first");
        assert!(shared.attach(first, tx));
        assert!(shared.complete_handshake(first, &ClientId::from("c1")));
        shared.lost(first);
        let second = shared.begin_attempt().expect("second");
        let third = shared.begin_attempt().expect("third");
        assert!(third > second);
        shared.fail(third);

        assert_eq!(
            recorder.states.lock().as_slice(),
            &[
                ConnectionState::Open,
                ConnectionState::Reconnecting,
                ConnectionState::FatalError
            ]
        );
    }

    #[test_timeout::timeout]
    fn losing_the_channel_reports_reconnecting_at_once() {
        let (recorder, shared) = shared();
        let (tx, _rx) = mpsc::unbounded_channel();
        let generation = shared.begin_attempt().expect("attempt");
        assert!(shared.attach(generation, tx));
        assert!(shared.complete_handshake(generation, &ClientId::from("c1")));

        shared.lost(generation);
        assert_eq!(shared.gate.lock().state, ConnectionState::Reconnecting);
        assert!(!shared.send(&Intent::RevealVotes));

        // a loss reported for an older generation changes nothing
        let next = shared.begin_attempt().expect("next");
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(shared.attach(next, tx));
        assert!(shared.complete_handshake(next, &ClientId::from("c1")));
        shared.lost(generation);
        assert_eq!(shared.gate.lock().state, ConnectionState::Open);
        assert_eq!(
            recorder.states.lock().as_slice(),
            &[
                ConnectionState::Open,
                ConnectionState::Reconnecting,
                ConnectionState::Open
            ]
        );
    }
}
