//! Runs real clients against an in-process server.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use scrum_poker_client::{
    ApiError, ConnectionConfig, ConnectionManager, IdentityStore, ServerEndpoint, SessionApi,
    SessionClient, SessionView, ViewObserver, ViewTransition,
};
use scrum_poker_core::{SessionId, Vote};
use scrum_poker_server::{AppState, ServerConfig};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    endpoint: ServerEndpoint,
    _shutdown: oneshot::Sender<()>,
}

async fn start_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr: SocketAddr = listener.local_addr().expect("addr");
    let state = Arc::new(AppState::new(ServerConfig::default(), None));
    let (shutdown, stop) = oneshot::channel::<()>();
    tokio::spawn(scrum_poker_server::serve(listener, state, async move {
        let _ = stop.await;
    }));
    let endpoint = ServerEndpoint::parse(&format!("http://{addr}")).expect("endpoint");
    TestServer {
        endpoint,
        _shutdown: shutdown,
    }
}

fn join(server: &TestServer, session: &SessionId, identity_file: &Path) -> SessionClient {
    let manager = ConnectionManager::new(ConnectionConfig::default());
    SessionClient::connect(
        &manager,
        &server.endpoint,
        session.clone(),
        IdentityStore::open(identity_file),
    )
    .expect("client")
}

async fn wait_view(
    client: &SessionClient,
    predicate: impl FnMut(&SessionView) -> bool,
) -> SessionView {
    let mut views: watch::Receiver<SessionView> = client.subscribe();
    let view = timeout(WAIT, views.wait_for(predicate))
        .await
        .expect("view in time")
        .expect("client alive")
        .clone();
    view
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<ViewTransition>>>);

impl ViewObserver for Recorder {
    fn on_transition(&mut self, _view: &SessionView, transition: &ViewTransition) {
        self.0.lock().push(transition.clone());
    }
}

#[test_timeout::tokio_timeout_test]
async fn create_and_check_sessions_over_http() {
    let server = start_server().await;
    let api = SessionApi::new(server.endpoint.clone());

    let session = api.create_session().await.expect("create");
    api.check_session(&session).await.expect("known session");

    let unknown = SessionId::from("5f1c2a9e-8d4b-4c3e-9a61-2b7e0f3d4c58");
    match api.check_session(&unknown).await {
        Err(ApiError::NotFound(id)) => assert_eq!(id, unknown),
        other => panic!("expected not found, got {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test]
async fn two_members_vote_reveal_and_agree() {
    let server = start_server().await;
    let api = SessionApi::new(server.endpoint.clone());
    let session = api.create_session().await.expect("create");
    let dir = tempfile::tempdir().expect("tempdir");

    let ann = join(&server, &session, &dir.path().join("ann.toml"));
    let bob = join(&server, &session, &dir.path().join("bob.toml"));
    let recorder = Recorder::default();
    ann.add_observer(Box::new(recorder.clone()));

    wait_view(&ann, |view| view.synchronized && view.members.len() == 2).await;
    wait_view(&bob, |view| view.synchronized && view.members.len() == 2).await;

    assert!(ann.set_display_name("Ann").expect("valid name"));
    assert!(bob.set_display_name("Bob").expect("valid name"));
    assert!(ann.cast_vote(3).expect("known option"));
    assert!(bob.cast_vote(5).expect("known option"));
    assert!(matches!(ann.cast_vote(4), Err(_)));

    let view = wait_view(&ann, |view| view.votes_cast() == 2 && !view.own.pending).await;
    assert_eq!(view.own.vote, Vote::Cast(3));
    assert!(view.members.iter().any(|member| member.display_name == "Bob"));

    assert!(bob.reveal_votes());
    let view = wait_view(&ann, |view| view.votes_visible).await;
    assert_eq!(view.average(), Some(4.0));
    assert_eq!(view.consensus(), None);

    assert!(ann.clear_votes());
    wait_view(&ann, |view| !view.votes_visible && view.votes_cast() == 0).await;
    wait_view(&bob, |view| !view.votes_visible && view.votes_cast() == 0).await;

    assert!(ann.cast_vote(8).expect("known option"));
    assert!(bob.cast_vote(8).expect("known option"));
    wait_view(&ann, |view| view.votes_cast() == 2).await;
    assert!(ann.reveal_votes());
    let view = wait_view(&ann, |view| view.votes_visible).await;
    assert_eq!(view.consensus(), Some(8));

    let seen = recorder.0.lock().clone();
    assert_eq!(seen.first(), Some(&ViewTransition::Synchronized));
    assert!(seen.contains(&ViewTransition::Consensus(8)));
}

#[test_timeout::tokio_timeout_test]
async fn rejoining_with_the_same_identity_resumes_the_member() {
    let server = start_server().await;
    let api = SessionApi::new(server.endpoint.clone());
    let session = api.create_session().await.expect("create");
    let dir = tempfile::tempdir().expect("tempdir");
    let ann_file = dir.path().join("ann.toml");

    let bob = join(&server, &session, &dir.path().join("bob.toml"));
    let ann = join(&server, &session, &ann_file);
    let ann_id = ann.client_id().clone();
    wait_view(&ann, |view| view.synchronized).await;
    ann.set_display_name("Ann").expect("valid name");
    wait_view(&bob, |view| {
        view.member(&ann_id)
            .is_some_and(|member| member.display_name == "Ann" && member.active)
    })
    .await;

    drop(ann);
    wait_view(&bob, |view| {
        view.member(&ann_id).is_some_and(|member| !member.active)
    })
    .await;

    let ann = join(&server, &session, &ann_file);
    assert_eq!(ann.client_id(), &ann_id);
    let view = wait_view(&ann, |view| view.synchronized && view.own.active).await;
    assert_eq!(view.members.len(), 2);
    assert_eq!(view.own.display_name.as_deref(), Some("Ann"));
    wait_view(&bob, |view| {
        view.member(&ann_id).is_some_and(|member| member.active)
    })
    .await;
}
