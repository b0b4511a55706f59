use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

/// What the transport reports about one open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    /// Traffic that carries no payload (ping/pong); proves liveness.
    Activity,
    Closed(Option<String>),
}

/// One open bidirectional channel. Dropping `outbound` closes it.
pub struct Channel {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The server answered the upgrade with a non-101 status.
    #[error("server rejected the channel with status {0}")]
    Rejected(u16),
    #[error("server unreachable: {0}")]
    Unreachable(String),
}

impl ConnectError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectError::Rejected(_))
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Channel, ConnectError>;
}

/// Websocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Channel, ConnectError> {
        let (stream, _) = connect_async(url.as_str()).await.map_err(classify)?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(stream, outbound_rx, inbound_tx));

        Ok(Channel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

fn classify(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Http(response) => ConnectError::Rejected(response.status().as_u16()),
        other => ConnectError::Unreachable(other.to_string()),
    }
}

async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(text) => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        let _ = inbound.send(TransportEvent::Closed(Some(err.to_string())));
                        break;
                    }
                }
                None => {
                    debug!("outbound side dropped; closing websocket");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            message = source.next() => {
                let event = match message {
                    Some(Ok(Message::Text(text))) => TransportEvent::Frame(text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(err) => {
                            warn!(error = %err, "dropping non utf-8 binary frame");
                            TransportEvent::Activity
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                        TransportEvent::Activity
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let _ = inbound.send(TransportEvent::Closed(
                            frame.map(|f| f.reason.to_string()),
                        ));
                        break;
                    }
                    Some(Err(err)) => {
                        let _ = inbound.send(TransportEvent::Closed(Some(err.to_string())));
                        break;
                    }
                    None => {
                        let _ = inbound.send(TransportEvent::Closed(None));
                        break;
                    }
                };
                if inbound.send(event).is_err() {
                    break;
                }
            }
        }
    }
}
