use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Interval between pings sent to every open channel.
    pub heartbeat_interval: Duration,
    /// A channel that sends nothing (pongs included) for this long is closed.
    pub read_timeout: Duration,
    /// A session without connections is removed after this long.
    pub session_ttl: Duration,
    pub recycle_interval: Duration,
    pub per_connection_buffer: usize,
    /// Inbound websocket messages larger than this close the channel.
    pub max_message_bytes: usize,
    pub shutdown_grace: Duration,
    /// Built web front-end served for every path the API does not claim.
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            heartbeat_interval: Duration::from_secs(10),
            read_timeout: Duration::from_secs(20),
            session_ttl: Duration::from_secs(3600),
            recycle_interval: Duration::from_secs(30),
            per_connection_buffer: 64,
            max_message_bytes: 1 << 20,
            shutdown_grace: Duration::from_secs(2),
            static_dir: None,
        }
    }
}
