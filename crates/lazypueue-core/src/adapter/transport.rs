use crate::errors::{ConnectionError, DaemonError};
use async_trait::async_trait;
use pueue_lib::message::request::Request;
use pueue_lib::message::response::Response;

/// One established session with the daemon.
///
/// Calls are strictly sequential: a request is answered by exactly the next
/// response on the stream. A call that times out may leave its answer on the
/// wire, so the supervisor drops the session instead of reusing it.
#[async_trait]
pub trait DaemonTransport: Send {
    async fn call(&mut self, request: Request) -> Result<Response, DaemonError>;
}

/// Opens fresh sessions. Called once at startup and again for every
/// reconnect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: DaemonTransport + 'static;

    async fn connect(&self) -> Result<Self::Transport, ConnectionError>;
}
