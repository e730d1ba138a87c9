use super::transport::{Connector, DaemonTransport};
use crate::config::ClientConfig;
use crate::errors::{ConnectionError, DaemonError};
use async_trait::async_trait;
use pueue_lib::message::request::Request;
use pueue_lib::message::response::Response;
use pueue_lib::network::client::Client;
use pueue_lib::network::protocol::ConnectionSettings;
use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Connects to pueued over its Unix socket with `pueue-lib`'s client.
#[derive(Debug, Clone)]
pub struct PueueConnector {
    socket: PathBuf,
    secret: Option<PathBuf>,
    connect_timeout: Duration,
}

impl PueueConnector {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            socket: config.uri.path().to_path_buf(),
            secret: config.secret_path.clone(),
            connect_timeout: config.connect_timeout,
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// A missing or unreadable secret is sent as empty; a daemon that wants
    /// one then fails the handshake with a readable reason.
    fn secret(&self) -> Vec<u8> {
        let Some(path) = self.secret.as_deref() else {
            return Vec::new();
        };
        match std::fs::read(path) {
            Ok(secret) => secret,
            Err(err) => {
                debug!(event = "secret_unreadable", path = %path.display(), error = %err);
                Vec::new()
            }
        }
    }

    fn classify(&self, err: &(dyn StdError + 'static)) -> ConnectionError {
        match io_cause(err) {
            Some(cause) => match ConnectionError::from_io(self.socket.clone(), cause) {
                ConnectionError::Io(_) => ConnectionError::Handshake(err.to_string()),
                mapped => mapped,
            },
            None => ConnectionError::Handshake(err.to_string()),
        }
    }
}

#[async_trait]
impl Connector for PueueConnector {
    type Transport = PueueConnection;

    async fn connect(&self) -> Result<PueueConnection, ConnectionError> {
        if !self.socket.exists() {
            return Err(ConnectionError::NotFound(self.socket.clone()));
        }
        let settings = ConnectionSettings::UnixSocket {
            path: self.socket.clone(),
        };
        let secret = self.secret();
        let connecting = Client::new(settings, &secret, false);
        match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(Ok(client)) => Ok(PueueConnection { client }),
            Ok(Err(err)) => Err(self.classify(&err)),
            Err(_) => Err(ConnectionError::Timeout(self.connect_timeout)),
        }
    }
}

/// Walk the source chain down to the socket error, if there is one.
fn io_cause<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a io::Error> {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<io::Error>() {
            return Some(io);
        }
        current = err.source();
    }
    None
}

pub struct PueueConnection {
    client: Client,
}

#[async_trait]
impl DaemonTransport for PueueConnection {
    async fn call(&mut self, request: Request) -> Result<Response, DaemonError> {
        self.client.send_request(request).await.map_err(|err| {
            debug!(event = "daemon_send_failed", error = %err);
            DaemonError::Disconnected
        })?;
        self.client.receive_response().await.map_err(|err| {
            debug!(event = "daemon_receive_failed", error = %err);
            // A socket failure ends the session; anything else is a bad frame.
            match io_cause(&err) {
                Some(_) => DaemonError::Disconnected,
                None => DaemonError::Malformed(err.to_string()),
            }
        })
    }
}
