use std::io;
use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Could not start transport: {0}")]
    TransportStart(#[source] io::Error),

    #[error("Transport is already running")]
    AlreadyRunning,

    #[error("Transport is not running")]
    NotRunning,

    #[error("Socket error: {0}")]
    Io(#[from] io::Error),

    #[error("DTLS failure with {peer}: {reason}")]
    Dtls { peer: SocketAddr, reason: String },

    #[error("Inbound datagram without usable source address: {0}")]
    MalformedInbound(SocketAddr),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Credentials: {0}")]
    Credentials(String),
}

impl Error {
    pub(crate) fn dtls(peer: SocketAddr, reason: impl std::fmt::Debug) -> Self {
        Error::Dtls {
            peer,
            reason: format!("{:?}", reason),
        }
    }
}
