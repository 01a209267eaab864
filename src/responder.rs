//! Echo target for the load generator.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::transport::SecureTransport;
use crate::Error;

/// How the responder derives a reply from a request.
///
/// Either way the reply is a pure function of the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoMode {
    /// Reply with the request bytes unchanged.
    Verbatim,
    /// Reply with a fixed marker followed by the request bytes.
    Prefix(Vec<u8>),
}

impl EchoMode {
    /// Prefix mode with the `"ACK: "` marker.
    pub fn ack() -> Self {
        EchoMode::Prefix(b"ACK: ".to_vec())
    }

    pub fn reply(&self, request: &[u8]) -> Vec<u8> {
        match self {
            EchoMode::Verbatim => request.to_vec(),
            EchoMode::Prefix(prefix) => {
                let mut reply = Vec::with_capacity(prefix.len() + request.len());
                reply.extend_from_slice(prefix);
                reply.extend_from_slice(request);
                reply
            }
        }
    }
}

/// Answer one inbound datagram, addressed to exactly where it came from.
///
/// Datagrams without a usable source (unspecified address or port 0) are
/// rejected with [`Error::MalformedInbound`] and nothing is sent.
pub fn respond<T: SecureTransport + ?Sized>(
    transport: &T,
    mode: &EchoMode,
    request: &[u8],
    source: SocketAddr,
) -> Result<(), Error> {
    if source.ip().is_unspecified() || source.port() == 0 {
        return Err(Error::MalformedInbound(source));
    }

    transport.send(&mode.reply(request), source)
}

/// A running echo target.
///
/// Owns the transport. Dropping the responder stops it.
pub struct EchoResponder<T: SecureTransport> {
    transport: Arc<T>,
    mode: EchoMode,
}

impl<T: SecureTransport + 'static> EchoResponder<T> {
    /// Register as the transport's receiver and start the transport.
    pub fn start(transport: Arc<T>, mode: EchoMode) -> Result<Self, Error> {
        // Weak, the transport holds the receiver.
        let weak = Arc::downgrade(&transport);
        let reply_mode = mode.clone();

        transport.set_receiver(Arc::new(move |request: &[u8], source: SocketAddr| {
            let Some(transport) = weak.upgrade() else {
                return;
            };

            match respond(&*transport, &reply_mode, request, source) {
                Ok(()) => trace!("Echoed {} bytes to {}", request.len(), source),
                Err(Error::MalformedInbound(_)) => {
                    warn!("Received message without sender address, discarding")
                }
                Err(e) => warn!("Reply to {} failed: {}", source, e),
            }
        }));

        if let Err(e) = transport.start() {
            transport.clear_receiver();
            return Err(e);
        }

        info!("Echo responder running in {:?} mode", mode);
        Ok(EchoResponder { transport, mode })
    }

    pub fn mode(&self) -> &EchoMode {
        &self.mode
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Stop answering. Idempotent.
    pub fn stop(&self) {
        self.transport.clear_receiver();
        self.transport.stop();
    }
}

impl<T: SecureTransport> Drop for EchoResponder<T> {
    fn drop(&mut self) {
        self.transport.clear_receiver();
        self.transport.stop();
    }
}
