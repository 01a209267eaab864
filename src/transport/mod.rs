//! Secure datagram transport.
//!
//! [`SecureTransport`] is the boundary between the load harness and the DTLS
//! machinery. It is connectionless: payloads go out to an address, and every
//! inbound payload is handed to the single registered [`Receiver`] together
//! with the address it came from.
//!
//! [`DtlsConnector`] is the implementation over UDP and the `dimpl` engine.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::Error;

mod dtls;
mod peer;

#[cfg(test)]
pub(crate) mod loopback;

pub use dtls::DtlsConnector;

/// Callback invoked with every inbound application payload and its source.
///
/// Runs on the transport's worker thread.
pub type Receiver = Arc<dyn Fn(&[u8], SocketAddr) + Send + Sync>;

pub trait SecureTransport: Send + Sync {
    /// Bind the local endpoint and start processing datagrams.
    fn start(&self) -> Result<(), Error>;

    /// Send a payload to `destination`. Fire-and-forget.
    ///
    /// Performs a handshake first if there is no association with the
    /// destination yet.
    fn send(&self, payload: &[u8], destination: SocketAddr) -> Result<(), Error>;

    /// Register the receiver, replacing (and dropping) any previous one.
    fn set_receiver(&self, receiver: Receiver);

    /// Empty the receiver slot. Inbound payloads are dropped until a new
    /// receiver is registered.
    fn clear_receiver(&self);

    /// End the association with `peer`. No-op for unknown peers.
    fn close(&self, peer: SocketAddr);

    /// Release the local endpoint. Idempotent.
    fn stop(&self);

    fn is_running(&self) -> bool;

    /// Bound local address, while running.
    fn local_addr(&self) -> Option<SocketAddr>;
}

impl<T: SecureTransport + ?Sized> SecureTransport for Arc<T> {
    fn start(&self) -> Result<(), Error> {
        (**self).start()
    }

    fn send(&self, payload: &[u8], destination: SocketAddr) -> Result<(), Error> {
        (**self).send(payload, destination)
    }

    fn set_receiver(&self, receiver: Receiver) {
        (**self).set_receiver(receiver)
    }

    fn clear_receiver(&self) {
        (**self).clear_receiver()
    }

    fn close(&self, peer: SocketAddr) {
        (**self).close(peer)
    }

    fn stop(&self) {
        (**self).stop()
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        (**self).local_addr()
    }
}
