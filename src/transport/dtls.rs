// Connector threading:
//
// * One worker thread owns the receive side of the UDP socket. It wakes on
//   every datagram, or after `poll_interval`, and then drives the DTLS timers
//   of every peer.
// * `send` runs on the caller's thread. It takes the peer table lock, hands
//   the payload to the peer's engine and writes the resulting records.
// * Application data collected under the lock is handed to the receiver only
//   after the lock is released, so a receiver may call `send` itself.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use dimpl::{Dtls, Output};
use parking_lot::Mutex;

use super::peer::{Peer, PeerTable};
use super::{Receiver, SecureTransport};
use crate::{Credentials, Error, TransportConfig};

/// DTLS over UDP, one association per remote address.
///
/// The side sending first to an address performs the client handshake, an
/// unknown address sending to us gets the server side (unless
/// [`TransportConfig::accept_inbound`] is off).
///
/// Engine failures, including panics, are contained to the peer they happened
/// on. The peer is dropped and the worker carries on.
pub struct DtlsConnector {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    config: TransportConfig,
    credentials: Credentials,
    running: AtomicBool,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    peers: Mutex<PeerTable<Dtls>>,
    receiver: Mutex<Option<Receiver>>,
}

/// Everything produced by polling one engine until it idles.
#[derive(Default)]
struct Drained {
    packets: Vec<Vec<u8>>,
    app_data: Vec<Vec<u8>>,
}

impl DtlsConnector {
    pub fn new(config: TransportConfig, credentials: Credentials) -> Self {
        let peers = PeerTable::new(config.max_peers(), config.peer_idle_timeout());
        DtlsConnector {
            inner: Arc::new(Inner {
                config,
                credentials,
                running: AtomicBool::new(false),
                socket: Mutex::new(None),
                peers: Mutex::new(peers),
                receiver: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Number of peers with live DTLS state.
    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().len()
    }
}

impl SecureTransport for DtlsConnector {
    fn start(&self) -> Result<(), Error> {
        let mut worker = self.worker.lock();
        if self.inner.running.load(Ordering::Acquire) {
            return Err(Error::AlreadyRunning);
        }

        let bind = self.inner.config.bind();
        let socket = UdpSocket::bind(bind).map_err(Error::TransportStart)?;
        socket
            .set_read_timeout(Some(self.inner.config.poll_interval()))
            .map_err(Error::TransportStart)?;
        let local = socket.local_addr().map_err(Error::TransportStart)?;
        let socket = Arc::new(socket);

        *self.inner.socket.lock() = Some(socket.clone());
        self.inner.running.store(true, Ordering::Release);

        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name(format!("dtls-{}", local))
            .spawn(move || inner.run(socket));

        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(e) => {
                self.inner.running.store(false, Ordering::Release);
                *self.inner.socket.lock() = None;
                return Err(Error::TransportStart(e));
            }
        }

        info!(
            "DTLS connector started on {} (fingerprint {})",
            local,
            self.inner.credentials.fingerprint_str()
        );
        Ok(())
    }

    fn send(&self, payload: &[u8], destination: SocketAddr) -> Result<(), Error> {
        self.inner.send(payload, destination)
    }

    fn set_receiver(&self, receiver: Receiver) {
        *self.inner.receiver.lock() = Some(receiver);
    }

    fn clear_receiver(&self) {
        *self.inner.receiver.lock() = None;
    }

    fn close(&self, peer: SocketAddr) {
        // The engine has no close_notify, the peer expires the association.
        if self.inner.peers.lock().remove(&peer).is_some() {
            debug!("Closed DTLS association with {}", peer);
        }
    }

    fn stop(&self) {
        let handle = self.worker.lock().take();
        let was_running = self.inner.running.swap(false, Ordering::AcqRel);

        if let Some(handle) = handle {
            // A receiver stopping its own transport runs on the worker.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("DTLS worker thread panicked");
            }
        }

        let local = self
            .inner
            .socket
            .lock()
            .take()
            .and_then(|s| s.local_addr().ok());
        self.inner.peers.lock().clear();

        if was_running {
            if let Some(local) = local {
                info!("DTLS connector on {} stopped", local);
            }
        }
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .socket
            .lock()
            .as_ref()
            .and_then(|s| s.local_addr().ok())
    }
}

impl Drop for DtlsConnector {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn socket(&self) -> Result<Arc<UdpSocket>, Error> {
        if !self.running.load(Ordering::Acquire) {
            return Err(Error::NotRunning);
        }
        self.socket.lock().clone().ok_or(Error::NotRunning)
    }

    fn new_session(&self, active: bool) -> Dtls {
        let (certificate, private_key) = self.credentials.to_der_pair();
        let mut dtls = Dtls::new(self.config.dtls().clone(), certificate, private_key);
        dtls.set_active(active);
        dtls
    }

    fn send(&self, payload: &[u8], destination: SocketAddr) -> Result<(), Error> {
        let socket = self.socket()?;
        let now = Instant::now();
        let mut buf = vec![0; self.config.recv_buffer()];
        let mut drained = Drained::default();

        {
            let mut peers = self.peers.lock();

            if peers.get_mut(&destination).is_none() {
                debug!("Starting DTLS handshake with {}", destination);
                if let Some(evicted) = peers.insert(destination, self.new_session(true), now) {
                    debug!("Evicted DTLS association with {}", evicted);
                }
            }

            let Some(peer) = peers.get_mut(&destination) else {
                return Err(Error::NotRunning);
            };
            peer.touch(now);

            let max_pending = self.config.max_pending();
            let result = guarded(destination, || {
                submit(&mut *peer, payload, destination, now, max_pending)?;
                drive(&mut *peer, destination, &mut buf, &mut drained)
            });

            if let Err(e) = result {
                debug!("Dropping DTLS association: {}", e);
                peers.remove(&destination);
                return Err(e);
            }

            write_packets(&socket, destination, &drained.packets)?;
        }

        self.deliver(destination, drained.app_data);
        Ok(())
    }

    fn run(&self, socket: Arc<UdpSocket>) {
        let mut buf = vec![0; self.config.recv_buffer()];
        let mut out = vec![0; self.config.recv_buffer()];

        while self.running.load(Ordering::Acquire) {
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => self.handle_datagram(&socket, &buf[..n], from, &mut out),
                Err(e) if is_poll_timeout(&e) => {}
                Err(e) => {
                    if self.running.load(Ordering::Acquire) {
                        warn!("Receive failed: {}", e);
                        thread::sleep(self.config.poll_interval());
                    }
                }
            }

            self.handle_timeouts(&socket, &mut out);
        }

        trace!("DTLS worker exiting");
    }

    fn handle_datagram(&self, socket: &UdpSocket, packet: &[u8], from: SocketAddr, out: &mut [u8]) {
        let now = Instant::now();
        let mut drained = Drained::default();

        {
            let mut peers = self.peers.lock();

            let is_new = peers.get_mut(&from).is_none();
            if is_new {
                if !self.config.accept_inbound() {
                    trace!("Ignoring {} bytes from unknown {}", packet.len(), from);
                    return;
                }
                debug!("New DTLS association from {}", from);
                if let Some(evicted) = peers.insert(from, self.new_session(false), now) {
                    debug!("Evicted DTLS association with {}", evicted);
                }
            }

            let Some(peer) = peers.get_mut(&from) else {
                return;
            };
            peer.touch(now);

            let result = guarded(from, || {
                // The engine needs a clock before the first packet.
                if is_new {
                    peer.session
                        .handle_timeout(now)
                        .map_err(|e| Error::dtls(from, e))?;
                }

                if let Err(e) = peer.session.handle_packet(packet) {
                    if !peer.connected {
                        return Err(Error::dtls(from, e));
                    }
                    trace!("Dropping record from {}: {:?}", from, e);
                }

                drive(&mut *peer, from, &mut *out, &mut drained)
            });

            if let Err(e) = result {
                debug!("Dropping DTLS association: {}", e);
                peers.remove(&from);
                return;
            }

            if let Err(e) = write_packets(socket, from, &drained.packets) {
                warn!("{}", e);
            }
        }

        self.deliver(from, drained.app_data);
    }

    fn handle_timeouts(&self, socket: &UdpSocket, out: &mut [u8]) {
        let now = Instant::now();
        let mut delivered = Vec::new();

        {
            let mut peers = self.peers.lock();

            for addr in peers.evict_idle(now) {
                debug!("DTLS association with {} expired", addr);
            }

            let mut failed = Vec::new();
            for (addr, peer) in peers.iter_mut() {
                let addr = *addr;
                let mut drained = Drained::default();
                let result = guarded(addr, || {
                    peer.session
                        .handle_timeout(now)
                        .map_err(|e| Error::dtls(addr, e))?;
                    drive(&mut *peer, addr, &mut *out, &mut drained)
                });

                if let Err(e) = result {
                    debug!("Dropping DTLS association: {}", e);
                    failed.push(addr);
                    continue;
                }

                if let Err(e) = write_packets(socket, addr, &drained.packets) {
                    warn!("{}", e);
                }
                if !drained.app_data.is_empty() {
                    delivered.push((addr, drained.app_data));
                }
            }

            for addr in failed {
                peers.remove(&addr);
            }
        }

        for (addr, app_data) in delivered {
            self.deliver(addr, app_data);
        }
    }

    fn deliver(&self, from: SocketAddr, app_data: Vec<Vec<u8>>) {
        if app_data.is_empty() {
            return;
        }

        let receiver = self.receiver.lock().clone();
        let Some(receiver) = receiver else {
            trace!("No receiver, dropping {} payloads from {}", app_data.len(), from);
            return;
        };

        for data in app_data {
            trace!("Received {} bytes from {}", data.len(), from);
            if panic::catch_unwind(AssertUnwindSafe(|| receiver(&data, from))).is_err() {
                warn!("Receiver panicked on {} bytes from {}", data.len(), from);
            }
        }
    }
}

/// Hand a payload to the engine, or queue it while handshaking.
fn submit(
    peer: &mut Peer<Dtls>,
    payload: &[u8],
    addr: SocketAddr,
    now: Instant,
    max_pending: usize,
) -> Result<(), Error> {
    if peer.connected {
        peer.session
            .send_application_data(payload)
            .map_err(|e| Error::dtls(addr, e))?;
        return Ok(());
    }

    if peer.queue(payload, max_pending) {
        warn!("Handshake with {} pending, dropped oldest queued payload", addr);
    }

    // Kicks off the first flight of a fresh client.
    peer.session
        .handle_timeout(now)
        .map_err(|e| Error::dtls(addr, e))?;
    Ok(())
}

/// Run engine work for one peer. A panic becomes an error for that peer.
fn guarded(addr: SocketAddr, work: impl FnOnce() -> Result<(), Error>) -> Result<(), Error> {
    panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|_| {
        Err(Error::Dtls {
            peer: addr,
            reason: "engine panicked".into(),
        })
    })
}

/// Poll the engine until it has nothing more to say.
///
/// Flushes the queued payloads once the handshake completes.
fn drive(
    peer: &mut Peer<Dtls>,
    addr: SocketAddr,
    buf: &mut [u8],
    drained: &mut Drained,
) -> Result<(), Error> {
    loop {
        loop {
            match peer.session.poll_output(buf) {
                Output::Packet(p) => drained.packets.push(p.to_vec()),
                Output::Connected => {
                    if !peer.connected {
                        debug!("DTLS handshake with {} complete", addr);
                        peer.connected = true;
                    }
                }
                Output::ApplicationData(data) => drained.app_data.push(data.to_vec()),
                Output::Timeout(_) => break,
                _ => {}
            }
        }

        if !peer.connected {
            return Ok(());
        }

        let pending = peer.take_pending();
        if pending.is_empty() {
            return Ok(());
        }

        for payload in pending {
            peer.session
                .send_application_data(&payload)
                .map_err(|e| Error::dtls(addr, e))?;
        }
    }
}

fn write_packets(socket: &UdpSocket, to: SocketAddr, packets: &[Vec<u8>]) -> Result<(), Error> {
    for packet in packets {
        socket.send_to(packet, to)?;
    }
    Ok(())
}

fn is_poll_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
