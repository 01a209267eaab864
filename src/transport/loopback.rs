//! In-process transport for unit tests. Replies are produced locally
//! according to a [`Behavior`] instead of going over the network.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Receiver, SecureTransport};
use crate::Error;

#[derive(Debug, Clone)]
pub enum Behavior {
    Echo,
    Prefix(Vec<u8>),
    /// Echo from another thread after a delay, to whichever receiver is
    /// registered at that time.
    Delayed(Duration),
    Silent,
}

pub struct LoopbackTransport {
    running: AtomicBool,
    behavior: Mutex<Behavior>,
    receiver: Arc<Mutex<Option<Receiver>>>,
    sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
    closed: Mutex<Vec<SocketAddr>>,
    fail_start: bool,
}

impl LoopbackTransport {
    pub fn new(behavior: Behavior) -> Self {
        LoopbackTransport {
            running: AtomicBool::new(false),
            behavior: Mutex::new(behavior),
            receiver: Arc::new(Mutex::new(None)),
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            fail_start: false,
        }
    }

    /// A transport whose `start` fails like an unbindable port.
    pub fn unbindable() -> Self {
        LoopbackTransport {
            fail_start: true,
            ..Self::new(Behavior::Silent)
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    /// Hand `payload` to the registered receiver as if it came from `from`.
    pub fn inject(&self, payload: &[u8], from: SocketAddr) {
        let receiver = self.receiver.lock().clone();
        if let Some(receiver) = receiver {
            receiver(payload, from);
        }
    }

    pub fn sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        self.sent.lock().clone()
    }

    pub fn closed(&self) -> Vec<SocketAddr> {
        self.closed.lock().clone()
    }
}

impl SecureTransport for LoopbackTransport {
    fn start(&self) -> Result<(), Error> {
        if self.fail_start {
            return Err(Error::TransportStart(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "address in use",
            )));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }
        Ok(())
    }

    fn send(&self, payload: &[u8], destination: SocketAddr) -> Result<(), Error> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }
        self.sent
            .lock()
            .push((payload.to_vec(), destination));

        let behavior = self.behavior.lock().clone();
        match behavior {
            Behavior::Echo => self.inject(payload, destination),
            Behavior::Prefix(prefix) => {
                let mut reply = prefix;
                reply.extend_from_slice(payload);
                self.inject(&reply, destination);
            }
            Behavior::Delayed(delay) => {
                let receiver = self.receiver.clone();
                let payload = payload.to_vec();
                thread::spawn(move || {
                    thread::sleep(delay);
                    let receiver = receiver.lock().clone();
                    if let Some(receiver) = receiver {
                        receiver(&payload, destination);
                    }
                });
            }
            Behavior::Silent => {}
        }
        Ok(())
    }

    fn set_receiver(&self, receiver: Receiver) {
        *self.receiver.lock() = Some(receiver);
    }

    fn clear_receiver(&self) {
        *self.receiver.lock() = None;
    }

    fn close(&self, peer: SocketAddr) {
        self.closed.lock().push(peer);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.is_running()
            .then(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000))
    }
}
