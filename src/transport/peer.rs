use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// State kept for one remote address.
pub(crate) struct Peer<S> {
    pub session: S,

    /// Set once the handshake completed.
    pub connected: bool,

    /// Application payloads waiting for the handshake to complete.
    pending: VecDeque<Vec<u8>>,

    last_active: Instant,
}

impl<S> Peer<S> {
    fn new(session: S, now: Instant) -> Self {
        Peer {
            session,
            connected: false,
            pending: VecDeque::new(),
            last_active: now,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_active = now;
    }

    /// Queue a payload until the handshake is done.
    ///
    /// Returns true if the oldest queued payload had to be dropped.
    pub fn queue(&mut self, payload: &[u8], max_pending: usize) -> bool {
        let mut dropped = false;
        while self.pending.len() >= max_pending {
            self.pending.pop_front();
            dropped = true;
        }
        self.pending.push_back(payload.to_vec());
        dropped
    }

    pub fn take_pending(&mut self) -> VecDeque<Vec<u8>> {
        std::mem::take(&mut self.pending)
    }
}

/// Peers keyed by remote address, bounded in size and idle time.
pub(crate) struct PeerTable<S> {
    peers: HashMap<SocketAddr, Peer<S>>,
    max_peers: usize,
    idle_timeout: Duration,
}

impl<S> PeerTable<S> {
    pub fn new(max_peers: usize, idle_timeout: Duration) -> Self {
        PeerTable {
            peers: HashMap::new(),
            max_peers,
            idle_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut Peer<S>> {
        self.peers.get_mut(addr)
    }

    /// Insert a fresh peer, replacing any existing one for `addr`.
    ///
    /// Returns the address of the peer evicted to make room, if any.
    pub fn insert(&mut self, addr: SocketAddr, session: S, now: Instant) -> Option<SocketAddr> {
        let mut evicted = None;

        if !self.peers.contains_key(&addr) && self.peers.len() >= self.max_peers {
            let lru = self
                .peers
                .iter()
                .min_by_key(|(_, p)| p.last_active)
                .map(|(a, _)| *a);

            if let Some(lru) = lru {
                self.peers.remove(&lru);
                evicted = Some(lru);
            }
        }

        self.peers.insert(addr, Peer::new(session, now));
        evicted
    }

    pub fn remove(&mut self, addr: &SocketAddr) -> Option<Peer<S>> {
        self.peers.remove(addr)
    }

    /// Drop every peer without traffic within the idle timeout.
    pub fn evict_idle(&mut self, now: Instant) -> Vec<SocketAddr> {
        let idle_timeout = self.idle_timeout;
        let expired: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.last_active) > idle_timeout)
            .map(|(a, _)| *a)
            .collect();

        for addr in &expired {
            self.peers.remove(addr);
        }

        expired
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&SocketAddr, &mut Peer<S>)> {
        self.peers.iter_mut()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
