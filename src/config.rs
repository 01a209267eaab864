use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::Error;

/// Default port of the echo target.
pub const DEFAULT_PORT: u16 = 5684;

/// Transport configuration
#[derive(Clone)]
pub struct TransportConfig {
    bind: SocketAddr,
    dtls: Arc<dimpl::Config>,
    max_peers: usize,
    peer_idle_timeout: Duration,
    poll_interval: Duration,
    max_pending: usize,
    recv_buffer: usize,
    accept_inbound: bool,
}

impl TransportConfig {
    /// Create a new configuration builder.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            dtls: None,
            max_peers: 1000,
            peer_idle_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
            max_pending: 16,
            recv_buffer: 2048,
            accept_inbound: true,
        }
    }

    /// Builder preset for a load generating client.
    ///
    /// A client only ever talks to the server it dials, so the peer table is
    /// tiny, idle associations are kept around for long and nobody else may
    /// open one.
    pub fn client() -> TransportConfigBuilder {
        Self::builder()
            .max_peers(2)
            .peer_idle_timeout(Duration::from_secs(300))
            .accept_inbound(false)
    }

    /// Local endpoint to bind.
    #[inline(always)]
    pub fn bind(&self) -> SocketAddr {
        self.bind
    }

    /// DTLS engine configuration shared by all peers.
    #[inline(always)]
    pub fn dtls(&self) -> &Arc<dimpl::Config> {
        &self.dtls
    }

    /// Max number of concurrent peer associations.
    ///
    /// When full, the least recently active peer is evicted.
    #[inline(always)]
    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    /// Associations without traffic for this long are evicted.
    #[inline(always)]
    pub fn peer_idle_timeout(&self) -> Duration {
        self.peer_idle_timeout
    }

    /// How often the worker wakes up to drive DTLS timers.
    #[inline(always)]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Max payloads queued per peer while its handshake is in progress.
    #[inline(always)]
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    /// Size of the datagram receive buffer.
    #[inline(always)]
    pub fn recv_buffer(&self) -> usize {
        self.recv_buffer
    }

    /// Whether unknown addresses may open an association by sending to us.
    ///
    /// When false, only peers we sent to first are served.
    #[inline(always)]
    pub fn accept_inbound(&self) -> bool {
        self.accept_inbound
    }
}

/// Builder for transport configuration.
pub struct TransportConfigBuilder {
    bind: SocketAddr,
    dtls: Option<Arc<dimpl::Config>>,
    max_peers: usize,
    peer_idle_timeout: Duration,
    poll_interval: Duration,
    max_pending: usize,
    recv_buffer: usize,
    accept_inbound: bool,
}

impl TransportConfigBuilder {
    /// Set the local endpoint.
    ///
    /// Defaults to `0.0.0.0:0` (ephemeral port).
    pub fn bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Set the DTLS engine configuration.
    ///
    /// Defaults to `dimpl::Config::default()`.
    pub fn dtls(mut self, dtls: Arc<dimpl::Config>) -> Self {
        self.dtls = Some(dtls);
        self
    }

    /// Defaults to 1000.
    pub fn max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    /// Defaults to 60 seconds.
    pub fn peer_idle_timeout(mut self, timeout: Duration) -> Self {
        self.peer_idle_timeout = timeout;
        self
    }

    /// Defaults to 10 milliseconds.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Defaults to 16.
    pub fn max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Defaults to 2048 bytes.
    pub fn recv_buffer(mut self, size: usize) -> Self {
        self.recv_buffer = size;
        self
    }

    /// Defaults to true.
    pub fn accept_inbound(mut self, accept: bool) -> Self {
        self.accept_inbound = accept;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<TransportConfig, Error> {
        if self.max_peers == 0 {
            return Err(Error::Config("max_peers must be at least 1".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval must be non-zero".into()));
        }
        if self.max_pending == 0 {
            return Err(Error::Config("max_pending must be at least 1".into()));
        }
        if self.recv_buffer < 512 {
            return Err(Error::Config(format!(
                "recv_buffer too small: {}",
                self.recv_buffer
            )));
        }

        Ok(TransportConfig {
            bind: self.bind,
            dtls: self
                .dtls
                .unwrap_or_else(|| Arc::new(dimpl::Config::default())),
            max_peers: self.max_peers,
            peer_idle_timeout: self.peer_idle_timeout,
            poll_interval: self.poll_interval,
            max_pending: self.max_pending,
            recv_buffer: self.recv_buffer,
            accept_inbound: self.accept_inbound,
        })
    }
}

/// Configuration of one virtual client.
#[derive(Clone)]
pub struct ClientConfig {
    server: SocketAddr,
    establish_timeout: Duration,
    success_threshold: Duration,
    transport: TransportConfig,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            server: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            establish_timeout: Duration::from_millis(4000),
            success_threshold: Duration::from_millis(600),
            transport: TransportConfig::client(),
        }
    }

    /// The echo target every exchange is sent to.
    #[inline(always)]
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Wait for the probe exchange, which includes the full handshake.
    #[inline(always)]
    pub fn establish_timeout(&self) -> Duration {
        self.establish_timeout
    }

    /// Wait for each steady state iteration.
    #[inline(always)]
    pub fn success_threshold(&self) -> Duration {
        self.success_threshold
    }

    #[inline(always)]
    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }
}

/// Builder for virtual client configuration.
pub struct ClientConfigBuilder {
    server: SocketAddr,
    establish_timeout: Duration,
    success_threshold: Duration,
    transport: TransportConfigBuilder,
}

impl ClientConfigBuilder {
    /// Defaults to `127.0.0.1:5684`.
    pub fn server(mut self, server: SocketAddr) -> Self {
        self.server = server;
        self
    }

    /// Local endpoint of the client transport.
    ///
    /// Defaults to `0.0.0.0:0` (ephemeral port).
    pub fn local(mut self, local: SocketAddr) -> Self {
        self.transport = self.transport.bind(local);
        self
    }

    /// Defaults to 4000 milliseconds.
    pub fn establish_timeout(mut self, timeout: Duration) -> Self {
        self.establish_timeout = timeout;
        self
    }

    /// Defaults to 600 milliseconds.
    pub fn success_threshold(mut self, threshold: Duration) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Replace the transport settings.
    ///
    /// Defaults to [`TransportConfig::client()`].
    pub fn transport(mut self, transport: TransportConfigBuilder) -> Self {
        self.transport = transport;
        self
    }

    pub fn build(self) -> Result<ClientConfig, Error> {
        if self.establish_timeout.is_zero() {
            return Err(Error::Config("establish_timeout must be non-zero".into()));
        }
        if self.success_threshold.is_zero() {
            return Err(Error::Config("success_threshold must be non-zero".into()));
        }

        Ok(ClientConfig {
            server: self.server,
            establish_timeout: self.establish_timeout,
            success_threshold: self.success_threshold,
            transport: self.transport.build()?,
        })
    }
}
