//! Shared helpers for loopback integration tests.

#![allow(unused)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dimpl_loadgen::{
    ClientConfig, CorrelationBridge, Credentials, DtlsConnector, EchoMode, EchoResponder,
    SecureTransport, TransportConfig,
};

pub fn localhost() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Echo target on an ephemeral loopback port.
pub fn start_echo(mode: EchoMode) -> EchoResponder<DtlsConnector> {
    let config = TransportConfig::builder()
        .bind(localhost())
        .build()
        .expect("echo config");
    let credentials = Credentials::self_signed("echo").expect("echo credentials");
    let transport = Arc::new(DtlsConnector::new(config, credentials));
    EchoResponder::start(transport, mode).expect("start echo")
}

pub fn echo_addr(echo: &EchoResponder<DtlsConnector>) -> SocketAddr {
    echo.local_addr().expect("echo is running")
}

/// A started client transport wrapped in a bridge.
pub fn client_bridge() -> CorrelationBridge<DtlsConnector> {
    let config = TransportConfig::client()
        .bind(localhost())
        .build()
        .expect("client config");
    let credentials = Credentials::self_signed("client").expect("client credentials");
    let transport = DtlsConnector::new(config, credentials);
    transport.start().expect("start client");
    CorrelationBridge::new(transport)
}

pub fn client_config(server: SocketAddr) -> ClientConfig {
    ClientConfig::builder()
        .server(server)
        .local(localhost())
        .establish_timeout(Duration::from_millis(4000))
        .success_threshold(Duration::from_millis(1000))
        .build()
        .expect("client config")
}
