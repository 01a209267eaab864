//! Load generator and echo target for DTLS over UDP.
//!
//! A load run consists of many virtual clients. Each one holds a single long
//! lived DTLS session to an echo target and repeatedly sends a numbered
//! payload, blocking until the echo comes back or a threshold passes:
//!
//! ```text
//! VirtualClient -> CorrelationBridge -> SecureTransport::send
//!                                           |
//!                                      (network)
//!                                           |
//!                                      EchoResponder
//!                                           |
//!                                      (network)
//!                                           |
//! VirtualClient <- CorrelationBridge <- Receiver callback
//! ```
//!
//! The DTLS work is done by the sans-IO [`dimpl`] engine, driven over a UDP
//! socket by [`DtlsConnector`].
//!
//! Replies must be byte identical to the request to count as a success. An
//! echo target in [`EchoMode::Prefix`] mode therefore produces mismatches.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

mod bridge;
pub use bridge::{CorrelationBridge, Interrupter};

mod certificate;
pub use certificate::{format_fingerprint, Credentials};

mod config;
pub use config::{ClientConfig, ClientConfigBuilder, DEFAULT_PORT};
pub use config::{TransportConfig, TransportConfigBuilder};

mod driver;
pub use driver::{decode_request, encode_request, State, VirtualClient, PROBE_PAYLOAD};

mod error;
pub use error::Error;

mod exchange;
pub use exchange::{ExchangeResult, PendingExchange};

mod responder;
pub use responder::{respond, EchoMode, EchoResponder};

mod sample;
pub use sample::{Outcome, SampleResult, SetupOutcome, Summary};

pub mod transport;
pub use transport::{DtlsConnector, Receiver, SecureTransport};
