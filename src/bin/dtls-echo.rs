//! Echo target for `dtls-load`.
//!
//! ```bash
//! RUST_LOG=debug dtls-echo --port 5684 --mode ack
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dimpl_loadgen::{Credentials, DtlsConnector, EchoMode, EchoResponder, Error, TransportConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Reply with the request unchanged
    Verbatim,
    /// Reply with "ACK: " followed by the request
    Ack,
}

/// DTLS echo target
#[derive(Parser, Debug)]
#[command(name = "dtls-echo")]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = dimpl_loadgen::DEFAULT_PORT)]
    port: u16,

    /// How replies are derived from requests
    #[arg(short, long, value_enum, default_value = "verbatim")]
    mode: Mode,

    /// Max concurrent client associations
    #[arg(long, default_value = "1000")]
    max_peers: usize,

    /// Seconds an idle association is kept
    #[arg(long, default_value = "60")]
    idle_timeout: u64,
}

fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = TransportConfig::builder()
        .bind(SocketAddr::new(args.host, args.port))
        .max_peers(args.max_peers)
        .peer_idle_timeout(Duration::from_secs(args.idle_timeout))
        .build()?;

    let mode = match args.mode {
        Mode::Verbatim => EchoMode::Verbatim,
        Mode::Ack => EchoMode::ack(),
    };

    let credentials = Credentials::self_signed("dtls-echo")?;
    let transport = Arc::new(DtlsConnector::new(config, credentials));
    let responder = EchoResponder::start(transport, mode)?;

    log::info!(
        "Echoing on {:?}, stop with Ctrl-C",
        responder.local_addr()
    );

    loop {
        thread::park();
    }
}
