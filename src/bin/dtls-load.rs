//! Load generator: many virtual clients, each with one DTLS session, each
//! doing a fixed number of timed echo exchanges.
//!
//! ```bash
//! dtls-load --server-host localhost --clients 50 --iterations 1000
//! ```

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use dimpl_loadgen::{ClientConfig, Credentials, Error, Summary, VirtualClient};

/// DTLS load generator
#[derive(Parser, Debug)]
#[command(name = "dtls-load")]
#[command(version, about, long_about = None)]
struct Args {
    /// Host of the echo target
    #[arg(long, default_value = "localhost")]
    server_host: String,

    /// Port of the echo target
    #[arg(long, default_value_t = dimpl_loadgen::DEFAULT_PORT)]
    server_port: u16,

    /// First local port. Client n binds this plus n. 0 for ephemeral ports.
    #[arg(long, default_value = "0")]
    local_port: u16,

    /// Number of virtual clients
    #[arg(short, long, default_value = "1")]
    clients: u16,

    /// Exchanges per virtual client
    #[arg(short, long, default_value = "100")]
    iterations: u32,

    /// Per exchange threshold in milliseconds
    #[arg(long, default_value = "600")]
    success_threshold: u64,

    /// Threshold of the establishing exchange in milliseconds
    #[arg(long, default_value = "4000")]
    establish_timeout: u64,
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, Error> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::Config(format!("could not resolve {}", host)))
}

fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server = resolve(&args.server_host, args.server_port)?;
    let credentials = Credentials::self_signed("dtls-load")?;

    // Request numbers are unique across all clients.
    let request_counter = Arc::new(AtomicU32::new(1));
    let started = Instant::now();

    let mut handles = Vec::with_capacity(args.clients as usize);
    for n in 0..args.clients {
        let local_port = match args.local_port {
            0 => 0,
            p => p.checked_add(n).ok_or_else(|| {
                Error::Config(format!("local port {} + {} out of range", p, n))
            })?,
        };

        let config = ClientConfig::builder()
            .server(server)
            .local(SocketAddr::new([0, 0, 0, 0].into(), local_port))
            .establish_timeout(Duration::from_millis(args.establish_timeout))
            .success_threshold(Duration::from_millis(args.success_threshold))
            .build()?;

        let credentials = credentials.clone();
        let request_counter = request_counter.clone();
        let iterations = args.iterations;

        handles.push(thread::spawn(move || {
            let mut summary = Summary::default();
            let mut client = VirtualClient::dtls(config, credentials);

            let setup = client.setup();
            if setup.is_ok() {
                for _ in 0..iterations {
                    let request_no = request_counter.fetch_add(1, Ordering::Relaxed);
                    summary.record(&client.run_iteration(request_no));
                }
            } else {
                log::warn!("Virtual client {} setup failed: {:?}", n, setup);
            }

            client.teardown();
            (setup.is_ok(), summary)
        }));
    }

    let mut total = Summary::default();
    let mut setup_failures = 0;
    for handle in handles {
        match handle.join() {
            Ok((true, summary)) => total.merge(summary),
            Ok((false, _)) => setup_failures += 1,
            Err(_) => {
                log::error!("Virtual client thread panicked");
                setup_failures += 1;
            }
        }
    }

    println!(
        "{} clients ({} failed setup) in {:?}: {}",
        args.clients,
        setup_failures,
        started.elapsed(),
        total
    );

    Ok(())
}
