// Virtual client lifecycle:
//
//   Uninitialized --setup--> Established --run_iteration--> Iterating (repeats)
//         |                                                      |
//         +--setup fails--> Failed                               |
//                                                                v
//   any state ------------------------teardown-----------------> Closed
//
// Setup starts the transport and sends a probe through the bridge with the
// generous establish timeout, since the first exchange carries the handshake.
// A failed probe stops the transport. There is no retry.

use std::net::SocketAddr;

use crate::bridge::{CorrelationBridge, Interrupter};
use crate::exchange::ExchangeResult;
use crate::sample::{SampleResult, SetupOutcome};
use crate::transport::{DtlsConnector, SecureTransport};
use crate::{ClientConfig, Credentials};

/// Payload of the establishing exchange.
pub const PROBE_PAYLOAD: [u8; 1] = [0x01];

/// Request payload: the request number as 32 bit big endian.
pub fn encode_request(request_no: u32) -> [u8; 4] {
    request_no.to_be_bytes()
}

pub fn decode_request(payload: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = payload.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Established,
    Iterating,
    /// Setup failed. Terminal until teardown.
    Failed(String),
    Closed,
}

/// One simulated user with one long lived secure session to the server.
pub struct VirtualClient<T: SecureTransport> {
    config: ClientConfig,
    state: State,
    session: Option<CorrelationBridge<T>>,
    interrupter: Interrupter,
}

impl VirtualClient<DtlsConnector> {
    /// Virtual client over a [`DtlsConnector`] configured from `config`.
    pub fn dtls(config: ClientConfig, credentials: Credentials) -> Self {
        let transport = DtlsConnector::new(config.transport().clone(), credentials);
        VirtualClient::new(config, transport)
    }
}

impl<T: SecureTransport> VirtualClient<T> {
    pub fn new(config: ClientConfig, transport: T) -> Self {
        let session = CorrelationBridge::new(transport);
        let interrupter = session.interrupter();
        VirtualClient {
            config,
            state: State::Uninitialized,
            session: Some(session),
            interrupter,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Interrupts whatever exchange this client is waiting for.
    pub fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session
            .as_ref()
            .and_then(|s| s.transport().local_addr())
    }

    /// Start the transport and establish the secure session.
    pub fn setup(&mut self) -> SetupOutcome {
        match &self.state {
            State::Uninitialized => {}
            State::Established | State::Iterating => return SetupOutcome::Ok,
            other => return SetupOutcome::Failed(format!("cannot set up in state {:?}", other)),
        }

        let server = self.config.server();
        let timeout = self.config.establish_timeout();

        let Some(session) = self.session.as_mut() else {
            return SetupOutcome::Failed("no session".into());
        };

        if let Err(e) = session.transport().start() {
            error!("{}", e);
            let reason = e.to_string();
            self.state = State::Failed(reason.clone());
            return SetupOutcome::Failed(reason);
        }

        let local = session.transport().local_addr();
        let reason = match session.send_and_await(&PROBE_PAYLOAD, server, timeout) {
            Ok(ExchangeResult::Success { elapsed, .. }) => {
                info!(
                    "Established secure session from {:?} to {} in {:?}",
                    local, server, elapsed
                );
                self.state = State::Established;
                return SetupOutcome::Ok;
            }
            Ok(ExchangeResult::Mismatch { response, .. }) => {
                format!("Unexpected probe reply of {} bytes", response.len())
            }
            Ok(ExchangeResult::Timeout { .. }) => {
                format!("Timeout after {} ms", timeout.as_millis())
            }
            Ok(ExchangeResult::Interrupted) => "Interrupted".to_string(),
            Err(e) => e.to_string(),
        };

        session.transport().stop();
        info!(
            "Could not establish secure session from {:?} to {}: {}",
            local, server, reason
        );
        self.state = State::Failed(reason.clone());
        SetupOutcome::Failed(reason)
    }

    /// One timed request/response iteration.
    ///
    /// Never fails. Problems are reported in the returned sample.
    pub fn run_iteration(&mut self, request_no: u32) -> SampleResult {
        let server = self.config.server();
        let threshold = self.config.success_threshold();
        let mut sample = SampleResult::new(request_no, server);

        if !matches!(self.state, State::Established | State::Iterating) {
            sample.fail("not established");
            return sample;
        }
        let Some(session) = self.session.as_mut() else {
            sample.fail("not established");
            return sample;
        };
        self.state = State::Iterating;

        match session.send_and_await(&encode_request(request_no), server, threshold) {
            Ok(result) => sample.record(&result, threshold),
            Err(e) => sample.fail(e),
        }

        debug!(
            "{} -> {} in {:?}",
            sample.label, sample.response_message, sample.elapsed
        );
        sample
    }

    /// Close the session and stop the transport. Idempotent.
    pub fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            let transport = session.transport();
            if transport.is_running() {
                transport.close(self.config.server());
                transport.stop();
            }
        }
        self.state = State::Closed;
    }
}

impl<T: SecureTransport> Drop for VirtualClient<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}
