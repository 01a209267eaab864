//! Blocking send-and-wait over the transport's receive callback.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::exchange::{ExchangeResult, PendingExchange, Wake};
use crate::transport::SecureTransport;
use crate::Error;

/// Blocking request/response on top of an asynchronous transport.
///
/// Every exchange arms a fresh [`PendingExchange`] and rebinds the transport's
/// receiver to it before sending. Taking `&mut self` keeps a bridge to one
/// outstanding exchange. Share it between threads behind a `Mutex`, which then
/// covers the whole arm, send and wait sequence.
pub struct CorrelationBridge<T> {
    transport: T,
    interrupt: Arc<InterruptState>,
}

#[derive(Default)]
struct InterruptState {
    flag: AtomicBool,
    armed: Mutex<Option<Arc<PendingExchange>>>,
}

/// Interrupts the waiting thread of a [`CorrelationBridge`].
///
/// The interrupt stays raised until [`CorrelationBridge::clear_interrupt`].
/// While raised, every exchange ends as [`ExchangeResult::Interrupted`]
/// without sending.
#[derive(Clone)]
pub struct Interrupter {
    state: Arc<InterruptState>,
}

impl Interrupter {
    pub fn interrupt(&self) {
        self.state.flag.store(true, Ordering::SeqCst);
        if let Some(pending) = self.state.armed.lock().as_ref() {
            pending.interrupt();
        }
    }
}

impl<T: SecureTransport> CorrelationBridge<T> {
    pub fn new(transport: T) -> Self {
        CorrelationBridge {
            transport,
            interrupt: Arc::new(InterruptState::default()),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            state: self.interrupt.clone(),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.flag.load(Ordering::SeqCst)
    }

    /// Lower the interrupt. Returns whether it was raised.
    pub fn clear_interrupt(&self) -> bool {
        self.interrupt.flag.swap(false, Ordering::SeqCst)
    }

    /// Send `payload` and block until the reply, or until `timeout` elapsed.
    ///
    /// Only payloads from `destination` complete the exchange. Errors are
    /// reserved for sends the transport refused. A reply arriving after the
    /// timeout finds its exchange already closed and is dropped.
    pub fn send_and_await(
        &mut self,
        payload: &[u8],
        destination: SocketAddr,
        timeout: Duration,
    ) -> Result<ExchangeResult, Error> {
        if self.is_interrupted() {
            return Ok(ExchangeResult::Interrupted);
        }

        let pending = Arc::new(PendingExchange::new());

        let slot = pending.clone();
        self.transport.set_receiver(Arc::new(move |data: &[u8], from: SocketAddr| {
            if from != destination {
                trace!("Ignoring {} bytes from {}, expecting {}", data.len(), from, destination);
                return;
            }
            if !slot.deliver(data) {
                trace!("Dropping late reply ({} bytes) from {}", data.len(), from);
            }
        }));

        *self.interrupt.armed.lock() = Some(pending.clone());

        // An interrupt raised before arming did not see the exchange.
        if self.is_interrupted() {
            self.disarm();
            return Ok(ExchangeResult::Interrupted);
        }

        let start = Instant::now();

        if let Err(e) = self.transport.send(payload, destination) {
            self.disarm();
            return Err(e);
        }

        let wake = pending.wait_until(start + timeout);
        let elapsed = start.elapsed();
        self.disarm();

        Ok(match wake {
            Wake::Delivered(response) => ExchangeResult::classify(payload, response, elapsed),
            Wake::TimedOut => ExchangeResult::Timeout { elapsed },
            Wake::Interrupted => ExchangeResult::Interrupted,
        })
    }

    fn disarm(&self) {
        self.interrupt.armed.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::{Behavior, LoopbackTransport};
    use std::thread;

    fn dest() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 5684))
    }

    fn bridge(behavior: Behavior) -> CorrelationBridge<Arc<LoopbackTransport>> {
        let transport = Arc::new(LoopbackTransport::new(behavior));
        transport.start().unwrap();
        CorrelationBridge::new(transport)
    }

    #[test]
    fn echo_is_success() {
        let mut bridge = bridge(Behavior::Echo);
        let r = bridge
            .send_and_await(&[0x01], dest(), Duration::from_secs(4))
            .unwrap();

        assert!(r.is_success());
        assert_eq!(r.response(), Some(&[0x01][..]));
    }

    #[test]
    fn prefixed_reply_is_mismatch() {
        let mut bridge = bridge(Behavior::Prefix(b"ACK: ".to_vec()));
        let r = bridge
            .send_and_await(b"ping", dest(), Duration::from_secs(4))
            .unwrap();

        assert!(matches!(
            r,
            ExchangeResult::Mismatch { ref response, .. } if response == b"ACK: ping"
        ));
    }

    #[test]
    fn silence_is_timeout_after_threshold() {
        let mut bridge = bridge(Behavior::Silent);
        let start = Instant::now();
        let r = bridge
            .send_and_await(b"x", dest(), Duration::from_millis(100))
            .unwrap();

        match r {
            ExchangeResult::Timeout { elapsed } => {
                assert!(elapsed >= Duration::from_millis(100));
                assert!(start.elapsed() < Duration::from_secs(2));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn late_reply_lands_in_next_exchange_as_mismatch() {
        let mut bridge = bridge(Behavior::Delayed(Duration::from_millis(150)));

        let first = bridge
            .send_and_await(b"one", dest(), Duration::from_millis(30))
            .unwrap();
        assert!(matches!(first, ExchangeResult::Timeout { .. }));

        // The reply to "one" arrives while "two" is waiting.
        let second = bridge
            .send_and_await(b"two", dest(), Duration::from_secs(2))
            .unwrap();
        assert!(matches!(
            second,
            ExchangeResult::Mismatch { ref response, .. } if response == b"one"
        ));
    }

    #[test]
    fn late_reply_without_waiter_is_ignored() {
        let mut bridge = bridge(Behavior::Silent);
        let r = bridge
            .send_and_await(b"x", dest(), Duration::from_millis(10))
            .unwrap();
        assert!(matches!(r, ExchangeResult::Timeout { .. }));

        bridge.transport().inject(b"x", dest());

        bridge.transport().set_behavior(Behavior::Echo);
        let r = bridge
            .send_and_await(b"y", dest(), Duration::from_secs(2))
            .unwrap();
        assert!(r.is_success());
        assert_eq!(r.response(), Some(&b"y"[..]));
    }

    #[test]
    fn payload_from_other_source_is_ignored() {
        let mut bridge = bridge(Behavior::Silent);
        let transport = bridge.transport().clone();
        let stranger = SocketAddr::from(([10, 9, 8, 7], 5684));

        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            transport.inject(b"forged", stranger);
            thread::sleep(Duration::from_millis(20));
            transport.inject(b"x", dest());
        });

        let r = bridge
            .send_and_await(b"x", dest(), Duration::from_secs(2))
            .unwrap();
        t.join().unwrap();

        assert!(r.is_success(), "{:?}", r);
        assert_eq!(r.response(), Some(&b"x"[..]));
    }

    #[test]
    fn refused_send_is_error() {
        let mut bridge = bridge(Behavior::Echo);
        bridge.transport().stop();

        let r = bridge.send_and_await(b"x", dest(), Duration::from_millis(10));
        assert!(matches!(r, Err(Error::NotRunning)));
    }

    #[test]
    fn interrupt_wakes_waiter_and_stays_raised() {
        let mut bridge = bridge(Behavior::Silent);
        let interrupter = bridge.interrupter();

        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            interrupter.interrupt();
        });

        let start = Instant::now();
        let r = bridge
            .send_and_await(b"x", dest(), Duration::from_secs(10))
            .unwrap();
        t.join().unwrap();

        assert_eq!(r, ExchangeResult::Interrupted);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(bridge.is_interrupted());

        // Raised interrupt short circuits without sending.
        let sent_before = bridge.transport().sent().len();
        let r = bridge
            .send_and_await(b"y", dest(), Duration::from_secs(10))
            .unwrap();
        assert_eq!(r, ExchangeResult::Interrupted);
        assert_eq!(bridge.transport().sent().len(), sent_before);

        assert!(bridge.clear_interrupt());
        bridge.transport().set_behavior(Behavior::Echo);
        assert!(bridge
            .send_and_await(b"z", dest(), Duration::from_secs(2))
            .unwrap()
            .is_success());
    }

    #[test]
    fn shared_bridge_never_cross_delivers() {
        let shared = Arc::new(Mutex::new(bridge(Behavior::Delayed(Duration::from_millis(2)))));

        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for i in 0..10u32 {
                        let payload = (t * 100 + i).to_be_bytes();
                        let r = shared
                            .lock()
                            .send_and_await(&payload, dest(), Duration::from_secs(2))
                            .unwrap();
                        assert!(r.is_success(), "{:?}", r);
                        assert_eq!(r.response(), Some(&payload[..]));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
    }
}
