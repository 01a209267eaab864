//! Single-slot rendezvous between a waiting client thread and the transport's
//! receive callback.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Terminal result of one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeResult {
    /// The reply equals the payload that was sent.
    Success {
        response: Vec<u8>,
        elapsed: Duration,
    },

    /// A reply arrived, but not the one expected. Usually a late reply to an
    /// earlier exchange.
    Mismatch {
        response: Vec<u8>,
        elapsed: Duration,
    },

    /// Nothing arrived within the threshold.
    Timeout { elapsed: Duration },

    /// The wait was interrupted.
    Interrupted,
}

impl ExchangeResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExchangeResult::Success { .. })
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            ExchangeResult::Success { elapsed, .. }
            | ExchangeResult::Mismatch { elapsed, .. }
            | ExchangeResult::Timeout { elapsed } => Some(*elapsed),
            ExchangeResult::Interrupted => None,
        }
    }

    /// The reply, for the outcomes that carry one.
    pub fn response(&self) -> Option<&[u8]> {
        match self {
            ExchangeResult::Success { response, .. }
            | ExchangeResult::Mismatch { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Classify a delivered reply.
    ///
    /// Replies must be byte identical to what was sent.
    pub(crate) fn classify(sent: &[u8], response: Vec<u8>, elapsed: Duration) -> Self {
        if response == sent {
            ExchangeResult::Success { response, elapsed }
        } else {
            ExchangeResult::Mismatch { response, elapsed }
        }
    }
}

#[derive(Debug)]
enum Slot {
    Armed,
    Delivered(Vec<u8>),
    Interrupted,
    /// Consumed by the waiter, or abandoned after timeout. Final.
    Done,
}

/// What ended a wait.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Wake {
    Delivered(Vec<u8>),
    Interrupted,
    TimedOut,
}

/// One in-flight exchange.
///
/// Armed before the send, completed at most once, then discarded. Deliveries
/// after the first, or after the waiter gave up, are dropped.
#[derive(Debug)]
pub struct PendingExchange {
    slot: Mutex<Slot>,
    cond: Condvar,
}

impl PendingExchange {
    pub(crate) fn new() -> Self {
        PendingExchange {
            slot: Mutex::new(Slot::Armed),
            cond: Condvar::new(),
        }
    }

    /// Complete with a received payload.
    ///
    /// Returns false if the exchange was already completed or abandoned.
    pub(crate) fn deliver(&self, payload: &[u8]) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Armed) {
            return false;
        }
        *slot = Slot::Delivered(payload.to_vec());
        self.cond.notify_all();
        true
    }

    pub(crate) fn interrupt(&self) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Armed) {
            return false;
        }
        *slot = Slot::Interrupted;
        self.cond.notify_all();
        true
    }

    /// Block until completion or `deadline`.
    ///
    /// Leaves the slot `Done` whatever the outcome.
    pub(crate) fn wait_until(&self, deadline: Instant) -> Wake {
        let mut slot = self.slot.lock();

        loop {
            match std::mem::replace(&mut *slot, Slot::Done) {
                Slot::Delivered(payload) => return Wake::Delivered(payload),
                Slot::Interrupted => return Wake::Interrupted,
                Slot::Done => return Wake::TimedOut,
                Slot::Armed => *slot = Slot::Armed,
            }

            if Instant::now() >= deadline {
                *slot = Slot::Done;
                return Wake::TimedOut;
            }

            self.cond.wait_until(&mut slot, deadline);
        }
    }
}
