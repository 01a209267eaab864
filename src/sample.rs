//! Externally visible results of a load run.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::exchange::ExchangeResult;

/// Classification of one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Mismatch,
    Timeout,
    Interrupted,
    /// The exchange could not be attempted.
    Failed(String),
}

/// Result record of one request/response iteration.
#[derive(Debug, Clone)]
pub struct SampleResult {
    pub label: String,
    pub destination: SocketAddr,
    pub payload_description: String,
    pub elapsed: Duration,
    pub outcome: Outcome,
    pub response_message: String,
    /// Only kept for mismatches, for diagnostics.
    pub response_data: Option<Vec<u8>>,
}

impl SampleResult {
    pub(crate) fn new(request_no: u32, destination: SocketAddr) -> Self {
        SampleResult {
            label: format!("Snd/Rcv {}", request_no),
            destination,
            payload_description: format!(
                "host: {}, port: {}, msg: {}",
                destination.ip(),
                destination.port(),
                request_no
            ),
            elapsed: Duration::ZERO,
            outcome: Outcome::Failed("not run".into()),
            response_message: String::new(),
            response_data: None,
        }
    }

    pub(crate) fn record(&mut self, result: &ExchangeResult, threshold: Duration) {
        self.elapsed = result.elapsed().unwrap_or_default();

        match result {
            ExchangeResult::Success { .. } => {
                self.outcome = Outcome::Success;
                self.response_message = "OK".into();
            }
            ExchangeResult::Mismatch { response, .. } => {
                self.outcome = Outcome::Mismatch;
                self.response_message = "Error".into();
                self.response_data = Some(response.clone());
            }
            ExchangeResult::Timeout { .. } => {
                self.outcome = Outcome::Timeout;
                self.response_message = format!("Timeout after {} ms", threshold.as_millis());
            }
            ExchangeResult::Interrupted => {
                self.outcome = Outcome::Interrupted;
                self.response_message = "Interrupted".into();
            }
        }
    }

    pub(crate) fn fail(&mut self, reason: impl fmt::Display) {
        self.response_message = reason.to_string();
        self.outcome = Outcome::Failed(self.response_message.clone());
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Result of bringing a virtual client up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    Ok,
    Failed(String),
}

impl SetupOutcome {
    pub fn is_ok(&self) -> bool {
        *self == SetupOutcome::Ok
    }
}

/// Aggregate over many samples.
#[derive(Debug, Default, Clone)]
pub struct Summary {
    pub success: u64,
    pub mismatch: u64,
    pub timeout: u64,
    pub interrupted: u64,
    pub failed: u64,
    latencies: Vec<Duration>,
}

impl Summary {
    pub fn record(&mut self, sample: &SampleResult) {
        match sample.outcome {
            Outcome::Success => {
                self.success += 1;
                self.latencies.push(sample.elapsed);
            }
            Outcome::Mismatch => self.mismatch += 1,
            Outcome::Timeout => self.timeout += 1,
            Outcome::Interrupted => self.interrupted += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: Summary) {
        self.success += other.success;
        self.mismatch += other.mismatch;
        self.timeout += other.timeout;
        self.interrupted += other.interrupted;
        self.failed += other.failed;
        self.latencies.extend(other.latencies);
    }

    pub fn total(&self) -> u64 {
        self.success + self.mismatch + self.timeout + self.interrupted + self.failed
    }

    /// Latency at quantile `q` (0.0..=1.0) over successful samples.
    pub fn percentile(&self, q: f64) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let mut sorted = self.latencies.clone();
        sorted.sort_unstable();

        // Nearest rank.
        let rank = (q.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.saturating_sub(1)])
    }

    pub fn min(&self) -> Option<Duration> {
        self.latencies.iter().min().copied()
    }

    pub fn max(&self) -> Option<Duration> {
        self.latencies.iter().max().copied()
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let sum: Duration = self.latencies.iter().sum();
        Some(sum / self.latencies.len() as u32)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "samples={} ok={} mismatch={} timeout={} interrupted={} failed={}",
            self.total(),
            self.success,
            self.mismatch,
            self.timeout,
            self.interrupted,
            self.failed
        )?;

        if let (Some(min), Some(mean), Some(p50), Some(p99), Some(max)) = (
            self.min(),
            self.mean(),
            self.percentile(0.5),
            self.percentile(0.99),
            self.max(),
        ) {
            write!(
                f,
                " latency min={:?} mean={:?} p50={:?} p99={:?} max={:?}",
                min, mean, p50, p99, max
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest() -> SocketAddr {
        "127.0.0.1:5684".parse().unwrap()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn labels_follow_request_number() {
        let s = SampleResult::new(42, dest());
        assert_eq!(s.label, "Snd/Rcv 42");
        assert_eq!(s.payload_description, "host: 127.0.0.1, port: 5684, msg: 42");
    }

    #[test]
    fn record_maps_results() {
        let mut s = SampleResult::new(1, dest());
        s.record(
            &ExchangeResult::Mismatch {
                response: b"ACK".to_vec(),
                elapsed: ms(5),
            },
            ms(600),
        );
        assert_eq!(s.outcome, Outcome::Mismatch);
        assert_eq!(s.response_message, "Error");
        assert_eq!(s.response_data.as_deref(), Some(&b"ACK"[..]));
        assert_eq!(s.elapsed, ms(5));

        let mut s = SampleResult::new(2, dest());
        s.record(&ExchangeResult::Timeout { elapsed: ms(601) }, ms(600));
        assert_eq!(s.outcome, Outcome::Timeout);
        assert_eq!(s.response_message, "Timeout after 600 ms");

        let mut s = SampleResult::new(3, dest());
        s.fail("Transport is not running");
        assert_eq!(
            s.outcome,
            Outcome::Failed("Transport is not running".into())
        );
    }

    #[test]
    fn summary_statistics() {
        let mut summary = Summary::default();
        for (i, l) in [10, 20, 30, 40].iter().enumerate() {
            let mut s = SampleResult::new(i as u32, dest());
            s.record(
                &ExchangeResult::Success {
                    response: vec![],
                    elapsed: ms(*l),
                },
                ms(600),
            );
            summary.record(&s);
        }
        let mut t = SampleResult::new(9, dest());
        t.record(&ExchangeResult::Timeout { elapsed: ms(600) }, ms(600));
        summary.record(&t);

        assert_eq!(summary.total(), 5);
        assert_eq!(summary.success, 4);
        assert_eq!(summary.timeout, 1);
        assert_eq!(summary.min(), Some(ms(10)));
        assert_eq!(summary.max(), Some(ms(40)));
        assert_eq!(summary.mean(), Some(ms(25)));
        assert_eq!(summary.percentile(0.5), Some(ms(20)));
        assert_eq!(summary.percentile(0.99), Some(ms(40)));
        assert_eq!(summary.percentile(0.0), Some(ms(10)));

        let line = summary.to_string();
        assert!(line.starts_with("samples=5 ok=4 mismatch=0 timeout=1"));
        assert!(line.contains("p50=20ms"));
    }

    #[test]
    fn merge_adds_up() {
        let mut a = Summary::default();
        a.success = 1;
        a.latencies.push(ms(1));
        let mut b = Summary::default();
        b.timeout = 2;

        a.merge(b);
        assert_eq!(a.total(), 3);
        assert_eq!(a.percentile(1.0), Some(ms(1)));
    }

    #[test]
    fn empty_summary_has_no_latency() {
        let summary = Summary::default();
        assert_eq!(summary.percentile(0.5), None);
        assert_eq!(summary.mean(), None);
        assert_eq!(
            summary.to_string(),
            "samples=0 ok=0 mismatch=0 timeout=0 interrupted=0 failed=0"
        );
    }
}
